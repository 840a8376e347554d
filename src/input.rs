//! Input event handling.

use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use tracing::{error, warn};
use weir_wm::{BindingId, Keysym, Modifiers, SeatId, WindowId, WmEvent};

use crate::cursor::{Cursor, CursorMode};
use crate::geometry::Point;
use crate::windows::Windows;
use crate::wm::Wm;

/// First keysym of the `XF86Switch_VT_{1..12}` range.
const VT_SWITCH_FIRST: u32 = 0x1008fe01;

/// Last keysym of the `XF86Switch_VT_{1..12}` range.
const VT_SWITCH_LAST: u32 = 0x1008fe0c;

/// Offset between evdev and XKB keycodes.
const XKB_KEYCODE_OFFSET: u32 = 8;

/// Physical input device handle.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub struct DeviceId(pub u32);

/// Press state of a key or button event.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum KeyState {
    Pressed,
    Released,
}

/// Routing decision for an input event.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum InputFilter {
    /// The event was consumed by the compositor.
    Intercept,
    /// Deliver the event to the focused surface.
    Forward,
}

/// Keysym resolution against a keyboard's XKB state.
///
/// Keymap handling itself lives with the display-server runtime; the core
/// only ever asks for resolved syms.
pub trait XkbLookup {
    /// Keysym on the base layer of the given layout, ignoring modifiers.
    fn base_keysym(&self, keycode: u32, layout: Option<u32>) -> Option<Keysym>;

    /// Keysym with modifier translation applied, plus the modifiers the
    /// translation consumed.
    fn translated_keysym(&self, keycode: u32, layout: Option<u32>) -> Option<(Keysym, Modifiers)>;
}

/// Access to the login session backend.
pub trait Session {
    /// Switch the active virtual terminal.
    fn change_vt(&mut self, vt: u32) -> io::Result<()>;
}

/// Session backend for environments without VT control.
#[derive(Default)]
pub struct DummySession;

impl Session for DummySession {
    fn change_vt(&mut self, _vt: u32) -> io::Result<()> {
        Ok(())
    }
}

/// Binding trigger variants.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Trigger {
    Button(u32),
    Keysym(Keysym),
}

/// Double-buffered binding properties.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub struct BindingProps {
    pub enabled: bool,
    /// XKB layout pinned for keysym resolution.
    pub layout_override: Option<u32>,
}

/// Trigger registered by the window manager.
#[derive(Debug)]
pub struct Binding {
    pub id: BindingId,
    pub trigger: Trigger,
    pub mods: Modifiers,

    /// Properties staged by wm requests.
    pub uncommitted: BindingProps,
    /// Properties observable to input dispatch.
    pub committed: BindingProps,

    /// A `pressed` event is with the wm and not yet balanced.
    sent_pressed: bool,

    /// Number of devices currently holding the binding down.
    press_count: u32,
}

impl Binding {
    fn new(id: BindingId, trigger: Trigger, mods: Modifiers) -> Self {
        Self {
            id,
            trigger,
            mods,
            uncommitted: Default::default(),
            committed: Default::default(),
            sent_pressed: Default::default(),
            press_count: Default::default(),
        }
    }
}

/// Keyboard device attached to a seat.
pub struct Keyboard {
    pub device: DeviceId,
    pub mods: Modifiers,

    /// Key repeat rate in characters per second, sent with `repeat_info`.
    pub repeat_rate: i32,

    /// Key repeat delay in milliseconds, sent with `repeat_info`.
    pub repeat_delay: i32,

    xkb: Rc<dyn XkbLookup>,

    /// Keycodes whose press activated a binding; their release must not
    /// reach any surface.
    eaten: HashMap<u32, Option<BindingId>>,
}

impl Keyboard {
    fn new(device: DeviceId, xkb: Rc<dyn XkbLookup>, repeat_rate: i32, repeat_delay: i32) -> Self {
        Self {
            device,
            xkb,
            repeat_rate,
            repeat_delay,
            mods: Default::default(),
            eaten: Default::default(),
        }
    }
}

/// Point of an active touch sequence.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct TouchPoint {
    pub position: Point<f64>,
    pub window: Option<WindowId>,
}

/// Active touch input state.
#[derive(Default)]
pub struct TouchState {
    points: HashMap<i32, TouchPoint>,
}

impl TouchState {
    /// Handle a new touch point.
    ///
    /// Returns the window which should receive `touch_down`.
    pub fn down(&mut self, slot: i32, position: Point<f64>, windows: &Windows) -> Option<WindowId> {
        let window = windows.window_at(position);
        self.points.insert(slot, TouchPoint { position, window });
        window
    }

    /// Update a touch point's location.
    pub fn motion(&mut self, slot: i32, position: Point<f64>) -> Option<WindowId> {
        let point = self.points.get_mut(&slot)?;
        point.position = position;
        point.window
    }

    /// Remove a touch point.
    pub fn up(&mut self, slot: i32) -> Option<WindowId> {
        self.points.remove(&slot).and_then(|point| point.window)
    }

    /// Clear all touch points.
    ///
    /// Returns every window which held a point, for cancel broadcast.
    pub fn cancel(&mut self) -> Vec<WindowId> {
        let mut windows: Vec<_> =
            self.points.drain().filter_map(|(_, point)| point.window).collect();
        windows.sort_unstable();
        windows.dedup();
        windows
    }

    /// Get a touch point's location.
    pub fn position(&self, slot: i32) -> Option<Point<f64>> {
        self.points.get(&slot).map(|point| point.position)
    }

    /// Check if any touch sequence is active.
    pub fn touching(&self) -> bool {
        !self.points.is_empty()
    }
}

/// Logical input focus domain.
pub struct Seat {
    pub id: SeatId,
    pub name: String,
    pub cursor: Cursor,
    pub touch: TouchState,

    keyboards: Vec<Keyboard>,
    bindings: Vec<Binding>,

    /// Current keyboard focus.
    focus: Option<WindowId>,

    /// Keyboard focus staged by the wm.
    staged_focus: Option<Option<WindowId>>,

    /// Latest modifier state across the seat's keyboards.
    mods: Modifiers,

    /// Bindings don't fire, e.g. while the session is locked.
    bindings_inert: bool,
}

impl Seat {
    pub fn new(id: SeatId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            cursor: Cursor::new(id),
            touch: Default::default(),
            keyboards: Default::default(),
            bindings: Default::default(),
            focus: Default::default(),
            staged_focus: Default::default(),
            mods: Default::default(),
            bindings_inert: Default::default(),
        }
    }

    /// Suspend or resume binding dispatch.
    ///
    /// Eaten keycodes and pressed buttons keep draining normally, so a hold
    /// crossing the session lock stays balanced.
    pub fn set_bindings_inert(&mut self, inert: bool) {
        self.bindings_inert = inert;
    }

    /// Current keyboard focus.
    pub fn focus(&self) -> Option<WindowId> {
        self.focus
    }

    /// Attach a keyboard device.
    pub fn add_keyboard(
        &mut self,
        device: DeviceId,
        xkb: Rc<dyn XkbLookup>,
        repeat_rate: i32,
        repeat_delay: i32,
    ) {
        self.keyboards.push(Keyboard::new(device, xkb, repeat_rate, repeat_delay));
    }

    /// Remove a keyboard device.
    pub fn remove_keyboard(&mut self, device: DeviceId) {
        self.keyboards.retain(|keyboard| keyboard.device != device);
    }

    /// Get a keyboard by its device.
    pub fn keyboard(&self, device: DeviceId) -> Option<&Keyboard> {
        self.keyboards.iter().find(|keyboard| keyboard.device == device)
    }

    /// Update a keyboard's modifier state.
    pub fn handle_modifiers(&mut self, device: DeviceId, mods: Modifiers) {
        if let Some(keyboard) = self.keyboards.iter_mut().find(|k| k.device == device) {
            keyboard.mods = mods;
        }
        self.mods = mods;
    }

    /// Register a new binding.
    pub fn add_binding(&mut self, id: BindingId, trigger: Trigger, mods: Modifiers) {
        if self.bindings.iter().any(|binding| binding.id == id) {
            warn!("ignoring duplicate binding id {id}");
            return;
        }

        self.bindings.push(Binding::new(id, trigger, mods));
    }

    /// Drop a binding.
    ///
    /// Pressed-table slots referring to the binding are cleared, so later
    /// releases stay eaten without producing events for a dead binding.
    pub fn destroy_binding(&mut self, id: BindingId) {
        self.bindings.retain(|binding| binding.id != id);

        for keyboard in &mut self.keyboards {
            for slot in keyboard.eaten.values_mut().filter(|slot| **slot == Some(id)) {
                *slot = None;
            }
        }
        self.cursor.clear_binding_slots(id);
    }

    /// Get mutable access to a binding.
    pub fn binding_mut(&mut self, id: BindingId) -> Option<&mut Binding> {
        self.bindings.iter_mut().find(|binding| binding.id == id)
    }

    /// Check if the seat owns a binding.
    pub fn owns_binding(&self, id: BindingId) -> bool {
        self.bindings.iter().any(|binding| binding.id == id)
    }

    /// Drop all bindings, e.g. after the wm connection died.
    pub fn clear_bindings(&mut self) {
        self.bindings.clear();

        for keyboard in &mut self.keyboards {
            for slot in keyboard.eaten.values_mut() {
                *slot = None;
            }
        }
        self.cursor.clear_all_binding_slots();
    }

    /// Stage the seat's keyboard focus for the next wm commit.
    pub fn stage_focus(&mut self, window: Option<WindowId>) {
        self.staged_focus = Some(window);
    }

    /// Promote staged bindings and focus.
    ///
    /// Returns `true` when the focus change mutated pending window state.
    pub fn promote_staged(&mut self, windows: &mut Windows) -> bool {
        for binding in &mut self.bindings {
            binding.committed = binding.uncommitted;
        }

        let target = match self.staged_focus.take() {
            Some(target) if target != self.focus => target,
            _ => return false,
        };

        if let Some(old) = self.focus.and_then(|id| windows.get(id)) {
            let mut old = old.borrow_mut();
            let focus_count = &mut old.pending_mut().focus_count;
            *focus_count = focus_count.saturating_sub(1);
        }
        if let Some(new) = target.and_then(|id| windows.get(id)) {
            new.borrow_mut().pending_mut().focus_count += 1;
        }

        self.focus = target;
        true
    }

    /// Clear focus of a window which is going away.
    pub fn clear_window(&mut self, window: WindowId) {
        if self.focus == Some(window) {
            self.focus = None;
        }
        if self.staged_focus == Some(Some(window)) {
            self.staged_focus = None;
        }
    }

    /// Handle a keyboard key event.
    pub fn handle_key(
        &mut self,
        device: DeviceId,
        keycode: u32,
        state: KeyState,
        session: &mut dyn Session,
        wm: &mut Wm,
    ) -> InputFilter {
        let index = match self.keyboards.iter().position(|k| k.device == device) {
            Some(index) => index,
            None => return InputFilter::Forward,
        };

        let keycode = keycode + XKB_KEYCODE_OFFSET;

        match state {
            KeyState::Pressed => self.handle_key_press(index, keycode, session, wm),
            KeyState::Released => match self.keyboards[index].eaten.remove(&keycode) {
                Some(slot) => {
                    if let Some(id) = slot {
                        self.release_binding(id, wm);
                    }
                    InputFilter::Intercept
                },
                None => InputFilter::Forward,
            },
        }
    }

    fn handle_key_press(
        &mut self,
        index: usize,
        keycode: u32,
        session: &mut dyn Session,
        wm: &mut Wm,
    ) -> InputFilter {
        let xkb = self.keyboards[index].xkb.clone();
        let mods = self.keyboards[index].mods;

        // Built-in VT switching runs before user bindings.
        if let Some((keysym, _)) = xkb.translated_keysym(keycode, None) {
            if let Some(vt) = vt_switch_target(keysym) {
                match session.change_vt(vt) {
                    Ok(()) => {
                        self.keyboards[index].eaten.insert(keycode, None);
                        return InputFilter::Intercept;
                    },
                    Err(err) => error!("vt switch to {vt} failed: {err}"),
                }
            }
        }

        if self.bindings_inert {
            return InputFilter::Forward;
        }

        // First pass matches the base layer with raw modifiers, the second
        // pass applies XKB translation and drops the consumed modifiers.
        let mut matched = None;
        for binding in self.bindings.iter().filter(|binding| binding.committed.enabled) {
            let keysym = match binding.trigger {
                Trigger::Keysym(keysym) => keysym,
                Trigger::Button(_) => continue,
            };

            let layout = binding.committed.layout_override;
            if xkb.base_keysym(keycode, layout) == Some(keysym) && mods == binding.mods {
                matched = Some(binding.id);
                break;
            }
        }
        if matched.is_none() {
            for binding in self.bindings.iter().filter(|binding| binding.committed.enabled) {
                let keysym = match binding.trigger {
                    Trigger::Keysym(keysym) => keysym,
                    Trigger::Button(_) => continue,
                };

                let layout = binding.committed.layout_override;
                if let Some((translated, consumed)) = xkb.translated_keysym(keycode, layout) {
                    if translated == keysym && strip_consumed(mods, consumed) == binding.mods {
                        matched = Some(binding.id);
                        break;
                    }
                }
            }
        }

        match matched {
            Some(id) => {
                self.keyboards[index].eaten.insert(keycode, Some(id));
                self.press_binding(id, wm);
                InputFilter::Intercept
            },
            None => InputFilter::Forward,
        }
    }

    /// Handle a pointer button event.
    pub fn handle_pointer_button(
        &mut self,
        button: u32,
        state: KeyState,
        windows: &Windows,
        wm: &mut Wm,
    ) -> InputFilter {
        match state {
            KeyState::Pressed => self.handle_button_press(button, windows, wm),
            KeyState::Released => {
                let was_ignoring = matches!(self.cursor.mode(), CursorMode::Ignore);

                match self.cursor.release_button(button) {
                    Some(Some(id)) => {
                        self.release_binding(id, wm);
                        if self.cursor.pressed_empty() {
                            self.cursor.end_op();
                        }
                        self.cursor.exit_ignore();
                        InputFilter::Intercept
                    },
                    Some(None) => {
                        if self.cursor.pressed_empty() {
                            self.cursor.exit_down();
                            self.cursor.end_op();
                            self.cursor.exit_ignore();
                        }

                        if was_ignoring {
                            InputFilter::Intercept
                        } else {
                            InputFilter::Forward
                        }
                    },
                    None => InputFilter::Forward,
                }
            },
        }
    }

    fn handle_button_press(&mut self, button: u32, windows: &Windows, wm: &mut Wm) -> InputFilter {
        let mods = self.mods;
        let matched = self
            .bindings
            .iter()
            .find(|binding| {
                binding.committed.enabled
                    && binding.trigger == Trigger::Button(button)
                    && binding.mods == mods
            })
            .map(|binding| binding.id);

        if let Some(id) = matched {
            if !self.cursor.press_button(button, Some(id)) {
                error!("ignoring duplicate press for button {button:#x}");
                return InputFilter::Intercept;
            }

            self.press_binding(id, wm);
            self.cursor.start_ignore();
            return InputFilter::Intercept;
        }

        if !self.cursor.press_button(button, None) {
            error!("ignoring duplicate press for button {button:#x}");
            return InputFilter::Intercept;
        }

        if matches!(self.cursor.mode(), CursorMode::Passthrough) {
            match self.cursor.pointer_focus() {
                Some(window) => {
                    self.cursor.start_down(window, windows);
                    InputFilter::Forward
                },
                // Press over empty desktop swallows the button.
                None => {
                    self.cursor.start_ignore();
                    InputFilter::Intercept
                },
            }
        } else if matches!(self.cursor.mode(), CursorMode::Down { .. }) {
            InputFilter::Forward
        } else {
            InputFilter::Intercept
        }
    }

    /// Record a binding press, notifying the wm once per hold.
    fn press_binding(&mut self, id: BindingId, wm: &mut Wm) {
        let binding = match self.binding_mut(id) {
            Some(binding) => binding,
            None => return,
        };

        binding.press_count += 1;

        // Suppress duplicate presses while another device holds the binding.
        if !binding.sent_pressed {
            binding.sent_pressed = true;
            wm.push(WmEvent::BindingPressed { id });
        }
    }

    /// Record a binding release, notifying the wm once the hold ends.
    fn release_binding(&mut self, id: BindingId, wm: &mut Wm) {
        let binding = match self.binding_mut(id) {
            Some(binding) => binding,
            // Destroyed mid-press; the release is a no-op.
            None => return,
        };

        binding.press_count = binding.press_count.saturating_sub(1);

        if binding.press_count == 0 && binding.sent_pressed {
            binding.sent_pressed = false;
            wm.push(WmEvent::BindingReleased { id });
        }
    }
}

/// Map a keysym onto its VT switch target.
fn vt_switch_target(keysym: Keysym) -> Option<u32> {
    (VT_SWITCH_FIRST..=VT_SWITCH_LAST)
        .contains(&keysym.0)
        .then(|| keysym.0 - VT_SWITCH_FIRST + 1)
}

/// Remove consumed modifiers from a modifier mask.
fn strip_consumed(mods: Modifiers, consumed: Modifiers) -> Modifiers {
    Modifiers {
        control: mods.control && !consumed.control,
        shift: mods.shift && !consumed.shift,
        logo: mods.logo && !consumed.logo,
        alt: mods.alt && !consumed.alt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::CursorMode;

    /// Static keymap for tests; keycode -> (base, translated, consumed).
    struct TestXkb {
        keys: HashMap<u32, (Keysym, Keysym, Modifiers)>,
    }

    impl TestXkb {
        fn new(keys: &[(u32, u32)]) -> Rc<Self> {
            let keys = keys
                .iter()
                .map(|&(keycode, keysym)| {
                    (keycode, (Keysym(keysym), Keysym(keysym), Modifiers::default()))
                })
                .collect();
            Rc::new(Self { keys })
        }
    }

    impl XkbLookup for TestXkb {
        fn base_keysym(&self, keycode: u32, _layout: Option<u32>) -> Option<Keysym> {
            self.keys.get(&keycode).map(|(base, _, _)| *base)
        }

        fn translated_keysym(
            &self,
            keycode: u32,
            _layout: Option<u32>,
        ) -> Option<(Keysym, Modifiers)> {
            self.keys.get(&keycode).map(|(_, translated, consumed)| (*translated, *consumed))
        }
    }

    #[derive(Default)]
    struct TestSession {
        vts: Vec<u32>,
    }

    impl Session for TestSession {
        fn change_vt(&mut self, vt: u32) -> io::Result<()> {
            self.vts.push(vt);
            Ok(())
        }
    }

    const KEY_N: u32 = 49;
    const KEYSYM_N: u32 = 0x6e;

    fn super_mods() -> Modifiers {
        Modifiers { logo: true, ..Default::default() }
    }

    fn seat_with_binding() -> Seat {
        let mut seat = Seat::new(SeatId(1), "seat0");
        seat.add_keyboard(DeviceId(1), TestXkb::new(&[(KEY_N + 8, KEYSYM_N)]), 25, 200);
        seat.add_binding(BindingId(1), Trigger::Keysym(Keysym(KEYSYM_N)), super_mods());

        let binding = seat.binding_mut(BindingId(1)).unwrap();
        binding.uncommitted.enabled = true;
        binding.committed = binding.uncommitted;

        seat
    }

    #[test]
    fn binding_press_is_eaten() {
        let mut seat = seat_with_binding();
        let mut session = TestSession::default();
        let mut wm = Wm::new();

        seat.handle_modifiers(DeviceId(1), super_mods());
        let press = seat.handle_key(DeviceId(1), KEY_N, KeyState::Pressed, &mut session, &mut wm);
        assert_eq!(press, InputFilter::Intercept);
        assert_eq!(wm.staged_events(), [WmEvent::BindingPressed { id: BindingId(1) }]);

        // The matching release is eaten exactly once.
        let release =
            seat.handle_key(DeviceId(1), KEY_N, KeyState::Released, &mut session, &mut wm);
        assert_eq!(release, InputFilter::Intercept);
        assert_eq!(wm.staged_events()[1], WmEvent::BindingReleased { id: BindingId(1) });

        // A second release was never eaten and reaches the surface.
        let release =
            seat.handle_key(DeviceId(1), KEY_N, KeyState::Released, &mut session, &mut wm);
        assert_eq!(release, InputFilter::Forward);
    }

    #[test]
    fn disabled_binding_forwards() {
        let mut seat = seat_with_binding();
        let mut session = TestSession::default();
        let mut wm = Wm::new();

        seat.binding_mut(BindingId(1)).unwrap().committed.enabled = false;

        seat.handle_modifiers(DeviceId(1), super_mods());
        let press = seat.handle_key(DeviceId(1), KEY_N, KeyState::Pressed, &mut session, &mut wm);
        assert_eq!(press, InputFilter::Forward);
        assert!(wm.staged_events().is_empty());
    }

    #[test]
    fn duplicate_press_suppressed_across_keyboards() {
        let mut seat = seat_with_binding();
        seat.add_keyboard(DeviceId(2), TestXkb::new(&[(KEY_N + 8, KEYSYM_N)]), 25, 200);
        let mut session = TestSession::default();
        let mut wm = Wm::new();

        seat.handle_modifiers(DeviceId(1), super_mods());
        seat.handle_key(DeviceId(1), KEY_N, KeyState::Pressed, &mut session, &mut wm);
        seat.handle_modifiers(DeviceId(2), super_mods());
        seat.handle_key(DeviceId(2), KEY_N, KeyState::Pressed, &mut session, &mut wm);

        // Exactly one pressed for two holders.
        assert_eq!(wm.staged_events(), [WmEvent::BindingPressed { id: BindingId(1) }]);

        // Releasing the first holder keeps the binding down.
        seat.handle_key(DeviceId(1), KEY_N, KeyState::Released, &mut session, &mut wm);
        assert_eq!(wm.staged_events().len(), 1);

        // The final holder's release balances the press.
        seat.handle_key(DeviceId(2), KEY_N, KeyState::Released, &mut session, &mut wm);
        assert_eq!(wm.staged_events()[1], WmEvent::BindingReleased { id: BindingId(1) });
    }

    #[test]
    fn vt_switch_consumes_key() {
        let mut seat = Seat::new(SeatId(1), "seat0");
        seat.add_keyboard(DeviceId(1), TestXkb::new(&[(50, VT_SWITCH_FIRST + 1)]), 25, 200);
        let mut session = TestSession::default();
        let mut wm = Wm::new();

        let press = seat.handle_key(DeviceId(1), 42, KeyState::Pressed, &mut session, &mut wm);
        assert_eq!(press, InputFilter::Intercept);
        assert_eq!(session.vts, [2]);
        assert!(wm.staged_events().is_empty());

        // The release is eaten without reaching any surface.
        let release = seat.handle_key(DeviceId(1), 42, KeyState::Released, &mut session, &mut wm);
        assert_eq!(release, InputFilter::Intercept);
    }

    #[test]
    fn pointer_press_without_surface_enters_ignore() {
        let mut seat = Seat::new(SeatId(1), "seat0");
        let windows = Windows::new();
        let mut wm = Wm::new();

        let press = seat.handle_pointer_button(0x110, KeyState::Pressed, &windows, &mut wm);
        assert_eq!(press, InputFilter::Intercept);
        assert_eq!(*seat.cursor.mode(), CursorMode::Ignore);
        assert_eq!(seat.cursor.pointer_focus(), None);

        let release = seat.handle_pointer_button(0x110, KeyState::Released, &windows, &mut wm);
        assert_eq!(release, InputFilter::Intercept);
        assert_eq!(*seat.cursor.mode(), CursorMode::Passthrough);
    }

    #[test]
    fn pointer_binding_enters_ignore_and_releases() {
        let mut seat = Seat::new(SeatId(1), "seat0");
        seat.add_binding(BindingId(7), Trigger::Button(0x110), Modifiers::default());
        let binding = seat.binding_mut(BindingId(7)).unwrap();
        binding.uncommitted.enabled = true;
        binding.committed = binding.uncommitted;

        let windows = Windows::new();
        let mut wm = Wm::new();

        let press = seat.handle_pointer_button(0x110, KeyState::Pressed, &windows, &mut wm);
        assert_eq!(press, InputFilter::Intercept);
        assert_eq!(*seat.cursor.mode(), CursorMode::Ignore);
        assert_eq!(wm.staged_events(), [WmEvent::BindingPressed { id: BindingId(7) }]);

        let release = seat.handle_pointer_button(0x110, KeyState::Released, &windows, &mut wm);
        assert_eq!(release, InputFilter::Intercept);
        assert_eq!(*seat.cursor.mode(), CursorMode::Passthrough);
        assert_eq!(wm.staged_events()[1], WmEvent::BindingReleased { id: BindingId(7) });
    }

    #[test]
    fn keyboards_carry_repeat_config() {
        let mut seat = Seat::new(SeatId(1), "seat0");
        seat.add_keyboard(DeviceId(1), TestXkb::new(&[]), 30, 400);

        let keyboard = seat.keyboard(DeviceId(1)).unwrap();
        assert_eq!((keyboard.repeat_rate, keyboard.repeat_delay), (30, 400));
    }

    #[test]
    fn touch_sequences_track_their_window() {
        use crate::geometry::{Rectangle, Size};
        use crate::windows::surface::ToplevelHandle;

        let mut windows = Windows::new();
        let id = windows.add(ToplevelHandle::new());
        windows.get(id).unwrap().borrow_mut().pending_mut().rect =
            Rectangle::new(Point::from((0, 0)), Size::from((100, 100)));
        windows.apply_pending_all();
        windows.surface_commit(id, Size::from((100, 100)));
        windows.timeout_transaction();

        let mut touch = TouchState::default();
        assert_eq!(touch.down(1, Point::from((50., 50.)), &windows), Some(id));
        assert_eq!(touch.down(2, Point::from((500., 50.)), &windows), None);
        assert!(touch.touching());

        assert_eq!(touch.motion(1, Point::from((60., 60.))), Some(id));
        assert_eq!(touch.position(1), Some(Point::from((60., 60.))));

        // Cancel clears the whole table and names every touched window once.
        assert_eq!(touch.up(2), None);
        assert_eq!(touch.cancel(), [id]);
        assert!(!touch.touching());
    }

    #[test]
    fn destroyed_binding_release_is_noop() {
        let mut seat = seat_with_binding();
        let mut session = TestSession::default();
        let mut wm = Wm::new();

        seat.handle_modifiers(DeviceId(1), super_mods());
        seat.handle_key(DeviceId(1), KEY_N, KeyState::Pressed, &mut session, &mut wm);
        seat.destroy_binding(BindingId(1));

        // Still eaten, but no released event for the dead binding.
        let release =
            seat.handle_key(DeviceId(1), KEY_N, KeyState::Released, &mut session, &mut wm);
        assert_eq!(release, InputFilter::Intercept);
        assert_eq!(wm.staged_events(), [WmEvent::BindingPressed { id: BindingId(1) }]);
    }
}
