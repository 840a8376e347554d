//! Cursor state and pointer event routing.

use std::collections::HashMap;

use weir_wm::{BindingId, Edges, SeatId, WindowId};

use crate::geometry::{Point, Rectangle};
use crate::windows::Windows;

/// Modes of the pointer pipeline.
#[derive(Default, PartialEq, Clone, Debug)]
pub enum CursorMode {
    /// Deliver pointer events to the surface under the cursor.
    #[default]
    Passthrough,
    /// Keep delivering motion to the surface the buttons went down on.
    Down { window: WindowId, lx: f64, ly: f64, sx: f64, sy: f64 },
    /// Swallow all pointer events.
    Ignore,
    /// Drive an interactive operation with accumulated motion.
    Op(Operation),
}

/// Interactive operation state.
#[derive(PartialEq, Clone, Debug)]
pub struct Operation {
    /// Sub-pixel motion carry, so slow high-DPI movement is not lost.
    delta_x: f64,
    delta_y: f64,

    pub kind: OperationKind,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self { delta_x: 0., delta_y: 0., kind }
    }
}

/// Interactive operation variants.
#[derive(PartialEq, Copy, Clone, Debug)]
pub enum OperationKind {
    Move { window: WindowId },
    Resize { window: WindowId, edges: Edges, initial_width: i32, initial_height: i32 },
}

/// Pointer constraint requested by a client.
#[derive(PartialEq, Clone, Debug)]
pub struct PointerConstraint {
    pub window: WindowId,
    pub kind: ConstraintKind,
    /// Constraint region in window-local coordinates; `None` spans the
    /// window's full bounds.
    pub region: Option<Rectangle<f64>>,
    /// Armed constraints activate once the cursor enters the region.
    pub active: bool,
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ConstraintKind {
    Locked,
    Confined,
}

/// Drag icon following the cursor.
#[derive(PartialEq, Clone, Debug)]
pub struct DragIcon {
    pub seat: SeatId,
    pub position: Point<f64>,
    pub offset: Point<f64>,
}

/// Seat cursor state.
#[derive(Default)]
pub struct Cursor {
    position: Point<f64>,
    mode: CursorMode,

    /// Pressed buttons and the binding which claimed them.
    pressed: HashMap<u32, Option<BindingId>>,

    /// Window currently holding pointer focus.
    focus: Option<WindowId>,

    constraint: Option<PointerConstraint>,

    /// Drag icons following the cursor; entries sourced from other seats
    /// are left alone when repositioning.
    drag_icons: Vec<DragIcon>,

    /// Seat the cursor belongs to.
    seat: SeatId,
}

impl Cursor {
    pub fn new(seat: SeatId) -> Self {
        Self { seat, ..Default::default() }
    }

    pub fn position(&self) -> Point<f64> {
        self.position
    }

    pub fn mode(&self) -> &CursorMode {
        &self.mode
    }

    /// Window receiving pointer events.
    pub fn pointer_focus(&self) -> Option<WindowId> {
        self.focus
    }

    /// Surface-local position for motion forwarded in `down` mode.
    pub fn down_position(&self) -> Option<Point<f64>> {
        match self.mode {
            CursorMode::Down { lx, ly, sx, sy, .. } => {
                Some(Point::from((sx + self.position.x - lx, sy + self.position.y - ly)))
            },
            _ => None,
        }
    }

    /// Handle relative pointer motion.
    ///
    /// Returns `true` when the motion mutated pending layout state and a new
    /// transaction is required.
    pub fn handle_motion(&mut self, delta: Point<f64>, windows: &mut Windows) -> bool {
        let layout_changed = match self.mode {
            CursorMode::Passthrough => {
                if let Some(delta) = self.constrain_motion(delta, windows) {
                    self.position += delta;
                    self.update_focus(windows);
                }
                false
            },
            // Motion moves the cursor without any focus change.
            CursorMode::Down { .. } | CursorMode::Ignore => {
                self.position += delta;
                false
            },
            CursorMode::Op(_) => self.motion_op(delta, windows),
        };

        // Reposition drag icons sourced from this seat.
        let position = self.position;
        for icon in self.drag_icons.iter_mut().filter(|icon| icon.seat == self.seat) {
            icon.position = position + icon.offset;
        }

        layout_changed
    }

    /// Accumulate motion for an interactive operation.
    fn motion_op(&mut self, delta: Point<f64>, windows: &mut Windows) -> bool {
        self.position += delta;

        let op = match &mut self.mode {
            CursorMode::Op(op) => op,
            _ => unreachable!("op motion outside of op mode"),
        };

        // Extract whole-pixel displacement, carrying the fraction over.
        op.delta_x += delta.x;
        op.delta_y += delta.y;
        let dx = op.delta_x.trunc();
        let dy = op.delta_y.trunc();
        op.delta_x -= dx;
        op.delta_y -= dy;

        let (dx, dy) = (dx as i32, dy as i32);
        if dx == 0 && dy == 0 {
            return false;
        }

        match op.kind {
            OperationKind::Move { window } => {
                let window = match windows.get(window) {
                    Some(window) => window,
                    None => return false,
                };

                let mut window = window.borrow_mut();
                window.pending_mut().rect.loc += Point::from((dx, dy));
                true
            },
            OperationKind::Resize { window, edges, .. } => {
                let window = match windows.get(window) {
                    Some(window) => window,
                    None => return false,
                };

                let mut window = window.borrow_mut();
                let rect = &mut window.pending_mut().rect;
                if edges.right {
                    rect.size.w += dx;
                } else if edges.left {
                    rect.size.w -= dx;
                    rect.loc.x += dx;
                }
                if edges.bottom {
                    rect.size.h += dy;
                } else if edges.top {
                    rect.size.h -= dy;
                    rect.loc.y += dy;
                }
                rect.size.w = rect.size.w.max(1);
                rect.size.h = rect.size.h.max(1);
                true
            },
        }
    }

    /// Apply the active pointer constraint to a motion delta.
    ///
    /// Locked constraints swallow motion entirely, confined constraints clip
    /// the resulting position to the constraint region.
    fn constrain_motion(&self, delta: Point<f64>, windows: &Windows) -> Option<Point<f64>> {
        let constraint = match &self.constraint {
            Some(constraint) if constraint.active => constraint,
            _ => return Some(delta),
        };

        match constraint.kind {
            ConstraintKind::Locked => None,
            ConstraintKind::Confined => {
                let region = self.constraint_region(constraint, windows)?;
                let target = region.clamp(self.position + delta);
                Some(target - self.position)
            },
        }
    }

    /// Constraint region in layout coordinates.
    fn constraint_region(
        &self,
        constraint: &PointerConstraint,
        windows: &Windows,
    ) -> Option<Rectangle<f64>> {
        let window = windows.get(constraint.window)?;
        let bounds = window.borrow().current().rect.to_f64();

        let mut region = constraint.region.unwrap_or(Rectangle::from_size(bounds.size));
        region.loc += bounds.loc;
        Some(region)
    }

    /// Update pointer focus to the window under the cursor.
    fn update_focus(&mut self, windows: &Windows) {
        self.focus = windows.window_at(self.position);

        // Arm or disarm the constraint against the new focus.
        let mut constraint = match self.constraint.take() {
            Some(constraint) => constraint,
            None => return,
        };

        if Some(constraint.window) != self.focus {
            constraint.active = false;
        } else if !constraint.active {
            constraint.active = self
                .constraint_region(&constraint, windows)
                .is_some_and(|region| region.contains(self.position));
        }

        self.constraint = Some(constraint);
    }

    /// Attach a drag icon at an offset from the cursor.
    pub fn add_drag_icon(&mut self, offset: Point<f64>) {
        let position = self.position + offset;
        self.drag_icons.push(DragIcon { seat: self.seat, position, offset });
    }

    /// Drop this seat's drag icons, e.g. once the drag ends.
    pub fn clear_drag_icons(&mut self) {
        let seat = self.seat;
        self.drag_icons.retain(|icon| icon.seat != seat);
    }

    /// Drag icons currently following the cursor.
    pub fn drag_icons(&self) -> &[DragIcon] {
        &self.drag_icons
    }

    /// Attach or replace the pointer constraint.
    pub fn set_constraint(&mut self, constraint: Option<PointerConstraint>) {
        self.constraint = constraint;
    }

    pub fn constraint(&self) -> Option<&PointerConstraint> {
        self.constraint.as_ref()
    }

    /// Record a button press.
    ///
    /// Returns `false` for duplicate presses, which are protocol misuse and
    /// must not change any state.
    pub fn press_button(&mut self, button: u32, binding: Option<BindingId>) -> bool {
        if self.pressed.contains_key(&button) {
            return false;
        }

        self.pressed.insert(button, binding);
        true
    }

    /// Record a button release.
    pub fn release_button(&mut self, button: u32) -> Option<Option<BindingId>> {
        self.pressed.remove(&button)
    }

    pub fn pressed_empty(&self) -> bool {
        self.pressed.is_empty()
    }

    /// Clear pressed-table slots referring to a destroyed binding.
    ///
    /// The buttons stay pressed; their releases are handled as unbound.
    pub fn clear_binding_slots(&mut self, id: BindingId) {
        for slot in self.pressed.values_mut().filter(|slot| **slot == Some(id)) {
            *slot = None;
        }
    }

    /// Clear all binding slots, e.g. after the wm connection died.
    pub fn clear_all_binding_slots(&mut self) {
        for slot in self.pressed.values_mut() {
            *slot = None;
        }
    }

    /// Enter `down` mode targeting the focused window.
    pub fn start_down(&mut self, window: WindowId, windows: &Windows) {
        let rect = match windows.get(window) {
            Some(window) => window.borrow().current().rect,
            None => return,
        };

        self.mode = CursorMode::Down {
            window,
            lx: self.position.x,
            ly: self.position.y,
            sx: self.position.x - rect.loc.x as f64,
            sy: self.position.y - rect.loc.y as f64,
        };
    }

    /// Enter `ignore` mode, clearing pointer focus.
    pub fn start_ignore(&mut self) {
        self.mode = CursorMode::Ignore;
        self.focus = None;
        self.deactivate_constraint();
    }

    /// Leave `ignore` mode once nothing sustains it.
    ///
    /// Calling this while buttons are still held is a no-op, as is calling
    /// it repeatedly.
    pub fn exit_ignore(&mut self) {
        if matches!(self.mode, CursorMode::Ignore) && self.pressed.is_empty() {
            self.mode = CursorMode::Passthrough;
        }
    }

    /// Leave `down` mode once the final button was released.
    pub fn exit_down(&mut self) {
        if matches!(self.mode, CursorMode::Down { .. }) && self.pressed.is_empty() {
            self.mode = CursorMode::Passthrough;
        }
    }

    /// Enter an interactive operation.
    pub fn start_op(&mut self, kind: OperationKind) {
        self.mode = CursorMode::Op(Operation::new(kind));
        self.focus = None;
        self.deactivate_constraint();
    }

    /// Window targeted by the active interactive operation.
    pub fn op_window(&self) -> Option<WindowId> {
        match &self.mode {
            CursorMode::Op(op) => match op.kind {
                OperationKind::Move { window } | OperationKind::Resize { window, .. } => {
                    Some(window)
                },
            },
            _ => None,
        }
    }

    /// Force the cursor back to passthrough, e.g. after the wm went away.
    pub fn reset_mode(&mut self) {
        self.mode = CursorMode::Passthrough;
    }

    /// End the interactive operation.
    pub fn end_op(&mut self) {
        if !matches!(self.mode, CursorMode::Op(_)) {
            return;
        }

        self.mode =
            if self.pressed.is_empty() { CursorMode::Passthrough } else { CursorMode::Ignore };
    }

    fn deactivate_constraint(&mut self) {
        if let Some(constraint) = &mut self.constraint {
            constraint.active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use crate::windows::surface::ToplevelHandle;
    use crate::windows::window::ConfigureState;

    fn windows_with_window(rect: Rectangle) -> (Windows, WindowId) {
        let mut windows = Windows::new();
        let id = windows.add(ToplevelHandle::new());
        windows.get(id).unwrap().borrow_mut().pending_mut().rect = rect;
        windows.apply_pending_all();

        let serial = match windows.get(id).unwrap().borrow().configure_state() {
            ConfigureState::Inflight(serial) => serial,
            state => panic!("unexpected configure state {state:?}"),
        };
        windows.ack_configure(id, serial);
        windows.surface_commit(id, rect.size);
        windows.update_transaction();

        (windows, id)
    }

    fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle {
        Rectangle::new(Point::from((x, y)), Size::from((w, h)))
    }

    #[test]
    fn op_mode_accumulates_subpixel_motion() {
        let (mut windows, id) = windows_with_window(rect(0, 0, 400, 300));

        let mut cursor = Cursor::new(SeatId(1));
        cursor.start_op(OperationKind::Resize {
            window: id,
            edges: Edges { right: true, bottom: true, ..Default::default() },
            initial_width: 400,
            initial_height: 300,
        });

        // 110 slow motions of a fraction of a logical pixel each.
        let mut layout_changed = false;
        for _ in 0..110 {
            layout_changed |= cursor.handle_motion(Point::from((0.34, 0.17)), &mut windows);
        }
        assert!(layout_changed);

        // floor(110 * 0.34) = 37, floor(110 * 0.17) = 18.
        let window = windows.get(id).unwrap().borrow();
        assert_eq!(window.pending().rect.size, Size::from((437, 318)));
    }

    #[test]
    fn ignore_exit_is_idempotent() {
        let mut cursor = Cursor::new(SeatId(1));
        cursor.press_button(0x110, None);
        cursor.start_ignore();

        // Held button sustains ignore mode.
        cursor.exit_ignore();
        assert_eq!(*cursor.mode(), CursorMode::Ignore);

        cursor.release_button(0x110);
        cursor.exit_ignore();
        assert_eq!(*cursor.mode(), CursorMode::Passthrough);

        // Repeated exits change nothing.
        cursor.exit_ignore();
        assert_eq!(*cursor.mode(), CursorMode::Passthrough);
    }

    #[test]
    fn down_mode_keeps_focus_and_offsets() {
        let (mut windows, id) = windows_with_window(rect(100, 100, 200, 200));

        let mut cursor = Cursor::new(SeatId(1));
        cursor.handle_motion(Point::from((150., 150.)), &mut windows);
        assert_eq!(cursor.pointer_focus(), Some(id));

        cursor.start_down(id, &windows);
        cursor.handle_motion(Point::from((25., -10.)), &mut windows);

        // Surface-local coordinates track the cursor from the grab point.
        assert_eq!(cursor.down_position(), Some(Point::from((75., 40.))));
        assert_eq!(cursor.pointer_focus(), Some(id));
    }

    #[test]
    fn drag_icons_follow_the_cursor() {
        let mut windows = Windows::new();
        let mut cursor = Cursor::new(SeatId(1));

        cursor.handle_motion(Point::from((10., 10.)), &mut windows);
        cursor.add_drag_icon(Point::from((4., 4.)));
        assert_eq!(cursor.drag_icons()[0].position, Point::from((14., 14.)));

        cursor.handle_motion(Point::from((6., -2.)), &mut windows);
        assert_eq!(cursor.drag_icons()[0].position, Point::from((20., 12.)));

        cursor.clear_drag_icons();
        assert!(cursor.drag_icons().is_empty());
    }

    #[test]
    fn locked_constraint_swallows_motion() {
        let (mut windows, id) = windows_with_window(rect(0, 0, 500, 500));

        let mut cursor = Cursor::new(SeatId(1));
        cursor.handle_motion(Point::from((250., 250.)), &mut windows);
        cursor.set_constraint(Some(PointerConstraint {
            window: id,
            kind: ConstraintKind::Locked,
            region: None,
            active: true,
        }));

        cursor.handle_motion(Point::from((100., 100.)), &mut windows);
        assert_eq!(cursor.position(), Point::from((250., 250.)));
    }

    #[test]
    fn confined_constraint_clips_motion() {
        let (mut windows, id) = windows_with_window(rect(0, 0, 100, 100));

        let mut cursor = Cursor::new(SeatId(1));
        cursor.handle_motion(Point::from((50., 50.)), &mut windows);
        cursor.set_constraint(Some(PointerConstraint {
            window: id,
            kind: ConstraintKind::Confined,
            region: None,
            active: true,
        }));

        cursor.handle_motion(Point::from((500., 0.)), &mut windows);
        assert_eq!(cursor.position(), Point::from((99., 50.)));
    }
}
