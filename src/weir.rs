//! Weir compositor state.

use std::error::Error;
use std::io::Read;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::{env, io};

use calloop::generic::Generic;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, Interest, LoopHandle, Mode, PostAction, RegistrationToken};
use thiserror::Error as ThisError;
use tracing::{debug, error, info, warn};
use weir_wm::{BindingId, Interaction, Modifiers, OutputId, SeatId, WindowId, WmEvent, WmRequest};

use crate::config::Config;
use crate::cursor::OperationKind;
use crate::geometry::{Point, Size};
use crate::input::{BindingProps, DeviceId, InputFilter, KeyState, Seat, Session, Trigger, XkbLookup};
use crate::output::{FrameContent, OpState, OutputState, Outputs};
use crate::windows::surface::ToplevelHandle;
use crate::windows::window::WindowIntent;
use crate::windows::Windows;
use crate::wm::Wm;
use crate::{daemon, wm_server};

/// Shared compositor state.
pub struct Weir {
    pub config: Config,
    pub windows: Windows,
    pub outputs: Outputs,
    pub seats: Vec<Seat>,
    pub wm: Wm,
    pub session: Box<dyn Session>,
    pub terminated: bool,

    event_loop: LoopHandle<'static, Weir>,

    /// Deadline timer of the active transaction.
    transaction_timer: Option<RegistrationToken>,

    /// Read source of the active wm connection.
    wm_reader: Option<RegistrationToken>,

    /// Session lock is held.
    locked: bool,

    next_seat_id: u64,
}

impl Weir {
    /// Initialize the compositor.
    pub fn new(
        event_loop: LoopHandle<'static, Weir>,
        config: Config,
        session: Box<dyn Session>,
    ) -> Self {
        // Advertise our environment to children.
        env::set_var("WAYLAND_DISPLAY", &config.socket_name);
        env::set_var("XCURSOR_SIZE", config.xcursor_size.to_string());
        if let Some(theme) = &config.xcursor_theme {
            env::set_var("XCURSOR_THEME", theme);
        }

        let mut weir = Self {
            event_loop,
            config,
            session,
            windows: Windows::new(),
            outputs: Outputs::new(),
            seats: Vec::new(),
            wm: Wm::new(),
            terminated: false,
            transaction_timer: None,
            wm_reader: None,
            locked: false,
            next_seat_id: 0,
        };
        weir.add_seat("seat0");

        weir
    }

    /// Register a new input seat.
    pub fn add_seat(&mut self, name: impl Into<String>) -> SeatId {
        self.next_seat_id += 1;
        let id = SeatId(self.next_seat_id);

        self.seats.push(Seat::new(id, name));
        self.wm.push(WmEvent::SeatAdded { id });
        self.unstall();

        id
    }

    fn seat_index(&self, id: SeatId) -> Option<usize> {
        self.seats.iter().position(|seat| seat.id == id)
    }

    pub fn seat_mut(&mut self, id: SeatId) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|seat| seat.id == id)
    }

    fn binding_seat_mut(&mut self, id: BindingId) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|seat| seat.owns_binding(id))
    }

    /// Handle a new toplevel surface mapping.
    ///
    /// Returns the window's id together with the handle the runtime drains
    /// outbound client events from.
    pub fn map_window(&mut self) -> (WindowId, ToplevelHandle) {
        let handle = ToplevelHandle::new();
        let id = self.windows.add(handle.clone());

        self.wm.push(WmEvent::WindowAdded { id });
        self.unstall();

        (id, handle)
    }

    /// Handle a toplevel surface going away.
    pub fn unmap_window(&mut self, id: WindowId) {
        self.windows.mark_destroyed(id);

        for seat in &mut self.seats {
            seat.clear_window(id);
        }

        self.wm.push(WmEvent::WindowRemoved { id });
        self.unstall();
    }

    /// Handle a window title change.
    pub fn window_title_changed(&mut self, id: WindowId, title: Option<String>) {
        match self.windows.get(id) {
            Some(window) => window.borrow_mut().title = title.clone(),
            None => return,
        }

        self.wm.push(WmEvent::WindowTitle { id, title });
        self.unstall();
    }

    /// Handle a window App ID change.
    pub fn window_app_id_changed(&mut self, id: WindowId, app_id: Option<String>) {
        match self.windows.get(id) {
            Some(window) => window.borrow_mut().app_id = app_id.clone(),
            None => return,
        }

        self.wm.push(WmEvent::WindowAppId { id, app_id });
        self.unstall();
    }

    /// Handle a client's size bounds change.
    pub fn window_dimension_bounds(&mut self, id: WindowId, min: Size, max: Size) {
        if self.windows.get(id).is_none() {
            return;
        }

        self.wm.push(WmEvent::WindowDimensionBounds {
            id,
            min_width: min.w,
            min_height: min.h,
            max_width: max.w,
            max_height: max.h,
        });
        self.unstall();
    }

    /// Handle a client's fullscreen request.
    pub fn window_requested_fullscreen(&mut self, id: WindowId, fullscreen: bool) {
        if self.windows.get(id).is_none() {
            return;
        }

        self.wm.push(WmEvent::WindowFullscreenRequested { id, fullscreen });
        self.unstall();
    }

    /// Handle a client's interactive move/resize request.
    ///
    /// The request is relayed to the wm, which decides whether to start an
    /// operation. Requests from touch or tablet tools are dropped.
    pub fn window_requested_interaction(
        &mut self,
        id: WindowId,
        seat: SeatId,
        interaction: Interaction,
        pointer_driven: bool,
    ) {
        if !pointer_driven {
            debug!("dropping non-pointer interaction request for {id}");
            return;
        }

        if self.windows.get(id).is_none() {
            return;
        }

        self.wm.push(WmEvent::WindowInteractionRequested { id, seat, interaction });
        self.unstall();
    }

    /// Handle a window urgency change.
    pub fn window_urgent(&mut self, id: WindowId, urgent: bool) {
        match self.windows.get(id) {
            Some(window) => window.borrow_mut().pending_mut().urgent = urgent,
            None => return,
        }

        self.wm.push(WmEvent::WindowUrgent { id, urgent });
        self.unstall();
    }

    /// Handle a client's `ack_configure`.
    pub fn ack_configure(&mut self, id: WindowId, serial: u32) {
        self.windows.ack_configure(id, serial);
        self.unstall();
    }

    /// Handle a client's surface commit.
    pub fn surface_commit(&mut self, id: WindowId, size: Size) {
        self.windows.surface_commit(id, size);
        self.unstall();
    }

    /// Attach a keyboard to a seat.
    ///
    /// The configured repeat parameters travel with the keyboard so the
    /// runtime can announce them through `repeat_info`.
    pub fn add_keyboard(&mut self, seat: SeatId, device: DeviceId, xkb: Rc<dyn XkbLookup>) {
        let (repeat_rate, repeat_delay) = (self.config.repeat_rate, self.config.repeat_delay);
        if let Some(seat) = self.seat_mut(seat) {
            seat.add_keyboard(device, xkb, repeat_rate, repeat_delay);
        }
    }

    /// Handle a keyboard key event.
    pub fn handle_keyboard_key(
        &mut self,
        seat: SeatId,
        device: DeviceId,
        keycode: u32,
        state: KeyState,
    ) -> InputFilter {
        let index = match self.seat_index(seat) {
            Some(index) => index,
            None => return InputFilter::Forward,
        };

        let filter =
            self.seats[index].handle_key(device, keycode, state, &mut *self.session, &mut self.wm);
        self.unstall();

        filter
    }

    /// Handle a keyboard modifier update.
    pub fn handle_modifiers(&mut self, seat: SeatId, device: DeviceId, mods: Modifiers) {
        if let Some(seat) = self.seat_mut(seat) {
            seat.handle_modifiers(device, mods);
        }
    }

    /// Handle relative pointer motion.
    pub fn handle_pointer_motion(&mut self, seat: SeatId, delta: Point<f64>) {
        let index = match self.seat_index(seat) {
            Some(index) => index,
            None => return,
        };

        if self.seats[index].cursor.handle_motion(delta, &mut self.windows) {
            self.windows.apply_pending_all();
        }
        self.unstall();
    }

    /// Handle a pointer button event.
    pub fn handle_pointer_button(
        &mut self,
        seat: SeatId,
        button: u32,
        state: KeyState,
    ) -> InputFilter {
        // Lock surfaces receive buttons unfiltered.
        if self.locked {
            return InputFilter::Forward;
        }

        let index = match self.seat_index(seat) {
            Some(index) => index,
            None => return InputFilter::Forward,
        };

        let filter =
            self.seats[index].handle_pointer_button(button, state, &self.windows, &mut self.wm);
        self.unstall();

        filter
    }

    /// Handle the start of a touch sequence.
    pub fn handle_touch_down(
        &mut self,
        seat: SeatId,
        slot: i32,
        position: Point<f64>,
    ) -> Option<WindowId> {
        let index = self.seat_index(seat)?;
        self.seats[index].touch.down(slot, position, &self.windows)
    }

    /// Handle touch point motion.
    pub fn handle_touch_motion(
        &mut self,
        seat: SeatId,
        slot: i32,
        position: Point<f64>,
    ) -> Option<WindowId> {
        let index = self.seat_index(seat)?;
        self.seats[index].touch.motion(slot, position)
    }

    /// Handle the end of a touch sequence.
    pub fn handle_touch_up(&mut self, seat: SeatId, slot: i32) -> Option<WindowId> {
        let index = self.seat_index(seat)?;
        self.seats[index].touch.up(slot)
    }

    /// Handle touch sequence cancellation.
    ///
    /// Returns every window which held a point, for cancel broadcast.
    pub fn handle_touch_cancel(&mut self, seat: SeatId) -> Vec<WindowId> {
        match self.seat_index(seat) {
            Some(index) => self.seats[index].touch.cancel(),
            None => Vec::new(),
        }
    }

    /// Handle a drag starting on a seat, attaching its icon to the cursor.
    pub fn drag_icon_added(&mut self, seat: SeatId, offset: Point<f64>) {
        if let Some(seat) = self.seat_mut(seat) {
            seat.cursor.add_drag_icon(offset);
        }
    }

    /// Handle a drag ending on a seat.
    pub fn drag_icon_cleared(&mut self, seat: SeatId) {
        if let Some(seat) = self.seat_mut(seat) {
            seat.cursor.clear_drag_icons();
        }
    }

    /// Register a new output.
    pub fn add_output(&mut self, name: impl Into<String>, state: OutputState) -> OutputId {
        let id = self.outputs.add(name, state);
        self.unstall();
        id
    }

    /// Update an output's operational state.
    pub fn set_output_op_state(&mut self, id: OutputId, op_state: OpState) {
        self.outputs.set_op_state(id, op_state, &mut self.wm);
        self.unstall();
    }

    /// Handle an output frame submission.
    pub fn output_frame(&mut self, id: OutputId, content: FrameContent) {
        if let Some(output) = self.outputs.get_mut(id) {
            output.frame_commit(content);
        }
    }

    /// Handle a successful presentation event.
    pub fn output_presented(&mut self, id: OutputId) {
        if let Some(output) = self.outputs.get_mut(id) {
            output.presented();
        }

        if self.locked && self.outputs.all_lock_settled() {
            debug!("all outputs settled for session lock");
        }
    }

    /// Handle session lock activation.
    pub fn lock_session(&mut self) {
        self.locked = true;
        for seat in &mut self.seats {
            seat.set_bindings_inert(true);
            seat.cursor.reset_mode();
        }
    }

    /// Handle session lock release.
    pub fn unlock_session(&mut self) {
        self.locked = false;
        for seat in &mut self.seats {
            seat.set_bindings_inert(false);
        }
    }

    /// Check if the session is locked.
    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Check if all outputs hide normal content.
    pub fn fully_locked(&self) -> bool {
        self.locked && self.outputs.all_lock_settled()
    }

    /// Handle a new wm connection.
    pub fn wm_connected(&mut self, stream: UnixStream) {
        if let Err(err) = stream.set_nonblocking(true) {
            error!("could not configure wm connection: {err}");
            return;
        }
        let writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(err) => {
                error!("could not clone wm connection: {err}");
                return;
            },
        };

        // Replace any previous wm connection.
        if let Some(token) = self.wm_reader.take() {
            self.event_loop.remove(token);
        }
        for seat in &mut self.seats {
            seat.clear_bindings();
        }
        self.wm.set_connection(writer);

        // Full state resync for the new wm.
        for seat in &self.seats {
            self.wm.push(WmEvent::SeatAdded { id: seat.id });
        }
        self.outputs.reset_announced();
        self.outputs.send_dirty(&mut self.wm);
        for window in self.windows.iter() {
            let window = window.borrow();
            self.wm.push(WmEvent::WindowAdded { id: window.id });
            if window.title.is_some() {
                self.wm.push(WmEvent::WindowTitle { id: window.id, title: window.title.clone() });
            }
            if window.app_id.is_some() {
                self.wm
                    .push(WmEvent::WindowAppId { id: window.id, app_id: window.app_id.clone() });
            }
        }

        // Register the request reader.
        let mut buffer: Vec<u8> = Vec::new();
        let source = Generic::new(stream, Interest::READ, Mode::Level);
        let result = self.event_loop.insert_source(source, move |_, stream, weir: &mut Weir| {
            let mut read_buffer = [0; 4096];
            let mut reader = &**stream;
            let mut eof = false;
            loop {
                match reader.read(&mut read_buffer) {
                    Ok(0) => {
                        eof = true;
                        break;
                    },
                    Ok(read) => buffer.extend_from_slice(&read_buffer[..read]),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        error!("wm connection read failed: {err}");
                        eof = true;
                        break;
                    },
                }
            }

            // Dispatch all completely received requests.
            while let Some(index) = buffer.iter().position(|&byte| byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=index).collect();
                match serde_json::from_slice::<WmRequest>(&line[..line.len() - 1]) {
                    Ok(request) => weir.handle_wm_request(request),
                    Err(err) => warn!("ignoring invalid wm request: {err}"),
                }
            }

            if eof {
                weir.wm_disconnected();
                return Ok(PostAction::Remove);
            }

            weir.unstall();
            Ok(PostAction::Continue)
        });

        match result {
            Ok(token) => self.wm_reader = Some(token),
            Err(err) => {
                error!("could not register wm connection: {err}");
                self.wm.clear_connection();
            },
        }

        self.unstall();
    }

    /// Handle the wm connection going away.
    pub fn wm_disconnected(&mut self) {
        self.wm.clear_connection();
        self.wm_reader = None;

        // Nothing sustains bindings or modes without a wm.
        for seat in &mut self.seats {
            seat.clear_bindings();
            seat.cursor.reset_mode();
        }
    }

    /// Dispatch a wm request.
    ///
    /// Misbehaving requests are logged and dropped; the connection lives on.
    pub fn handle_wm_request(&mut self, request: WmRequest) {
        if let Err(err) = self.dispatch_wm_request(request) {
            warn!("ignoring wm request: {err}");
        }
    }

    fn dispatch_wm_request(&mut self, request: WmRequest) -> Result<(), RequestError> {
        match request {
            WmRequest::AckUpdate { serial } => self.wm.ack_update(serial),
            WmRequest::RequestUpdate => self.wm.request_update(),
            WmRequest::Commit => {
                if self.wm.commit() {
                    self.promote_wm_state();
                }
            },
            WmRequest::SetWindowDimensions { id, rect } => {
                self.stage_window_intent(id, |intent| intent.rect = Some(rect.into()))?;
            },
            WmRequest::SetWindowFullscreen { id, fullscreen } => {
                self.stage_window_intent(id, |intent| intent.fullscreen = Some(fullscreen))?;
            },
            WmRequest::SetWindowDecorations { id, server_side } => {
                self.stage_window_intent(id, |intent| {
                    intent.server_side_decorations = Some(server_side);
                })?;
            },
            WmRequest::FocusWindow { seat, id } => {
                if let Some(id) = id {
                    self.windows.get(id).ok_or(RequestError::UnknownWindow(id))?;
                }
                self.seat_mut(seat).ok_or(RequestError::UnknownSeat)?.stage_focus(id);
            },
            WmRequest::CloseWindow { id } => {
                self.windows.get(id).ok_or(RequestError::UnknownWindow(id))?.borrow().kill();
            },
            WmRequest::StartInteractiveMove { seat, id } => {
                self.windows.get(id).ok_or(RequestError::UnknownWindow(id))?;
                self.seat_mut(seat)
                    .ok_or(RequestError::UnknownSeat)?
                    .cursor
                    .start_op(OperationKind::Move { window: id });
            },
            WmRequest::StartInteractiveResize { seat, id, edges } => {
                let window = self.windows.get(id).ok_or(RequestError::UnknownWindow(id))?;
                let (initial_width, initial_height) = {
                    let mut window = window.borrow_mut();
                    window.pending_mut().resizing = true;
                    let size = window.current().rect.size;
                    (size.w, size.h)
                };

                self.seat_mut(seat).ok_or(RequestError::UnknownSeat)?.cursor.start_op(
                    OperationKind::Resize { window: id, edges, initial_width, initial_height },
                );

                // The resizing flag rides its own transaction.
                self.windows.apply_pending_all();
            },
            WmRequest::EndInteraction { seat } => {
                let seat = self.seat_mut(seat).ok_or(RequestError::UnknownSeat)?;
                let op_window = seat.cursor.op_window();
                seat.cursor.end_op();

                if let Some(window) = op_window.and_then(|id| self.windows.get(id)) {
                    window.borrow_mut().pending_mut().resizing = false;
                }
                self.windows.apply_pending_all();
            },
            WmRequest::CreatePointerBinding { id, seat, button, mods } => {
                self.create_binding(seat, id, Trigger::Button(button), mods)?;
            },
            WmRequest::CreateKeyBinding { id, seat, keysym, mods } => {
                self.create_binding(seat, id, Trigger::Keysym(keysym), mods)?;
            },
            WmRequest::DestroyBinding { id } => {
                self.binding_seat_mut(id)
                    .ok_or(RequestError::UnknownBinding(id))?
                    .destroy_binding(id);
            },
            WmRequest::EnableBinding { id } => {
                self.stage_binding(id, |props| props.enabled = true)?;
            },
            WmRequest::DisableBinding { id } => {
                self.stage_binding(id, |props| props.enabled = false)?;
            },
            WmRequest::SetBindingLayoutOverride { id, layout } => {
                self.stage_binding(id, |props| props.layout_override = layout)?;
            },
        }

        Ok(())
    }

    fn create_binding(
        &mut self,
        seat: SeatId,
        id: BindingId,
        trigger: Trigger,
        mods: Modifiers,
    ) -> Result<(), RequestError> {
        // Reject ids already claimed on any seat.
        if self.binding_seat_mut(id).is_some() {
            return Err(RequestError::DuplicateBinding(id));
        }

        self.seat_mut(seat).ok_or(RequestError::UnknownSeat)?.add_binding(id, trigger, mods);
        Ok(())
    }

    fn stage_window_intent(
        &mut self,
        id: WindowId,
        f: impl FnOnce(&mut WindowIntent),
    ) -> Result<(), RequestError> {
        let window = self.windows.get(id).ok_or(RequestError::UnknownWindow(id))?;
        window.borrow_mut().stage_intent(f);
        Ok(())
    }

    fn stage_binding(
        &mut self,
        id: BindingId,
        f: impl FnOnce(&mut BindingProps),
    ) -> Result<(), RequestError> {
        let binding = self
            .binding_seat_mut(id)
            .and_then(|seat| seat.binding_mut(id))
            .ok_or(RequestError::UnknownBinding(id))?;
        f(&mut binding.uncommitted);
        Ok(())
    }

    /// Promote all wm-staged state and start a transaction.
    fn promote_wm_state(&mut self) {
        for window in self.windows.iter() {
            window.borrow_mut().promote_intent();
        }

        let windows = &mut self.windows;
        for seat in &mut self.seats {
            seat.promote_staged(windows);
        }

        self.windows.apply_pending_all();
        self.unstall();
    }

    /// Settle pending work after any state mutation.
    ///
    /// Completes or re-arms the active transaction and flushes the next wm
    /// update batch.
    pub fn unstall(&mut self) {
        if let Some(token) = self.transaction_timer.take() {
            self.event_loop.remove(token);
        }

        match self.windows.update_transaction() {
            Some(timeout) => {
                let timer = Timer::from_duration(timeout);
                let result = self.event_loop.insert_source(timer, |_, _, weir| {
                    weir.transaction_timer = None;
                    weir.windows.timeout_transaction();
                    weir.unstall();
                    TimeoutAction::Drop
                });

                match result {
                    Ok(token) => self.transaction_timer = Some(token),
                    Err(err) => error!("could not arm transaction timer: {err}"),
                }
            },
            // No transaction references output state anymore.
            None => self.outputs.reap(),
        }

        self.outputs.send_dirty(&mut self.wm);
        self.wm.flush_update();
    }
}

/// Reasons a wm request was rejected.
#[derive(ThisError, Debug)]
pub enum RequestError {
    #[error("unknown window {0}")]
    UnknownWindow(WindowId),
    #[error("unknown binding {0}")]
    UnknownBinding(BindingId),
    #[error("duplicate binding id {0}")]
    DuplicateBinding(BindingId),
    #[error("unknown seat")]
    UnknownSeat,
}

/// Run the compositor.
pub fn run(config: Config, session: Box<dyn Session>) -> Result<(), Box<dyn Error>> {
    let mut event_loop = EventLoop::try_new()?;
    let mut weir = Weir::new(event_loop.handle(), config, session);

    // Start listening for the wm client, then launch it.
    let socket_path = wm_server::spawn_wm_socket(&event_loop.handle(), &weir.config.socket_name)?;
    info!("wm socket: {socket_path:?}");

    if let Some(command) = weir.config.wm_command.clone() {
        if let Err(err) = daemon::spawn(&command) {
            error!("unable to spawn wm client {command:?}: {err}");
        }
    }

    // Continuously dispatch the event loop.
    while !weir.terminated {
        if let Err(error) = event_loop.dispatch(None, &mut weir) {
            error!("Event loop error: {error}");
            break;
        }
    }

    Ok(())
}
