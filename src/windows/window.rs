//! Wayland client window.

use tracing::{error, warn};
use weir_wm::WindowId;

use crate::geometry::{Point, Rectangle, Size};
use crate::windows::surface::{Configure, Surface, ToplevelHandle};

/// Width of the server-side border rectangles.
const BORDER_WIDTH: i32 = 2;

/// Allocator for configure serials.
#[derive(Default, Debug)]
pub struct Serials(u32);

impl Serials {
    /// Get the next configure serial.
    pub fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }
}

/// One snapshot of a window's management state.
#[derive(Default, PartialEq, Copy, Clone, Debug)]
pub struct WindowState {
    /// Target bounds in logical coordinates.
    pub rect: Rectangle,
    /// Number of seats focusing this window.
    pub focus_count: u32,
    pub fullscreen: bool,
    pub urgent: bool,
    pub resizing: bool,
    pub server_side_decorations: bool,
}

impl WindowState {
    /// Whether a configure proposing this state activates the window.
    fn activated(&self) -> bool {
        self.focus_count > 0
    }
}

/// Sub-state of the configure round-trip with the client.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ConfigureState {
    /// No configure outstanding.
    Idle,
    /// Configure sent, awaiting `ack_configure`.
    Inflight(u32),
    /// Configure acked, awaiting the matching buffer commit.
    Acked,
    /// Buffer for the acked configure was committed.
    Committed,
    /// Transaction was force-committed before the client acked.
    TimedOut(u32),
    /// Transaction was force-committed between ack and commit.
    TimedOutAcked,
}

/// Window intent staged by the window manager.
///
/// Fields are double-buffered: they accumulate from wm requests and are only
/// promoted into the pending state when the wm seals its reply with `commit`.
#[derive(Default, PartialEq, Copy, Clone, Debug)]
pub struct WindowIntent {
    pub rect: Option<Rectangle>,
    pub fullscreen: Option<bool>,
    pub server_side_decorations: Option<bool>,
}

impl WindowIntent {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Old-frame render state kept alive while a new size is in flight.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct SavedBuffer {
    /// Bounds the old frame is rendered at.
    pub rect: Rectangle,
}

/// Wayland client window state.
#[derive(Debug)]
pub struct Window<S = ToplevelHandle> {
    pub id: WindowId,

    /// Attached surface.
    pub surface: S,

    /// Window title.
    pub title: Option<String>,

    /// Application ID.
    pub app_id: Option<String>,

    /// Freely mutated state.
    pending: WindowState,

    /// State frozen while a transaction is underway.
    inflight: WindowState,

    /// State the renderer observes.
    current: WindowState,

    /// Configure round-trip sub-state.
    configure_state: ConfigureState,

    /// Size of the client's most recent committed buffer.
    committed_size: Size,

    /// Intent staged by the wm, sealed by its next commit.
    intent: WindowIntent,

    /// Window participates in the active transaction.
    inflight_transaction: bool,

    /// Stashed old frame rendered during the transaction.
    saved_buffer: Option<SavedBuffer>,

    /// Borders rendered around the current rectangle.
    borders: [Rectangle; 4],

    /// Window liveliness override.
    dead: bool,
}

impl<S: Surface> Window<S> {
    pub fn new(id: WindowId, surface: S) -> Self {
        Self {
            id,
            surface,
            title: Default::default(),
            app_id: Default::default(),
            pending: Default::default(),
            inflight: Default::default(),
            current: Default::default(),
            configure_state: ConfigureState::Idle,
            committed_size: Default::default(),
            intent: Default::default(),
            inflight_transaction: Default::default(),
            saved_buffer: Default::default(),
            borders: Default::default(),
            dead: Default::default(),
        }
    }

    /// Check window liveliness.
    pub fn alive(&self) -> bool {
        !self.dead && self.surface.alive()
    }

    /// Freely mutable state, the input of the next transaction.
    pub fn pending(&self) -> &WindowState {
        &self.pending
    }

    /// Mutate the pending state.
    ///
    /// Must only be called by paths which also request a transaction,
    /// otherwise the change lingers unapplied.
    pub fn pending_mut(&mut self) -> &mut WindowState {
        &mut self.pending
    }

    /// State the renderer observes.
    pub fn current(&self) -> &WindowState {
        &self.current
    }

    /// Frozen state of the active transaction.
    pub fn inflight(&self) -> &WindowState {
        &self.inflight
    }

    pub fn configure_state(&self) -> ConfigureState {
        self.configure_state
    }

    /// Border rectangles around the current bounds.
    pub fn borders(&self) -> &[Rectangle; 4] {
        &self.borders
    }

    /// Old-frame render state, present while stashed.
    pub fn saved_buffer(&self) -> Option<&SavedBuffer> {
        self.saved_buffer.as_ref()
    }

    /// Size of the client's most recent committed buffer.
    pub fn committed_size(&self) -> Size {
        self.committed_size
    }

    /// Whether this window is frozen inside the active transaction.
    pub fn in_transaction(&self) -> bool {
        self.inflight_transaction
    }

    /// Stage wm intent for the next wm commit.
    pub fn stage_intent(&mut self, f: impl FnOnce(&mut WindowIntent)) {
        f(&mut self.intent);
    }

    /// Promote staged wm intent into the pending state.
    ///
    /// Returns `true` if any pending field changed.
    pub fn promote_intent(&mut self) -> bool {
        if self.intent.is_empty() {
            return false;
        }

        let old_pending = self.pending;

        if let Some(rect) = self.intent.rect.take() {
            self.pending.rect = rect;
        }
        if let Some(fullscreen) = self.intent.fullscreen.take() {
            self.pending.fullscreen = fullscreen;
        }
        if let Some(server_side_decorations) = self.intent.server_side_decorations.take() {
            self.pending.server_side_decorations = server_side_decorations;
        }

        self.pending != old_pending
    }

    /// Copy pending state into the inflight snapshot.
    ///
    /// The sole path from pending to inflight; legal only while no
    /// transaction is underway for this window.
    pub fn apply_pending(&mut self) {
        debug_assert!(!self.inflight_transaction);
        self.inflight = self.pending;
        self.inflight_transaction = true;
    }

    /// Propose the inflight state to the client.
    ///
    /// Returns `true` if the transaction must wait for this window's ack.
    pub fn configure(&mut self, serials: &mut Serials) -> bool {
        let size_changed = self.inflight.rect.size != self.current.rect.size;

        if !size_changed && self.configure_state == ConfigureState::Idle {
            // Orthogonal flag changes are proposed without stalling the
            // transaction; a late ack for them is ignored as stale.
            if self.flags_changed() {
                let configure = self.configure_data(serials.next());
                self.surface.send_configure(configure);
            }

            return false;
        }

        let serial = serials.next();
        self.surface.send_configure(self.configure_data(serial));
        self.configure_state = ConfigureState::Inflight(serial);

        true
    }

    /// Check for inflight state changes which don't require a client resize.
    fn flags_changed(&self) -> bool {
        self.inflight.activated() != self.current.activated()
            || self.inflight.fullscreen != self.current.fullscreen
            || self.inflight.resizing != self.current.resizing
            || self.inflight.server_side_decorations != self.current.server_side_decorations
    }

    /// Assemble the configure payload for the inflight state.
    fn configure_data(&self, serial: u32) -> Configure {
        Configure {
            serial,
            size: self.inflight.rect.size,
            activated: self.inflight.activated(),
            fullscreen: self.inflight.fullscreen,
            resizing: self.inflight.resizing,
            server_side_decorations: self.inflight.server_side_decorations,
        }
    }

    /// Handle the client's `ack_configure`.
    pub fn ack_configure(&mut self, serial: u32) {
        match self.configure_state {
            ConfigureState::Inflight(inflight) if inflight == serial => {
                self.configure_state = ConfigureState::Acked;
            },
            ConfigureState::TimedOut(timed_out) if timed_out == serial => {
                self.configure_state = ConfigureState::TimedOutAcked;
            },
            // Acks for orthogonal or superseded configures carry stale
            // serials and change nothing.
            _ => error!("{} sent stale ack_configure serial {serial}", self.id),
        }
    }

    /// Handle a surface commit observed by the runtime.
    pub fn surface_commit(&mut self, size: Size) {
        self.committed_size = size;

        match self.configure_state {
            ConfigureState::Acked => self.configure_state = ConfigureState::Committed,
            // The client caught up with a configure we already timed out on.
            ConfigureState::TimedOutAcked => {
                self.configure_state = ConfigureState::Idle;
                self.current.rect.size = self.committed_size;
                self.update_borders();
            },
            ConfigureState::Idle if !self.inflight_transaction => {
                // Accept clients committing sizes they were never asked for,
                // keeping the borders consistent with the rendered surface.
                if size != self.current.rect.size {
                    warn!("{} committed unrequested size {}x{}", self.id, size.w, size.h);
                    self.current.rect.size = size;
                    self.update_borders();
                }
            },
            _ => (),
        }
    }

    /// Check whether the transaction still waits on this window.
    pub fn transaction_done(&self) -> bool {
        !self.alive()
            || !matches!(
                self.configure_state,
                ConfigureState::Inflight(_) | ConfigureState::Acked
            )
    }

    /// Stash the current frame so it stays renderable during the transaction.
    pub fn stash_buffer(&mut self) {
        self.saved_buffer = Some(SavedBuffer { rect: self.current.rect });
    }

    /// Send an early frame callback so the client starts drawing its new size.
    pub fn request_frame(&self, runtime: u32) {
        self.surface.request_frame(runtime);
    }

    /// Atomically transfer inflight state into current.
    ///
    /// Windows which didn't manage to ack and commit in time keep their
    /// last observed geometry, so no border is drawn for a size the client
    /// never reached.
    pub fn commit_transaction(&mut self) {
        let timed_out = match self.configure_state {
            ConfigureState::Inflight(serial) => {
                self.configure_state = ConfigureState::TimedOut(serial);
                true
            },
            ConfigureState::Acked => {
                self.configure_state = ConfigureState::TimedOutAcked;
                true
            },
            ConfigureState::Idle | ConfigureState::Committed => {
                self.configure_state = ConfigureState::Idle;
                false
            },
            // Timed-out states are re-entered by the next configure and
            // never survive into a commit.
            ConfigureState::TimedOut(_) | ConfigureState::TimedOutAcked => {
                unreachable!("configure sub-state {:?} during commit", self.configure_state)
            },
        };

        self.current = self.inflight;
        if timed_out {
            self.current.rect.size = self.committed_size;
        }

        self.inflight_transaction = false;
        self.saved_buffer = None;
        self.update_borders();
    }

    /// Recompute the border rectangles around the current bounds.
    fn update_borders(&mut self) {
        if self.current.fullscreen || !self.current.server_side_decorations {
            self.borders = Default::default();
            return;
        }

        let rect = self.current.rect;
        let width = BORDER_WIDTH;
        self.borders = [
            // Top.
            Rectangle::new(
                Point::from((rect.loc.x - width, rect.loc.y - width)),
                Size::from((rect.size.w + 2 * width, width)),
            ),
            // Bottom.
            Rectangle::new(
                Point::from((rect.loc.x - width, rect.loc.y + rect.size.h)),
                Size::from((rect.size.w + 2 * width, width)),
            ),
            // Left.
            Rectangle::new(
                Point::from((rect.loc.x - width, rect.loc.y)),
                Size::from((width, rect.size.h)),
            ),
            // Right.
            Rectangle::new(
                Point::from((rect.loc.x + rect.size.w, rect.loc.y)),
                Size::from((width, rect.size.h)),
            ),
        ];
    }

    /// Ask the client to close this window.
    pub fn kill(&self) {
        self.surface.send_close();
    }

    /// Mark the window as destroyed.
    ///
    /// Keeps the old frame renderable if a transaction is still underway;
    /// the window is reaped once the transaction clears.
    pub fn mark_destroyed(&mut self) {
        self.dead = true;

        if self.inflight_transaction && self.saved_buffer.is_none() {
            self.stash_buffer();
        }
    }
}
