//! Window surfaces.
//!
//! The display-server runtime hands the window manager core one
//! [`ToplevelHandle`] per mapped toplevel and drains the handle's outbound
//! queue into the client's wire protocol. The core never touches protocol
//! objects directly; everything it wants a client to see goes through the
//! [`Surface`] seam.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::geometry::Size;

/// State proposed to a client by a configure event.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct Configure {
    pub serial: u32,
    pub size: Size,
    pub activated: bool,
    pub fullscreen: bool,
    pub resizing: bool,
    pub server_side_decorations: bool,
}

/// Messages queued for delivery to a client.
#[derive(PartialEq, Copy, Clone, Debug)]
pub enum SurfaceEvent {
    Configure(Configure),
    Close,
    FrameDone { runtime: u32 },
}

/// Common surface functionality.
pub trait Surface {
    /// Check if the window has been closed.
    fn alive(&self) -> bool;

    /// Propose a new state to the client.
    fn send_configure(&self, configure: Configure);

    /// Request application shutdown.
    fn send_close(&self);

    /// Send a frame callback, asking the client to draw.
    fn request_frame(&self, runtime: u32);
}

/// Queue-backed handle for a mapped toplevel.
///
/// Cloning yields another handle to the same queue; the runtime keeps one
/// clone to drain events from, the core keeps the other inside its window.
#[derive(Default, Clone, Debug)]
pub struct ToplevelHandle {
    events: Rc<RefCell<VecDeque<SurfaceEvent>>>,
    dead: Rc<Cell<bool>>,
}

impl ToplevelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the underlying surface as destroyed.
    pub fn set_dead(&self) {
        self.dead.set(true);
    }

    /// Drain all queued outbound events.
    pub fn take_events(&self) -> Vec<SurfaceEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    /// Serial of the most recently queued configure.
    pub fn last_configure(&self) -> Option<Configure> {
        self.events
            .borrow()
            .iter()
            .rev()
            .find_map(|event| match event {
                SurfaceEvent::Configure(configure) => Some(*configure),
                _ => None,
            })
    }
}

impl Surface for ToplevelHandle {
    fn alive(&self) -> bool {
        !self.dead.get()
    }

    fn send_configure(&self, configure: Configure) {
        self.events.borrow_mut().push_back(SurfaceEvent::Configure(configure));
    }

    fn send_close(&self) {
        self.events.borrow_mut().push_back(SurfaceEvent::Close);
    }

    fn request_frame(&self, runtime: u32) {
        self.events.borrow_mut().push_back(SurfaceEvent::FrameDone { runtime });
    }
}
