//! Window management.

use std::cell::RefCell;
use std::mem;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use weir_wm::WindowId;

use crate::geometry::{Point, Rectangle, Size};
use crate::windows::surface::ToplevelHandle;
use crate::windows::window::{SavedBuffer, Serials, Window};

pub mod surface;
pub mod window;

/// Maximum time before a transaction is force-committed.
const MAX_TRANSACTION_MILLIS: u64 = 200;

/// Container tracking all managed windows.
#[derive(Default)]
pub struct Windows {
    windows: Vec<Rc<RefCell<Window>>>,

    /// Active transaction, at most one at a time.
    transaction: Option<Transaction>,

    /// Pending changes accumulated while a transaction was underway.
    coalesced: bool,

    serials: Serials,
    next_transaction_serial: u64,
    next_window_id: u64,

    start_time: Option<Instant>,
}

impl Windows {
    pub fn new() -> Self {
        Self { start_time: Some(Instant::now()), ..Default::default() }
    }

    /// Add a new window.
    pub fn add(&mut self, surface: ToplevelHandle) -> WindowId {
        self.next_window_id += 1;
        let id = WindowId(self.next_window_id);

        self.windows.push(Rc::new(RefCell::new(Window::new(id, surface))));

        id
    }

    /// Look up a window by id.
    ///
    /// Ids handed out to the wm or stored across callbacks are validated
    /// here; a dead or unknown id simply yields nothing.
    pub fn get(&self, id: WindowId) -> Option<&Rc<RefCell<Window>>> {
        self.windows.iter().find(|window| window.borrow().id == id)
    }

    /// Iterate over all tracked windows.
    pub fn iter(&self) -> impl Iterator<Item = &Rc<RefCell<Window>>> {
        self.windows.iter()
    }

    /// Number of tracked windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Application runtime in milliseconds.
    pub fn runtime(&self) -> u32 {
        self.start_time.map_or(0, |start_time| start_time.elapsed().as_millis() as u32)
    }

    /// Whether a transaction is currently underway.
    pub fn transaction_active(&self) -> bool {
        self.transaction.is_some()
    }

    /// Number of configures the active transaction still waits on.
    pub fn pending_acks(&self) -> usize {
        self.transaction.as_ref().map_or(0, |transaction| transaction.pending_acks)
    }

    /// Serial of the active transaction.
    pub fn transaction_serial(&self) -> Option<u64> {
        self.transaction.as_ref().map(|transaction| transaction.serial)
    }

    /// Promote every window's pending state and start a transaction.
    ///
    /// While a transaction is underway the request is coalesced; pending
    /// state keeps accumulating and is re-applied right after the active
    /// transaction commits.
    pub fn apply_pending_all(&mut self) {
        if self.transaction.is_some() {
            self.coalesced = true;
            return;
        }

        let runtime = self.runtime();
        self.next_transaction_serial += 1;

        let mut pending_acks = 0;
        let mut participants = Vec::with_capacity(self.windows.len());
        for window in &self.windows {
            let mut window_mut = window.borrow_mut();
            window_mut.apply_pending();

            if window_mut.configure(&mut self.serials) {
                // Keep the old frame renderable and kick off drawing of the
                // new size without waiting for the next output frame.
                window_mut.stash_buffer();
                window_mut.request_frame(runtime);
                pending_acks += 1;
            }

            participants.push(Rc::downgrade(window));
        }

        self.transaction = Some(Transaction {
            serial: self.next_transaction_serial,
            deadline: Instant::now() + Duration::from_millis(MAX_TRANSACTION_MILLIS),
            pending_acks,
            participants,
        });
    }

    /// Handle a client's `ack_configure`.
    pub fn ack_configure(&mut self, id: WindowId, serial: u32) {
        if let Some(window) = self.get(id) {
            window.borrow_mut().ack_configure(serial);
        }
    }

    /// Handle a surface commit observed by the runtime.
    pub fn surface_commit(&mut self, id: WindowId, size: Size) {
        if let Some(window) = self.get(id) {
            window.borrow_mut().surface_commit(size);
        }
    }

    /// Stage a window for reaping.
    ///
    /// Windows inside a transaction linger until it clears so their old
    /// frame stays renderable; everything else is reaped right away.
    pub fn mark_destroyed(&mut self, id: WindowId) {
        if let Some(window) = self.get(id) {
            window.borrow_mut().mark_destroyed();
        }

        if self.transaction.is_none() {
            self.windows.retain(|window| window.borrow().alive());
        }
    }

    /// Attempt to complete the active transaction.
    ///
    /// Returns the duration until the transaction should be timed out when
    /// it cannot be completed yet. Commits restarted by coalesced requests
    /// are settled in the same call.
    pub fn update_transaction(&mut self) -> Option<Duration> {
        loop {
            let transaction = self.transaction.as_mut()?;

            // A window dying mid-transaction satisfies its ack slot.
            transaction.pending_acks = transaction
                .participants
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|window| !window.borrow().transaction_done())
                .count();

            if transaction.pending_acks > 0 {
                let now = Instant::now();
                if now < transaction.deadline {
                    return Some(transaction.deadline - now);
                }
            }

            self.commit_transaction();
        }
    }

    /// Force-commit the active transaction, ignoring its deadline.
    pub fn timeout_transaction(&mut self) {
        if self.transaction.is_some() {
            self.commit_transaction();
        }
    }

    /// Commit all participants atomically and reap dead windows.
    fn commit_transaction(&mut self) {
        let transaction = match self.transaction.take() {
            Some(transaction) => transaction,
            None => return,
        };

        for window in transaction.participants.iter().filter_map(Weak::upgrade) {
            window.borrow_mut().commit_transaction();
        }

        // Reap windows which only lingered for the transaction.
        self.windows.retain(|window| window.borrow().alive());

        // Apply changes which accumulated while the transaction was underway.
        if mem::take(&mut self.coalesced) {
            self.apply_pending_all();
        }
    }

    /// Read-only render state for all windows, bottom to top.
    pub fn render_list(&self) -> Vec<RenderElement> {
        self.windows
            .iter()
            .map(|window| {
                let window = window.borrow();
                RenderElement {
                    id: window.id,
                    rect: window.current().rect,
                    borders: *window.borders(),
                    saved_buffer: window.saved_buffer().copied(),
                }
            })
            .collect()
    }

    /// Check which window is at a specific position.
    pub fn window_at(&self, position: Point<f64>) -> Option<WindowId> {
        self.windows
            .iter()
            .rev()
            .filter(|window| window.borrow().alive())
            .find(|window| window.borrow().current().rect.contains(position))
            .map(|window| window.borrow().id)
    }
}

/// Atomic multi-window reconfiguration.
struct Transaction {
    serial: u64,

    /// Point at which the transaction is committed regardless of acks.
    deadline: Instant,

    /// Outstanding configure acknowledgements.
    pending_acks: usize,

    /// Windows frozen by this transaction.
    participants: Vec<Weak<RefCell<Window>>>,
}

/// Per-window state the renderer consumes.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct RenderElement {
    pub id: WindowId,
    pub rect: Rectangle,
    pub borders: [Rectangle; 4],
    pub saved_buffer: Option<SavedBuffer>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::windows::surface::SurfaceEvent;
    use crate::windows::window::ConfigureState;

    fn add_window(windows: &mut Windows) -> (WindowId, ToplevelHandle) {
        let handle = ToplevelHandle::new();
        let id = windows.add(handle.clone());
        (id, handle)
    }

    fn stage_rect(windows: &mut Windows, id: WindowId, rect: Rectangle) {
        let window = windows.get(id).unwrap();
        window.borrow_mut().pending_mut().rect = rect;
    }

    fn inflight_serial(windows: &Windows, id: WindowId) -> u32 {
        match windows.get(id).unwrap().borrow().configure_state() {
            ConfigureState::Inflight(serial) => serial,
            state => panic!("unexpected configure state {state:?}"),
        }
    }

    fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle {
        Rectangle::new(Point::from((x, y)), Size::from((w, h)))
    }

    #[test]
    fn commit_is_atomic_across_windows() {
        let mut windows = Windows::new();
        let (id1, _handle1) = add_window(&mut windows);
        let (id2, _handle2) = add_window(&mut windows);

        stage_rect(&mut windows, id1, rect(0, 0, 800, 600));
        stage_rect(&mut windows, id2, rect(800, 0, 400, 600));
        windows.apply_pending_all();
        assert!(windows.update_transaction().is_some());

        // First client responding must not update anything yet.
        let serial1 = inflight_serial(&windows, id1);
        windows.ack_configure(id1, serial1);
        windows.surface_commit(id1, Size::from((800, 600)));
        assert!(windows.update_transaction().is_some());
        assert_eq!(windows.get(id1).unwrap().borrow().current().rect, Rectangle::default());

        // Second client completes; both windows flip in the same turn.
        let serial2 = inflight_serial(&windows, id2);
        windows.ack_configure(id2, serial2);
        windows.surface_commit(id2, Size::from((400, 600)));
        assert!(windows.update_transaction().is_none());
        assert_eq!(windows.get(id1).unwrap().borrow().current().rect, rect(0, 0, 800, 600));
        assert_eq!(windows.get(id2).unwrap().borrow().current().rect, rect(800, 0, 400, 600));
        assert!(!windows.transaction_active());
    }

    #[test]
    fn overlapping_requests_coalesce() {
        let mut windows = Windows::new();
        let (id, _handle) = add_window(&mut windows);

        stage_rect(&mut windows, id, rect(0, 0, 500, 500));
        windows.apply_pending_all();
        assert!(windows.update_transaction().is_some());
        assert_eq!(windows.transaction_serial(), Some(1));

        // A second request while waiting must not spawn a second transaction.
        stage_rect(&mut windows, id, rect(0, 0, 600, 600));
        windows.apply_pending_all();
        assert_eq!(windows.pending_acks(), 1);
        assert_eq!(windows.transaction_serial(), Some(1));

        // Completing the first transaction immediately starts the coalesced
        // one with the latest pending state.
        let serial = inflight_serial(&windows, id);
        windows.ack_configure(id, serial);
        windows.surface_commit(id, Size::from((500, 500)));
        assert!(windows.update_transaction().is_some());
        assert_eq!(windows.transaction_serial(), Some(2));
        assert_eq!(windows.get(id).unwrap().borrow().inflight().rect, rect(0, 0, 600, 600));
    }

    #[test]
    fn timeout_commits_partial_state() {
        let mut windows = Windows::new();
        let (id1, _handle1) = add_window(&mut windows);
        let (id2, _handle2) = add_window(&mut windows);

        stage_rect(&mut windows, id1, rect(0, 0, 300, 300));
        stage_rect(&mut windows, id2, rect(300, 0, 300, 300));
        windows.apply_pending_all();

        // Only the first window responds in time.
        let serial1 = inflight_serial(&windows, id1);
        let serial2 = inflight_serial(&windows, id2);
        windows.ack_configure(id1, serial1);
        windows.surface_commit(id1, Size::from((300, 300)));

        windows.timeout_transaction();

        let window1 = windows.get(id1).unwrap().borrow();
        assert_eq!(window1.configure_state(), ConfigureState::Idle);
        assert_eq!(window1.current().rect, rect(0, 0, 300, 300));
        drop(window1);

        // The slow window keeps its last observed geometry.
        let window2 = windows.get(id2).unwrap().borrow();
        assert_eq!(window2.configure_state(), ConfigureState::TimedOut(serial2));
        assert_eq!(window2.current().rect.loc, Point::from((300, 0)));
        assert_eq!(window2.current().rect.size, Size::default());
    }

    #[test]
    fn dead_window_satisfies_ack_slot() {
        let mut windows = Windows::new();
        let (id, handle) = add_window(&mut windows);

        stage_rect(&mut windows, id, rect(0, 0, 200, 200));
        windows.apply_pending_all();
        assert!(windows.update_transaction().is_some());

        // Client dies instead of acking.
        handle.set_dead();
        windows.mark_destroyed(id);
        assert!(windows.update_transaction().is_none());
        assert!(windows.get(id).is_none());
        assert!(windows.is_empty());
    }

    #[test]
    fn configuring_windows_get_early_frame() {
        let mut windows = Windows::new();
        let (id, handle) = add_window(&mut windows);

        stage_rect(&mut windows, id, rect(0, 0, 640, 480));
        windows.apply_pending_all();

        let events = handle.take_events();
        assert!(matches!(events[0], SurfaceEvent::Configure(_)));
        assert!(matches!(events[1], SurfaceEvent::FrameDone { .. }));

        // The old frame stays renderable while the client redraws.
        let elements = windows.render_list();
        assert_eq!(elements.len(), 1);
        assert!(elements[0].saved_buffer.is_some());
        assert!(windows.get(id).unwrap().borrow().in_transaction());
    }
}
