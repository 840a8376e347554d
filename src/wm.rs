//! Window manager update cycle.
//!
//! Compositor state reaches the wm client in sealed batches: staged deltas
//! are flushed together with an `update(serial)` marker, the wm replies with
//! `ack_update(serial)` and seals its own reconfiguration with `commit`.
//! Only then are the wm's staged changes promoted and a transaction kicked
//! off, so the wm never observes or produces intermediate state.

use std::io::Write;
use std::os::unix::net::UnixStream;

use tracing::{error, warn};
use weir_wm::WmEvent;

/// State of the update round-trip with the wm client.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum UpdateState {
    /// No update outstanding.
    Idle,
    /// Update sent, awaiting `ack_update`.
    Sent(u32),
    /// Update acked, awaiting `commit`.
    Acked(u32),
}

/// Connection and update state of the window manager.
pub struct Wm {
    /// Write side of the active wm connection.
    connection: Option<UnixStream>,

    state: UpdateState,
    next_serial: u32,

    /// Deltas staged for the next update batch.
    outbox: Vec<WmEvent>,

    /// The wm asked for an update regardless of pending deltas.
    update_requested: bool,
}

impl Wm {
    pub fn new() -> Self {
        Self {
            connection: None,
            state: UpdateState::Idle,
            next_serial: 0,
            outbox: Vec::new(),
            update_requested: false,
        }
    }

    /// Check if a wm client is connected.
    pub fn connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Replace the active wm connection.
    pub fn set_connection(&mut self, connection: UnixStream) {
        if self.connection.is_some() {
            warn!("replacing active wm connection");
        }

        self.connection = Some(connection);
        self.state = UpdateState::Idle;

        // Stale deltas are superseded by the resync for the new wm.
        self.outbox.clear();
    }

    /// Drop the active wm connection.
    pub fn clear_connection(&mut self) {
        self.connection = None;
        self.state = UpdateState::Idle;
        self.outbox.clear();
        self.update_requested = false;
    }

    /// Stage a delta for the next update batch.
    pub fn push(&mut self, event: WmEvent) {
        self.outbox.push(event);
    }

    /// Check for unsent deltas.
    pub fn dirty(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Deltas staged for the next update batch.
    pub fn staged_events(&self) -> &[WmEvent] {
        &self.outbox
    }

    /// Let the wm initiate a reconfiguration with an empty batch.
    pub fn request_update(&mut self) {
        self.update_requested = true;
    }

    /// Transmit the staged batch if the wm is ready for another update.
    pub fn flush_update(&mut self) {
        let dirty = !self.outbox.is_empty() || self.update_requested;
        if self.state != UpdateState::Idle || !dirty || self.connection.is_none() {
            return;
        }
        self.update_requested = false;

        self.next_serial = self.next_serial.wrapping_add(1);
        let serial = self.next_serial;

        let events = std::mem::take(&mut self.outbox);
        for event in &events {
            if !self.send(event) {
                return;
            }
        }

        if self.send(&WmEvent::Update { serial }) {
            self.state = UpdateState::Sent(serial);
        }
    }

    /// Write a single event to the wm connection.
    fn send(&mut self, event: &WmEvent) -> bool {
        let connection = match &mut self.connection {
            Some(connection) => connection,
            None => return false,
        };

        let mut json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(err) => {
                error!("could not serialize wm event: {err}");
                return false;
            },
        };
        json.push('\n');

        if let Err(err) = connection.write_all(json.as_bytes()) {
            error!("wm connection write failed: {err}");
            self.clear_connection();
            return false;
        }

        true
    }

    /// Handle the wm's `ack_update`.
    pub fn ack_update(&mut self, serial: u32) {
        match self.state {
            UpdateState::Sent(sent) if sent == serial => self.state = UpdateState::Acked(serial),
            _ => warn!("ignoring stale ack_update with serial {serial}"),
        }
    }

    /// Handle the wm's `commit`.
    ///
    /// Returns `true` when the commit seals an acked update and the staged
    /// wm state should be promoted.
    pub fn commit(&mut self) -> bool {
        match self.state {
            UpdateState::Acked(_) => {
                self.state = UpdateState::Idle;
                true
            },
            _ => {
                error!("ignoring wm commit without acked update");
                false
            },
        }
    }
}

impl Default for Wm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_requires_acked_update() {
        let mut wm = Wm::new();

        // Commit without any update round-trip is protocol misuse.
        assert!(!wm.commit());

        // Acks without a connection-backed update are stale.
        wm.ack_update(1);
        assert!(!wm.commit());
    }

    #[test]
    fn staged_events_accumulate_until_flush() {
        let mut wm = Wm::new();
        wm.push(WmEvent::SeatAdded { id: weir_wm::SeatId(1) });
        assert!(wm.dirty());

        // Without a connection the batch stays staged.
        wm.flush_update();
        assert_eq!(wm.staged_events().len(), 1);
    }
}
