//! Output region handling.

use tracing::error;
use weir_wm::{OutputId, WmEvent};

use crate::geometry::{Point, Size, Vector};
use crate::wm::Wm;

/// Output display mode.
#[derive(Default, PartialEq, Copy, Clone, Debug)]
pub struct Mode {
    /// Dimensions in physical pixels.
    pub size: Size,
    /// Refresh rate in mHz.
    pub refresh: i32,
}

/// Output rotation applied at scanout.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub enum Transform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Transform {
    /// Whether the transform swaps width and height.
    fn swaps_dimensions(&self) -> bool {
        matches!(self, Self::Rotate90 | Self::Rotate270)
    }
}

/// One snapshot of an output's configuration.
#[derive(Default, PartialEq, Copy, Clone, Debug)]
pub struct OutputState {
    pub mode: Mode,
    pub scale: f64,
    pub transform: Transform,
    pub adaptive_sync: bool,
    /// Position in the global layout space.
    pub position: Point,
}

impl OutputState {
    /// Dimensions in logical pixels.
    pub fn logical_size(&self) -> Size {
        let scale = if self.scale > 0. { self.scale } else { 1. };
        let mut size = self.mode.size.scale(1. / scale);

        if self.transform.swaps_dimensions() {
            size = Size::from((size.h, size.w));
        }

        size
    }
}

/// Operational state of an output.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum OpState {
    Enabled,
    /// Disabled but kept in the layout, e.g. DPMS off.
    DisabledSoft,
    /// Disabled and withdrawn from the wm.
    DisabledHard,
    /// Physically gone; freed once the latest transaction drained.
    Destroying,
}

/// Session lock progress of an output, driven by presentation events.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum LockRenderState {
    Unlocked,
    PendingUnlock,
    PendingBlank,
    Blanked,
    PendingLockSurface,
    LockSurface,
}

/// Content class submitted with an output frame.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum FrameContent {
    Normal,
    Blank,
    LockSurface,
}

/// Wayland output, typically a screen.
pub struct Output {
    pub id: OutputId,
    pub name: String,

    /// Freely mutated configuration.
    pending: OutputState,
    /// Configuration last sent to the wm.
    sent: OutputState,
    /// Configuration applied to the hardware.
    current: OutputState,

    op_state: OpState,
    lock_render_state: LockRenderState,

    /// The wm protocol object exists.
    announced: bool,

    /// Gamma LUT must be re-applied on the next frame.
    gamma_dirty: bool,
}

impl Output {
    pub fn new(id: OutputId, name: impl Into<String>, state: OutputState) -> Self {
        Self {
            id,
            name: name.into(),
            pending: state,
            sent: Default::default(),
            current: state,
            op_state: OpState::Enabled,
            lock_render_state: LockRenderState::Unlocked,
            announced: false,
            gamma_dirty: false,
        }
    }

    pub fn pending(&self) -> &OutputState {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut OutputState {
        &mut self.pending
    }

    pub fn current(&self) -> &OutputState {
        &self.current
    }

    pub fn op_state(&self) -> OpState {
        self.op_state
    }

    pub fn lock_render_state(&self) -> LockRenderState {
        self.lock_render_state
    }

    /// Send pending configuration deltas to the wm.
    ///
    /// Creates the protocol object on first exposure.
    pub fn send_dirty(&mut self, wm: &mut Wm) {
        if !matches!(self.op_state, OpState::Enabled | OpState::DisabledSoft) {
            return;
        }

        if !self.announced {
            self.announced = true;
            wm.push(WmEvent::OutputAdded { id: self.id });
            // Force full state transmission below.
            self.sent = OutputState::default();
        }

        let logical_size = self.pending.logical_size();
        if logical_size != self.sent.logical_size() {
            wm.push(WmEvent::OutputDimensions {
                id: self.id,
                width: logical_size.w,
                height: logical_size.h,
            });
        }

        if self.pending.position != self.sent.position {
            wm.push(WmEvent::OutputPosition {
                id: self.id,
                x: self.pending.position.x,
                y: self.pending.position.y,
            });
        }

        self.sent = self.pending;
    }

    /// Withdraw the output from the wm.
    fn withdraw(&mut self, wm: &mut Wm) {
        if self.announced {
            self.announced = false;
            wm.push(WmEvent::OutputRemoved { id: self.id });
        }
    }

    /// Apply the pending configuration after a successful modeset.
    pub fn modeset_done(&mut self) {
        self.current = self.pending;
    }

    /// Handle a failed backend commit.
    ///
    /// The frame is skipped; the gamma LUT is retried on the next one.
    pub fn commit_failed(&mut self) {
        error!("output {} backend commit failed, skipping frame", self.name);
        self.gamma_dirty = false;
    }

    /// Mark the gamma LUT for re-application.
    pub fn set_gamma_dirty(&mut self) {
        self.gamma_dirty = true;
    }

    pub fn gamma_dirty(&self) -> bool {
        self.gamma_dirty
    }

    /// Track the content class of a submitted frame.
    pub fn frame_commit(&mut self, content: FrameContent) {
        self.lock_render_state = match content {
            FrameContent::Blank if self.lock_render_state != LockRenderState::Blanked => {
                LockRenderState::PendingBlank
            },
            FrameContent::LockSurface
                if self.lock_render_state != LockRenderState::LockSurface =>
            {
                LockRenderState::PendingLockSurface
            },
            FrameContent::Normal if self.lock_render_state != LockRenderState::Unlocked => {
                LockRenderState::PendingUnlock
            },
            _ => self.lock_render_state,
        };
    }

    /// Settle the lock render state after a successful presentation.
    pub fn presented(&mut self) {
        self.lock_render_state = match self.lock_render_state {
            LockRenderState::PendingBlank => LockRenderState::Blanked,
            LockRenderState::PendingLockSurface => LockRenderState::LockSurface,
            LockRenderState::PendingUnlock => LockRenderState::Unlocked,
            state => state,
        };
    }

    /// Whether this output hides all normal content.
    pub fn lock_settled(&self) -> bool {
        matches!(
            self.lock_render_state,
            LockRenderState::Blanked | LockRenderState::LockSurface
        )
    }
}

/// Container tracking all known outputs.
#[derive(Default)]
pub struct Outputs {
    outputs: Vec<Output>,
    next_id: u64,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new output.
    pub fn add(&mut self, name: impl Into<String>, state: OutputState) -> OutputId {
        self.next_id += 1;
        let id = OutputId(self.next_id);
        self.outputs.push(Output::new(id, name, state));
        id
    }

    pub fn get(&self, id: OutputId) -> Option<&Output> {
        self.outputs.iter().find(|output| output.id == id)
    }

    pub fn get_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.iter_mut().find(|output| output.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.outputs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Output> {
        self.outputs.iter_mut()
    }

    /// Update an output's operational state, keeping the wm consistent.
    pub fn set_op_state(&mut self, id: OutputId, op_state: OpState, wm: &mut Wm) {
        let output = match self.get_mut(id) {
            Some(output) => output,
            None => return,
        };

        output.op_state = op_state;
        match op_state {
            OpState::Enabled | OpState::DisabledSoft => output.send_dirty(wm),
            OpState::DisabledHard | OpState::Destroying => output.withdraw(wm),
        }
    }

    /// Send configuration deltas for all exposed outputs.
    pub fn send_dirty(&mut self, wm: &mut Wm) {
        for output in &mut self.outputs {
            output.send_dirty(wm);
        }
    }

    /// Force full state transmission on the next exposure.
    ///
    /// Used when a new wm connection needs a resync.
    pub fn reset_announced(&mut self) {
        for output in &mut self.outputs {
            output.announced = false;
        }
    }

    /// Free destroying outputs.
    ///
    /// Must only be called while no transaction references output state,
    /// i.e. between transactions.
    pub fn reap(&mut self) {
        self.outputs.retain(|output| output.op_state != OpState::Destroying);
    }

    /// Whether every exposed output hides normal content.
    pub fn all_lock_settled(&self) -> bool {
        self.outputs
            .iter()
            .filter(|output| output.op_state == OpState::Enabled)
            .all(Output::lock_settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(width: i32, height: i32, scale: f64) -> OutputState {
        OutputState {
            mode: Mode { size: Size::from((width, height)), refresh: 60_000 },
            scale,
            ..Default::default()
        }
    }

    #[test]
    fn first_exposure_announces_output() {
        let mut outputs = Outputs::new();
        let mut wm = Wm::new();
        let id = outputs.add("DP-1", state(3840, 2160, 2.));

        outputs.send_dirty(&mut wm);
        assert_eq!(wm.staged_events()[0], WmEvent::OutputAdded { id });
        assert_eq!(wm.staged_events()[1], WmEvent::OutputDimensions {
            id,
            width: 1920,
            height: 1080
        });

        // Unchanged state produces no further deltas.
        let staged = wm.staged_events().len();
        outputs.send_dirty(&mut wm);
        assert_eq!(wm.staged_events().len(), staged);
    }

    #[test]
    fn hard_disable_withdraws_output() {
        let mut outputs = Outputs::new();
        let mut wm = Wm::new();
        let id = outputs.add("DP-1", state(1920, 1080, 1.));

        outputs.send_dirty(&mut wm);
        outputs.set_op_state(id, OpState::DisabledHard, &mut wm);
        assert_eq!(*wm.staged_events().last().unwrap(), WmEvent::OutputRemoved { id });

        // Destroying outputs are reaped between transactions.
        outputs.set_op_state(id, OpState::Destroying, &mut wm);
        outputs.reap();
        assert!(outputs.get(id).is_none());
    }

    #[test]
    fn lock_render_state_settles_on_present() {
        let mut output = Output::new(OutputId(1), "DP-1", state(1920, 1080, 1.));

        output.frame_commit(FrameContent::Blank);
        assert_eq!(output.lock_render_state(), LockRenderState::PendingBlank);
        assert!(!output.lock_settled());

        output.presented();
        assert_eq!(output.lock_render_state(), LockRenderState::Blanked);
        assert!(output.lock_settled());

        // Lock surface replaces the blank fallback.
        output.frame_commit(FrameContent::LockSurface);
        output.presented();
        assert_eq!(output.lock_render_state(), LockRenderState::LockSurface);

        output.frame_commit(FrameContent::Normal);
        output.presented();
        assert_eq!(output.lock_render_state(), LockRenderState::Unlocked);
    }

    #[test]
    fn transform_swaps_logical_dimensions() {
        let mut output_state = state(1920, 1080, 1.);
        output_state.transform = Transform::Rotate90;
        assert_eq!(output_state.logical_size(), Size::from((1080, 1920)));
    }
}
