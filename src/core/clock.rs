/// Step clock — the sequencer's logical position within a timeline.

/// Tracks the current step, the authored cutscene-skip target, and any
/// pending forward jump.
///
/// Position advances by the simulation's delta multiplier rather than by
/// frames, so timelines play at the same speed at any frame rate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepClock {
    position: f64,
    skip_target: Option<f64>,
    pending: Option<f64>,
}

impl StepClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn advance(&mut self, delta: f64) {
        self.position += delta;
    }

    /// Schedule a jump to `target`. Only forward jumps are accepted.
    pub fn skip_to(&mut self, target: f64) -> bool {
        if target.is_finite() && target > self.position {
            self.pending = Some(target);
            true
        } else {
            false
        }
    }

    pub fn pending(&self) -> Option<f64> {
        self.pending
    }

    /// Consume the pending jump, moving the position onto its target.
    pub fn take_pending(&mut self) -> Option<f64> {
        let target = self.pending.take()?;
        self.position = self.position.max(target);
        Some(target)
    }

    /// Arm the step a "skip cutscene" request jumps to.
    pub fn arm_skip(&mut self, target: f64) {
        self.skip_target = Some(target);
    }

    pub fn skip_target(&self) -> Option<f64> {
        self.skip_target
    }

    /// True while a skip request would move the clock forward.
    pub fn is_skippable(&self) -> bool {
        matches!(self.skip_target, Some(target) if self.position < target)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
