use std::sync::atomic::{AtomicU8, Ordering};

/// Where the current cycle is. At most one cycle is in flight.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    #[default]
    Idle = 0,
    AwaitingInference = 1,
    ComposingFrame = 2,
    Presenting = 3,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::AwaitingInference,
            2 => PipelineState::ComposingFrame,
            3 => PipelineState::Presenting,
            _ => PipelineState::Idle,
        }
    }
}

/// Shared by the frame worker and the paint callback.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` and return the state it replaced.
    pub fn set(&self, to: PipelineState) -> PipelineState {
        let from = PipelineState::from_u8(self.0.swap(to as u8, Ordering::AcqRel));
        if from != to {
            tracing::trace!(?from, ?to, "Pipeline state");
        }
        from
    }

    /// Move to `to` only if the cell still holds `from`. Returns whether the
    /// transition happened.
    pub fn transition(&self, from: PipelineState, to: PipelineState) -> bool {
        let moved = self
            .0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved && from != to {
            tracing::trace!(?from, ?to, "Pipeline state");
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_report_previous_state() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), PipelineState::Idle);
        assert_eq!(cell.set(PipelineState::AwaitingInference), PipelineState::Idle);
        assert_eq!(cell.set(PipelineState::ComposingFrame), PipelineState::AwaitingInference);
        assert_eq!(cell.get(), PipelineState::ComposingFrame);
    }

    #[test]
    fn transition_only_moves_from_the_expected_state() {
        let cell = StateCell::new();
        cell.set(PipelineState::AwaitingInference);
        assert!(!cell.transition(PipelineState::Presenting, PipelineState::Idle));
        assert_eq!(cell.get(), PipelineState::AwaitingInference);

        cell.set(PipelineState::Presenting);
        assert!(cell.transition(PipelineState::Presenting, PipelineState::Idle));
        assert_eq!(cell.get(), PipelineState::Idle);
    }
}
