//! Saga and step state machines.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► InProgress ──┬──► Completed
///                          └──► Failed ──► Compensating ──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Created, not yet executed.
    #[default]
    Pending,

    /// Saga steps are being executed.
    InProgress,

    /// All steps completed successfully (terminal state).
    Completed,

    /// A step failed; compensation is about to run.
    Failed,

    /// Compensating transactions are in progress.
    Compensating,

    /// Compensation pass finished after a failure (terminal state).
    Compensated,
}

impl SagaStatus {
    /// Returns true if the saga can begin executing.
    pub fn can_start(&self) -> bool {
        matches!(self, SagaStatus::Pending)
    }

    /// Returns true if the state machine allows moving to `next`.
    pub fn can_transition_to(&self, next: SagaStatus) -> bool {
        matches!(
            (self, next),
            (SagaStatus::Pending, SagaStatus::InProgress)
                | (SagaStatus::InProgress, SagaStatus::Completed)
                | (SagaStatus::InProgress, SagaStatus::Failed)
                | (SagaStatus::Failed, SagaStatus::Compensating)
                | (SagaStatus::Compensating, SagaStatus::Compensated)
        )
    }

    /// Finished states a cleanup sweep may purge.
    pub const PURGEABLE: [SagaStatus; 3] = [
        SagaStatus::Completed,
        SagaStatus::Compensated,
        SagaStatus::Failed,
    ];

    /// States a saga is left in when its process dies mid-flight.
    pub const RECOVERABLE: [SagaStatus; 3] = [
        SagaStatus::InProgress,
        SagaStatus::Failed,
        SagaStatus::Compensating,
    ];

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "Pending",
            SagaStatus::InProgress => "InProgress",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(SagaStatus::Pending),
            "InProgress" => Ok(SagaStatus::InProgress),
            "Completed" => Ok(SagaStatus::Completed),
            "Failed" => Ok(SagaStatus::Failed),
            "Compensating" => Ok(SagaStatus::Compensating),
            "Compensated" => Ok(SagaStatus::Compensated),
            other => Err(format!("unknown saga status '{other}'")),
        }
    }
}

/// The state of a single step.
///
/// ```text
/// Pending ──┬──► Completed ──► Compensated
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Compensated,
}

impl StepStatus {
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Completed)
                | (StepStatus::Pending, StepStatus::Failed)
                | (StepStatus::Completed, StepStatus::Compensated)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
            StepStatus::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SagaStatus; 6] = [
        SagaStatus::Pending,
        SagaStatus::InProgress,
        SagaStatus::Completed,
        SagaStatus::Failed,
        SagaStatus::Compensating,
        SagaStatus::Compensated,
    ];

    #[test]
    fn test_default_state_is_pending() {
        assert_eq!(SagaStatus::default(), SagaStatus::Pending);
        assert_eq!(StepStatus::default(), StepStatus::Pending);
    }

    #[test]
    fn test_can_start() {
        assert!(SagaStatus::Pending.can_start());
        assert!(!SagaStatus::InProgress.can_start());
        assert!(!SagaStatus::Completed.can_start());
        assert!(!SagaStatus::Compensated.can_start());
    }

    #[test]
    fn test_saga_transitions() {
        assert!(SagaStatus::Pending.can_transition_to(SagaStatus::InProgress));
        assert!(SagaStatus::InProgress.can_transition_to(SagaStatus::Completed));
        assert!(SagaStatus::InProgress.can_transition_to(SagaStatus::Failed));
        assert!(SagaStatus::Failed.can_transition_to(SagaStatus::Compensating));
        assert!(SagaStatus::Compensating.can_transition_to(SagaStatus::Compensated));

        assert!(!SagaStatus::Pending.can_transition_to(SagaStatus::Completed));
        assert!(!SagaStatus::Completed.can_transition_to(SagaStatus::Compensating));
        assert!(!SagaStatus::Compensated.can_transition_to(SagaStatus::Pending));
        assert!(!SagaStatus::InProgress.can_transition_to(SagaStatus::Compensated));
    }

    #[test]
    fn test_purgeable_states() {
        assert!(SagaStatus::PURGEABLE.contains(&SagaStatus::Failed));
        assert!(!SagaStatus::PURGEABLE.contains(&SagaStatus::Pending));
        assert!(!SagaStatus::PURGEABLE.contains(&SagaStatus::InProgress));
        assert!(!SagaStatus::PURGEABLE.contains(&SagaStatus::Compensating));
    }

    #[test]
    fn test_recoverable_states() {
        for status in SagaStatus::RECOVERABLE {
            assert!(!SagaStatus::PURGEABLE.contains(&status) || status == SagaStatus::Failed);
        }
        assert!(!SagaStatus::RECOVERABLE.contains(&SagaStatus::Pending));
        assert!(!SagaStatus::RECOVERABLE.contains(&SagaStatus::Completed));
        assert!(!SagaStatus::RECOVERABLE.contains(&SagaStatus::Compensated));
    }

    #[test]
    fn test_display_parse_roundtrip() {
        for status in ALL {
            assert_eq!(status.to_string().parse::<SagaStatus>().unwrap(), status);
        }
        assert!("Running".parse::<SagaStatus>().is_err());
    }

    #[test]
    fn test_step_transitions() {
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Completed));
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Failed));
        assert!(StepStatus::Completed.can_transition_to(StepStatus::Compensated));

        assert!(!StepStatus::Failed.can_transition_to(StepStatus::Compensated));
        assert!(!StepStatus::Pending.can_transition_to(StepStatus::Compensated));
        assert!(!StepStatus::Compensated.can_transition_to(StepStatus::Completed));
        assert!(!StepStatus::Completed.can_transition_to(StepStatus::Failed));
    }
}
