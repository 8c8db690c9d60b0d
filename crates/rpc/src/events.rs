//! Observable breaker events.

use crate::breaker::{BreakerKey, BreakerState};

/// Something observable happened on a breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerEvent {
    pub key: BreakerKey,
    pub kind: BreakerEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BreakerEventKind {
    /// The breaker moved between states.
    StateChanged { from: BreakerState, to: BreakerState },
    /// A call failed or timed out.
    Failure { reason: String },
    /// A call was turned away without reaching the transport.
    Rejected,
}

impl BreakerEvent {
    pub(crate) fn state_changed(key: &BreakerKey, from: BreakerState, to: BreakerState) -> Self {
        Self {
            key: key.clone(),
            kind: BreakerEventKind::StateChanged { from, to },
        }
    }

    pub(crate) fn failure(key: &BreakerKey, reason: impl Into<String>) -> Self {
        Self {
            key: key.clone(),
            kind: BreakerEventKind::Failure {
                reason: reason.into(),
            },
        }
    }

    pub(crate) fn rejected(key: &BreakerKey) -> Self {
        Self {
            key: key.clone(),
            kind: BreakerEventKind::Rejected,
        }
    }
}
