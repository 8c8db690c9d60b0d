//! Invoker error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to callers of [`crate::RpcInvoker`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvokerError {
    /// The breaker for this key is open and no fallback was supplied.
    #[error("Circuit breaker open for {service}.{action}")]
    CircuitOpen { service: String, action: String },

    /// The call did not complete within the configured timeout.
    #[error("{service}.{action} timed out after {}ms", timeout.as_millis())]
    UpstreamTimeout {
        service: String,
        action: String,
        timeout: Duration,
    },

    /// The call completed but the remote side signaled failure.
    ///
    /// Displays the upstream reason verbatim.
    #[error("{message}")]
    Upstream {
        service: String,
        action: String,
        message: String,
    },

    /// The fallback itself failed.
    #[error("Fallback for {service}.{action} failed: {message}")]
    Fallback {
        service: String,
        action: String,
        message: String,
    },

    /// No channel is registered under this service name.
    #[error("Unknown service: {0}")]
    UnknownService(String),
}

impl InvokerError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InvokerError::CircuitOpen { .. } => "circuit_open",
            InvokerError::UpstreamTimeout { .. } => "timeout",
            InvokerError::Upstream { .. } => "upstream",
            InvokerError::Fallback { .. } => "fallback",
            InvokerError::UnknownService(_) => "unknown_service",
        }
    }

    /// Returns true if a fallback may stand in for this error.
    ///
    /// An unknown service is a wiring defect and is never masked.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            InvokerError::UnknownService(_) | InvokerError::Fallback { .. }
        )
    }
}

/// Convenience type alias for invoker results.
pub type Result<T> = std::result::Result<T, InvokerError>;
