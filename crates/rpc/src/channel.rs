//! Request/reply transport abstraction.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failure reported by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The request could not be delivered or no reply came back.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The remote service replied with an error.
    #[error("{0}")]
    Rejected(String),
}

/// The only way the core reaches another service.
///
/// Implementations wrap a broker connection, an HTTP client or, in tests, an
/// in-process handler table. They make no promise about aborting the remote
/// work if the returned future is dropped.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Sends `action` with `payload` to `service` and waits for the reply.
    async fn send(&self, service: &str, action: &str, payload: Value) -> Result<Value, ChannelError>;
}
