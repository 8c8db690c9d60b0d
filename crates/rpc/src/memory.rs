//! In-process channel with scripted handlers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::channel::{ChannelError, RpcChannel};

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ChannelError>> + Send + Sync>;

/// A call observed by an [`InMemoryChannel`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub service: String,
    pub action: String,
    pub payload: Value,
}

#[derive(Default)]
struct InMemoryChannelState {
    handlers: HashMap<String, Handler>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    calls: Vec<RecordedCall>,
}

/// In-memory channel for tests and local wiring.
///
/// Every call is recorded before anything else happens, so a recorded call
/// means the request reached the transport.
#[derive(Clone, Default)]
pub struct InMemoryChannel {
    state: Arc<RwLock<InMemoryChannelState>>,
}

impl InMemoryChannel {
    /// Creates a channel with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an async handler for `action`.
    pub fn handle<F, Fut>(&self, action: impl Into<String>, handler: F) -> &Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ChannelError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |payload: Value| handler(payload).boxed());
        self.write().handlers.insert(action.into(), handler);
        self
    }

    /// Installs a handler that always replies with `reply`.
    pub fn reply(&self, action: impl Into<String>, reply: Value) -> &Self {
        self.handle(action, move |_| {
            let reply = reply.clone();
            async move { Ok(reply) }
        })
    }

    /// Makes every call to `action` fail with `reason` until cleared.
    pub fn fail_action(&self, action: impl Into<String>, reason: impl Into<String>) {
        self.write().failures.insert(action.into(), reason.into());
    }

    pub fn clear_failure(&self, action: &str) {
        self.write().failures.remove(action);
    }

    /// Delays every call to `action` by `delay` before replying.
    pub fn delay_action(&self, action: impl Into<String>, delay: Duration) {
        self.write().delays.insert(action.into(), delay);
    }

    /// All calls received so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.read().calls.clone()
    }

    /// Calls received for `action`, in arrival order.
    pub fn calls_for(&self, action: &str) -> Vec<RecordedCall> {
        self.read()
            .calls
            .iter()
            .filter(|call| call.action == action)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.read().calls.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemoryChannelState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryChannelState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RpcChannel for InMemoryChannel {
    async fn send(&self, service: &str, action: &str, payload: Value) -> Result<Value, ChannelError> {
        let (failure, delay, handler) = {
            let mut state = self.write();
            state.calls.push(RecordedCall {
                service: service.to_string(),
                action: action.to_string(),
                payload: payload.clone(),
            });
            (
                state.failures.get(action).cloned(),
                state.delays.get(action).copied(),
                state.handlers.get(action).cloned(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = failure {
            return Err(ChannelError::Rejected(reason));
        }
        match handler {
            Some(handler) => handler(payload).await,
            None => Err(ChannelError::Rejected(format!(
                "{service} has no handler for '{action}'"
            ))),
        }
    }
}
