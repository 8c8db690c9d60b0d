//! Service name to channel lookup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::channel::RpcChannel;
use crate::error::InvokerError;

/// Maps logical service names to the channel that reaches them.
///
/// Populated once at startup and read-only afterwards.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    channels: HashMap<String, Arc<dyn RpcChannel>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `channel` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, channel: Arc<dyn RpcChannel>) {
        self.channels.insert(name.into(), channel);
    }

    /// Builder-style variant of [`ServiceRegistry::register`].
    pub fn with(mut self, name: impl Into<String>, channel: Arc<dyn RpcChannel>) -> Self {
        self.register(name, channel);
        self
    }

    /// Looks up the channel for `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn RpcChannel>, InvokerError> {
        self.channels.get(name).cloned().ok_or_else(|| {
            tracing::error!(service = name, "no channel registered for service");
            InvokerError::UnknownService(name.to_string())
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}
