//! Circuit-breaker-guarded invocation of remote actions.

use std::future::Future;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::breaker::BreakerSnapshot;
use crate::channel::RpcChannel;
use crate::error::{InvokerError, Result};
use crate::events::BreakerEvent;
use crate::options::{InvokeOptions, RegistryConfig};
use crate::registry::{BreakerRegistry, BreakerSummary};
use crate::services::ServiceRegistry;

/// Sends commands to other services through per-key circuit breakers.
///
/// One invoker is shared by every caller in the process, so breaker state
/// reflects fleet-wide health of each `(service, action)` target.
pub struct RpcInvoker {
    services: ServiceRegistry,
    breakers: BreakerRegistry,
}

impl RpcInvoker {
    /// Creates an invoker with a default-sized breaker registry.
    pub fn new(services: ServiceRegistry) -> Self {
        Self::with_config(services, RegistryConfig::default())
    }

    pub fn with_config(services: ServiceRegistry, config: RegistryConfig) -> Self {
        Self {
            services,
            breakers: BreakerRegistry::new(config),
        }
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Sends `action` to `service` under the key's breaker.
    ///
    /// `options.timeout` applies to this call only. The gate settings
    /// (threshold, reset timeout, window, volume, `enabled`) are fixed by the
    /// first call that creates the key's breaker; later callers share it as is.
    ///
    /// Fails with [`InvokerError::UnknownService`] before touching any breaker
    /// if `service` was never registered.
    #[tracing::instrument(skip(self, payload, options))]
    pub async fn invoke(
        &self,
        service: &str,
        action: &str,
        payload: Value,
        options: &InvokeOptions,
    ) -> Result<Value> {
        let channel = self.services.resolve(service)?;
        let breaker = self.breakers.get_or_create(service, action, options);

        metrics::counter!(
            "rpc_invocations_total",
            "service" => service.to_string(),
            "action" => action.to_string()
        )
        .increment(1);

        breaker
            .execute_within(options.timeout, channel.send(service, action, payload))
            .await
    }

    /// Like [`RpcInvoker::invoke`], but substitutes `fallback`'s result when
    /// the breaker is open or the call fails.
    ///
    /// The original error is handed to the fallback and otherwise swallowed. A
    /// failing fallback surfaces as [`InvokerError::Fallback`]. Unknown services
    /// are never masked.
    pub async fn invoke_with_fallback<F, Fut>(
        &self,
        service: &str,
        action: &str,
        payload: Value,
        options: &InvokeOptions,
        fallback: F,
    ) -> Result<Value>
    where
        F: FnOnce(InvokerError) -> Fut,
        Fut: Future<Output = std::result::Result<Value, String>>,
    {
        match self.invoke(service, action, payload, options).await {
            Ok(value) => Ok(value),
            Err(err) if !err.is_recoverable() => Err(err),
            Err(err) => {
                metrics::counter!(
                    "rpc_fallbacks_total",
                    "service" => service.to_string(),
                    "action" => action.to_string()
                )
                .increment(1);
                tracing::debug!(service, action, error = %err, "using fallback");

                fallback(err)
                    .await
                    .map_err(|message| InvokerError::Fallback {
                        service: service.to_string(),
                        action: action.to_string(),
                        message,
                    })
            }
        }
    }

    pub fn snapshot(&self, service: &str, action: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(service, action).map(|b| b.snapshot())
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    pub fn summary(&self) -> BreakerSummary {
        self.breakers.summary()
    }

    /// Subscribes to state transitions, failures and rejections on every key.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.breakers.subscribe()
    }
}

impl std::fmt::Debug for RpcInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcInvoker")
            .field("services", &self.services)
            .field("breakers", &self.breakers.len())
            .finish()
    }
}
