//! Bounded, process-wide table of breakers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::breaker::{BreakerKey, BreakerSnapshot, BreakerState, CircuitBreaker};
use crate::events::BreakerEvent;
use crate::options::{InvokeOptions, RegistryConfig};

/// Aggregate view across every breaker in the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BreakerSummary {
    pub total: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub failure_count: u64,
    pub success_count: u64,
    pub invocation_count: u64,
    pub rejected_count: u64,
}

/// Holds one [`CircuitBreaker`] per `(service, action)` key.
///
/// Breakers are created lazily. Once `max_breakers` is reached the least
/// recently used idle closed breaker is evicted to make room; open and
/// half-open breakers are never evicted, so the table may briefly exceed its
/// bound while many targets are failing.
pub struct BreakerRegistry {
    config: RegistryConfig,
    breakers: RwLock<HashMap<BreakerKey, Arc<CircuitBreaker>>>,
    events: broadcast::Sender<BreakerEvent>,
}

impl BreakerRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Returns the breaker for the key, creating it with `options` if absent.
    pub fn get_or_create(
        &self,
        service: &str,
        action: &str,
        options: &InvokeOptions,
    ) -> Arc<CircuitBreaker> {
        let key = BreakerKey::new(service, action);
        if let Some(breaker) = self.read().get(&key) {
            return breaker.clone();
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(breaker) = breakers.get(&key) {
            return breaker.clone();
        }

        if breakers.len() >= self.config.max_breakers {
            Self::evict_idle(&mut breakers, self.config.max_breakers);
        }

        let breaker = Arc::new(CircuitBreaker::with_events(
            key.clone(),
            options.clone(),
            self.events.clone(),
        ));
        tracing::debug!(circuit = %key, "breaker created");
        breakers.insert(key, breaker.clone());
        breaker
    }

    pub fn get(&self, service: &str, action: &str) -> Option<Arc<CircuitBreaker>> {
        self.read().get(&BreakerKey::new(service, action)).cloned()
    }

    /// Drops the breaker for the key. Returns true if one existed.
    pub fn remove(&self, service: &str, action: &str) -> bool {
        self.breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&BreakerKey::new(service, action))
            .is_some()
    }

    /// Forces the breaker for the key closed. Returns true if one existed.
    pub fn reset(&self, service: &str, action: &str) -> bool {
        match self.get(service, action) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshots of every breaker, ordered by key.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut breakers: Vec<Arc<CircuitBreaker>> = self.read().values().cloned().collect();
        breakers.sort_by(|a, b| a.key().cmp(b.key()));
        breakers.iter().map(|b| b.snapshot()).collect()
    }

    pub fn summary(&self) -> BreakerSummary {
        self.snapshots()
            .iter()
            .fold(BreakerSummary::default(), |mut summary, snapshot| {
                summary.total += 1;
                match snapshot.state {
                    BreakerState::Closed => summary.closed += 1,
                    BreakerState::Open => summary.open += 1,
                    BreakerState::HalfOpen => summary.half_open += 1,
                }
                summary.failure_count += snapshot.failure_count;
                summary.success_count += snapshot.success_count;
                summary.invocation_count += snapshot.invocation_count;
                summary.rejected_count += snapshot.rejected_count;
                summary
            })
    }

    /// Subscribes to events from every breaker in the registry.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<BreakerKey, Arc<CircuitBreaker>>> {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict_idle(breakers: &mut HashMap<BreakerKey, Arc<CircuitBreaker>>, max: usize) {
        // A strong count of one means no caller is mid-call on the breaker.
        let victim = breakers
            .iter()
            .filter(|(_, b)| Arc::strong_count(b) == 1 && b.state() == BreakerState::Closed)
            .min_by_key(|(_, b)| b.last_used())
            .map(|(key, _)| key.clone());

        match victim {
            Some(key) => {
                tracing::debug!(circuit = %key, "evicting idle breaker");
                breakers.remove(&key);
            }
            None => {
                tracing::warn!(
                    max_breakers = max,
                    current = breakers.len(),
                    "breaker registry full with no idle closed breaker; growing past bound"
                );
            }
        }
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
