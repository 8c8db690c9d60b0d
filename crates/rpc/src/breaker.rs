//! Per-key circuit breaker.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::channel::ChannelError;
use crate::error::InvokerError;
use crate::events::BreakerEvent;
use crate::options::InvokeOptions;

/// Gate state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BreakerState {
    /// Traffic flows; failures are sampled.
    Closed,
    /// Traffic is turned away until the reset timeout elapses.
    Open,
    /// One trial call is probing recovery.
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "Closed",
            BreakerState::Open => "Open",
            BreakerState::HalfOpen => "HalfOpen",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies one breaker: the target service and the action invoked on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BreakerKey {
    pub service: String,
    pub action: String,
}

impl BreakerKey {
    pub fn new(service: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
        }
    }
}

impl std::fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.service, self.action)
    }
}

/// Point-in-time view of a breaker for external monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub action: String,
    pub enabled: bool,
    pub state: BreakerState,
    /// Failures in the rolling window.
    pub failure_count: u64,
    /// Successes in the rolling window.
    pub success_count: u64,
    pub failure_percentage: f64,
    /// Calls that reached the transport since the breaker was created.
    pub invocation_count: u64,
    /// Calls turned away while open since the breaker was created.
    pub rejected_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    failed: bool,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    window: VecDeque<Sample>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    last_used: Instant,
}

impl Inner {
    fn record(&mut self, now: Instant, failed: bool, window: Duration) {
        self.window.push_back(Sample { at: now, failed });
        self.prune(now, window);
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .window
            .front()
            .is_some_and(|sample| now.duration_since(sample.at) > window)
        {
            self.window.pop_front();
        }
    }

    fn counts(&self) -> (u64, u64) {
        let failures = self.window.iter().filter(|s| s.failed).count() as u64;
        (failures, self.window.len() as u64 - failures)
    }

    fn open(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.window.clear();
        self.opened_at = None;
        self.trial_in_flight = false;
    }
}

fn failure_percentage(failures: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failures as f64 * 100.0 / total as f64
    }
}

/// Admission granted for one call.
///
/// A trial permit dropped before its outcome is recorded (the caller gave up
/// on the future) frees the half-open slot for the next caller.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

/// Guards calls to a single `(service, action)` key.
///
/// Shared by every caller of the key; the state lock is never held across
/// an await point.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: BreakerKey,
    options: InvokeOptions,
    inner: Mutex<Inner>,
    invocation_count: AtomicU64,
    rejected_count: AtomicU64,
    events: broadcast::Sender<BreakerEvent>,
}

impl CircuitBreaker {
    /// Creates a standalone breaker with its own event channel.
    pub fn new(key: BreakerKey, options: InvokeOptions) -> Self {
        let (events, _) = broadcast::channel(64);
        Self::with_events(key, options, events)
    }

    pub(crate) fn with_events(
        key: BreakerKey,
        options: InvokeOptions,
        events: broadcast::Sender<BreakerEvent>,
    ) -> Self {
        Self {
            key,
            options,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
                last_used: Instant::now(),
            }),
            invocation_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            events,
        }
    }

    pub fn key(&self) -> &BreakerKey {
        &self.key
    }

    pub fn options(&self) -> &InvokeOptions {
        &self.options
    }

    /// Current state. An open breaker whose reset timeout has elapsed still
    /// reports `Open` until the next call moves it to `HalfOpen`.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn last_used(&self) -> Instant {
        self.lock().last_used
    }

    /// Runs `call` under the gate, racing it against the configured timeout.
    pub async fn execute<F>(&self, call: F) -> Result<Value, InvokerError>
    where
        F: Future<Output = Result<Value, ChannelError>>,
    {
        self.execute_within(self.options.timeout, call).await
    }

    /// Like [`CircuitBreaker::execute`], racing `call` against `timeout`
    /// instead of the breaker's own.
    pub async fn execute_within<F>(
        &self,
        timeout: Duration,
        call: F,
    ) -> Result<Value, InvokerError>
    where
        F: Future<Output = Result<Value, ChannelError>>,
    {
        let mut permit = self.acquire()?;
        self.invocation_count.fetch_add(1, Ordering::Relaxed);

        let result = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(InvokerError::Upstream {
                service: self.key.service.clone(),
                action: self.key.action.clone(),
                message: err.to_string(),
            }),
            Err(_) => Err(InvokerError::UpstreamTimeout {
                service: self.key.service.clone(),
                action: self.key.action.clone(),
                timeout,
            }),
        };

        match &result {
            Ok(_) => self.record_success(&mut permit),
            Err(err) => self.record_failure(&mut permit, err),
        }
        result
    }

    /// Forces the breaker closed and clears its window.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let from = inner.state;
        inner.close();
        drop(inner);

        if from != BreakerState::Closed {
            self.transitioned(from, BreakerState::Closed);
        }
        info!(circuit = %self.key, "circuit reset");
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        inner.prune(Instant::now(), self.options.rolling_window);
        let (failure_count, success_count) = inner.counts();

        BreakerSnapshot {
            service: self.key.service.clone(),
            action: self.key.action.clone(),
            enabled: self.options.enabled,
            state: inner.state,
            failure_count,
            success_count,
            failure_percentage: failure_percentage(failure_count, failure_count + success_count),
            invocation_count: self.invocation_count.load(Ordering::Relaxed),
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self) -> Result<Permit<'_>, InvokerError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.last_used = now;

        if !self.options.enabled {
            return Ok(Permit {
                breaker: self,
                trial: false,
                settled: false,
            });
        }

        let state = inner.state;
        let trial = match state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                let ready = inner
                    .opened_at
                    .is_none_or(|at| now.duration_since(at) >= self.options.reset_timeout);
                if !ready {
                    drop(inner);
                    return Err(self.reject());
                }
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = true;
                drop(inner);
                self.transitioned(BreakerState::Open, BreakerState::HalfOpen);
                true
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    drop(inner);
                    return Err(self.reject());
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Ok(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record_success(&self, permit: &mut Permit<'_>) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.record(now, false, self.options.rolling_window);
        permit.settled = true;

        let from = inner.state;
        if permit.trial && from == BreakerState::HalfOpen {
            inner.close();
            drop(inner);
            self.transitioned(from, BreakerState::Closed);
        }
    }

    fn record_failure(&self, permit: &mut Permit<'_>, err: &InvokerError) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.record(now, true, self.options.rolling_window);
        permit.settled = true;

        let from = inner.state;
        let (failures, successes) = inner.counts();
        let opened = if permit.trial {
            inner.open(now);
            true
        } else if self.options.enabled && from == BreakerState::Closed {
            let total = failures + successes;
            let tripped = total >= self.options.volume_threshold
                && failure_percentage(failures, total) > self.options.error_threshold_percentage;
            if tripped {
                inner.open(now);
            }
            tripped
        } else {
            false
        };
        drop(inner);

        metrics::counter!(
            "rpc_failures_total",
            "service" => self.key.service.clone(),
            "action" => self.key.action.clone(),
            "kind" => err.kind()
        )
        .increment(1);
        warn!(circuit = %self.key, error = %err, failures, successes, "call failed");
        let _ = self.events.send(BreakerEvent::failure(&self.key, err.to_string()));

        if opened {
            self.transitioned(from, BreakerState::Open);
        }
    }

    fn reject(&self) -> InvokerError {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rpc_rejections_total",
            "service" => self.key.service.clone(),
            "action" => self.key.action.clone()
        )
        .increment(1);
        let _ = self.events.send(BreakerEvent::rejected(&self.key));

        InvokerError::CircuitOpen {
            service: self.key.service.clone(),
            action: self.key.action.clone(),
        }
    }

    fn transitioned(&self, from: BreakerState, to: BreakerState) {
        match to {
            BreakerState::Open => error!(circuit = %self.key, %from, "circuit opened"),
            BreakerState::HalfOpen => info!(circuit = %self.key, "circuit half-open, allowing trial call"),
            BreakerState::Closed => info!(circuit = %self.key, %from, "circuit closed"),
        }
        metrics::counter!(
            "rpc_breaker_transitions_total",
            "service" => self.key.service.clone(),
            "action" => self.key.action.clone(),
            "state" => to.as_str()
        )
        .increment(1);
        let _ = self
            .events
            .send(BreakerEvent::state_changed(&self.key, from, to));
    }
}
