//! Breaker and registry configuration.

use std::time::Duration;

/// Options governing one `(service, action)` breaker.
///
/// A breaker adopts the options of the call that created it; later calls on
/// the same key share that breaker as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeOptions {
    /// How long a call may take before it counts as failed.
    pub timeout: Duration,
    /// Failure percentage over the rolling window above which the breaker opens.
    pub error_threshold_percentage: f64,
    /// How long an open breaker waits before letting a trial call through.
    pub reset_timeout: Duration,
    /// When false the breaker never opens; calls still time out.
    pub enabled: bool,
    /// Trailing window over which failure percentage is computed.
    pub rolling_window: Duration,
    /// Minimum samples in the window before the breaker may open.
    pub volume_threshold: u64,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            error_threshold_percentage: 50.0,
            reset_timeout: Duration::from_secs(30),
            enabled: true,
            rolling_window: Duration::from_secs(10),
            volume_threshold: 0,
        }
    }
}

impl InvokeOptions {
    /// Creates options with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn error_threshold_percentage(mut self, percentage: f64) -> Self {
        self.error_threshold_percentage = percentage;
        self
    }

    pub fn reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = window;
        self
    }

    pub fn volume_threshold(mut self, samples: u64) -> Self {
        self.volume_threshold = samples;
        self
    }
}

/// Bounds on the breaker registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Maximum number of breakers retained before idle closed ones are evicted.
    pub max_breakers: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_breakers: 1024 }
    }
}
