//! Configuration for the sync coordinator.

use std::time::Duration;
use tiersync_protocol::{DeviceId, ResolutionStrategy};

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identity of this device. Stamped on every outbound delta.
    pub device_id: DeviceId,
    /// How conflicts with remote deltas are settled.
    pub strategy: ResolutionStrategy,
    /// Retry configuration for transport sends.
    pub retry: RetryConfig,
    /// Timeout for a single transport send.
    pub timeout: Duration,
    /// Interval at which [`crate::SyncCoordinator::run`] pushes local
    /// changes. `None` means only inbound deltas drive the loop.
    pub sync_interval: Option<Duration>,
    /// Early deltas held per peer while waiting for a predecessor. Further
    /// early deltas are dropped.
    pub max_queued_inbound: usize,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            strategy: ResolutionStrategy::default(),
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            sync_interval: None,
            max_queued_inbound: 1024,
        }
    }

    /// Sets the conflict resolution strategy.
    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the send timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the interval for automatic pushes.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets how many early deltas are held per peer.
    pub fn with_max_queued_inbound(mut self, max: usize) -> Self {
        self.max_queued_inbound = max;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(DeviceId::random())
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of send attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    ///
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`,
    /// plus up to 25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::random::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let device = DeviceId::from_bytes([2u8; 16]);
        let config = SyncConfig::new(device)
            .with_strategy(ResolutionStrategy::Merge)
            .with_timeout(Duration::from_secs(60))
            .with_sync_interval(Duration::from_secs(5))
            .with_max_queued_inbound(8);

        assert_eq!(config.device_id, device);
        assert_eq!(config.strategy.name(), "merge");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.sync_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.max_queued_inbound, 8);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
        assert!(delay2 <= Duration::from_millis(250));
    }

    #[test]
    fn retry_delay_without_jitter_is_exact() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(10))
            .with_jitter(false);
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(40));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(5);
        assert!(delay <= Duration::from_millis(6250));
    }
}
