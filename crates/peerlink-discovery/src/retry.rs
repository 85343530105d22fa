//! Exponential backoff shared by registry retries and session reconnection.

use std::time::Duration;

/// Retry configuration with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Add up to 25% random jitter so peers don't retry in lockstep
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Configuration that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate backoff duration for a zero-based attempt number
    #[must_use]
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_millis() as f64);

        let millis = if self.jitter {
            let mut buf = [0u8; 4];
            let _ = getrandom::getrandom(&mut buf);
            let jitter_factor = f64::from(u32::from_le_bytes(buf) % 25) / 100.0;
            capped * (1.0 + jitter_factor)
        } else {
            capped
        };

        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(config.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(config.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(config.backoff_duration(3), Duration::from_millis(800));
        assert_eq!(config.backoff_duration(4), Duration::from_millis(1000));
        assert_eq!(config.backoff_duration(30), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_bounded() {
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(60),
            jitter: true,
            ..RetryConfig::default()
        };

        for _ in 0..50 {
            let d = config.backoff_duration(0);
            assert!(d >= Duration::from_millis(1000));
            assert!(d < Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_none_has_no_retries() {
        assert_eq!(RetryConfig::none().max_retries, 0);
    }
}
