//! Retry logic with linear or exponential backoff for transient errors.

use crate::error::{Error, Result};
use std::thread;
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// base, 2*base, 3*base, ...
    Linear,
    /// base, base*factor, base*factor^2, ...
    Exponential { factor: f64 },
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth of the delay
    pub backoff: Backoff,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Ownership and permission fixes: the first attempt plus 3 retries,
    /// linear backoff
    pub fn filesystem() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            backoff: Backoff::Linear,
            max_delay: Duration::from_secs(2),
        }
    }

    /// Certificate renewal: exponential backoff, factor 2
    pub fn certificate(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Exponential { factor: 2.0 },
            max_delay,
        }
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::filesystem()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let delay = match self.backoff {
            Backoff::Linear => base * f64::from(attempt + 1),
            Backoff::Exponential { factor } => base * factor.powi(attempt as i32),
        };
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called when an operation is being retried.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration);
}

/// Callback that logs retries at warn level under a label.
pub struct LogCallback<'a>(pub &'a str);

impl RetryCallback for LogCallback<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration) {
        log::warn!(
            "{}: attempt {}/{} failed: {}. Retrying in {:.1}s",
            self.0,
            attempt,
            max_attempts,
            error,
            delay.as_secs_f64()
        );
    }
}

/// Execute an operation with retry logic.
///
/// Retries only while the operation returns a retryable error; anything else
/// is returned immediately.
///
/// # Returns
/// The result of the operation, or the last error if all attempts failed.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() || attempt + 1 >= config.max_attempts {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, config.max_attempts, &e, delay);
                }
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn quick(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff: Backoff::Linear,
            max_delay: Duration::from_millis(10),
        }
    }

    fn busy() -> Error {
        Error::Filesystem {
            path: "/srv/db".into(),
            message: "resource busy".into(),
            retryable: true,
        }
    }

    #[test]
    fn test_linear_delay() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff: Backoff::Linear,
            max_delay: Duration::from_millis(250),
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_delay_capped() {
        let config =
            RetryConfig::certificate(5, Duration::from_secs(30), Duration::from_secs(600));
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(60));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(240));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(600));
    }

    #[test]
    fn test_with_retry_success_first_try() {
        let result = with_retry(&RetryConfig::no_retry(), None, || Ok::<_, Error>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_retry_non_retryable_error() {
        let attempts = Rc::new(Cell::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<()> = with_retry(&quick(3), None, || {
            attempts_clone.set(attempts_clone.get() + 1);
            Err(Error::runtime("db", "port already allocated"))
        });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_with_retry_eventual_success() {
        let attempts = Rc::new(Cell::new(0));
        let attempts_clone = attempts.clone();

        let result = with_retry(&quick(3), None, || {
            let current = attempts_clone.get();
            attempts_clone.set(current + 1);
            if current < 2 { Err(busy()) } else { Ok(42) }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[derive(Default)]
    struct Counting(Cell<u32>);

    impl RetryCallback for Counting {
        fn on_retry(&self, _: u32, _: u32, _: &Error, _: Duration) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        let callback = Counting::default();
        let result: Result<()> = with_retry(&quick(3), Some(&callback), || Err(busy()));

        assert!(result.is_err());
        assert_eq!(callback.0.get(), 2);
    }

    #[test]
    fn test_filesystem_policy_retries_three_times() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            ..RetryConfig::filesystem()
        };
        let callback = Counting::default();
        let result: Result<()> = with_retry(&config, Some(&callback), || Err(busy()));

        assert!(result.is_err());
        assert_eq!(callback.0.get(), 3);
    }
}
