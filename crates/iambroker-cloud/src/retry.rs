//! Retry for calls that race the provider's propagation delay.
//!
//! Only [`ErrorKind::NotFound`] is retried: a freshly created service account
//! or role can be invisible to dependent calls for a few seconds. Any other
//! failure is returned on the spot, since waiting cannot fix it.
//!
//! Delays grow linearly: before retry `i` the controller sleeps `i * step`
//! (10s, 20s, 30s with the default policy of 4 attempts).

use std::time::Duration;

use tracing::{error, warn};

use crate::error::{CloudError, CloudResult, ErrorKind};

/// Bounds for retrying Not-Found-class failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay increment between attempts.
    pub step: Duration,
    sleep: fn(Duration),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            step: Duration::from_secs(10),
            sleep: std::thread::sleep,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, step: Duration) -> Self {
        Self {
            attempts,
            step,
            ..Default::default()
        }
    }

    /// Replace the blocking sleep (tests pass a no-op).
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    /// Delay before the given retry (1-indexed).
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.step * retry
    }

    /// Run `action` under this policy.
    pub fn run<T>(
        &self,
        operation: &str,
        action: impl FnMut() -> CloudResult<T>,
    ) -> CloudResult<T> {
        retry_not_found_with(self, operation, self.sleep, action)
    }
}

/// Run `action`, retrying Not-Found-class failures with `sleep` between attempts.
///
/// Returns [`CloudError::Timeout`] once `policy.attempts` attempts have all
/// come back not-found.
pub fn retry_not_found_with<T>(
    policy: &RetryPolicy,
    operation: &str,
    mut sleep: impl FnMut(Duration),
    mut action: impl FnMut() -> CloudResult<T>,
) -> CloudResult<T> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match action() {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if attempt >= policy.attempts {
                    error!(
                        operation = %operation,
                        attempt,
                        error = %e,
                        "entity still not visible after max attempts"
                    );
                    return Err(CloudError::Timeout {
                        operation: operation.to_string(),
                        attempts: attempt,
                    });
                }

                let delay = policy.delay_before(attempt);
                warn!(
                    operation = %operation,
                    attempt,
                    error = %e,
                    delay_secs = delay.as_secs(),
                    "entity not visible yet, retrying"
                );
                sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}
