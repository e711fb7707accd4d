/*
 * Retry utilities with exponential backoff and jitter.
 *
 * Used by the write consumer for unprocessed items and throttled
 * requests. The orchestrator itself never retries.
 */

use crate::{CopyError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt)
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (typically 2.0)
    pub backoff_multiplier: f64,
    /// Add random jitter to prevent thundering herd (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Creates a retry config with no retries (fail fast).
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Creates a retry config for batch writes, where throttling is expected
    /// whenever the destination runs close to its budget.
    pub fn for_batch_write() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.25,
        }
    }

    /// Creates a retry config for scan pages.
    pub fn for_scan() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.15,
        }
    }

    /// Calculates the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let jitter = if self.jitter_factor > 0.0 {
            let jitter_range = capped_delay * self.jitter_factor;
            // Golden-ratio sequence spreads attempts without an RNG
            let jitter_value = (attempt as f64 * 0.618033988749895) % 1.0;
            jitter_range * jitter_value
        } else {
            0.0
        };

        Duration::from_secs_f64(capped_delay + jitter)
    }
}

/// A builder for constructing retry operations with custom configuration.
///
/// The operation is retried while it fails with a retryable error
/// (as determined by `CopyError::is_retryable()`).
///
/// # Example
/// ```ignore
/// let output = RetryBuilder::new(&RetryConfig::for_batch_write())
///     .operation("batch_write orders_copy")
///     .run(|| async { writer.write_batch(&table, chunk.clone()).await })
///     .await?;
/// ```
pub struct RetryBuilder<'a> {
    config: &'a RetryConfig,
    operation_name: Option<String>,
}

impl<'a> RetryBuilder<'a> {
    /// Creates a new retry builder with the given configuration.
    pub fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            operation_name: None,
        }
    }

    /// Sets a name for the operation (used in logging).
    pub fn operation(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Executes the operation with retry logic.
    pub async fn run<F, Fut, T>(self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;
        let op_name = self.operation_name.as_deref().unwrap_or("operation");

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded on attempt {}", op_name, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let is_retryable = e.is_retryable();
                    let attempts_remaining = self.config.max_retries.saturating_sub(attempt);

                    if !is_retryable || attempts_remaining == 0 {
                        if !is_retryable {
                            debug!("{}: non-retryable error: {}", op_name, e);
                        } else {
                            warn!(
                                "{}: all {} retries exhausted: {}",
                                op_name, self.config.max_retries, e
                            );
                        }
                        return Err(e);
                    }

                    let delay = self.config.delay_for_attempt(attempt);

                    warn!(
                        "{}: attempt {} failed ({} remaining), retrying in {:?}: {}",
                        op_name,
                        attempt + 1,
                        attempts_remaining,
                        delay,
                        e
                    );

                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CopyError::Unexpected(format!("{}: retry loop exited without result", op_name))
        }))
    }
}
