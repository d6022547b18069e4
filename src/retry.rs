//! Restarting whole negotiations with exponential backoff
//!
//! The session driver never retries; a failed negotiation is over. This module
//! lets the caller start a fresh one (new connection, new driver) when the
//! failure was transient, waiting longer between attempts with optional jitter.
//!
//! # Example
//!
//! ```no_run
//! use sbspk::retry::{IsRetryable, with_retry};
//! use sbspk::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async {
//!     // One complete negotiation
//!     Ok::<_, MyError>(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, TransportError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (refused or dropped connection, a service that stops
/// answering) return `true`. Answers from the service (unknown object,
/// rejected input) and local failures return `false`; asking again gives the
/// same answer.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(e) => match e {
                TransportError::Connect { .. }
                | TransportError::Broken(_)
                | TransportError::DeadlineElapsed => true,
                TransportError::Http(e) => e.is_timeout() || e.is_connect(),
                TransportError::HttpStatus { status, .. } => *status >= 500,
                TransportError::Closed | TransportError::UnsupportedUrl { .. } => false,
            },
            // The service hung up or went quiet mid-negotiation
            Error::ConnectionLost { .. } | Error::Timeout { .. } => true,
            // A short in-band transfer is a dropped connection; an empty kernel is an answer
            Error::IncompleteTransfer { received, .. } => *received > 0,
            Error::ObjectNotFound { .. }
            | Error::AmbiguousObject { .. }
            | Error::UnexpectedPrompt { .. } => false,
            Error::Cancelled { .. } => false,
            Error::Config { .. } | Error::Serialization(_) => false,
            Error::Finalize { .. } | Error::Io(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// `operation` is called once, then up to `config.max_attempts` more times
/// while it fails with a retryable error. Returns the first success or the
/// last error.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Negotiation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Negotiation failed, restarting"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() && config.max_attempts > 0 {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt + 1,
                        "Giving up after all restarts"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candidate, Stage};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Run an operation that fails `fail_times` times, returning its result and call count
    async fn count_calls(
        config: &RetryConfig,
        fail_times: u32,
        error: fn() -> TestError,
    ) -> (Result<u32, TestError>, u32) {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let result = with_retry(config, || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < fail_times { Err(error()) } else { Ok(count) }
            }
        })
        .await;
        (result, counter.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn success_is_not_retried() {
        let (result, calls) = count_calls(&fast(3), 0, || TestError::Transient).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let (result, calls) = count_calls(&fast(3), 2, || TestError::Transient).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 3, "should retry twice before success");
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let (result, calls) = count_calls(&fast(2), u32::MAX, || TestError::Transient).await;
        assert!(result.is_err());
        assert_eq!(calls, 3, "should try initial + 2 retries");
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let (result, calls) = count_calls(&fast(3), u32::MAX, || TestError::Permanent).await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn default_config_never_restarts() {
        let (result, calls) =
            count_calls(&RetryConfig::default(), u32::MAX, || TestError::Transient).await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn backoff_waits_between_attempts() {
        let start = std::time::Instant::now();
        let _ = count_calls(&fast(3), u32::MAX, || TestError::Transient).await;
        let elapsed = start.elapsed();

        // 10ms + 20ms + 40ms
        assert!(elapsed >= Duration::from_millis(70), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "waited {elapsed:?}");
    }

    #[tokio::test]
    async fn delays_are_capped_at_max_delay() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 10.0,
            jitter: false,
        };

        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();
        let _result = with_retry(&config, || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(std::time::Instant::now());
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 5);
        for pair in ts.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap <= Duration::from_millis(350), "gap {gap:?} exceeds the cap");
        }
        assert!(ts[4].duration_since(ts[3]) >= Duration::from_millis(150));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..1000 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay && jittered <= delay * 2);
        }
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn connection_failures_are_retryable() {
        let retryable = [
            Error::Transport(TransportError::Connect {
                addr: "horizons.jpl.nasa.gov:6775".into(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            }),
            Error::Transport(TransportError::Broken(std::io::Error::from(
                std::io::ErrorKind::ConnectionReset,
            ))),
            Error::Transport(TransportError::HttpStatus {
                url: "https://ssd.jpl.nasa.gov/x.bsp".into(),
                status: 503,
            }),
            Error::ConnectionLost {
                stage: Stage::SubmitDateRange,
                unmatched: String::new(),
            },
            Error::Timeout {
                stage: Stage::AwaitMainMenu,
                elapsed: Duration::from_secs(5),
                unmatched: String::new(),
            },
            Error::IncompleteTransfer {
                object: "433".into(),
                received: 10,
                expected: Some(100),
                reason: "closed".into(),
            },
        ];
        for err in retryable {
            assert!(err.is_retryable(), "{err} should be retryable");
        }
    }

    #[test]
    fn service_answers_are_not_retryable() {
        let permanent = [
            Error::ObjectNotFound {
                object: "Nonexistent".into(),
                stage: Stage::SubmitObjectId,
            },
            Error::AmbiguousObject {
                object: "Ceres".into(),
                stage: Stage::SubmitObjectId,
                candidates: vec![Candidate {
                    record: "2000001".into(),
                    description: String::new(),
                }],
            },
            Error::UnexpectedPrompt {
                stage: Stage::SubmitDateRange,
                reason: "service rejected the date".into(),
                text: "Cannot interpret date".into(),
            },
            Error::IncompleteTransfer {
                object: "433".into(),
                received: 0,
                expected: None,
                reason: "empty".into(),
            },
            Error::Cancelled {
                stage: Stage::ReceivingFile,
            },
            Error::Transport(TransportError::UnsupportedUrl {
                url: "ftp://ssd.jpl.nasa.gov/x.bsp".into(),
            }),
            Error::Transport(TransportError::HttpStatus {
                url: "https://ssd.jpl.nasa.gov/x.bsp".into(),
                status: 404,
            }),
            Error::config("contact e-mail is required", "session.email"),
            Error::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied)),
        ];
        for err in permanent {
            assert!(!err.is_retryable(), "{err} should not be retryable");
        }
    }
}
