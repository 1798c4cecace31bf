// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reconnect-with-backoff for dialing the master.
//!
//! Applies only to establishing (or re-establishing) the connection to the
//! master. Step/engine-level retries are a separate concern this crate does
//! not implement: a failed step is reported as a failed [`wf_core::StepResult`],
//! never silently retried.

use std::future::Future;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::connection::MasterConnection;
use crate::WorkerError;
use wf_protocol::Envelope;

/// Configuration for reconnect behaviour when dialing the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Base delay for exponential backoff.
    #[serde(with = "wf_duration::duration_millis")]
    pub base_delay: Duration,
    /// Delay ceiling once backoff maxes out; the steady-state reconnect
    /// interval for as long as the master stays unreachable.
    #[serde(with = "wf_duration::duration_millis")]
    pub max_delay: Duration,
    /// Overall wall-clock timeout across all attempts. `None` retries forever.
    #[serde(default, with = "wf_duration::option_duration_millis")]
    pub overall_timeout: Option<Duration>,
    /// Jitter factor in `[0.0, 1.0]`. 0 = no jitter, 1 = full jitter.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            overall_timeout: None,
            jitter_factor: 0.5,
        }
    }
}

/// Record of a single failed connect attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectAttempt {
    /// Zero-indexed attempt number.
    pub attempt: u32,
    /// Error message from this attempt.
    pub error: String,
    /// Backoff delay applied before the next attempt.
    #[serde(with = "wf_duration::duration_millis")]
    pub delay: Duration,
}

/// Compute the backoff delay for a given zero-indexed attempt number.
pub fn compute_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let delay_ms = (config.base_delay.as_millis() as u64).saturating_mul(exp);
    let capped_ms = delay_ms.min(config.max_delay.as_millis() as u64);

    let jitter_factor = config.jitter_factor.clamp(0.0, 1.0);
    if jitter_factor > 0.0 && capped_ms > 0 {
        let jitter_range = (capped_ms as f64 * jitter_factor) as u64;
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        let pseudo = nanos.wrapping_mul(attempt as u64 + 1);
        let jitter = if jitter_range > 0 { pseudo % jitter_range } else { 0 };
        Duration::from_millis(capped_ms.saturating_sub(jitter))
    } else {
        Duration::from_millis(capped_ms)
    }
}

/// Returns `true` if the error is eligible for retry.
///
/// Registration rejections and malformed protocol messages are not
/// transient and should not be retried.
pub fn is_retryable(err: &WorkerError) -> bool {
    matches!(err, WorkerError::Dial(_) | WorkerError::Read(_) | WorkerError::Write(_) | WorkerError::StreamClosed)
}

/// Dial the master with exponential backoff, retrying forever unless
/// `config.overall_timeout` is set.
///
/// Returns the established connection and the list of attempts that failed
/// before it succeeded (empty if the first attempt succeeded).
pub async fn connect_with_retry(
    addr: &str,
    register: impl Fn() -> Envelope,
    config: &ReconnectConfig,
) -> Result<(MasterConnection, Vec<ReconnectAttempt>), WorkerError> {
    connect_with_retry_op(config, || MasterConnection::dial(addr, register())).await
}

async fn connect_with_retry_op<F, Fut>(
    config: &ReconnectConfig,
    mut op: F,
) -> Result<(MasterConnection, Vec<ReconnectAttempt>), WorkerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<MasterConnection, WorkerError>>,
{
    let start = Instant::now();
    let mut attempts = Vec::new();

    for attempt in 0u32.. {
        if let Some(timeout) = config.overall_timeout
            && start.elapsed() >= timeout
        {
            warn!(target: "wf.worker.reconnect", attempt, "overall reconnect timeout exceeded");
            return Err(WorkerError::Timeout(timeout));
        }

        debug!(target: "wf.worker.reconnect", attempt, "dialing master");

        match op().await {
            Ok(conn) => {
                debug!(target: "wf.worker.reconnect", attempt, "connected to master");
                return Ok((conn, attempts));
            }
            Err(err) => {
                if !is_retryable(&err) {
                    warn!(target: "wf.worker.reconnect", error = %err, "non-retryable connect error, giving up");
                    return Err(err);
                }

                let delay = compute_delay(config, attempt);
                warn!(target: "wf.worker.reconnect", error = %err, attempt, delay_ms = delay.as_millis() as u64, "retryable connect error, backing off");
                attempts.push(ReconnectAttempt { attempt, error: err.to_string(), delay });

                if let Some(timeout) = config.overall_timeout {
                    let remaining = timeout.saturating_sub(start.elapsed());
                    if delay > remaining {
                        return Err(WorkerError::Timeout(timeout));
                    }
                }

                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("0u32.. is an unbounded range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_and_is_capped() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            overall_timeout: None,
            jitter_factor: 0.0,
        };
        assert_eq!(compute_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(compute_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(compute_delay(&config, 10), Duration::from_millis(500));
    }

    #[test]
    fn dial_errors_are_retryable_but_rejection_is_not() {
        assert!(is_retryable(&WorkerError::Dial(std::io::Error::other("refused"))));
        assert!(!is_retryable(&WorkerError::RegistrationRejected("unknown kind".into())));
    }

    #[tokio::test]
    async fn retries_until_the_operation_succeeds() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            overall_timeout: Some(Duration::from_secs(5)),
            jitter_factor: 0.0,
        };
        let calls = AtomicU32::new(0);
        let result = connect_with_retry_op(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(WorkerError::Dial(std::io::Error::other("not yet")))
                } else {
                    Err(WorkerError::RegistrationRejected("stop here".into()))
                }
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(WorkerError::RegistrationRejected(_))));
    }
}
