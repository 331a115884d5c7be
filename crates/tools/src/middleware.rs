//! Execution middleware: deadline enforcement and idempotency-gated retry.
//!
//! The pipeline is the only place that knows how an [`Invocable`] runs.
//! Suspending bodies become a spawned task that is aborted at the deadline.
//! Blocking bodies go to the blocking worker pool; they cannot be pre-empted,
//! so at the deadline the caller stops waiting and the body finishes in the
//! background.

use std::sync::Arc;
use std::time::Duration;
use stepwise_core::capability::{CapabilityArgs, CapabilityOutput, Invocable, RetryPolicy};
use stepwise_core::error::CapabilityError;
use tokio::task::JoinError;
use tokio::time::Instant;

/// Deadline applied when a capability declares none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What the retry layer reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// Final result: the first success, or `RetriesExhausted`.
    pub result: CapabilityOutput,
    /// Attempts actually made.
    pub attempts: u32,
    /// Total backoff slept between attempts.
    pub waited: Duration,
    /// The policy asked for more than one attempt on a non-idempotent body.
    pub retry_clamped: bool,
}

/// Timeout and retry layers around capability execution.
#[derive(Debug, Clone)]
pub struct MiddlewarePipeline {
    default_timeout: Duration,
    default_retry: Option<RetryPolicy>,
}

impl MiddlewarePipeline {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            default_retry: None,
        }
    }

    /// Retry policy for idempotent capabilities that declare none of their own.
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = Some(policy);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// The retry policy for a capability. Only idempotent capabilities pick up
    /// the pipeline default.
    pub fn retry_for<'a>(
        &'a self,
        declared: Option<&'a RetryPolicy>,
        idempotent: bool,
    ) -> Option<&'a RetryPolicy> {
        declared.or(if idempotent {
            self.default_retry.as_ref()
        } else {
            None
        })
    }

    /// The deadline for a capability, falling back to the pipeline default.
    pub fn timeout_for(&self, declared: Option<Duration>) -> Duration {
        declared.unwrap_or(self.default_timeout)
    }

    /// Run one invocation bounded by `timeout`.
    ///
    /// Returns `Timeout` when the deadline passes first, and maps a panic in
    /// the body to `ExecutionFailed`.
    pub async fn with_timeout(
        &self,
        invocable: &Invocable,
        args: CapabilityArgs,
        timeout: Duration,
    ) -> CapabilityOutput {
        let handle = match invocable {
            Invocable::Suspending(capability) => {
                let capability = Arc::clone(capability);
                tokio::spawn(async move { capability.invoke(args).await })
            }
            Invocable::Blocking(capability) => {
                let capability = Arc::clone(capability);
                tokio::task::spawn_blocking(move || capability.invoke(args))
            }
        };
        let abort = handle.abort_handle();

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(output)) => output,
            Ok(Err(join_error)) => Err(join_failure(join_error)),
            Err(_) => {
                // no-op for blocking bodies that already started
                abort.abort();
                tracing::warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    blocking = invocable.is_blocking(),
                    "Capability timed out"
                );
                Err(CapabilityError::Timeout {
                    timeout_secs: timeout.as_secs_f64(),
                })
            }
        }
    }

    /// Run with exponential backoff, each attempt bounded by `timeout`.
    ///
    /// A non-idempotent body is never attempted more than once, whatever the
    /// policy says.
    pub async fn with_retry(
        &self,
        invocable: &Invocable,
        args: CapabilityArgs,
        policy: &RetryPolicy,
        idempotent: bool,
        timeout: Duration,
    ) -> RetryOutcome {
        let requested = policy.max_retries.max(1);
        let retry_clamped = !idempotent && requested > 1;
        let max_attempts = if idempotent { requested } else { 1 };

        if retry_clamped {
            tracing::warn!(
                requested_attempts = requested,
                "Capability is not idempotent; retry disabled"
            );
        }

        let mut waited = Duration::ZERO;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            match self.with_timeout(invocable, args.clone(), timeout).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Capability succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        waited,
                        retry_clamped,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %e,
                        "Capability attempt failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < max_attempts {
                let delay = policy.delay_after(attempt);
                tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::time::sleep(delay).await;
                waited += delay;
            }
        }

        let last_error = last_error.map(|e| e.to_string()).unwrap_or_default();
        RetryOutcome {
            result: Err(CapabilityError::RetriesExhausted {
                attempts: max_attempts,
                last_error,
            }),
            attempts: max_attempts,
            waited,
            retry_clamped,
        }
    }
}

impl Default for MiddlewarePipeline {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

fn join_failure(error: JoinError) -> CapabilityError {
    if error.is_panic() {
        let payload = error.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into());
        CapabilityError::execution(format!("capability panicked: {message}"))
    } else {
        CapabilityError::execution("capability task was cancelled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_args() -> CapabilityArgs {
        CapabilityArgs::new()
    }

    /// Fails `failures` times, then succeeds.
    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> Invocable {
        Invocable::from_async(move |_args| {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(CapabilityError::execution(format!("failure #{n}")))
                } else {
                    Ok::<_, CapabilityError>(json!("ok"))
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn suspending_body_within_deadline() {
        let pipeline = MiddlewarePipeline::default();
        let slow = Invocable::from_async(|_| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, CapabilityError>(json!(1))
        });
        let out = pipeline.with_timeout(&slow, no_args(), Duration::from_secs(1)).await;
        assert_eq!(out, Ok(json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn suspending_body_times_out_at_deadline() {
        let pipeline = MiddlewarePipeline::default();
        let stuck = Invocable::from_async(|_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, CapabilityError>(Value::Null)
        });

        let start = Instant::now();
        let out = pipeline.with_timeout(&stuck, no_args(), Duration::from_secs(1)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        let err = out.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err, CapabilityError::Timeout { timeout_secs: 1.0 });
    }

    #[tokio::test]
    async fn blocking_body_does_not_stall_the_deadline() {
        let pipeline = MiddlewarePipeline::default();
        let blocking = Invocable::blocking(|_| {
            std::thread::sleep(Duration::from_millis(400));
            Ok(json!("late"))
        });

        let start = std::time::Instant::now();
        let out = pipeline
            .with_timeout(&blocking, no_args(), Duration::from_millis(50))
            .await;
        assert!(out.unwrap_err().is_timeout());
        assert!(start.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn blocking_body_result_is_returned() {
        let pipeline = MiddlewarePipeline::default();
        let double = Invocable::blocking(|args| {
            let n = args.get("n").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(json!(n * 2.0))
        });
        let mut args = no_args();
        args.insert("n".into(), json!(21));
        let out = pipeline.with_timeout(&double, args, Duration::from_secs(1)).await;
        assert_eq!(out, Ok(json!(42.0)));
    }

    #[tokio::test]
    async fn execution_error_is_not_a_timeout() {
        let pipeline = MiddlewarePipeline::default();
        let failing = Invocable::blocking(|_| Err(CapabilityError::execution("disk full")));
        let err = pipeline
            .with_timeout(&failing, no_args(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "disk full");
    }

    #[tokio::test]
    async fn panic_becomes_execution_error() {
        let pipeline = MiddlewarePipeline::default();
        let panicking = Invocable::blocking(|_| panic!("boom"));
        let err = pipeline
            .with_timeout(&panicking, no_args(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn idempotent_retry_backs_off_exponentially() {
        let pipeline = MiddlewarePipeline::default();
        let calls = Arc::new(AtomicU32::new(0));
        let always_fails = flaky(u32::MAX, Arc::clone(&calls));
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);

        let start = Instant::now();
        let outcome = pipeline
            .with_retry(&always_fails, no_args(), &policy, true, Duration::from_secs(5))
            .await;

        // 1s + 2s, nothing after the last attempt
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(outcome.waited, Duration::from_secs(3));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!outcome.retry_clamped);
        assert_eq!(
            outcome.result,
            Err(CapabilityError::RetriesExhausted {
                attempts: 3,
                last_error: "failure #3".into(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_at_first_success() {
        let pipeline = MiddlewarePipeline::default();
        let calls = Arc::new(AtomicU32::new(0));
        let recovers = flaky(1, Arc::clone(&calls));
        let policy = RetryPolicy::new(5, Duration::from_millis(100), 2.0);

        let outcome = pipeline
            .with_retry(&recovers, no_args(), &policy, true, Duration::from_secs(5))
            .await;
        assert_eq!(outcome.result, Ok(json!("ok")));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.waited, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn non_idempotent_runs_exactly_once() {
        let pipeline = MiddlewarePipeline::default();
        let calls = Arc::new(AtomicU32::new(0));
        let always_fails = flaky(u32::MAX, Arc::clone(&calls));
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);

        let start = Instant::now();
        let outcome = pipeline
            .with_retry(&always_fails, no_args(), &policy, false, Duration::from_secs(5))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.retry_clamped);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(matches!(
            outcome.result,
            Err(CapabilityError::RetriesExhausted { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_as_failed_attempts() {
        let pipeline = MiddlewarePipeline::default();
        let stuck = Invocable::from_async(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, CapabilityError>(Value::Null)
        });
        let policy = RetryPolicy::new(2, Duration::from_secs(1), 2.0);

        let start = Instant::now();
        let outcome = pipeline
            .with_retry(&stuck, no_args(), &policy, true, Duration::from_secs(2))
            .await;

        // two 2s deadlines plus one 1s backoff
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        match outcome.result {
            Err(CapabilityError::RetriesExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("Timed out"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn timeout_for_falls_back_to_default() {
        let pipeline = MiddlewarePipeline::new(Duration::from_secs(7));
        assert_eq!(pipeline.timeout_for(None), Duration::from_secs(7));
        assert_eq!(
            pipeline.timeout_for(Some(Duration::from_millis(5))),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn default_retry_only_reaches_idempotent_capabilities() {
        let fallback = RetryPolicy::new(4, Duration::from_millis(50), 2.0);
        let declared = RetryPolicy::new(2, Duration::from_secs(1), 1.0);
        let pipeline = MiddlewarePipeline::default().with_default_retry(fallback.clone());

        assert_eq!(pipeline.retry_for(None, true), Some(&fallback));
        assert_eq!(pipeline.retry_for(None, false), None);
        assert_eq!(pipeline.retry_for(Some(&declared), false), Some(&declared));
        assert_eq!(MiddlewarePipeline::default().retry_for(None, true), None);
    }
}
