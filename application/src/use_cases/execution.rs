//! Execution wrapper: timeout, retry and result formatting for one call.
//!
//! ```text
//! attempt 1 ──▶ Ok ─────────────────────────────▶ Success
//!     │
//!     ├── Transient ──▶ sleep(backoff) ──▶ attempt 2 ... up to max_attempts
//!     ├── Internal ──────────────────────────────▶ ToolInternalError
//!     └── timeout ──▶ cancel token ──────────────▶ Timeout
//! ```
//!
//! Only back-pressure signals are retried. All attempts and backoff share one
//! deadline, so a call never outlives its timeout. Internal detail is logged
//! (with secrets redacted) and replaced by the kind's fixed message for the
//! caller.

use super::registry::RegistryEntry;
use super::shared::{redact_secrets, truncate_output};
use crate::config::ExecutionParams;
use crate::ports::callable::InvocationError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use toolgate_domain::{ExecutionResult, FailureKind, TypedArguments};
use tracing::{debug, warn};

pub struct ExecutionWrapper {
    params: ExecutionParams,
}

impl ExecutionWrapper {
    pub fn new(params: ExecutionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ExecutionParams {
        &self.params
    }

    /// Invoke `entry` with already-filtered arguments.
    pub async fn execute(&self, entry: &RegistryEntry, args: &TypedArguments) -> ExecutionResult {
        let name = entry.name();
        let started = Instant::now();
        let deadline = started + self.params.timeout;
        let max_attempts = self.params.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let cancel = CancellationToken::new();
            let outcome =
                tokio::time::timeout_at(deadline, entry.callable.invoke(args, cancel.clone()))
                    .await;

            match outcome {
                Ok(Ok(output)) => {
                    debug!(
                        tool = %name,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Tool call succeeded"
                    );
                    return ExecutionResult::success(truncate_output(
                        output,
                        self.params.max_output_bytes,
                    ));
                }
                Ok(Err(InvocationError::Transient(reason))) => {
                    if attempt == max_attempts {
                        warn!(
                            tool = %name,
                            attempts = attempt,
                            reason = %redact_secrets(&reason),
                            "Transient failures exhausted retries"
                        );
                        return ExecutionResult::failure(FailureKind::TransientFailure);
                    }
                    let delay = self.params.retry.delay_for_retry(attempt);
                    if Instant::now() + delay >= deadline {
                        warn!(
                            tool = %name,
                            attempts = attempt,
                            reason = %redact_secrets(&reason),
                            "Transient failure with no time left to retry"
                        );
                        return ExecutionResult::failure(FailureKind::TransientFailure);
                    }
                    debug!(
                        tool = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(Err(InvocationError::Internal(reason))) => {
                    warn!(
                        tool = %name,
                        reason = %redact_secrets(&reason),
                        "Tool raised an error"
                    );
                    return ExecutionResult::failure(FailureKind::ToolInternalError);
                }
                Ok(Err(InvocationError::Cancelled)) | Err(_) => {
                    cancel.cancel();
                    warn!(
                        tool = %name,
                        timeout_ms = self.params.timeout.as_millis() as u64,
                        "Tool call timed out"
                    );
                    return ExecutionResult::failure(FailureKind::Timeout);
                }
            }
        }

        ExecutionResult::failure(FailureKind::TransientFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::ports::callable::Callable;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use toolgate_domain::{ApprovalKind, CapabilityDescriptor, ContentDigest};

    /// Fails transiently `failures` times, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Callable for Flaky {
        async fn invoke(
            &self,
            _args: &TypedArguments,
            _cancel: CancellationToken,
        ) -> Result<String, InvocationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(InvocationError::Transient("429 too many requests".into()))
            } else {
                Ok("done".into())
            }
        }
    }

    /// Takes `latency` to report back-pressure, every time.
    struct SlowBusy {
        latency: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Callable for SlowBusy {
        async fn invoke(
            &self,
            _args: &TypedArguments,
            _cancel: CancellationToken,
        ) -> Result<String, InvocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            Err(InvocationError::Transient("503 slow down".into()))
        }
    }

    struct Broken {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Callable for Broken {
        async fn invoke(
            &self,
            _args: &TypedArguments,
            _cancel: CancellationToken,
        ) -> Result<String, InvocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(InvocationError::Internal(
                "/srv/tools/secret.lua:3: token sk-ant-xyz".into(),
            ))
        }
    }

    struct Hangs;

    #[async_trait]
    impl Callable for Hangs {
        async fn invoke(
            &self,
            _args: &TypedArguments,
            cancel: CancellationToken,
        ) -> Result<String, InvocationError> {
            cancel.cancelled().await;
            Err(InvocationError::Cancelled)
        }
    }

    struct Loud;

    #[async_trait]
    impl Callable for Loud {
        async fn invoke(
            &self,
            _args: &TypedArguments,
            _cancel: CancellationToken,
        ) -> Result<String, InvocationError> {
            Ok("x".repeat(100))
        }
    }

    fn entry(callable: Arc<dyn Callable>) -> RegistryEntry {
        RegistryEntry {
            descriptor: CapabilityDescriptor::new("sample", "test"),
            digest: ContentDigest::of(b"sample"),
            callable,
            admitted_at: Utc::now(),
            approval: ApprovalKind::Automatic,
        }
    }

    fn wrapper() -> ExecutionWrapper {
        ExecutionWrapper::new(
            ExecutionParams::default()
                .with_exact_timeout(Duration::from_millis(200))
                .with_retry(
                    RetryPolicy::default()
                        .with_base_delay(Duration::from_millis(1))
                        .with_jitter(false),
                ),
        )
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let result = wrapper()
            .execute(&entry(flaky.clone()), &TypedArguments::new())
            .await;
        assert_eq!(result, ExecutionResult::success("done"));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhaust_into_transient_failure() {
        let flaky = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let result = wrapper()
            .execute(&entry(flaky.clone()), &TypedArguments::new())
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::TransientFailure));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_internal_error_not_retried_and_not_leaked() {
        let broken = Arc::new(Broken {
            calls: AtomicU32::new(0),
        });
        let result = wrapper()
            .execute(&entry(broken.clone()), &TypedArguments::new())
            .await;
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result, ExecutionResult::failure(FailureKind::ToolInternalError));
        let content = result.to_tool_content();
        assert!(!content.contains("/srv/tools"));
        assert!(!content.contains("sk-ant"));
    }

    #[tokio::test]
    async fn test_timeout_reported_and_not_retried() {
        let started = Instant::now();
        let result = wrapper()
            .execute(&entry(Arc::new(Hangs)), &TypedArguments::new())
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_share_one_deadline() {
        let wrapper = ExecutionWrapper::new(
            ExecutionParams::default()
                .with_exact_timeout(Duration::from_millis(200))
                .with_retry(
                    RetryPolicy::default()
                        .with_max_attempts(10)
                        .with_base_delay(Duration::from_millis(1))
                        .with_jitter(false),
                ),
        );
        let busy = Arc::new(SlowBusy {
            latency: Duration::from_millis(80),
            calls: AtomicU32::new(0),
        });

        let started = Instant::now();
        let result = wrapper
            .execute(&entry(busy.clone()), &TypedArguments::new())
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
        assert!(started.elapsed() < Duration::from_millis(210));
        assert_eq!(busy.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_past_deadline_is_not_attempted() {
        let wrapper = ExecutionWrapper::new(
            ExecutionParams::default()
                .with_exact_timeout(Duration::from_millis(200))
                .with_retry(
                    RetryPolicy::default()
                        .with_max_attempts(5)
                        .with_base_delay(Duration::from_millis(500))
                        .with_jitter(false),
                ),
        );
        let busy = Arc::new(SlowBusy {
            latency: Duration::from_millis(10),
            calls: AtomicU32::new(0),
        });

        let started = Instant::now();
        let result = wrapper
            .execute(&entry(busy.clone()), &TypedArguments::new())
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::TransientFailure));
        assert_eq!(busy.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_output_truncated() {
        let wrapper = ExecutionWrapper::new(ExecutionParams::default().with_max_output_bytes(10));
        let result = wrapper
            .execute(&entry(Arc::new(Loud)), &TypedArguments::new())
            .await;
        let output = result.output().unwrap();
        assert!(output.starts_with(&"x".repeat(10)));
        assert!(output.ends_with("[output truncated]"));
    }
}
