//! Timeout-guarded contract calls.
//!
//! Every call runs on its own tokio task. When the timeout elapses first the
//! caller gets an error right away and the task is aborted; a call that
//! never yields keeps running detached until it does.

use crate::plugin::metrics::CallOutcome;
use crate::plugin::traits::{Plugin, PluginEvent, PluginResponse};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a contract call produced no value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// The plugin returned an error
    #[error("{0}")]
    Failed(String),

    /// The call panicked
    #[error("call panicked: {0}")]
    Panicked(String),

    /// The call did not finish in time
    #[error("call timed out after {timeout_ms}ms")]
    TimedOut {
        /// Allotted time
        timeout_ms: u64,
    },
}

impl CallFailure {
    /// Metrics outcome for this failure.
    pub fn outcome(&self) -> CallOutcome {
        match self {
            Self::TimedOut { .. } => CallOutcome::Timeout,
            Self::Failed(_) | Self::Panicked(_) => CallOutcome::Failure,
        }
    }
}

/// Result of [`PluginExecutor::execute`].
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Response handed back to the caller
    pub response: PluginResponse,
    /// Outcome for metrics
    pub outcome: CallOutcome,
    /// Wall-clock time until the caller was answered
    pub elapsed: Duration,
}

/// Runs contract calls against a deadline.
#[derive(Debug, Clone)]
pub struct PluginExecutor {
    default_timeout: Duration,
}

impl PluginExecutor {
    /// Create an executor using `default_timeout` when a call gives none.
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Default call timeout.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `future` on a dedicated task, waiting at most `timeout`.
    pub async fn call<F, T>(&self, timeout: Duration, future: F) -> Result<T, CallFailure>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut handle = tokio::spawn(future);

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(CallFailure::Failed(format!("{e:#}"))),
            Ok(Err(e)) => Err(CallFailure::Panicked(e.to_string())),
            Err(_) => {
                handle.abort();
                Err(CallFailure::TimedOut {
                    timeout_ms: timeout.as_millis().min(u64::MAX as u128) as u64,
                })
            }
        }
    }

    /// Deliver `event` to `instance` and fold every failure into an error
    /// response.
    pub async fn execute(
        &self,
        plugin_id: &str,
        instance: Arc<dyn Plugin>,
        event: PluginEvent,
        timeout: Option<Duration>,
    ) -> ExecutionOutcome {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();
        let event_type = event.event_type.clone();

        let result = self
            .call(timeout, async move { instance.handle_event(&event).await })
            .await;
        let elapsed = started.elapsed();

        let (response, outcome) = match result {
            Ok(response) => {
                let outcome = if response.is_error() {
                    CallOutcome::Failure
                } else {
                    CallOutcome::Success
                };
                (response, outcome)
            }
            Err(failure) => {
                tracing::warn!(
                    plugin_id = %plugin_id,
                    event_type = %event_type,
                    error = %failure,
                    "Plugin call failed"
                );
                let mut response = PluginResponse::error(format!("{event_type}: {failure}"));
                if let CallFailure::TimedOut { timeout_ms } = failure {
                    response = response.with_data("timeout_ms", json!(timeout_ms));
                }
                (response, failure.outcome())
            }
        };

        ExecutionOutcome {
            response,
            outcome,
            elapsed,
        }
    }
}

impl Default for PluginExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::lifecycle::PluginState;
    use crate::plugin::traits::{ConfigMap, HostContext, PluginMetadata};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        fn metadata(&self) -> PluginMetadata {
            PluginMetadata::new("echo", "Echo", "1.0")
        }
        async fn initialize(&self, _: HostContext, _: ConfigMap) -> anyhow::Result<()> {
            Ok(())
        }
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn destroy(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn handle_event(&self, event: &PluginEvent) -> anyhow::Result<PluginResponse> {
            match event.event_type.as_str() {
                "echo" => Ok(PluginResponse::success("echoed").with_data("payload", event.payload.clone())),
                "hang" => std::future::pending().await,
                "fail" => anyhow::bail!("refused"),
                _ => Ok(PluginResponse::not_handled(&event.event_type)),
            }
        }
        fn state(&self) -> PluginState {
            PluginState::Running
        }
    }

    #[tokio::test]
    async fn test_execute_success() {
        let executor = PluginExecutor::default();
        let outcome = executor
            .execute("echo", Arc::new(Echo), PluginEvent::new("echo", json!({"n": 1})), None)
            .await;
        assert!(outcome.response.is_success());
        assert_eq!(outcome.response.data["payload"], json!({"n": 1}));
        assert_eq!(outcome.outcome, CallOutcome::Success);
    }

    #[tokio::test]
    async fn test_execute_times_out_promptly() {
        let executor = PluginExecutor::default();
        let started = Instant::now();
        let outcome = executor
            .execute(
                "echo",
                Arc::new(Echo),
                PluginEvent::new("hang", json!(null)),
                Some(Duration::from_millis(500)),
            )
            .await;
        let elapsed = started.elapsed();

        assert!(outcome.response.is_error());
        assert_eq!(outcome.outcome, CallOutcome::Timeout);
        assert_eq!(outcome.response.data["timeout_ms"], json!(500));
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(900), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_execute_failure_and_unknown_event() {
        let executor = PluginExecutor::default();
        let failed = executor
            .execute("echo", Arc::new(Echo), PluginEvent::new("fail", json!(null)), None)
            .await;
        assert!(failed.response.is_error());
        assert!(failed.response.message.contains("refused"));
        assert_eq!(failed.outcome, CallOutcome::Failure);

        let unknown = executor
            .execute("echo", Arc::new(Echo), PluginEvent::new("other", json!(null)), None)
            .await;
        assert!(!unknown.response.is_error());
        assert!(!unknown.response.is_handled());
    }

    fn explode() -> anyhow::Result<()> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_call_reports_panics() {
        let executor = PluginExecutor::default();
        let result: Result<(), _> = executor
            .call(Duration::from_secs(1), async { explode() })
            .await;
        assert!(matches!(result, Err(CallFailure::Panicked(_))));
    }
}
