//! Robust Runner: availability across intermittent host faults
//!
//! Wraps an `Executor` with a per-process health state machine:
//!
//! ```text
//! HEALTHY → STALE → PROBING → {HEALTHY | DIAGNOSING} → {HEALTHY | UNREACHABLE}
//! ```
//!
//! After the staleness window with no success, the next call pings first.
//! Three consecutive failures trigger the diagnosis cascade (application,
//! document, collections); the first failing probe names the surfaced error.
//! Never retries on its own; callers get a typed error and decide.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use super::{probes, Executor, ScriptError};
use crate::error::{ErrorCode, OmniError};

/// Consecutive failures before the diagnosis cascade runs
const FAILURE_THRESHOLD: u32 = 3;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum HealthError {
    #[error("scripting connection lost: {detail}")]
    ConnectionLost { detail: String },

    #[error("OmniFocus application is unreachable: {detail}")]
    AppUnreachable { detail: String },

    #[error("OmniFocus is running but its document is unreachable: {detail}")]
    DocUnreachable { detail: String },

    #[error("document is open but core collections are unreachable: {detail}")]
    CollectionUnreachable { detail: String },

    #[error("all health probes pass yet execution keeps failing: {detail}")]
    FailingDespiteHealth { detail: String },
}

impl HealthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HealthError::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            HealthError::AppUnreachable { .. } => ErrorCode::AppUnreachable,
            HealthError::DocUnreachable { .. } => ErrorCode::DocUnreachable,
            HealthError::CollectionUnreachable { .. } => ErrorCode::CollectionUnreachable,
            HealthError::FailingDespiteHealth { .. } => ErrorCode::ExecutionFailingDespiteHealth,
        }
    }
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Stale,
    Probing,
    Diagnosing,
    Unreachable,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Stale => "stale",
            HealthState::Probing => "probing",
            HealthState::Diagnosing => "diagnosing",
            HealthState::Unreachable => "unreachable",
        }
    }
}

struct Inner {
    state: HealthState,
    last_success: Option<Instant>,
    consecutive_failures: u32,
    last_error: Option<String>,
}

/// Snapshot for the system diagnostics operation and envelope metadata
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: &'static str,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_success: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// One probe outcome from the cascade
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub name: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ============================================================================
// ROBUST RUNNER
// ============================================================================

pub struct RobustRunner {
    inner: Arc<dyn Executor>,
    staleness_window: Duration,
    state: tokio::sync::Mutex<Inner>,
}

impl RobustRunner {
    pub fn new(inner: Arc<dyn Executor>, staleness_window: Duration) -> Self {
        Self {
            inner,
            staleness_window,
            state: tokio::sync::Mutex::new(Inner {
                state: HealthState::Healthy,
                last_success: None,
                consecutive_failures: 0,
                last_error: None,
            }),
        }
    }

    /// Execute a script, maintaining health state around the call
    pub async fn run(&self, script: &str, timeout: Option<Duration>) -> Result<Value, OmniError> {
        self.probe_if_stale().await?;

        match self.inner.run(script, timeout).await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            // An oversized script says nothing about host health
            Err(err @ ScriptError::TooLarge { .. }) => Err(err.into()),
            Err(err) => {
                let failures = self.record_failure(&err).await;
                if failures >= FAILURE_THRESHOLD {
                    Err(self.diagnose(err).await)
                } else {
                    Err(enrich(err).into())
                }
            }
        }
    }

    /// Current health snapshot
    pub async fn health(&self) -> HealthReport {
        let inner = self.state.lock().await;
        HealthReport {
            state: inner.state.as_str(),
            consecutive_failures: inner.consecutive_failures,
            seconds_since_success: inner.last_success.map(|t| t.elapsed().as_secs()),
            last_error: inner.last_error.clone(),
        }
    }

    /// Run the full probe cascade unconditionally (system diagnostics)
    pub async fn probe_cascade(&self) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(3);
        for (name, script) in [
            ("application", probes::APP),
            ("document", probes::DOCUMENT),
            ("collections", probes::COLLECTIONS),
        ] {
            let result = match self.inner.run(script, None).await {
                Ok(value) if probes::passed(&value) => ProbeResult {
                    name,
                    ok: true,
                    detail: None,
                },
                Ok(value) => ProbeResult {
                    name,
                    ok: false,
                    detail: Some(format!("probe reported {value}")),
                },
                Err(e) => ProbeResult {
                    name,
                    ok: false,
                    detail: Some(e.to_string()),
                },
            };
            results.push(result);
        }
        results
    }

    async fn probe_if_stale(&self) -> Result<(), OmniError> {
        {
            let mut inner = self.state.lock().await;
            let stale = inner.state == HealthState::Healthy
                && inner
                    .last_success
                    .is_some_and(|t| t.elapsed() >= self.staleness_window);
            if stale {
                inner.state = HealthState::Stale;
            }
            if inner.state != HealthState::Stale {
                return Ok(());
            }
            inner.state = HealthState::Probing;
        }

        debug!("connection stale, running ping probe");
        match self.inner.run(probes::PING, None).await {
            Ok(value) if probes::passed(&value) => {
                let mut inner = self.state.lock().await;
                inner.state = HealthState::Healthy;
                inner.last_success = Some(Instant::now());
                Ok(())
            }
            other => {
                let detail = match other {
                    Ok(value) => format!("ping probe reported {value}"),
                    Err(e) => e.to_string(),
                };
                warn!(detail = %detail, "ping probe failed after staleness window");
                let mut inner = self.state.lock().await;
                // Back to stale so the next call probes again
                inner.state = HealthState::Stale;
                inner.last_error = Some(detail.clone());
                Err(HealthError::ConnectionLost { detail }.into())
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.state.lock().await;
        inner.state = HealthState::Healthy;
        inner.last_success = Some(Instant::now());
        inner.consecutive_failures = 0;
        inner.last_error = None;
    }

    async fn record_failure(&self, err: &ScriptError) -> u32 {
        let mut inner = self.state.lock().await;
        inner.consecutive_failures += 1;
        inner.last_error = Some(err.to_string());
        inner.consecutive_failures
    }

    /// The cascade: application, then document, then collections. The first
    /// failing probe determines the surfaced error.
    async fn diagnose(&self, original: ScriptError) -> OmniError {
        {
            let mut inner = self.state.lock().await;
            inner.state = HealthState::Diagnosing;
        }
        warn!(failures = FAILURE_THRESHOLD, "entering diagnosis cascade");

        let cascade = [
            ("application", probes::APP),
            ("document", probes::DOCUMENT),
            ("collections", probes::COLLECTIONS),
        ];
        for (name, script) in cascade {
            let failed_detail = match self.inner.run(script, None).await {
                Ok(value) if probes::passed(&value) => continue,
                Ok(value) => format!("{name} probe reported {value}"),
                Err(e) => e.to_string(),
            };

            let mut inner = self.state.lock().await;
            inner.state = HealthState::Unreachable;
            inner.consecutive_failures = 0;
            return match name {
                "application" => HealthError::AppUnreachable {
                    detail: failed_detail,
                },
                "document" => HealthError::DocUnreachable {
                    detail: failed_detail,
                },
                _ => HealthError::CollectionUnreachable {
                    detail: failed_detail,
                },
            }
            .into();
        }

        let mut inner = self.state.lock().await;
        inner.state = HealthState::Healthy;
        inner.consecutive_failures = 0;
        HealthError::FailingDespiteHealth {
            detail: original.to_string(),
        }
        .into()
    }
}

/// Attach a host-unresponsiveness hint to the null-conversion failures JXA
/// produces when OmniFocus stops answering mid-call
fn enrich(err: ScriptError) -> ScriptError {
    match err {
        ScriptError::Failed { exit_code, stderr }
            if stderr.contains("Can't convert types") || stderr.contains("null is not an object") =>
        {
            ScriptError::Failed {
                exit_code,
                stderr: format!(
                    "{stderr} (null conversions like this usually mean the host stopped responding mid-call)"
                ),
            }
        }
        other => other,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::MockExecutor;
    use serde_json::json;

    fn runner_with(mock: MockExecutor) -> RobustRunner {
        RobustRunner::new(Arc::new(mock), Duration::from_secs(300))
    }

    fn fail() -> ScriptError {
        ScriptError::Failed {
            exit_code: Some(1),
            stderr: "execution error".into(),
        }
    }

    #[tokio::test]
    async fn success_keeps_healthy() {
        let mock = MockExecutor::new().with_default(json!({"ok": true}));
        let runner = runner_with(mock);

        runner.run("script", None).await.unwrap();
        let health = runner.health().await;
        assert_eq!(health.state, "healthy");
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn two_failures_stay_plain_script_errors() {
        let mock = MockExecutor::new();
        mock.push_err(fail());
        mock.push_err(fail());
        let runner = runner_with(mock);

        for _ in 0..2 {
            let err = runner.run("script", None).await.unwrap_err();
            assert!(matches!(err, OmniError::Script(_)), "got {err:?}");
        }
        assert_eq!(runner.health().await.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn third_failure_triggers_cascade_first_probe_failing() {
        let mock = MockExecutor::new();
        mock.push_err(fail());
        mock.push_err(fail());
        mock.push_err(fail()); // third call fails, cascade starts
        mock.push_err(fail()); // application probe fails
        let runner = runner_with(mock);

        let _ = runner.run("a", None).await;
        let _ = runner.run("b", None).await;
        let err = runner.run("c", None).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::AppUnreachable);
        assert_eq!(runner.health().await.state, "unreachable");
    }

    #[tokio::test]
    async fn cascade_surfaces_document_when_app_passes() {
        let mock = MockExecutor::new();
        for _ in 0..3 {
            mock.push_err(fail());
        }
        mock.push_ok(json!({"ok": true, "name": "OmniFocus"})); // app passes
        mock.push_ok(json!({"ok": false})); // document fails
        let runner = runner_with(mock);

        let _ = runner.run("a", None).await;
        let _ = runner.run("b", None).await;
        let err = runner.run("c", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DocUnreachable);
    }

    #[tokio::test]
    async fn cascade_all_passing_is_failing_despite_health() {
        let mock = MockExecutor::new();
        for _ in 0..3 {
            mock.push_err(fail());
        }
        for _ in 0..3 {
            mock.push_ok(json!({"ok": true}));
        }
        let runner = runner_with(mock);

        let _ = runner.run("a", None).await;
        let _ = runner.run("b", None).await;
        let err = runner.run("c", None).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::ExecutionFailingDespiteHealth);
        // Cascade passing returns the machine to healthy
        assert_eq!(runner.health().await.state, "healthy");
        assert_eq!(runner.health().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn success_resets_failure_counter() {
        let mock = MockExecutor::new();
        mock.push_err(fail());
        mock.push_err(fail());
        mock.push_ok(json!({"rows": []}));
        let runner = runner_with(mock);

        let _ = runner.run("a", None).await;
        let _ = runner.run("b", None).await;
        runner.run("c", None).await.unwrap();
        assert_eq!(runner.health().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn stale_connection_probes_before_next_call() {
        let mock = MockExecutor::new().with_default(json!({"ok": true}));
        let runner = RobustRunner::new(Arc::new(mock), Duration::from_millis(0));

        // First call succeeds and stamps last_success; zero-width window
        // makes the second call stale immediately
        runner.run("first", None).await.unwrap();
        runner.run("second", None).await.unwrap();

        // Window of 0 means: ping probe + the actual call
        let health = runner.health().await;
        assert_eq!(health.state, "healthy");
    }

    #[tokio::test]
    async fn failed_ping_probe_is_connection_lost() {
        let mock = MockExecutor::new();
        mock.push_ok(json!({"ok": true})); // first call succeeds
        mock.push_err(fail()); // ping probe fails
        let runner = RobustRunner::new(Arc::new(mock), Duration::from_millis(0));

        runner.run("first", None).await.unwrap();
        let err = runner.run("second", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConnectionLost);
    }

    #[tokio::test]
    async fn oversized_scripts_do_not_count_as_failures() {
        let mock = MockExecutor::new();
        mock.push_err(ScriptError::TooLarge {
            size: 200_000,
            limit: 100_000,
        });
        let runner = runner_with(mock);

        let err = runner.run("big", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ScriptTooLarge);
        assert_eq!(runner.health().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn null_conversion_errors_get_enriched() {
        let mock = MockExecutor::new();
        mock.push_err(ScriptError::Failed {
            exit_code: Some(1),
            stderr: "Error: Can't convert types.".into(),
        });
        let runner = runner_with(mock);

        let err = runner.run("script", None).await.unwrap_err();
        assert!(err.to_string().contains("stopped responding"));
    }

    #[tokio::test]
    async fn probe_cascade_reports_all_three() {
        let mock = MockExecutor::new().with_default(json!({"ok": true}));
        let runner = runner_with(mock);

        let results = runner.probe_cascade().await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.ok));
        assert_eq!(
            results.iter().map(|r| r.name).collect::<Vec<_>>(),
            vec!["application", "document", "collections"]
        );
    }
}
