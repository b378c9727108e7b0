//! System verb: version, diagnostics, metrics, cache operations

use serde_json::{json, Value};

use super::input::SystemRequest;
use super::{DispatchError, Dispatcher};
use crate::error::OmniError;
use crate::response::Envelope;
use crate::script::builder::omnijs::wrap_embedded;

/// Entity counts in one embedded round trip
const METRICS_SCRIPT: &str = r#"(() => {
  return JSON.stringify({
    tasks: flattenedTasks.length,
    projects: flattenedProjects.length,
    tags: flattenedTags.length,
    folders: flattenedFolders.length,
    inbox: inbox.length
  });
})()"#;

pub(crate) async fn run_system(
    d: &Dispatcher,
    request: SystemRequest,
) -> Result<Envelope, OmniError> {
    match request.operation.as_str() {
        "version" => Ok(Envelope::ok(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "max_script_size": d.config.max_script_size,
            "script_timeout_ms": d.config.script_timeout.as_millis() as u64,
        }))
        .with_summary(format!(
            "{} {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ))),

        "diagnostics" => {
            let health = d.runner.health().await;
            let probes = d.runner.probe_cascade().await;
            let all_ok = probes.iter().all(|p| p.ok);
            let summary = if all_ok {
                format!("host healthy; runner state {}", health.state)
            } else {
                let failed: Vec<&str> = probes.iter().filter(|p| !p.ok).map(|p| p.name).collect();
                format!("host degraded; failing probes: {}", failed.join(", "))
            };
            let health_value = serde_json::to_value(&health).unwrap_or(Value::Null);
            Ok(Envelope::ok(json!({
                "runner": health_value.clone(),
                "probes": probes,
            }))
            .with_summary(summary)
            .with_health(health_value))
        }

        "metrics" => {
            let counts = d.runner.run(&wrap_embedded(METRICS_SCRIPT), None).await?;
            let cache = d.cache.stats();
            let summary = format!(
                "{} tasks, {} projects, {} tags; cache holds {} entries",
                counts.get("tasks").and_then(Value::as_u64).unwrap_or(0),
                counts.get("projects").and_then(Value::as_u64).unwrap_or(0),
                counts.get("tags").and_then(Value::as_u64).unwrap_or(0),
                cache.entries
            );
            Ok(Envelope::ok(json!({
                "database": counts,
                "cache": cache,
            }))
            .with_summary(summary))
        }

        "cache_stats" => {
            let stats = d.cache.stats();
            let summary = format!(
                "{} entries, {} hits, {} misses",
                stats.entries, stats.hits, stats.misses
            );
            Ok(Envelope::ok(serde_json::to_value(stats).unwrap_or(Value::Null)).with_summary(summary))
        }

        "cache_clear" => {
            let before = d.cache.stats().entries;
            d.cache.clear();
            Ok(Envelope::ok(json!({"cleared": before}))
                .with_summary(format!("cleared {before} cache entries")))
        }

        "cache_invalidate" => {
            let workflow = request.workflow.as_deref().ok_or_else(|| {
                DispatchError::InvalidInput {
                    detail: "cache_invalidate needs a workflow (inbox_processing, weekly_review, daily_planning)"
                        .into(),
                }
            })?;
            d.cache.invalidate_workflow(workflow);
            Ok(Envelope::ok(json!({"workflow": workflow}))
                .with_summary(format!("invalidated cache for workflow '{workflow}'")))
        }

        other => Err(DispatchError::UnknownOperation {
            operation: other.to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::script::MockExecutor;
    use std::sync::Arc;

    fn dispatcher_with(mock: Arc<MockExecutor>) -> Dispatcher {
        Dispatcher::with_executor(mock, Config::default())
    }

    fn request(operation: &str) -> SystemRequest {
        SystemRequest {
            operation: operation.into(),
            workflow: None,
        }
    }

    #[tokio::test]
    async fn version_reports_limits() {
        let d = dispatcher_with(Arc::new(MockExecutor::new()));
        let env = run_system(&d, request("version")).await.unwrap();
        let data = env.data.unwrap();
        assert_eq!(data["name"], "omnibridge");
        assert_eq!(data["max_script_size"], 100_000);
    }

    #[tokio::test]
    async fn diagnostics_runs_the_cascade() {
        let mock = Arc::new(MockExecutor::new().with_default(serde_json::json!({"ok": true})));
        let d = dispatcher_with(mock.clone());

        let env = run_system(&d, request("diagnostics")).await.unwrap();
        assert!(env.success);
        assert!(env.summary.unwrap().contains("healthy"));
        // Three probes ran
        assert_eq!(mock.call_count(), 3);
        assert!(env.metadata.health.is_some());
    }

    #[tokio::test]
    async fn metrics_counts_database_and_cache() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(serde_json::json!({
            "tasks": 120, "projects": 14, "tags": 9, "folders": 3, "inbox": 5
        }));
        let d = dispatcher_with(mock);

        let env = run_system(&d, request("metrics")).await.unwrap();
        assert!(env.summary.unwrap().starts_with("120 tasks"));
        let data = env.data.unwrap();
        assert_eq!(data["database"]["inbox"], 5);
    }

    #[tokio::test]
    async fn cache_clear_reports_count() {
        let d = dispatcher_with(Arc::new(MockExecutor::new()));
        let snap = d.cache.snapshot();
        d.cache.insert(
            crate::cache::CacheClass::Tasks,
            "fp",
            serde_json::json!(1),
            None,
            snap,
        );

        let env = run_system(&d, request("cache_clear")).await.unwrap();
        assert_eq!(env.data.unwrap()["cleared"], 1);
        assert_eq!(d.cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn cache_invalidate_requires_workflow() {
        let d = dispatcher_with(Arc::new(MockExecutor::new()));
        let err = run_system(&d, request("cache_invalidate")).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn unknown_operation_is_rejected() {
        let d = dispatcher_with(Arc::new(MockExecutor::new()));
        let err = run_system(&d, request("reboot")).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
    }
}
