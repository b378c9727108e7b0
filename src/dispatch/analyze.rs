//! Analyze pipeline: feed cached or fresh query results to the analyzers
//!
//! Analytics results cache under their own class with a long TTL; writes
//! never invalidate them.

use chrono::Local;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::input::AnalysisInput;
use super::{read, DispatchError, Dispatcher};
use crate::analyze::{self, meeting_notes::MeetingNotesParams, patterns::PatternParams, AnalysisOutcome};
use crate::cache::{CacheClass, Invalidation};
use crate::error::OmniError;
use crate::model::{ProjectRow, TaskRow};
use crate::query::{EntityType, QueryMode};
use crate::response::Envelope;

/// Row ceiling for analyzer source queries
const ANALYSIS_FETCH_LIMIT: usize = 1_000;

pub(crate) async fn run_analysis(
    d: &Dispatcher,
    input: AnalysisInput,
) -> Result<Envelope, OmniError> {
    let params = input.params.clone().unwrap_or_default();
    let scope = input.scope.clone().unwrap_or_default();
    let now = Local::now().naive_local();

    // Mutating analyses skip the analytics cache entirely
    let cacheable = !matches!(input.analysis_type.as_str(), "manage_reviews" | "parse_meeting_notes");
    let fp = analytics_fingerprint(&input.analysis_type, &params, &scope);
    if cacheable {
        if let Some((cached, _age)) = d.cache.get(CacheClass::Analytics, &fp) {
            let summary = cached["summary"].as_str().unwrap_or_default().to_string();
            return Ok(Envelope::ok(cached["data"].clone())
                .with_summary(summary)
                .from_cache());
        }
    }
    let snapshot = d.cache.snapshot();

    let outcome = match input.analysis_type.as_str() {
        "productivity_stats" => {
            let period = int_param(&params, "periodDays").unwrap_or(7);
            let tasks = fetch_tasks(d, None, &scope).await?;
            analyze::productivity_stats(&tasks, period, now)
        }
        "task_velocity" => {
            let grouping = analyze::Grouping::from_user(str_param(&params, "grouping"));
            let mut filters = scope.clone();
            filters.insert("completed".into(), json!(true));
            let tasks = fetch_tasks(d, None, &filters).await?;
            analyze::task_velocity(&tasks, grouping, now)
        }
        "overdue_analysis" => {
            let tasks = fetch_tasks(d, Some(QueryMode::Overdue), &scope).await?;
            analyze::overdue_analysis(&tasks, now)
        }
        "pattern_analysis" => {
            let tasks = fetch_tasks(d, None, &scope).await?;
            let projects = fetch_projects(d).await?;
            let pattern_params = PatternParams {
                dormant_threshold_days: int_param(&params, "dormantThresholdDays")
                    .unwrap_or(analyze::patterns::DORMANT_THRESHOLD_DAYS),
            };
            analyze::pattern_analysis(&tasks, &projects, now, &pattern_params)
        }
        "workflow_analysis" => {
            let tasks = fetch_tasks(d, None, &scope).await?;
            let projects = fetch_projects(d).await?;
            analyze::workflow_analysis(&tasks, &projects)
        }
        "recurring_tasks" => {
            let mut filters = scope.clone();
            filters.insert("repetitionRule".into(), json!(true));
            let tasks = fetch_tasks(d, None, &filters).await?;
            analyze::recurring_tasks(&tasks)
        }
        "manage_reviews" => return manage_reviews(d, &params, now).await,
        "parse_meeting_notes" => {
            let notes = str_param(&params, "notes").ok_or_else(|| {
                DispatchError::InvalidInput {
                    detail: "parse_meeting_notes needs params.notes".into(),
                }
            })?;
            let meeting_params = MeetingNotesParams {
                default_project: str_param(&params, "defaultProject").map(String::from),
                default_tags: str_list_param(&params, "defaultTags"),
                return_format: str_param(&params, "returnFormat")
                    .unwrap_or("preview")
                    .to_string(),
                today: now.date(),
            };
            analyze::parse_meeting_notes(notes, &meeting_params)
        }
        other => {
            return Err(DispatchError::UnknownOperation {
                operation: format!("analysis type '{other}'"),
            }
            .into())
        }
    };

    if cacheable {
        d.cache.insert(
            CacheClass::Analytics,
            &fp,
            json!({"summary": outcome.summary, "data": outcome.data}),
            None,
            snapshot,
        );
    }
    Ok(envelope_of(outcome))
}

async fn manage_reviews(
    d: &Dispatcher,
    params: &Map<String, Value>,
    now: chrono::NaiveDateTime,
) -> Result<Envelope, OmniError> {
    match str_param(params, "action").unwrap_or("list") {
        "list" => {
            let projects = fetch_projects(d).await?;
            Ok(envelope_of(analyze::reviews_due(&projects, now)))
        }
        "mark_reviewed" => {
            let project_id = str_param(params, "projectId").ok_or_else(|| {
                DispatchError::InvalidInput {
                    detail: "mark_reviewed needs params.projectId".into(),
                }
            })?;
            let guard = d.cache.begin_write(CacheClass::Reviews);
            let row = d.bridge.mark_project_reviewed(project_id).await?;
            guard.complete(Invalidation::Class);
            let project_guard = d.cache.begin_write(CacheClass::Projects);
            project_guard.complete(Invalidation::Class);

            let summary = format!(
                "marked '{}' reviewed; next review {}",
                row.name.as_deref().unwrap_or(project_id),
                row.next_review_date.as_deref().unwrap_or("unscheduled")
            );
            Ok(Envelope::ok(serde_json::to_value(row).unwrap_or(Value::Null)).with_summary(summary))
        }
        other => Err(DispatchError::UnknownOperation {
            operation: format!("manage_reviews action '{other}'"),
        }
        .into()),
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn envelope_of(outcome: AnalysisOutcome) -> Envelope {
    Envelope::ok(outcome.data).with_summary(outcome.summary)
}

async fn fetch_tasks(
    d: &Dispatcher,
    mode: Option<QueryMode>,
    filters: &Map<String, Value>,
) -> Result<Vec<TaskRow>, OmniError> {
    let rows = read::fetch_rows(d, EntityType::Tasks, mode, filters, ANALYSIS_FETCH_LIMIT).await?;
    Ok(rows
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

async fn fetch_projects(d: &Dispatcher) -> Result<Vec<ProjectRow>, OmniError> {
    let rows = read::fetch_rows(
        d,
        EntityType::Projects,
        None,
        &Map::new(),
        ANALYSIS_FETCH_LIMIT,
    )
    .await?;
    Ok(rows
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

fn analytics_fingerprint(
    analysis_type: &str,
    params: &Map<String, Value>,
    scope: &Map<String, Value>,
) -> String {
    let canonical = json!({
        "type": analysis_type,
        "params": params,
        "scope": scope,
    })
    .to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

fn str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn int_param(params: &Map<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_i64)
}

fn str_list_param(params: &Map<String, Value>, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================
