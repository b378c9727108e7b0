//! Tool input shapes
//!
//! Strict serde: unknown fields are rejected at the boundary, before any
//! semantic validation runs. These structs mirror the documented tool
//! surface one to one.

use serde::Deserialize;
use serde_json::{Map, Value};

// ============================================================================
// READ
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadRequest {
    pub query: QueryInput,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct QueryInput {
    /// tasks, projects, tags, folders, perspectives
    #[serde(rename = "type")]
    pub entity: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub filters: Option<Map<String, Value>>,
    #[serde(default)]
    pub sort: Option<Vec<SortInput>>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub count_only: bool,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Override for the due-soon horizon used by today/smart_suggest
    #[serde(default)]
    pub due_soon_days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortInput {
    pub field: String,
    #[serde(default)]
    pub direction: Option<String>,
}

// ============================================================================
// WRITE
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteRequest {
    pub mutation: MutationInput,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MutationInput {
    /// create, update, complete, delete, move, tag_manage, bulk_delete,
    /// batch, export
    pub operation: String,
    /// task (default), project, tag
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub changes: Option<Value>,
    #[serde(default)]
    pub items: Option<Vec<BatchItem>>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub atomic: bool,
    /// move destination: {"to": "inbox"} | {"to": "project", "project": ref}
    /// | {"to": "parent", "parentId": id}
    #[serde(default)]
    pub destination: Option<MoveInput>,
    /// export sink, paired with `query`
    #[serde(default)]
    pub export: Option<ExportInput>,
    #[serde(default)]
    pub query: Option<QueryInput>,
    /// Optional workflow-scoped invalidation hint
    #[serde(default)]
    pub workflow: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BatchItem {
    #[serde(default)]
    pub temp_id: Option<String>,
    #[serde(default)]
    pub parent_temp_id: Option<String>,
    pub operation: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub changes: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MoveInput {
    pub to: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportInput {
    pub path: String,
    pub format: String,
}

// ============================================================================
// ANALYZE
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeRequest {
    pub analysis: AnalysisInput,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AnalysisInput {
    /// productivity_stats, task_velocity, overdue_analysis, pattern_analysis,
    /// workflow_analysis, recurring_tasks, manage_reviews, parse_meeting_notes
    #[serde(rename = "type")]
    pub analysis_type: String,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    /// Optional filters narrowing the underlying query
    #[serde(default)]
    pub scope: Option<Map<String, Value>>,
}

// ============================================================================
// SYSTEM
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SystemRequest {
    /// version, diagnostics, metrics, cache_stats, cache_clear,
    /// cache_invalidate
    pub operation: String,
    #[serde(default)]
    pub workflow: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_request_minimal() {
        let req: ReadRequest =
            serde_json::from_value(json!({"query": {"type": "tasks"}})).unwrap();
        assert_eq!(req.query.entity, "tasks");
        assert!(!req.query.count_only);
        assert!(req.query.filters.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected_everywhere() {
        assert!(serde_json::from_value::<ReadRequest>(json!({
            "query": {"type": "tasks", "sortBy": "dueDate"}
        }))
        .is_err());

        assert!(serde_json::from_value::<WriteRequest>(json!({
            "mutation": {"operation": "create", "payload": {}}
        }))
        .is_err());

        assert!(serde_json::from_value::<SystemRequest>(json!({
            "operation": "version", "verbose": true
        }))
        .is_err());
    }

    #[test]
    fn mutation_batch_items_parse() {
        let req: WriteRequest = serde_json::from_value(json!({
            "mutation": {
                "operation": "batch",
                "atomic": true,
                "items": [
                    {"tempId": "p", "operation": "create", "target": "project", "data": {"name": "P"}},
                    {"tempId": "t", "parentTempId": "p", "operation": "create", "data": {"name": "T"}}
                ]
            }
        }))
        .unwrap();
        let items = req.mutation.items.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].parent_temp_id.as_deref(), Some("p"));
        assert!(req.mutation.atomic);
    }

    #[test]
    fn analysis_request_with_params() {
        let req: AnalyzeRequest = serde_json::from_value(json!({
            "analysis": {
                "type": "task_velocity",
                "params": {"grouping": "week"}
            }
        }))
        .unwrap();
        assert_eq!(req.analysis.analysis_type, "task_velocity");
        assert_eq!(
            req.analysis.params.unwrap().get("grouping").unwrap(),
            "week"
        );
    }
}
