//! Entity rows returned by the scripting host
//!
//! Relations are id references only; rows never own other rows. Dates are
//! wire-form strings (`YYYY-MM-DD HH:mm`, local) produced by the script-side
//! serializer, with typed accessors for analyzer math.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dates;

// ============================================================================
// TASK
// ============================================================================

/// A task row as serialized inside the scripting host
///
/// Projection can omit most fields, so everything except `id` is defaulted.
/// `blocked`, `available` and `in_inbox` are derived by the host, never
/// computed here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskRow {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flagged: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_inbox: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defer_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequential: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_rule: Option<String>,
    /// Computed projection: days past due, present on overdue-style reads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_overdue: Option<i64>,
    /// Computed projection: why this row was admitted (due_soon, flagged, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TaskRow {
    pub fn due(&self) -> Option<chrono::NaiveDateTime> {
        self.due_date.as_deref().and_then(|s| dates::parse_wire(s).ok())
    }

    pub fn completion(&self) -> Option<chrono::NaiveDateTime> {
        self.completion_date
            .as_deref()
            .and_then(|s| dates::parse_wire(s).ok())
    }

    pub fn modified_at(&self) -> Option<chrono::NaiveDateTime> {
        self.modified.as_deref().and_then(|s| dates::parse_wire(s).ok())
    }

    pub fn is_completed(&self) -> bool {
        self.completed.unwrap_or(false)
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged.unwrap_or(false)
    }

    pub fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

// ============================================================================
// PROJECT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    OnHold,
    Done,
    Dropped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectRow {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequential: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_task_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_interval_weeks: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_review_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

impl ProjectRow {
    pub fn next_review(&self) -> Option<chrono::NaiveDateTime> {
        self.next_review_date
            .as_deref()
            .and_then(|s| dates::parse_wire(s).ok())
    }

    pub fn modified_at(&self) -> Option<chrono::NaiveDateTime> {
        self.modified.as_deref().and_then(|s| dates::parse_wire(s).ok())
    }
}

// ============================================================================
// TAG / FOLDER / PERSPECTIVE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TagRow {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Full nested path, segments joined with " : "
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutually_exclusive: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FolderRow {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_count: Option<i64>,
}

/// Built-in perspectives have a name only; custom ones carry an identifier
/// and an opaque rule blob
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PerspectiveRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub builtin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_row_roundtrip_minimal() {
        let row: TaskRow = serde_json::from_value(json!({
            "id": "abc123",
            "name": "Buy milk",
            "flagged": false,
            "inInbox": true
        }))
        .unwrap();

        assert_eq!(row.id, "abc123");
        assert_eq!(row.name.as_deref(), Some("Buy milk"));
        assert_eq!(row.in_inbox, Some(true));
        assert!(row.due_date.is_none());

        // Omitted fields stay omitted on the wire
        let out = serde_json::to_value(&row).unwrap();
        assert!(out.get("dueDate").is_none());
        assert!(out.get("tags").is_none());
    }

    #[test]
    fn task_row_date_accessors() {
        let row = TaskRow {
            id: "t1".into(),
            due_date: Some("2025-03-14 16:30".into()),
            completion_date: Some("2025-03-10".into()),
            ..Default::default()
        };
        assert_eq!(dates::format_wire(row.due().unwrap()), "2025-03-14 16:30");
        assert_eq!(
            row.completion().unwrap().date(),
            chrono::NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
        );
    }

    #[test]
    fn project_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ProjectStatus::OnHold).unwrap(),
            "\"on_hold\""
        );
        let s: ProjectStatus = serde_json::from_str("\"dropped\"").unwrap();
        assert_eq!(s, ProjectStatus::Dropped);
    }

    #[test]
    fn perspective_builtin_has_no_id() {
        let p: PerspectiveRow = serde_json::from_value(json!({
            "name": "Forecast",
            "builtin": true
        }))
        .unwrap();
        assert!(p.id.is_none());
        assert!(p.rules.is_none());
    }
}
