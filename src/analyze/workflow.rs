//! Workflow hygiene analysis

use serde_json::json;

use super::AnalysisOutcome;
use crate::model::{ProjectRow, ProjectStatus, TaskRow};

/// Inbox size, tagging and estimation coverage, stalled-project ratio
pub fn workflow_analysis(tasks: &[TaskRow], projects: &[ProjectRow]) -> AnalysisOutcome {
    let open: Vec<&TaskRow> = tasks.iter().filter(|t| !t.is_completed()).collect();
    let open_count = open.len() as u64;

    let inbox = open.iter().filter(|t| t.in_inbox == Some(true)).count() as u64;
    let untagged = open
        .iter()
        .filter(|t| t.tags.as_ref().map(|v| v.is_empty()).unwrap_or(true))
        .count() as u64;
    let estimated = open
        .iter()
        .filter(|t| t.estimated_minutes.is_some())
        .count() as u64;
    let with_due = open.iter().filter(|t| t.due_date.is_some()).count() as u64;

    let active_projects = projects
        .iter()
        .filter(|p| matches!(p.status, Some(ProjectStatus::Active) | None))
        .count() as u64;
    let stalled = projects
        .iter()
        .filter(|p| {
            matches!(p.status, Some(ProjectStatus::Active) | None)
                && p.available_task_count == Some(0)
                && p.task_count.map(|n| n > 0).unwrap_or(false)
        })
        .count() as u64;

    let pct = |part: u64| {
        if open_count == 0 {
            0
        } else {
            part * 100 / open_count
        }
    };

    let summary = format!(
        "{open_count} open tasks: {inbox} in inbox, {}% untagged, {}% estimated; {stalled} of {active_projects} active projects have no available next action",
        pct(untagged),
        pct(estimated),
    );

    AnalysisOutcome::new(
        summary,
        json!({
            "open_tasks": open_count,
            "inbox": inbox,
            "untagged": untagged,
            "untagged_pct": pct(untagged),
            "estimated": estimated,
            "estimated_pct": pct(estimated),
            "with_due_date": with_due,
            "active_projects": active_projects,
            "stalled_projects": stalled,
        }),
    )
}
