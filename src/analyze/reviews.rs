//! Review scheduling: which projects are due for review

use chrono::NaiveDateTime;
use serde_json::json;

use super::AnalysisOutcome;
use crate::model::{ProjectRow, ProjectStatus};

/// Projects whose next review date has arrived, most overdue first
pub fn reviews_due(projects: &[ProjectRow], now: NaiveDateTime) -> AnalysisOutcome {
    let mut due: Vec<(&ProjectRow, i64)> = projects
        .iter()
        .filter(|p| {
            matches!(p.status, Some(ProjectStatus::Active) | Some(ProjectStatus::OnHold) | None)
        })
        .filter_map(|p| {
            let next = p.next_review()?;
            (next <= now).then(|| (p, (now - next).num_days()))
        })
        .collect();
    due.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.id.cmp(&b.0.id)));

    let rows: Vec<_> = due
        .iter()
        .map(|(p, days)| {
            json!({
                "id": p.id,
                "name": p.name,
                "status": p.status,
                "nextReviewDate": p.next_review_date,
                "days_overdue": days,
            })
        })
        .collect();

    let summary = if rows.is_empty() {
        "no projects are due for review".to_string()
    } else {
        format!(
            "{} projects due for review; most overdue by {} days",
            rows.len(),
            due[0].1
        )
    };

    AnalysisOutcome::new(summary, json!({"count": rows.len(), "projects": rows}))
}
