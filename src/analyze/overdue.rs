//! Overdue analysis: bucket overdue tasks by project and age

use chrono::NaiveDateTime;
use serde_json::json;
use std::collections::BTreeMap;

use super::AnalysisOutcome;
use crate::model::TaskRow;

const INBOX_GROUP: &str = "(inbox)";

/// Group overdue tasks by containing project, with age buckets per group
pub fn overdue_analysis(tasks: &[TaskRow], now: NaiveDateTime) -> AnalysisOutcome {
    #[derive(Default)]
    struct Group {
        count: u64,
        within_week: u64,
        within_month: u64,
        older: u64,
        oldest_days: i64,
    }

    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    let mut total = 0u64;

    for task in tasks {
        let Some(due) = task.due() else { continue };
        if due >= now || task.is_completed() {
            continue;
        }
        total += 1;
        let days = (now - due).num_days();
        let name = task
            .project
            .clone()
            .unwrap_or_else(|| INBOX_GROUP.to_string());
        let group = groups.entry(name).or_default();
        group.count += 1;
        group.oldest_days = group.oldest_days.max(days);
        match days {
            0..=7 => group.within_week += 1,
            8..=30 => group.within_month += 1,
            _ => group.older += 1,
        }
    }

    let mut rows: Vec<(String, Group)> = groups.into_iter().collect();
    rows.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.0.cmp(&b.0)));

    let summary = match rows.first() {
        Some((name, group)) => format!(
            "{total} overdue tasks in {} groups; worst is '{name}' with {} (oldest {} days)",
            rows.len(),
            group.count,
            group.oldest_days
        ),
        None => "no overdue tasks".to_string(),
    };

    let data_rows: Vec<_> = rows
        .iter()
        .map(|(name, g)| {
            json!({
                "project": name,
                "count": g.count,
                "age_buckets": {
                    "week": g.within_week,
                    "month": g.within_month,
                    "older": g.older,
                },
                "oldest_days": g.oldest_days,
            })
        })
        .collect();

    AnalysisOutcome::new(
        summary,
        json!({
            "total_overdue": total,
            "groups": data_rows,
        }),
    )
}
