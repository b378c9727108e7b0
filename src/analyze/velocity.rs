//! Completion velocity and productivity statistics

use chrono::{Datelike, Duration, NaiveDateTime};
use serde_json::json;
use std::collections::BTreeMap;

use super::AnalysisOutcome;
use crate::model::TaskRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    Day,
    Week,
    Month,
}

impl Grouping {
    pub fn from_user(name: Option<&str>) -> Grouping {
        match name {
            Some("day") => Grouping::Day,
            Some("month") => Grouping::Month,
            _ => Grouping::Week,
        }
    }

    fn bucket(&self, dt: NaiveDateTime) -> String {
        match self {
            Grouping::Day => dt.format("%Y-%m-%d").to_string(),
            Grouping::Week => format!("{}-W{:02}", dt.iso_week().year(), dt.iso_week().week()),
            Grouping::Month => dt.format("%Y-%m").to_string(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Grouping::Day => "day",
            Grouping::Week => "week",
            Grouping::Month => "month",
        }
    }
}

/// Group completed tasks into time buckets and report the trend
pub fn task_velocity(tasks: &[TaskRow], grouping: Grouping, now: NaiveDateTime) -> AnalysisOutcome {
    let mut buckets: BTreeMap<String, u64> = BTreeMap::new();
    let mut completed_total = 0u64;

    for task in tasks {
        let Some(done_at) = task.completion() else {
            continue;
        };
        completed_total += 1;
        *buckets.entry(grouping.bucket(done_at)).or_insert(0) += 1;
    }

    // Rising or falling: compare the last two buckets
    let values: Vec<u64> = buckets.values().copied().collect();
    let trend = match values.len() {
        0 | 1 => "flat",
        n if values[n - 1] > values[n - 2] => "rising",
        n if values[n - 1] < values[n - 2] => "falling",
        _ => "flat",
    };

    let current_bucket = grouping.bucket(now);
    let this_period = buckets.get(&current_bucket).copied().unwrap_or(0);

    let summary = format!(
        "{completed_total} tasks completed across {} {}s; {} this {} ({trend})",
        buckets.len(),
        grouping.label(),
        this_period,
        grouping.label(),
    );

    let series: Vec<_> = buckets
        .iter()
        .map(|(bucket, count)| json!({"bucket": bucket, "completed": count}))
        .collect();

    AnalysisOutcome::new(
        summary,
        json!({
            "grouping": grouping.label(),
            "total_completed": completed_total,
            "trend": trend,
            "series": series,
        }),
    )
}

/// Completion counts and rates over a trailing period
pub fn productivity_stats(tasks: &[TaskRow], period_days: i64, now: NaiveDateTime) -> AnalysisOutcome {
    let cutoff = now - Duration::days(period_days);

    let mut completed = 0u64;
    let mut created = 0u64;
    let mut open = 0u64;
    let mut open_flagged = 0u64;
    let mut overdue = 0u64;

    for task in tasks {
        if task.completion().map(|d| d >= cutoff).unwrap_or(false) {
            completed += 1;
        }
        if task
            .added
            .as_deref()
            .and_then(|s| crate::dates::parse_wire(s).ok())
            .map(|d| d >= cutoff)
            .unwrap_or(false)
        {
            created += 1;
        }
        if !task.is_completed() {
            open += 1;
            if task.is_flagged() {
                open_flagged += 1;
            }
            if task.due().map(|d| d < now).unwrap_or(false) {
                overdue += 1;
            }
        }
    }

    let completion_rate = if created > 0 {
        (completed as f64 / created as f64 * 100.0).round()
    } else {
        0.0
    };

    let summary = format!(
        "{completed} completed and {created} created in the last {period_days} days; {open} open ({overdue} overdue, {open_flagged} flagged)"
    );

    AnalysisOutcome::new(
        summary,
        json!({
            "period_days": period_days,
            "completed": completed,
            "created": created,
            "completion_rate_pct": completion_rate,
            "open": open,
            "open_flagged": open_flagged,
            "overdue": overdue,
        }),
    )
}
