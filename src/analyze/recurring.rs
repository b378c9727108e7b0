//! Recurring-task inventory

use serde_json::json;
use std::collections::BTreeMap;

use super::AnalysisOutcome;
use crate::model::TaskRow;

/// List tasks carrying a repetition rule with a frequency histogram
pub fn recurring_tasks(tasks: &[TaskRow]) -> AnalysisOutcome {
    let mut histogram: BTreeMap<String, u64> = BTreeMap::new();
    let mut rows = Vec::new();

    for task in tasks {
        let Some(rule) = task.repetition_rule.as_deref() else {
            continue;
        };
        let freq = frequency_label(rule);
        *histogram.entry(freq.to_string()).or_insert(0) += 1;
        rows.push(json!({
            "id": task.id,
            "name": task.name_or_empty(),
            "rule": rule,
            "frequency": freq,
            "project": task.project,
            "dueDate": task.due_date,
        }));
    }

    let summary = if rows.is_empty() {
        "no recurring tasks".to_string()
    } else {
        let top = histogram
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(freq, count)| format!("{count} {freq}"))
            .unwrap_or_default();
        format!("{} recurring tasks; most common cadence: {top}", rows.len())
    };

    AnalysisOutcome::new(
        summary,
        json!({
            "count": rows.len(),
            "by_frequency": histogram,
            "tasks": rows,
        }),
    )
}

fn frequency_label(rule: &str) -> &'static str {
    let upper = rule.to_uppercase();
    if upper.contains("FREQ=DAILY") {
        "daily"
    } else if upper.contains("FREQ=WEEKLY") {
        "weekly"
    } else if upper.contains("FREQ=MONTHLY") {
        "monthly"
    } else if upper.contains("FREQ=YEARLY") {
        "yearly"
    } else {
        "other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recurring(id: &str, rule: &str) -> TaskRow {
        TaskRow {
            id: id.into(),
            name: Some(format!("Task {id}")),
            repetition_rule: Some(rule.into()),
            ..Default::default()
        }
    }

    #[test]
    fn histogram_by_frequency() {
        let tasks = vec![
            recurring("a", "FREQ=WEEKLY"),
            recurring("b", "FREQ=WEEKLY;INTERVAL=2"),
            recurring("c", "FREQ=DAILY"),
            TaskRow {
                id: "plain".into(),
                ..Default::default()
            },
        ];
        let outcome = recurring_tasks(&tasks);
        assert_eq!(outcome.data["count"], 3);
        assert_eq!(outcome.data["by_frequency"]["weekly"], 2);
        assert_eq!(outcome.data["by_frequency"]["daily"], 1);
        assert!(outcome.summary.contains("2 weekly"));
    }

    #[test]
    fn empty_input_reads_cleanly() {
        let outcome = recurring_tasks(&[]);
        assert_eq!(outcome.summary, "no recurring tasks");
        assert_eq!(outcome.data["count"], 0);
    }

    #[test]
    fn unknown_rules_bucket_as_other() {
        let outcome = recurring_tasks(&[recurring("x", "every blue moon")]);
        assert_eq!(outcome.data["by_frequency"]["other"], 1);
    }
}
