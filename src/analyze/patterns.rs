//! Pattern detection: duplicates, vague tasks, dormant projects, bunched
//! deadlines

use chrono::{Duration, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::collections::BTreeMap;

use super::AnalysisOutcome;
use crate::model::{ProjectRow, TaskRow};

/// Days without modification before a project counts as dormant
pub const DORMANT_THRESHOLD_DAYS: i64 = 45;

/// Deadlines sharing a day beyond this count are "bunched"
const BUNCH_THRESHOLD: usize = 5;

/// A name this short says nothing
const VAGUE_MAX_LEN: usize = 4;

static VAGUE_STARTERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(stuff|things?|misc|various|some|check|handle|deal with|look at|follow up)\b")
        .expect("vague-starter pattern is valid")
});

pub struct PatternParams {
    pub dormant_threshold_days: i64,
}

impl Default for PatternParams {
    fn default() -> Self {
        Self {
            dormant_threshold_days: DORMANT_THRESHOLD_DAYS,
        }
    }
}

/// Scan open tasks and projects for hygiene problems
pub fn pattern_analysis(
    tasks: &[TaskRow],
    projects: &[ProjectRow],
    now: NaiveDateTime,
    params: &PatternParams,
) -> AnalysisOutcome {
    let open: Vec<&TaskRow> = tasks.iter().filter(|t| !t.is_completed()).collect();

    // Duplicates: identical names after whitespace/case folding
    let mut by_name: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for task in &open {
        let folded = fold_name(task.name_or_empty());
        if !folded.is_empty() {
            by_name.entry(folded).or_default().push(task.id.as_str());
        }
    }
    let duplicates: Vec<_> = by_name
        .iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(name, ids)| json!({"name": name, "ids": ids, "count": ids.len()}))
        .collect();

    // Vague tasks: too short or starting with a filler verb
    let vague: Vec<_> = open
        .iter()
        .filter(|t| {
            let name = t.name_or_empty().trim();
            !name.is_empty() && (name.len() <= VAGUE_MAX_LEN || VAGUE_STARTERS.is_match(name))
        })
        .map(|t| json!({"id": t.id, "name": t.name_or_empty()}))
        .collect();

    // Dormant projects: active but untouched past the threshold
    let dormant_cutoff = now - Duration::days(params.dormant_threshold_days);
    let dormant: Vec<_> = projects
        .iter()
        .filter(|p| {
            matches!(
                p.status,
                Some(crate::model::ProjectStatus::Active) | None
            ) && p.modified_at().map(|m| m < dormant_cutoff).unwrap_or(false)
        })
        .map(|p| {
            let idle_days = p
                .modified_at()
                .map(|m| (now - m).num_days())
                .unwrap_or_default();
            json!({"id": p.id, "name": p.name, "idle_days": idle_days})
        })
        .collect();

    // Bunched deadlines: many tasks due the same day
    let mut by_day: BTreeMap<String, usize> = BTreeMap::new();
    for task in &open {
        if let Some(due) = task.due() {
            *by_day.entry(due.format("%Y-%m-%d").to_string()).or_insert(0) += 1;
        }
    }
    let bunched: Vec<_> = by_day
        .iter()
        .filter(|(_, count)| **count >= BUNCH_THRESHOLD)
        .map(|(day, count)| json!({"date": day, "count": count}))
        .collect();

    let summary = format!(
        "{} duplicate name groups, {} vague tasks, {} dormant projects, {} bunched deadline days",
        duplicates.len(),
        vague.len(),
        dormant.len(),
        bunched.len()
    );

    AnalysisOutcome::new(
        summary,
        json!({
            "duplicates": duplicates,
            "vague_tasks": vague,
            "dormant_projects": dormant,
            "bunched_deadlines": bunched,
        }),
    )
}

fn fold_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn task(id: &str, name: &str) -> TaskRow {
        TaskRow {
            id: id.into(),
            name: Some(name.into()),
            completed: Some(false),
            ..Default::default()
        }
    }

    #[test]
    fn duplicates_fold_case_and_whitespace() {
        let tasks = vec![
            task("a", "Email  Bob"),
            task("b", "email bob"),
            task("c", "Email Alice"),
        ];
        let outcome = pattern_analysis(&tasks, &[], now(), &PatternParams::default());
        let dups = outcome.data["duplicates"].as_array().unwrap();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0]["name"], "email bob");
        assert_eq!(dups[0]["count"], 2);
    }

    #[test]
    fn vague_task_heuristics() {
        let tasks = vec![
            task("a", "Stuff"),
            task("b", "Follow up on the thing"),
            task("c", "xyz"),
            task("d", "Write the quarterly board report"),
        ];
        let outcome = pattern_analysis(&tasks, &[], now(), &PatternParams::default());
        let vague = outcome.data["vague_tasks"].as_array().unwrap();
        let names: Vec<&str> = vague.iter().map(|v| v["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"Stuff"));
        assert!(names.contains(&"Follow up on the thing"));
        assert!(names.contains(&"xyz"));
        assert!(!names.contains(&"Write the quarterly board report"));
    }

    #[test]
    fn dormant_projects_respect_threshold() {
        let projects = vec![
            ProjectRow {
                id: "p1".into(),
                name: Some("Old".into()),
                status: Some(crate::model::ProjectStatus::Active),
                modified: Some("2025-01-01 09:00".into()),
                ..Default::default()
            },
            ProjectRow {
                id: "p2".into(),
                name: Some("Fresh".into()),
                status: Some(crate::model::ProjectStatus::Active),
                modified: Some("2025-03-13 09:00".into()),
                ..Default::default()
            },
            ProjectRow {
                id: "p3".into(),
                name: Some("Done long ago".into()),
                status: Some(crate::model::ProjectStatus::Done),
                modified: Some("2024-01-01 09:00".into()),
                ..Default::default()
            },
        ];
        let outcome = pattern_analysis(&[], &projects, now(), &PatternParams::default());
        let dormant = outcome.data["dormant_projects"].as_array().unwrap();
        assert_eq!(dormant.len(), 1);
        assert_eq!(dormant[0]["name"], "Old");
        assert!(dormant[0]["idle_days"].as_i64().unwrap() > 45);
    }

    #[test]
    fn bunched_deadlines_need_five_on_a_day() {
        let mut tasks: Vec<TaskRow> = (0..5)
            .map(|i| {
                let mut t = task(&format!("t{i}"), &format!("Task {i}"));
                t.due_date = Some("2025-03-20 17:00".into());
                t
            })
            .collect();
        let mut lone = task("solo", "Lone deadline");
        lone.due_date = Some("2025-03-21 17:00".into());
        tasks.push(lone);

        let outcome = pattern_analysis(&tasks, &[], now(), &PatternParams::default());
        let bunched = outcome.data["bunched_deadlines"].as_array().unwrap();
        assert_eq!(bunched.len(), 1);
        assert_eq!(bunched[0]["date"], "2025-03-20");
        assert_eq!(bunched[0]["count"], 5);
    }
}
