//! Meeting-notes parsing: free text → action items
//!
//! Extracts bullet and TODO lines, pulls due dates out of trailing time
//! phrases, suggests context tags from a keyword table, and emits either a
//! human preview or a batch-ready mutation payload.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use super::AnalysisOutcome;
use crate::dates;

/// A line opens an action item when it is a bullet or carries a TODO marker
static ACTION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*•]\s*(?:\[\s?\]\s*)?|(?:todo|action|ai)\s*[:\-]\s*)(.+)$")
        .expect("action-line pattern is valid")
});

/// Trailing due phrase: "... by friday", "... due 2025-04-01", "... on monday"
static DUE_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+\(?(?:by|due|on|before)\s+([A-Za-z0-9 :\-]+?)\)?\s*$")
        .expect("due-phrase pattern is valid")
});

/// Keyword → context tag table
static TAG_TABLE: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\b(call|phone|dial)\b", "@calls"),
        (r"(?i)\b(email|reply|send|forward)\b", "@email"),
        (r"(?i)\b(buy|order|purchase|pick up)\b", "@errands"),
        (r"(?i)\b(review|read|proofread)\b", "@review"),
        (r"(?i)\b(meet|meeting|schedule|sync)\b", "@meetings"),
        (r"(?i)\b(write|draft|document)\b", "@writing"),
        (r"(?i)\b(fix|debug|deploy|merge)\b", "@computer"),
    ]
    .iter()
    .map(|(pattern, tag)| (Regex::new(pattern).expect("tag pattern is valid"), *tag))
    .collect()
});

#[derive(Debug, Clone)]
pub struct MeetingNotesParams {
    /// Attach every extracted item to this project
    pub default_project: Option<String>,
    /// Tags added to every item in addition to suggestions
    pub default_tags: Vec<String>,
    /// "preview" for human rows, "batch" for a ready mutation payload
    pub return_format: String,
    /// The clock phrases resolve against
    pub today: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionItem {
    pub name: String,
    pub due_date: Option<String>,
    pub tags: Vec<String>,
}

/// Extract action items from free text
pub fn extract_action_items(text: &str, today: NaiveDate) -> Vec<ActionItem> {
    let mut items = Vec::new();
    for line in text.lines() {
        let Some(captures) = ACTION_LINE.captures(line) else {
            continue;
        };
        let raw = captures[1].trim();
        if raw.is_empty() {
            continue;
        }

        let (name, due_date) = split_due_phrase(raw, today);
        let tags = suggest_tags(&name);
        items.push(ActionItem {
            name,
            due_date,
            tags,
        });
    }
    items
}

/// Parse notes and shape the outcome per the requested format
pub fn parse_meeting_notes(text: &str, params: &MeetingNotesParams) -> AnalysisOutcome {
    let items = extract_action_items(text, params.today);

    let with_due = items.iter().filter(|i| i.due_date.is_some()).count();
    let summary = if items.is_empty() {
        "no action items found in the notes".to_string()
    } else {
        format!(
            "{} action items extracted, {with_due} with due dates",
            items.len()
        )
    };

    let data = if params.return_format == "batch" {
        let batch_items: Vec<Value> = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let mut tags = params.default_tags.clone();
                for tag in &item.tags {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
                let mut data = json!({
                    "name": item.name,
                    "tags": tags,
                });
                if let Some(ref due) = item.due_date {
                    data["dueDate"] = json!(due);
                }
                if let Some(ref project) = params.default_project {
                    data["project"] = json!(project);
                }
                json!({
                    "tempId": format!("note-{}", i + 1),
                    "operation": "create",
                    "target": "task",
                    "data": data,
                })
            })
            .collect();
        json!({
            "format": "batch",
            "mutation": {
                "operation": "batch",
                "target": "task",
                "items": batch_items,
            },
        })
    } else {
        let rows: Vec<Value> = items
            .iter()
            .map(|item| {
                json!({
                    "name": item.name,
                    "dueDate": item.due_date,
                    "suggestedTags": item.tags,
                })
            })
            .collect();
        json!({"format": "preview", "items": rows})
    };

    AnalysisOutcome::new(summary, data)
}

/// Pull a trailing time phrase off the line; the phrase must actually parse
/// as a date or it stays part of the name
fn split_due_phrase(raw: &str, today: NaiveDate) -> (String, Option<String>) {
    if let Some(captures) = DUE_PHRASE.captures(raw) {
        let phrase = captures[1].trim();
        if let Some(date) = dates::parse_phrase(phrase, today) {
            let name = raw[..captures.get(0).map(|m| m.start()).unwrap_or(raw.len())]
                .trim()
                .to_string();
            return (name, Some(dates::format_wire_date(date)));
        }
    }
    (raw.to_string(), None)
}

fn suggest_tags(name: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for (pattern, tag) in TAG_TABLE.iter() {
        if pattern.is_match(name) && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}
