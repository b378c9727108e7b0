//! Query mode presets
//!
//! A mode is a named shorthand for a conjunction of filters. Presets are
//! data: each expands to AST conjuncts against a caller-supplied clock, and
//! the compiler drops any preset conjunct that collides with an explicit
//! filter on the same field.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ast::{CmpOp, Field, Filter};
use super::QueryError;
use crate::dates;

/// Horizon for the upcoming preset
const UPCOMING_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Today,
    Upcoming,
    Overdue,
    Available,
    Blocked,
    Flagged,
    SmartSuggest,
    Search,
    All,
}

impl QueryMode {
    pub fn from_user(name: &str) -> Result<QueryMode, QueryError> {
        Ok(match name {
            "today" => QueryMode::Today,
            "upcoming" => QueryMode::Upcoming,
            "overdue" => QueryMode::Overdue,
            "available" => QueryMode::Available,
            "blocked" => QueryMode::Blocked,
            "flagged" => QueryMode::Flagged,
            "smart_suggest" => QueryMode::SmartSuggest,
            "search" => QueryMode::Search,
            "all" => QueryMode::All,
            other => {
                return Err(QueryError::UnknownMode {
                    mode: other.to_string(),
                })
            }
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Today => "today",
            QueryMode::Upcoming => "upcoming",
            QueryMode::Overdue => "overdue",
            QueryMode::Available => "available",
            QueryMode::Blocked => "blocked",
            QueryMode::Flagged => "flagged",
            QueryMode::SmartSuggest => "smart_suggest",
            QueryMode::Search => "search",
            QueryMode::All => "all",
        }
    }
}

/// Expand a mode into its preset conjuncts
///
/// `now` is the request clock, `due_soon_days` the today/smart_suggest
/// horizon, `search_term` the text for the search mode (required there,
/// ignored elsewhere).
pub fn expand(
    mode: QueryMode,
    now: NaiveDateTime,
    due_soon_days: i64,
    search_term: Option<&str>,
) -> Result<Vec<Filter>, QueryError> {
    let now_s = wire(now);
    let due_soon = wire(now + Duration::days(due_soon_days));

    let conjuncts = match mode {
        QueryMode::All => vec![],

        QueryMode::Overdue => vec![
            Filter::exists(Field::DueDate, true),
            Filter::cmp(Field::DueDate, CmpOp::Lt, now_s),
            not_completed(),
        ],

        QueryMode::Today => vec![
            Filter::or_all(vec![
                Filter::And(vec![
                    Filter::exists(Field::DueDate, true),
                    Filter::cmp(Field::DueDate, CmpOp::Le, due_soon),
                ]),
                Filter::cmp(Field::Flagged, CmpOp::Eq, true),
            ]),
            not_completed(),
        ],

        QueryMode::Upcoming => vec![
            Filter::exists(Field::DueDate, true),
            Filter::cmp(Field::DueDate, CmpOp::Gt, now_s),
            Filter::cmp(
                Field::DueDate,
                CmpOp::Le,
                wire(now + Duration::days(UPCOMING_DAYS)),
            ),
            not_completed(),
        ],

        QueryMode::Available => vec![
            Filter::cmp(Field::Blocked, CmpOp::Eq, false),
            not_completed(),
            Filter::cmp(Field::Dropped, CmpOp::Eq, false),
            Filter::or_all(vec![
                Filter::exists(Field::DeferDate, false),
                Filter::cmp(Field::DeferDate, CmpOp::Le, now_s),
            ]),
        ],

        QueryMode::Blocked => vec![
            Filter::cmp(Field::Blocked, CmpOp::Eq, true),
            not_completed(),
        ],

        QueryMode::Flagged => vec![
            Filter::cmp(Field::Flagged, CmpOp::Eq, true),
            not_completed(),
        ],

        QueryMode::SmartSuggest => vec![
            not_completed(),
            Filter::cmp(Field::Dropped, CmpOp::Eq, false),
            Filter::or_all(vec![
                Filter::cmp(Field::Flagged, CmpOp::Eq, true),
                Filter::And(vec![
                    Filter::exists(Field::DueDate, true),
                    Filter::cmp(Field::DueDate, CmpOp::Le, due_soon),
                ]),
                Filter::cmp(Field::InInbox, CmpOp::Eq, true),
            ]),
        ],

        QueryMode::Search => {
            let term = search_term
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or(QueryError::MissingSearchTerm)?;
            vec![
                Filter::or_all(vec![
                    Filter::cmp(Field::Name, CmpOp::Includes, term),
                    Filter::cmp(Field::Note, CmpOp::Includes, term),
                ]),
                not_completed(),
            ]
        }
    };

    Ok(conjuncts)
}

fn not_completed() -> Filter {
    Filter::cmp(Field::Completed, CmpOp::Eq, false)
}

fn wire(dt: NaiveDateTime) -> Value {
    Value::String(dates::format_wire(dt))
}
