//! Analyzers: pure transformations over queried data
//!
//! Every analyzer takes rows the read pipeline already fetched plus a clock,
//! and returns a summary-first outcome. Nothing here talks to the host; the
//! dispatch layer feeds these from cached or fresh query results.

pub mod meeting_notes;
pub mod overdue;
pub mod patterns;
pub mod recurring;
pub mod reviews;
pub mod velocity;
pub mod workflow;

pub use meeting_notes::parse_meeting_notes;
pub use overdue::overdue_analysis;
pub use patterns::pattern_analysis;
pub use recurring::recurring_tasks;
pub use reviews::reviews_due;
pub use velocity::{productivity_stats, task_velocity, Grouping};
pub use workflow::workflow_analysis;

use serde_json::Value;

/// Result of one analysis: the short finding first, then the numbers
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub summary: String,
    pub data: Value,
}

impl AnalysisOutcome {
    pub fn new(summary: impl Into<String>, data: Value) -> Self {
        Self {
            summary: summary.into(),
            data,
        }
    }
}
