//! Filter AST
//!
//! A small algebra over logical entity attributes. Tagged variants, no
//! per-node reflection; the dialect emitters pattern-match these directly.
//! Synthetic fields (available, blocked, inInbox, dropped) are first-class
//! here and lowered per dialect at emission time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EntityType;

// ============================================================================
// FIELDS
// ============================================================================

/// Logical entity attribute a filter or sort can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Id,
    Name,
    Note,
    Flagged,
    Completed,
    Dropped,
    Available,
    Blocked,
    InInbox,
    DueDate,
    DeferDate,
    PlannedDate,
    CompletionDate,
    Added,
    Modified,
    EstimatedMinutes,
    Tags,
    Project,
    Sequential,
    RepetitionRule,
    // Project-only
    Status,
    Folder,
    NextReviewDate,
    // Tag-only
    Parent,
    // Computed projections, never stored and never filterable
    DaysOverdue,
    Reason,
}

/// Value families used by compile-time validation and emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
    Date,
    Number,
    TagList,
    Reference,
    Status,
}

impl Field {
    /// Parse the user-facing (camelCase) field name
    pub fn from_user(name: &str) -> Option<Field> {
        Some(match name {
            "id" => Field::Id,
            "name" => Field::Name,
            "note" => Field::Note,
            "flagged" => Field::Flagged,
            "completed" => Field::Completed,
            "dropped" => Field::Dropped,
            "available" => Field::Available,
            "blocked" => Field::Blocked,
            "inInbox" => Field::InInbox,
            "dueDate" => Field::DueDate,
            "deferDate" => Field::DeferDate,
            "plannedDate" => Field::PlannedDate,
            "completionDate" => Field::CompletionDate,
            "added" => Field::Added,
            "modified" => Field::Modified,
            "estimatedMinutes" => Field::EstimatedMinutes,
            "tags" => Field::Tags,
            "project" => Field::Project,
            "sequential" => Field::Sequential,
            "repetitionRule" => Field::RepetitionRule,
            "status" => Field::Status,
            "folder" => Field::Folder,
            "nextReviewDate" => Field::NextReviewDate,
            "parent" => Field::Parent,
            "daysOverdue" => Field::DaysOverdue,
            "reason" => Field::Reason,
            _ => return None,
        })
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Id | Field::Name | Field::Note => FieldKind::Text,
            Field::Flagged
            | Field::Completed
            | Field::Dropped
            | Field::Available
            | Field::Blocked
            | Field::InInbox
            | Field::Sequential
            | Field::RepetitionRule => FieldKind::Bool,
            Field::DueDate
            | Field::DeferDate
            | Field::PlannedDate
            | Field::CompletionDate
            | Field::Added
            | Field::Modified
            | Field::NextReviewDate => FieldKind::Date,
            Field::EstimatedMinutes | Field::DaysOverdue => FieldKind::Number,
            Field::Tags => FieldKind::TagList,
            Field::Project | Field::Folder | Field::Parent => FieldKind::Reference,
            Field::Status => FieldKind::Status,
            Field::Reason => FieldKind::Text,
        }
    }

    /// Computed at projection time by inlined expressions; valid in `fields`
    /// and sorts, rejected in filters
    pub fn is_computed(&self) -> bool {
        matches!(self, Field::DaysOverdue | Field::Reason)
    }

    /// Synthetic fields are derived by the host, not stored; each emitter
    /// maps them to the dialect-correct primitive
    pub fn is_synthetic(&self) -> bool {
        matches!(
            self,
            Field::Available | Field::Blocked | Field::InInbox | Field::Dropped
        )
    }

    /// Whether this field exists on the given entity class
    pub fn valid_for(&self, entity: EntityType) -> bool {
        use EntityType::*;
        match self {
            Field::Id | Field::Name => true,
            Field::Note | Field::Flagged | Field::Completed | Field::Dropped => {
                matches!(entity, Tasks | Projects)
            }
            Field::Available
            | Field::Blocked
            | Field::InInbox
            | Field::DueDate
            | Field::DeferDate
            | Field::PlannedDate
            | Field::CompletionDate
            | Field::EstimatedMinutes
            | Field::Tags
            | Field::Project
            | Field::RepetitionRule => matches!(entity, Tasks),
            Field::Added | Field::Modified => matches!(entity, Tasks | Projects),
            Field::Sequential => matches!(entity, Tasks | Projects),
            Field::Status | Field::Folder | Field::NextReviewDate => matches!(entity, Projects),
            Field::Parent => matches!(entity, Tags | Folders),
            Field::DaysOverdue | Field::Reason => false,
        }
    }
}

// ============================================================================
// OPERATORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Case-insensitive substring (text) or membership (tag list)
    Includes,
    /// Case-insensitive regex test
    Matches,
    /// Tag list: at least one of the given names
    Some,
    /// Tag list: all of the given names
    Every,
}

// ============================================================================
// FILTER
// ============================================================================

/// The filter algebra
///
/// AND/OR children keep short-circuit order; empty AND is true and empty OR
/// is false, and both dialects emit those constants literally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Filter {
    Literal(bool),
    Cmp {
        field: Field,
        op: CmpOp,
        value: Value,
    },
    Exists {
        field: Field,
        exists: bool,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Conjunction that collapses trivial shapes: no children is `true`, a
    /// single child is itself
    pub fn and_all(mut children: Vec<Filter>) -> Filter {
        match children.len() {
            0 => Filter::Literal(true),
            1 => children.remove(0),
            _ => Filter::And(children),
        }
    }

    /// Disjunction dual of `and_all`: no children is `false`
    pub fn or_all(mut children: Vec<Filter>) -> Filter {
        match children.len() {
            0 => Filter::Literal(false),
            1 => children.remove(0),
            _ => Filter::Or(children),
        }
    }

    pub fn cmp(field: Field, op: CmpOp, value: impl Into<Value>) -> Filter {
        Filter::Cmp {
            field,
            op,
            value: value.into(),
        }
    }

    pub fn exists(field: Field, exists: bool) -> Filter {
        Filter::Exists { field, exists }
    }

    /// Whether any node in this subtree names `field`
    pub fn mentions(&self, field: Field) -> bool {
        match self {
            Filter::Literal(_) => false,
            Filter::Cmp { field: f, .. } | Filter::Exists { field: f, .. } => *f == field,
            Filter::And(children) | Filter::Or(children) => {
                children.iter().any(|c| c.mentions(field))
            }
            Filter::Not(child) => child.mentions(field),
        }
    }

    /// All fields named anywhere in this subtree
    pub fn fields(&self) -> Vec<Field> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<Field>) {
        match self {
            Filter::Literal(_) => {}
            Filter::Cmp { field, .. } | Filter::Exists { field, .. } => {
                if !out.contains(field) {
                    out.push(*field);
                }
            }
            Filter::And(children) | Filter::Or(children) => {
                for c in children {
                    c.collect_fields(out);
                }
            }
            Filter::Not(child) => child.collect_fields(out),
        }
    }

    /// Whether this filter, read as a conjunction, requires `inInbox: true`
    ///
    /// Drives the count-only fast path: the host's inbox collection is
    /// pre-filtered, so the emitter can iterate it and drop the conjunct.
    pub fn entails_in_inbox(&self) -> bool {
        match self {
            Filter::Cmp {
                field: Field::InInbox,
                op: CmpOp::Eq,
                value,
            } => value.as_bool() == Some(true),
            Filter::And(children) => children.iter().any(|c| c.entails_in_inbox()),
            _ => false,
        }
    }

    /// Remove top-level conjuncts that are exactly `inInbox == true`
    ///
    /// Used together with `entails_in_inbox` when switching to the inbox
    /// collection; other conjuncts survive untouched.
    pub fn without_in_inbox(&self) -> Filter {
        match self {
            Filter::Cmp {
                field: Field::InInbox,
                op: CmpOp::Eq,
                value,
            } if value.as_bool() == Some(true) => Filter::Literal(true),
            Filter::And(children) => Filter::and_all(
                children
                    .iter()
                    .map(|c| c.without_in_inbox())
                    .filter(|c| !matches!(c, Filter::Literal(true)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn and_all_collapses() {
        assert_eq!(Filter::and_all(vec![]), Filter::Literal(true));
        assert_eq!(Filter::or_all(vec![]), Filter::Literal(false));

        let single = Filter::cmp(Field::Flagged, CmpOp::Eq, true);
        assert_eq!(Filter::and_all(vec![single.clone()]), single);
    }

    #[test]
    fn mentions_walks_subtrees() {
        let f = Filter::And(vec![
            Filter::cmp(Field::Flagged, CmpOp::Eq, true),
            Filter::Not(Box::new(Filter::Or(vec![Filter::exists(
                Field::DueDate,
                false,
            )]))),
        ]);
        assert!(f.mentions(Field::DueDate));
        assert!(f.mentions(Field::Flagged));
        assert!(!f.mentions(Field::Tags));
    }

    #[test]
    fn inbox_entailment() {
        let f = Filter::And(vec![
            Filter::cmp(Field::InInbox, CmpOp::Eq, true),
            Filter::cmp(Field::Completed, CmpOp::Eq, false),
        ]);
        assert!(f.entails_in_inbox());

        let stripped = f.without_in_inbox();
        assert!(!stripped.entails_in_inbox());
        assert!(stripped.mentions(Field::Completed));

        // inInbox under OR does not entail
        let g = Filter::Or(vec![
            Filter::cmp(Field::InInbox, CmpOp::Eq, true),
            Filter::cmp(Field::Flagged, CmpOp::Eq, true),
        ]);
        assert!(!g.entails_in_inbox());
    }

    #[test]
    fn field_entity_validity() {
        assert!(Field::DueDate.valid_for(EntityType::Tasks));
        assert!(!Field::DueDate.valid_for(EntityType::Projects));
        assert!(Field::Status.valid_for(EntityType::Projects));
        assert!(!Field::Status.valid_for(EntityType::Tasks));
        assert!(Field::Parent.valid_for(EntityType::Tags));
    }

    #[test]
    fn synthetic_fields() {
        for f in [Field::Available, Field::Blocked, Field::InInbox, Field::Dropped] {
            assert!(f.is_synthetic());
        }
        assert!(!Field::Flagged.is_synthetic());
    }

    #[test]
    fn filter_serialization_is_stable() {
        let f = Filter::cmp(Field::DueDate, CmpOp::Le, json!("2025-03-14"));
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["node"], "cmp");
        assert_eq!(v["field"], "dueDate");
        assert_eq!(v["op"], "le");
    }
}
