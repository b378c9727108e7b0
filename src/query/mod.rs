//! Query Engine front half: filter DSL types, AST, modes, fingerprints
//!
//! `compiler` lowers the user-facing filter map into the `ast::Filter`
//! algebra; `mode` holds the named presets as data; `fingerprint` hashes the
//! normalized query for cache keys. Script emission lives in
//! `crate::script::builder`.

pub mod ast;
pub mod compiler;
pub mod fingerprint;
pub mod mode;

pub use ast::{CmpOp, Field, Filter};
pub use compiler::compile_filters;
pub use fingerprint::fingerprint;
pub use mode::QueryMode;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ENTITY / SORT
// ============================================================================

/// Entity class a query targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Tasks,
    Projects,
    Tags,
    Folders,
    Perspectives,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Tasks => "tasks",
            EntityType::Projects => "projects",
            EntityType::Tags => "tags",
            EntityType::Folders => "folders",
            EntityType::Perspectives => "perspectives",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: Field,
    pub direction: SortDirection,
}

// ============================================================================
// NORMALIZED QUERY
// ============================================================================

/// Default page size when the caller gives no limit
pub const DEFAULT_LIMIT: usize = 100;
/// Hard page-size ceiling
pub const MAX_LIMIT: usize = 1_000;

/// The compiler's output: everything the Script Builder needs, in canonical
/// form. Serialization order is fixed, which is what makes the fingerprint
/// deterministic.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedQuery {
    pub entity: EntityType,
    pub mode: Option<QueryMode>,
    pub filter: Filter,
    pub sort: Vec<SortSpec>,
    pub limit: usize,
    pub offset: usize,
    pub fields: Option<Vec<Field>>,
    pub count_only: bool,
}

impl NormalizedQuery {
    /// A bare query over an entity with no constraints
    pub fn all(entity: EntityType) -> Self {
        Self {
            entity,
            mode: None,
            filter: Filter::Literal(true),
            sort: Vec::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            fields: None,
            count_only: false,
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("unknown filter field '{field}' for {entity}")]
    UnknownField { field: String, entity: String },

    #[error("operator '{op}' is not valid for field '{field}'")]
    UnknownOperator { op: String, field: String },

    #[error("invalid date for '{field}': {detail}")]
    InvalidDate { field: String, detail: String },

    #[error("unknown query mode '{mode}'")]
    UnknownMode { mode: String },

    #[error("mode 'search' requires a search term")]
    MissingSearchTerm,

    #[error("invalid value for field '{field}': {detail}")]
    InvalidValue { field: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_wire_names() {
        assert_eq!(
            serde_json::to_string(&EntityType::Tasks).unwrap(),
            "\"tasks\""
        );
        let e: EntityType = serde_json::from_str("\"perspectives\"").unwrap();
        assert_eq!(e, EntityType::Perspectives);
    }

    #[test]
    fn all_query_defaults() {
        let q = NormalizedQuery::all(EntityType::Projects);
        assert_eq!(q.limit, DEFAULT_LIMIT);
        assert_eq!(q.offset, 0);
        assert!(!q.count_only);
        assert!(matches!(q.filter, Filter::Literal(true)));
    }
}
