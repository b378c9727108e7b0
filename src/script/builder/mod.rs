//! Script Builder: AST → target-dialect scripts
//!
//! Two dialects with one semantics:
//!
//! - `jxa` (external, "outer"): probes, single-id lookups, and the move
//!   fallback. Filtering is explicit iteration with a predicate; the host's
//!   `whose` attribute-predicate API appears only in the single-id lookup,
//!   never in a filter. That API is the historical cause of 25s+ queries.
//! - `omnijs` (embedded, "inner"): bulk reads, complex filters, mutations.
//!   Evaluated inside the host via the outer bridge call, with native
//!   property access.
//!
//! Emission rules both emitters honor: synthetic fields lower to the
//! dialect-correct primitive, `includes` lowercases both sides, `matches` is
//! a case-insensitive regex, date literals are rehydrated once and reused,
//! empty AND is `true` and empty OR is `false`.

pub mod jxa;
pub mod omnijs;

use chrono::NaiveDateTime;

use crate::dates;
use crate::query::ast::{CmpOp, Field, Filter};
use crate::query::{EntityType, NormalizedQuery, QueryError};

// ============================================================================
// PUBLIC TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// External dialect, accessor-call style, explicit iteration
    Jxa,
    /// Embedded dialect, property style, native collections
    OmniJs,
}

/// Builder inputs that are not part of the query itself
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Request clock, threaded into scripts so host and server agree on "now"
    pub now: NaiveDateTime,
    /// Horizon for due-soon reasoning in computed projections
    pub due_soon_days: i64,
}

/// A ready-to-run outer script plus emission metadata
#[derive(Debug, Clone)]
pub struct BuiltScript {
    pub source: String,
    /// Set when the emitter took a fast path worth surfacing to callers
    pub optimization: Option<&'static str>,
}

/// Build the embedded-dialect read script for a normalized query
pub fn build_read(query: &NormalizedQuery, cfg: &BuilderConfig) -> Result<BuiltScript, QueryError> {
    omnijs::read_script(query, cfg)
}

/// Build the external-dialect single-id lookup
pub fn build_lookup(entity: EntityType, id: &str) -> BuiltScript {
    BuiltScript {
        source: jxa::single_lookup(entity, id),
        optimization: None,
    }
}

// ============================================================================
// SHARED EMISSION MACHINERY
// ============================================================================

/// Quote a Rust string as a JS string literal (JSON escaping is valid JS)
pub(crate) fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Collects hoisted literals during predicate emission
///
/// Date and regex literals are materialized once, ahead of the loop, and
/// referenced by index; a fresh `new Date(...)` per row would repay the
/// rehydration cost on every iteration.
#[derive(Debug, Default)]
pub(crate) struct EmitCtx {
    pub dates: Vec<String>,
    pub regexes: Vec<String>,
    pub tag_sets: Vec<Vec<String>>,
}

impl EmitCtx {
    /// Register a wire-form date and get its hoisted reference
    pub fn date_ref(&mut self, wire: &str) -> Result<String, QueryError> {
        let parsed = dates::parse_wire(wire).map_err(|e| QueryError::InvalidDate {
            field: "filter".into(),
            detail: e.to_string(),
        })?;
        let iso_local = parsed.format("%Y-%m-%dT%H:%M:%S").to_string();
        let idx = match self.dates.iter().position(|d| d == &iso_local) {
            Some(i) => i,
            None => {
                self.dates.push(iso_local);
                self.dates.len() - 1
            }
        };
        Ok(format!("D[{idx}]"))
    }

    /// Register a regex pattern and get its hoisted reference
    pub fn regex_ref(&mut self, pattern: &str) -> String {
        let idx = match self.regexes.iter().position(|r| r == pattern) {
            Some(i) => i,
            None => {
                self.regexes.push(pattern.to_string());
                self.regexes.len() - 1
            }
        };
        format!("R[{idx}]")
    }

    /// Register a lowered tag name set and get its hoisted reference
    pub fn tag_set_ref(&mut self, names: Vec<String>) -> String {
        let idx = match self.tag_sets.iter().position(|t| t == &names) {
            Some(i) => i,
            None => {
                self.tag_sets.push(names);
                self.tag_sets.len() - 1
            }
        };
        format!("P.tagSets[{idx}]")
    }
}

/// Emit a predicate over `var` for the given dialect
///
/// The single place both dialects meet: structure and constants are shared,
/// only the accessor spelling differs.
pub(crate) fn emit_predicate(
    filter: &Filter,
    var: &str,
    dialect: Dialect,
    ctx: &mut EmitCtx,
) -> Result<String, QueryError> {
    Ok(match filter {
        Filter::Literal(b) => b.to_string(),
        Filter::And(children) => {
            if children.is_empty() {
                "true".to_string()
            } else {
                let parts = children
                    .iter()
                    .map(|c| emit_predicate(c, var, dialect, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("({})", parts.join(" && "))
            }
        }
        Filter::Or(children) => {
            if children.is_empty() {
                "false".to_string()
            } else {
                let parts = children
                    .iter()
                    .map(|c| emit_predicate(c, var, dialect, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("({})", parts.join(" || "))
            }
        }
        Filter::Not(child) => format!("!({})", emit_predicate(child, var, dialect, ctx)?),
        Filter::Exists { field, exists } => emit_exists(*field, *exists, var, dialect),
        Filter::Cmp { field, op, value } => emit_cmp(*field, *op, value, var, dialect, ctx)?,
    })
}

fn emit_exists(field: Field, exists: bool, var: &str, dialect: Dialect) -> String {
    let expr = match field {
        Field::Tags => {
            return if exists {
                format!("{}.length > 0", tags_access(var, dialect))
            } else {
                format!("{}.length === 0", tags_access(var, dialect))
            };
        }
        Field::Project => project_access(var, dialect),
        Field::RepetitionRule => raw_access(var, "repetitionRule", dialect),
        _ => raw_access(var, field_property(field), dialect),
    };
    if exists {
        format!("{expr} !== null")
    } else {
        format!("{expr} === null")
    }
}

fn emit_cmp(
    field: Field,
    op: CmpOp,
    value: &serde_json::Value,
    var: &str,
    dialect: Dialect,
    ctx: &mut EmitCtx,
) -> Result<String, QueryError> {
    use crate::query::ast::FieldKind;

    match field.kind() {
        FieldKind::Bool => {
            let want = value.as_bool().unwrap_or(false);
            let expr = bool_access(field, var, dialect);
            Ok(match op {
                CmpOp::Ne => format!("{expr} !== {want}"),
                _ => format!("{expr} === {want}"),
            })
        }
        FieldKind::Date => {
            let wire = value.as_str().unwrap_or_default();
            let date_ref = ctx.date_ref(wire)?;
            let access = raw_access(var, field_property(field), dialect);
            let cmp = match op {
                CmpOp::Eq => format!("{access}.getTime() === {date_ref}.getTime()"),
                CmpOp::Ne => format!("{access}.getTime() !== {date_ref}.getTime()"),
                CmpOp::Lt => format!("{access} < {date_ref}"),
                CmpOp::Le => format!("{access} <= {date_ref}"),
                CmpOp::Gt => format!("{access} > {date_ref}"),
                CmpOp::Ge => format!("{access} >= {date_ref}"),
                other => {
                    return Err(QueryError::UnknownOperator {
                        op: format!("{other:?}"),
                        field: field_property(field).to_string(),
                    })
                }
            };
            Ok(format!("({access} !== null && {cmp})"))
        }
        FieldKind::Number => {
            let access = raw_access(var, field_property(field), dialect);
            let n = value.clone();
            let sym = cmp_symbol(op);
            Ok(format!("({access} !== null && {access} {sym} {n})"))
        }
        FieldKind::Text => {
            let access = text_access(var, field_property(field), dialect);
            Ok(emit_text_cmp(&access, op, value, ctx))
        }
        FieldKind::Reference => Ok(emit_reference_cmp(field, op, value, var, dialect)),
        FieldKind::TagList => Ok(emit_tags_cmp(op, value, var, dialect, ctx)),
        FieldKind::Status => {
            let status = value.as_str().unwrap_or("active");
            let constant = project_status_constant(status);
            let access = raw_access(var, "status", dialect);
            Ok(match op {
                CmpOp::Ne => format!("{access} !== {constant}"),
                _ => format!("{access} === {constant}"),
            })
        }
    }
}

fn emit_text_cmp(access: &str, op: CmpOp, value: &serde_json::Value, ctx: &mut EmitCtx) -> String {
    let raw = value.as_str().unwrap_or_default();
    match op {
        // Both sides lowered
        CmpOp::Includes => format!(
            "{access}.toLowerCase().indexOf({}) !== -1",
            js_str(&raw.to_lowercase())
        ),
        CmpOp::Eq => format!("{access}.toLowerCase() === {}", js_str(&raw.to_lowercase())),
        CmpOp::Ne => format!("{access}.toLowerCase() !== {}", js_str(&raw.to_lowercase())),
        CmpOp::Matches => {
            let r = ctx.regex_ref(raw);
            format!("{r}.test({access})")
        }
        _ => format!("{access}.toLowerCase() === {}", js_str(&raw.to_lowercase())),
    }
}

fn emit_reference_cmp(
    field: Field,
    op: CmpOp,
    value: &serde_json::Value,
    var: &str,
    dialect: Dialect,
) -> String {
    let raw = value.as_str().unwrap_or_default();
    let (obj, _prop) = match field {
        Field::Project => (project_access(var, dialect), "containingProject"),
        Field::Folder => (folder_access(var, dialect), "parentFolder"),
        _ => (parent_access(var, dialect), "parent"),
    };
    let name = match dialect {
        Dialect::OmniJs => format!("{obj}.name"),
        Dialect::Jxa => format!("{obj}.name()"),
    };
    let id = match dialect {
        Dialect::OmniJs => format!("{obj}.id.primaryKey"),
        Dialect::Jxa => format!("{obj}.id()"),
    };
    // Names match case-insensitively, ids exactly
    let hit = format!(
        "({name}.toLowerCase() === {} || {id} === {})",
        js_str(&raw.to_lowercase()),
        js_str(raw)
    );
    match op {
        CmpOp::Ne => format!("({obj} === null || !{hit})"),
        _ => format!("({obj} !== null && {hit})"),
    }
}

fn emit_tags_cmp(
    op: CmpOp,
    value: &serde_json::Value,
    var: &str,
    dialect: Dialect,
    ctx: &mut EmitCtx,
) -> String {
    let names_expr = format!("{}.map(x => {})", tags_access(var, dialect), match dialect {
        Dialect::OmniJs => "x.name.toLowerCase()",
        Dialect::Jxa => "x.name().toLowerCase()",
    });
    match op {
        CmpOp::Includes => {
            let name = value.as_str().unwrap_or_default().to_lowercase();
            format!("{names_expr}.indexOf({}) !== -1", js_str(&name))
        }
        CmpOp::Some | CmpOp::Every => {
            let names: Vec<String> = value
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str())
                        .map(|s| s.to_lowercase())
                        .collect()
                })
                .unwrap_or_default();
            let set = ctx.tag_set_ref(names);
            let method = if op == CmpOp::Some { "some" } else { "every" };
            format!("(() => {{ const tn = {names_expr}; return {set}.{method}(n => tn.indexOf(n) !== -1); }})()")
        }
        _ => "false".to_string(),
    }
}

// ============================================================================
// ACCESSOR SPELLING
// ============================================================================

/// Stored-property name for a field (both dialects share the spelling, the
/// call parentheses differ)
pub(crate) fn field_property(field: Field) -> &'static str {
    match field {
        Field::Id => "id",
        Field::Name => "name",
        Field::Note => "note",
        Field::Flagged => "flagged",
        Field::Completed => "completed",
        Field::Dropped => "dropped",
        Field::Available => "available",
        Field::Blocked => "blocked",
        Field::InInbox => "inInbox",
        Field::DueDate => "dueDate",
        Field::DeferDate => "deferDate",
        Field::PlannedDate => "plannedDate",
        Field::CompletionDate => "completionDate",
        Field::Added => "added",
        Field::Modified => "modified",
        Field::EstimatedMinutes => "estimatedMinutes",
        Field::Tags => "tags",
        Field::Project => "containingProject",
        Field::Sequential => "sequential",
        Field::RepetitionRule => "repetitionRule",
        Field::Status => "status",
        Field::Folder => "parentFolder",
        Field::NextReviewDate => "nextReviewDate",
        Field::Parent => "parent",
        Field::DaysOverdue => "daysOverdue",
        Field::Reason => "reason",
    }
}

fn raw_access(var: &str, prop: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::OmniJs => format!("{var}.{prop}"),
        Dialect::Jxa => format!("{var}.{prop}()"),
    }
}

fn text_access(var: &str, prop: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::OmniJs => format!("({var}.{prop} || \"\")"),
        Dialect::Jxa => format!("({var}.{prop}() || \"\")"),
    }
}

fn tags_access(var: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::OmniJs => format!("{var}.tags"),
        Dialect::Jxa => format!("{var}.tags()"),
    }
}

fn project_access(var: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::OmniJs => format!("{var}.containingProject"),
        Dialect::Jxa => format!("{var}.containingProject()"),
    }
}

fn folder_access(var: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::OmniJs => format!("{var}.parentFolder"),
        Dialect::Jxa => format!("{var}.container()"),
    }
}

fn parent_access(var: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::OmniJs => format!("{var}.parent"),
        Dialect::Jxa => format!("{var}.container()"),
    }
}

/// Synthetic status fields lower to native predicates in the embedded
/// dialect and direct boolean accessors in the external one
fn bool_access(field: Field, var: &str, dialect: Dialect) -> String {
    match (dialect, field) {
        (Dialect::OmniJs, Field::Available) => format!("({var}.taskStatus === Task.Status.Available)"),
        (Dialect::OmniJs, Field::Blocked) => format!("({var}.taskStatus === Task.Status.Blocked)"),
        (Dialect::OmniJs, Field::Dropped) => format!("({var}.taskStatus === Task.Status.Dropped)"),
        (Dialect::OmniJs, Field::InInbox) => format!("{var}.inInbox"),
        (Dialect::OmniJs, _) => format!("{var}.{}", field_property(field)),
        (Dialect::Jxa, _) => format!("{var}.{}()", field_property(field)),
    }
}

fn project_status_constant(status: &str) -> &'static str {
    match status {
        "on_hold" => "Project.Status.OnHold",
        "done" => "Project.Status.Done",
        "dropped" => "Project.Status.Dropped",
        _ => "Project.Status.Active",
    }
}

fn cmp_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "===",
        CmpOp::Ne => "!==",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
        _ => "===",
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{CmpOp, Field, Filter};
    use serde_json::json;

    fn emit(filter: &Filter, dialect: Dialect) -> String {
        let mut ctx = EmitCtx::default();
        emit_predicate(filter, "t", dialect, &mut ctx).unwrap()
    }

    #[test]
    fn empty_and_or_constants_agree_across_dialects() {
        for dialect in [Dialect::OmniJs, Dialect::Jxa] {
            assert_eq!(emit(&Filter::And(vec![]), dialect), "true");
            assert_eq!(emit(&Filter::Or(vec![]), dialect), "false");
            assert_eq!(emit(&Filter::Literal(true), dialect), "true");
            assert_eq!(emit(&Filter::Literal(false), dialect), "false");
        }
    }

    #[test]
    fn synthetic_fields_lower_per_dialect() {
        let available = Filter::cmp(Field::Available, CmpOp::Eq, true);
        assert_eq!(
            emit(&available, Dialect::OmniJs),
            "(t.taskStatus === Task.Status.Available) === true"
        );
        assert_eq!(emit(&available, Dialect::Jxa), "t.available() === true");

        let inbox = Filter::cmp(Field::InInbox, CmpOp::Eq, true);
        assert_eq!(emit(&inbox, Dialect::OmniJs), "t.inInbox === true");
        assert_eq!(emit(&inbox, Dialect::Jxa), "t.inInbox() === true");
    }

    #[test]
    fn includes_lowers_both_sides() {
        let f = Filter::cmp(Field::Name, CmpOp::Includes, "BudGet");
        let js = emit(&f, Dialect::OmniJs);
        assert!(js.contains(".toLowerCase().indexOf(\"budget\")"));
        assert!(!js.contains("BudGet"));
    }

    #[test]
    fn matches_hoists_case_insensitive_regex() {
        let f = Filter::cmp(Field::Name, CmpOp::Matches, "^Call");
        let mut ctx = EmitCtx::default();
        let js = emit_predicate(&f, "t", Dialect::OmniJs, &mut ctx).unwrap();
        assert_eq!(js, "R[0].test((t.name || \"\"))");
        assert_eq!(ctx.regexes, vec!["^Call"]);
    }

    #[test]
    fn date_literals_are_hoisted_and_deduplicated() {
        let f = Filter::And(vec![
            Filter::cmp(Field::DueDate, CmpOp::Le, "2025-03-17 12:00"),
            Filter::cmp(Field::DeferDate, CmpOp::Le, "2025-03-17 12:00"),
            Filter::cmp(Field::DueDate, CmpOp::Gt, "2025-03-14"),
        ]);
        let mut ctx = EmitCtx::default();
        let js = emit_predicate(&f, "t", Dialect::OmniJs, &mut ctx).unwrap();

        // Two distinct literals despite three comparisons
        assert_eq!(ctx.dates.len(), 2);
        assert!(js.contains("t.dueDate <= D[0]"));
        assert!(js.contains("t.deferDate <= D[0]"));
        assert!(js.contains("t.dueDate > D[1]"));
        // Null guard precedes every date comparison
        assert!(js.contains("t.dueDate !== null"));
    }

    #[test]
    fn date_comparisons_guard_null_in_both_dialects() {
        let f = Filter::cmp(Field::DueDate, CmpOp::Lt, "2025-01-01");
        assert!(emit(&f, Dialect::OmniJs).contains("t.dueDate !== null &&"));
        assert!(emit(&f, Dialect::Jxa).contains("t.dueDate() !== null &&"));
    }

    #[test]
    fn tag_every_and_some() {
        let every = Filter::cmp(Field::Tags, CmpOp::Every, json!(["Work", "urgent"]));
        let mut ctx = EmitCtx::default();
        let js = emit_predicate(&every, "t", Dialect::OmniJs, &mut ctx).unwrap();
        assert!(js.contains(".every(n => tn.indexOf(n) !== -1)"));
        assert_eq!(ctx.tag_sets, vec![vec!["work".to_string(), "urgent".to_string()]]);

        let some = Filter::cmp(Field::Tags, CmpOp::Some, json!(["a"]));
        let js = emit(&some, Dialect::OmniJs);
        assert!(js.contains(".some("));
    }

    #[test]
    fn reference_matches_name_or_id() {
        let f = Filter::cmp(Field::Project, CmpOp::Eq, "Renovation");
        let js = emit(&f, Dialect::OmniJs);
        assert!(js.contains("t.containingProject !== null"));
        assert!(js.contains("name.toLowerCase() === \"renovation\""));
        assert!(js.contains("id.primaryKey === \"Renovation\""));
    }

    #[test]
    fn exists_false_is_null_check() {
        let f = Filter::exists(Field::DeferDate, false);
        assert_eq!(emit(&f, Dialect::OmniJs), "t.deferDate === null");
        assert_eq!(emit(&f, Dialect::Jxa), "t.deferDate() === null");
    }

    #[test]
    fn short_circuit_order_is_preserved() {
        let f = Filter::And(vec![
            Filter::cmp(Field::Completed, CmpOp::Eq, false),
            Filter::cmp(Field::Flagged, CmpOp::Eq, true),
        ]);
        let js = emit(&f, Dialect::OmniJs);
        let completed_pos = js.find("completed").unwrap();
        let flagged_pos = js.find("flagged").unwrap();
        assert!(completed_pos < flagged_pos);
    }

    #[test]
    fn js_str_escapes() {
        assert_eq!(js_str("a\"b"), "\"a\\\"b\"");
        assert_eq!(js_str("line\nbreak"), "\"line\\nbreak\"");
    }
}
