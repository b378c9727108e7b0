//! Query Compiler: filter DSL → normalized AST
//!
//! Lowers the user-facing filter map into the `Filter` algebra and applies
//! mode expansions. The semantic equivalences live here so both emitters see
//! one canonical form:
//!
//! - `project: null` means `inInbox: true`
//! - tag arrays AND by default; OR / IN / NOT_IN are explicit
//! - text defaults to case-insensitive CONTAINS; EQUALS, STARTS_WITH,
//!   ENDS_WITH, NOT_EQUALS are explicit
//! - dates accept exactly the two wire forms
//! - explicit filters beat preset conjuncts on the same field

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use super::ast::{CmpOp, Field, FieldKind, Filter};
use super::mode::{self, QueryMode};
use super::{EntityType, NormalizedQuery, QueryError, SortDirection, SortSpec};
use crate::dates;

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Compile a full query: explicit filters, then mode conjuncts that survive
/// the conflict rule, conjoined into one normalized filter.
#[allow(clippy::too_many_arguments)]
pub fn compile(
    entity: EntityType,
    mode: Option<QueryMode>,
    filters: &Map<String, Value>,
    sort: Vec<SortSpec>,
    limit: usize,
    offset: usize,
    fields: Option<Vec<Field>>,
    count_only: bool,
    now: NaiveDateTime,
    due_soon_days: i64,
) -> Result<NormalizedQuery, QueryError> {
    let explicit = compile_filters(entity, filters)?;

    let mut conjuncts = explicit.clone();

    // A search term outside search mode still constrains name and note
    if !matches!(mode, Some(QueryMode::Search)) {
        if let Some(term) = filters
            .get("search")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            conjuncts.push(Filter::or_all(vec![
                Filter::cmp(Field::Name, CmpOp::Includes, term),
                Filter::cmp(Field::Note, CmpOp::Includes, term),
            ]));
        }
    }

    if let Some(mode) = mode {
        let search_term = filters.get("search").and_then(Value::as_str);
        let explicit_fields: Vec<Field> = explicit.iter().flat_map(|f| f.fields()).collect();

        for preset in mode::expand(mode, now, due_soon_days, search_term)? {
            // Explicit filters win: drop preset conjuncts naming a field the
            // caller constrained themselves
            let collides = preset
                .fields()
                .iter()
                .any(|f| explicit_fields.contains(f) && !matches!(mode, QueryMode::Search));
            let collides = collides
                || (matches!(mode, QueryMode::Search)
                    && preset
                        .fields()
                        .iter()
                        .any(|f| *f != Field::Name && *f != Field::Note && explicit_fields.contains(f)));
            if !collides {
                conjuncts.push(preset);
            }
        }
    }

    Ok(NormalizedQuery {
        entity,
        mode,
        filter: Filter::and_all(conjuncts),
        sort,
        limit,
        offset,
        fields,
        count_only,
    })
}

/// Compile just the explicit filter map into conjuncts
pub fn compile_filters(
    entity: EntityType,
    filters: &Map<String, Value>,
) -> Result<Vec<Filter>, QueryError> {
    let mut conjuncts = Vec::with_capacity(filters.len());

    for (key, value) in filters {
        // The search term is consumed by the search mode; standalone it
        // compiles to a name/note disjunction
        if key == "search" {
            continue;
        }

        let field = Field::from_user(key).ok_or_else(|| QueryError::UnknownField {
            field: key.clone(),
            entity: entity.as_str().to_string(),
        })?;
        if !field.valid_for(entity) {
            return Err(QueryError::UnknownField {
                field: key.clone(),
                entity: entity.as_str().to_string(),
            });
        }

        conjuncts.push(compile_one(field, key, value)?);
    }

    Ok(conjuncts)
}

/// Parse a sort spec from user strings
pub fn parse_sort(
    entity: EntityType,
    field: &str,
    direction: Option<&str>,
) -> Result<SortSpec, QueryError> {
    let field = Field::from_user(field)
        .filter(|f| f.valid_for(entity) || f.is_computed())
        .ok_or_else(|| QueryError::UnknownField {
            field: field.to_string(),
            entity: entity.as_str().to_string(),
        })?;
    let direction = match direction.unwrap_or("asc") {
        "asc" | "ascending" => SortDirection::Asc,
        "desc" | "descending" => SortDirection::Desc,
        other => {
            return Err(QueryError::InvalidValue {
                field: "sort.direction".into(),
                detail: format!("'{other}' is not asc or desc"),
            })
        }
    };
    Ok(SortSpec { field, direction })
}

/// Parse a projection list; computed fields (daysOverdue, reason) are
/// projectable but never filterable
pub fn parse_projection(
    entity: EntityType,
    names: &[String],
) -> Result<Vec<Field>, QueryError> {
    names
        .iter()
        .map(|name| {
            Field::from_user(name)
                .filter(|f| f.valid_for(entity) || f.is_computed())
                .ok_or_else(|| QueryError::UnknownField {
                    field: name.clone(),
                    entity: entity.as_str().to_string(),
                })
        })
        .collect()
}

// ============================================================================
// PER-FIELD LOWERING
// ============================================================================

fn compile_one(field: Field, key: &str, value: &Value) -> Result<Filter, QueryError> {
    if field.is_computed() {
        return Err(QueryError::InvalidValue {
            field: key.to_string(),
            detail: "computed fields can be projected but not filtered".into(),
        });
    }

    // project: null is the inbox
    if field == Field::Project && value.is_null() {
        return Ok(Filter::cmp(Field::InInbox, CmpOp::Eq, true));
    }

    match field.kind() {
        FieldKind::Bool => compile_bool(field, key, value),
        FieldKind::Text | FieldKind::Reference => compile_text(field, key, value),
        FieldKind::Date => compile_date(field, key, value),
        FieldKind::Number => compile_number(field, key, value),
        FieldKind::TagList => compile_tags(key, value),
        FieldKind::Status => compile_status(key, value),
    }
}

fn compile_bool(field: Field, key: &str, value: &Value) -> Result<Filter, QueryError> {
    let b = value.as_bool().ok_or_else(|| QueryError::InvalidValue {
        field: key.to_string(),
        detail: format!("expected a boolean, got {value}"),
    })?;
    // repetitionRule: true means "has a rule", an existence check
    if field == Field::RepetitionRule {
        return Ok(Filter::exists(field, b));
    }
    Ok(Filter::cmp(field, CmpOp::Eq, b))
}

fn compile_text(field: Field, key: &str, value: &Value) -> Result<Filter, QueryError> {
    match value {
        Value::Null => Ok(Filter::exists(field, false)),
        Value::String(s) => {
            // Ids and references match exactly; free text defaults to CONTAINS
            let op = match field {
                Field::Id => CmpOp::Eq,
                Field::Project | Field::Folder | Field::Parent => CmpOp::Eq,
                _ => CmpOp::Includes,
            };
            Ok(Filter::cmp(field, op, s.clone()))
        }
        Value::Object(spec) => {
            let op_name = spec
                .get("operator")
                .and_then(Value::as_str)
                .unwrap_or("CONTAINS");
            let needle = spec
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| QueryError::InvalidValue {
                    field: key.to_string(),
                    detail: "operator objects need a string 'value'".into(),
                })?;
            text_op(field, key, op_name, needle)
        }
        other => Err(QueryError::InvalidValue {
            field: key.to_string(),
            detail: format!("expected a string or operator object, got {other}"),
        }),
    }
}

fn text_op(field: Field, key: &str, op: &str, needle: &str) -> Result<Filter, QueryError> {
    let filter = match op {
        "CONTAINS" => Filter::cmp(field, CmpOp::Includes, needle),
        "EQUALS" => Filter::cmp(field, CmpOp::Eq, needle),
        "NOT_EQUALS" => Filter::cmp(field, CmpOp::Ne, needle),
        "STARTS_WITH" => Filter::cmp(
            field,
            CmpOp::Matches,
            format!("^{}", regex::escape(needle)),
        ),
        "ENDS_WITH" => Filter::cmp(
            field,
            CmpOp::Matches,
            format!("{}$", regex::escape(needle)),
        ),
        "MATCHES" => Filter::cmp(field, CmpOp::Matches, needle),
        other => {
            return Err(QueryError::UnknownOperator {
                op: other.to_string(),
                field: key.to_string(),
            })
        }
    };
    Ok(filter)
}

fn compile_date(field: Field, key: &str, value: &Value) -> Result<Filter, QueryError> {
    match value {
        Value::Null => Ok(Filter::exists(field, false)),
        Value::String(s) => {
            let normalized = normalize_date(key, s)?;
            Ok(Filter::cmp(field, CmpOp::Eq, normalized))
        }
        Value::Object(spec) => {
            if let Some(exists) = spec.get("exists").and_then(Value::as_bool) {
                return Ok(Filter::exists(field, exists));
            }
            let op_name = spec
                .get("operator")
                .and_then(Value::as_str)
                .ok_or_else(|| QueryError::InvalidValue {
                    field: key.to_string(),
                    detail: "date operator objects need 'operator' and 'value'".into(),
                })?;
            let raw = spec
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| QueryError::InvalidValue {
                    field: key.to_string(),
                    detail: "date operator objects need a string 'value'".into(),
                })?;
            let normalized = normalize_date(key, raw)?;
            let op = cmp_op(op_name, key)?;
            Ok(Filter::cmp(field, op, normalized))
        }
        other => Err(QueryError::InvalidValue {
            field: key.to_string(),
            detail: format!("expected a date string, null or operator object, got {other}"),
        }),
    }
}

fn compile_number(field: Field, key: &str, value: &Value) -> Result<Filter, QueryError> {
    match value {
        Value::Null => Ok(Filter::exists(field, false)),
        Value::Number(_) => Ok(Filter::cmp(field, CmpOp::Eq, value.clone())),
        Value::Object(spec) => {
            let op_name = spec
                .get("operator")
                .and_then(Value::as_str)
                .ok_or_else(|| QueryError::InvalidValue {
                    field: key.to_string(),
                    detail: "numeric operator objects need 'operator' and 'value'".into(),
                })?;
            let num = spec.get("value").cloned().filter(|v| v.is_number()).ok_or_else(|| {
                QueryError::InvalidValue {
                    field: key.to_string(),
                    detail: "numeric operator objects need a numeric 'value'".into(),
                }
            })?;
            Ok(Filter::cmp(field, cmp_op(op_name, key)?, num))
        }
        other => Err(QueryError::InvalidValue {
            field: key.to_string(),
            detail: format!("expected a number, got {other}"),
        }),
    }
}

fn compile_tags(key: &str, value: &Value) -> Result<Filter, QueryError> {
    match value {
        Value::String(name) => Ok(Filter::cmp(Field::Tags, CmpOp::Includes, name.clone())),
        // Bare arrays require every listed tag
        Value::Array(_) => {
            let names = tag_names(key, value)?;
            Ok(Filter::cmp(Field::Tags, CmpOp::Every, names))
        }
        Value::Object(spec) => {
            let op = spec
                .get("operator")
                .and_then(Value::as_str)
                .unwrap_or("AND");
            let values = spec.get("values").ok_or_else(|| QueryError::InvalidValue {
                field: key.to_string(),
                detail: "tag operator objects need 'values'".into(),
            })?;
            let names = tag_names(key, values)?;
            let filter = match op {
                "AND" => Filter::cmp(Field::Tags, CmpOp::Every, names),
                "OR" | "IN" => Filter::cmp(Field::Tags, CmpOp::Some, names),
                "NOT_IN" => Filter::Not(Box::new(Filter::cmp(Field::Tags, CmpOp::Some, names))),
                other => {
                    return Err(QueryError::UnknownOperator {
                        op: other.to_string(),
                        field: key.to_string(),
                    })
                }
            };
            Ok(filter)
        }
        Value::Null => Ok(Filter::exists(Field::Tags, false)),
        other => Err(QueryError::InvalidValue {
            field: key.to_string(),
            detail: format!("expected tag name, array or operator object, got {other}"),
        }),
    }
}

fn compile_status(key: &str, value: &Value) -> Result<Filter, QueryError> {
    match value {
        Value::String(s) => Ok(Filter::cmp(Field::Status, CmpOp::Eq, status_name(key, s)?)),
        Value::Array(items) => {
            let alts = items
                .iter()
                .map(|v| {
                    v.as_str()
                        .ok_or_else(|| QueryError::InvalidValue {
                            field: key.to_string(),
                            detail: "status arrays hold strings".into(),
                        })
                        .and_then(|s| status_name(key, s))
                        .map(|s| Filter::cmp(Field::Status, CmpOp::Eq, s))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Filter::or_all(alts))
        }
        other => Err(QueryError::InvalidValue {
            field: key.to_string(),
            detail: format!("expected a status string or array, got {other}"),
        }),
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn normalize_date(key: &str, raw: &str) -> Result<String, QueryError> {
    dates::parse_wire(raw)
        .map(|_| raw.trim().to_string())
        .map_err(|e| QueryError::InvalidDate {
            field: key.to_string(),
            detail: e.to_string(),
        })
}

fn cmp_op(name: &str, key: &str) -> Result<CmpOp, QueryError> {
    Ok(match name {
        "==" | "EQUALS" => CmpOp::Eq,
        "!=" | "NOT_EQUALS" => CmpOp::Ne,
        "<" => CmpOp::Lt,
        "<=" => CmpOp::Le,
        ">" => CmpOp::Gt,
        ">=" => CmpOp::Ge,
        other => {
            return Err(QueryError::UnknownOperator {
                op: other.to_string(),
                field: key.to_string(),
            })
        }
    })
}

fn tag_names(key: &str, value: &Value) -> Result<Vec<Value>, QueryError> {
    value
        .as_array()
        .ok_or_else(|| QueryError::InvalidValue {
            field: key.to_string(),
            detail: "expected an array of tag names".into(),
        })?
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| QueryError::InvalidValue {
                    field: key.to_string(),
                    detail: "tag names must be strings".into(),
                })
        })
        .collect()
}

fn status_name(key: &str, raw: &str) -> Result<String, QueryError> {
    Ok(match raw {
        "active" => "active",
        "on_hold" | "onHold" | "on-hold" => "on_hold",
        "done" => "done",
        "dropped" => "dropped",
        other => {
            return Err(QueryError::InvalidValue {
                field: key.to_string(),
                detail: format!("'{other}' is not one of active, on_hold, done, dropped"),
            })
        }
    }
    .to_string())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn filters(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    fn compile_tasks(v: Value) -> Result<Vec<Filter>, QueryError> {
        compile_filters(EntityType::Tasks, &filters(v))
    }

    #[test]
    fn project_null_means_inbox() {
        let conjuncts = compile_tasks(json!({"project": null})).unwrap();
        assert_eq!(
            conjuncts,
            vec![Filter::cmp(Field::InInbox, CmpOp::Eq, true)]
        );
    }

    #[test]
    fn tag_array_defaults_to_and() {
        let conjuncts = compile_tasks(json!({"tags": ["work", "urgent"]})).unwrap();
        assert_eq!(
            conjuncts,
            vec![Filter::cmp(
                Field::Tags,
                CmpOp::Every,
                json!(["work", "urgent"])
            )]
        );
    }

    #[test]
    fn tag_or_and_not_in_are_explicit() {
        let or = compile_tasks(json!({"tags": {"operator": "OR", "values": ["a", "b"]}})).unwrap();
        assert!(matches!(
            or[0],
            Filter::Cmp { op: CmpOp::Some, .. }
        ));

        let not_in =
            compile_tasks(json!({"tags": {"operator": "NOT_IN", "values": ["a"]}})).unwrap();
        assert!(matches!(not_in[0], Filter::Not(_)));
    }

    #[test]
    fn text_defaults_to_contains() {
        let conjuncts = compile_tasks(json!({"name": "budget"})).unwrap();
        assert!(matches!(
            conjuncts[0],
            Filter::Cmp { field: Field::Name, op: CmpOp::Includes, .. }
        ));
    }

    #[test]
    fn starts_with_lowers_to_anchored_regex() {
        let conjuncts =
            compile_tasks(json!({"name": {"operator": "STARTS_WITH", "value": "Call"}})).unwrap();
        match &conjuncts[0] {
            Filter::Cmp {
                op: CmpOp::Matches,
                value,
                ..
            } => assert_eq!(value, "^Call"),
            other => panic!("expected matches, got {other:?}"),
        }
    }

    #[test]
    fn date_with_timezone_is_rejected() {
        let err = compile_tasks(json!({"dueDate": "2025-03-14T12:00:00Z"})).unwrap_err();
        match err {
            QueryError::InvalidDate { detail, .. } => {
                assert!(detail.contains("YYYY-MM-DD"));
            }
            other => panic!("expected InvalidDate, got {other:?}"),
        }
    }

    #[test]
    fn date_operator_object() {
        let conjuncts =
            compile_tasks(json!({"dueDate": {"operator": "<", "value": "2025-04-01"}})).unwrap();
        assert!(matches!(
            conjuncts[0],
            Filter::Cmp { field: Field::DueDate, op: CmpOp::Lt, .. }
        ));
    }

    #[test]
    fn date_null_is_missing() {
        let conjuncts = compile_tasks(json!({"dueDate": null})).unwrap();
        assert_eq!(conjuncts[0], Filter::exists(Field::DueDate, false));
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(matches!(
            compile_tasks(json!({"priority": 1})),
            Err(QueryError::UnknownField { .. })
        ));
        // Project-only field on tasks
        assert!(matches!(
            compile_tasks(json!({"folder": "Work"})),
            Err(QueryError::UnknownField { .. })
        ));
    }

    #[test]
    fn explicit_filter_beats_preset() {
        let q = compile(
            EntityType::Tasks,
            Some(QueryMode::Flagged),
            &filters(json!({"completed": true})),
            vec![],
            100,
            0,
            None,
            false,
            noon(),
            3,
        )
        .unwrap();

        // The preset adds flagged == true but its completed == false conjunct
        // is replaced by the explicit completed == true
        let json = serde_json::to_value(&q.filter).unwrap().to_string();
        assert!(json.contains("flagged"));
        let completed_true = Filter::cmp(Field::Completed, CmpOp::Eq, true);
        match &q.filter {
            Filter::And(children) => {
                assert!(children.contains(&completed_true));
                assert_eq!(
                    children
                        .iter()
                        .filter(|c| c.mentions(Field::Completed))
                        .count(),
                    1
                );
            }
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn standalone_search_filter_constrains_name_and_note() {
        let q = compile(
            EntityType::Tasks,
            None,
            &filters(json!({"search": "invoice", "flagged": true})),
            vec![],
            100,
            0,
            None,
            false,
            noon(),
            3,
        )
        .unwrap();
        assert!(q.filter.mentions(Field::Name));
        assert!(q.filter.mentions(Field::Note));
        assert!(q.filter.mentions(Field::Flagged));
    }

    #[test]
    fn search_mode_pulls_term_from_filters() {
        let q = compile(
            EntityType::Tasks,
            Some(QueryMode::Search),
            &filters(json!({"search": "quarterly report"})),
            vec![],
            100,
            0,
            None,
            false,
            noon(),
            3,
        )
        .unwrap();
        assert!(q.filter.mentions(Field::Name));
        assert!(q.filter.mentions(Field::Note));
    }

    #[test]
    fn status_normalizes_spellings() {
        let conjuncts =
            compile_filters(EntityType::Projects, &filters(json!({"status": "onHold"}))).unwrap();
        match &conjuncts[0] {
            Filter::Cmp { value, .. } => assert_eq!(value, "on_hold"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn projection_accepts_computed_fields() {
        let fields = parse_projection(
            EntityType::Tasks,
            &["name".into(), "daysOverdue".into(), "reason".into()],
        )
        .unwrap();
        assert_eq!(fields.len(), 3);
        assert!(fields.contains(&Field::DaysOverdue));

        // But computed fields cannot be filtered
        assert!(matches!(
            compile_tasks(json!({"daysOverdue": 3})),
            Err(QueryError::InvalidValue { .. })
        ));
    }

    #[test]
    fn sort_parsing() {
        let spec = parse_sort(EntityType::Tasks, "dueDate", Some("desc")).unwrap();
        assert_eq!(spec.field, Field::DueDate);
        assert_eq!(spec.direction, SortDirection::Desc);
        assert!(parse_sort(EntityType::Tasks, "status", None).is_err());
    }
}
