//! External-dialect emitter (JXA, "outer")
//!
//! Accessor-call style against the scripting bridge. Filtering is explicit
//! iteration with an emitted predicate; the `whose` attribute-predicate API
//! appears in exactly one place, the single-id lookup, where it resolves one
//! row by primary key.

use super::{emit_predicate, js_str, BuiltScript, Dialect, EmitCtx};
use crate::query::{EntityType, NormalizedQuery, QueryError};

/// Single-id lookup, the one sanctioned `whose` call
pub fn single_lookup(entity: EntityType, id: &str) -> String {
    let collection = entity_collection(entity);
    let serializer = serializer(entity);
    format!(
        "(() => {{\n  const app = Application(\"OmniFocus\");\n  const doc = app.defaultDocument;\n  {fmt}\n  const matches = doc.{collection}.whose({{id: {id}}});\n  if (matches.length === 0) {{\n    return JSON.stringify({{found: false}});\n  }}\n  const t = matches[0];\n  return JSON.stringify({{found: true, item: {serializer}}});\n}})()",
        fmt = FMT_FN_JXA,
        collection = collection,
        id = js_str(id),
        serializer = serializer,
    )
}

/// Explicit-iteration read for verification paths that must observe the
/// outer context's view of the database
pub fn read_script(query: &NormalizedQuery) -> Result<BuiltScript, QueryError> {
    let collection = entity_collection(query.entity);
    let serializer = serializer(query.entity);

    let mut ctx = EmitCtx::default();
    let predicate = emit_predicate(&query.filter, "t", Dialect::Jxa, &mut ctx)?;
    let dates = hoisted_dates(&ctx);
    let regexes = hoisted_regexes(&ctx);
    let tag_sets = hoisted_tag_sets(&ctx);

    let skip = if query.offset > 0 {
        "    if (skipped < OFFSET) { skipped++; continue; }\n"
    } else {
        ""
    };

    Ok(BuiltScript {
        source: format!(
            "(() => {{\n  const app = Application(\"OmniFocus\");\n  const doc = app.defaultDocument;\n  {fmt}\n{dates}{regexes}{tag_sets}  const LIMIT = {limit};\n  const OFFSET = {offset};\n  const source = doc.{collection}();\n  const rows = [];\n  let skipped = 0;\n  for (let i = 0; i < source.length; i++) {{\n    const t = source[i];\n    if (rows.length >= LIMIT) break;\n    if (!({predicate})) continue;\n{skip}    rows.push({serializer});\n  }}\n  return JSON.stringify({{items: rows, count: rows.length}});\n}})()",
            fmt = FMT_FN_JXA,
            dates = dates,
            regexes = regexes,
            tag_sets = tag_sets,
            limit = query.limit,
            offset = query.offset,
            collection = collection,
            predicate = predicate,
            skip = skip,
            serializer = serializer,
        ),
        optimization: None,
    })
}

/// Outer-context container assignment, the single fallback when an embedded
/// move fails. Tag readback still goes through the embedded dialect; this
/// script only reassigns and reports.
pub fn move_fallback(task_id: &str, target_project_id: Option<&str>) -> String {
    let assignment = match target_project_id {
        Some(project_id) => format!(
            "  const projects = doc.flattenedProjects.whose({{id: {}}});\n  if (projects.length === 0) {{\n    return JSON.stringify({{moved: false, error: \"project not found\"}});\n  }}\n  t.assignedContainer = projects[0];",
            js_str(project_id)
        ),
        None => "  t.assignedContainer = null;".to_string(),
    };
    format!(
        "(() => {{\n  const app = Application(\"OmniFocus\");\n  const doc = app.defaultDocument;\n  const matches = doc.flattenedTasks.whose({{id: {id}}});\n  if (matches.length === 0) {{\n    return JSON.stringify({{moved: false, error: \"task not found\"}});\n  }}\n  const t = matches[0];\n{assignment}\n  return JSON.stringify({{moved: true}});\n}})()",
        id = js_str(task_id),
        assignment = assignment,
    )
}

// ============================================================================
// PIECES
// ============================================================================

const FMT_FN_JXA: &str = r#"function fmt(d) {
    if (!d) return null;
    const p = n => (n < 10 ? "0" + n : "" + n);
    return d.getFullYear() + "-" + p(d.getMonth() + 1) + "-" + p(d.getDate()) + " " + p(d.getHours()) + ":" + p(d.getMinutes());
  }"#;

fn entity_collection(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Tasks => "flattenedTasks",
        EntityType::Projects => "flattenedProjects",
        EntityType::Tags => "flattenedTags",
        EntityType::Folders => "folders",
        EntityType::Perspectives => "perspectives",
    }
}

fn serializer(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Tasks => {
            "{id: t.id(), name: t.name(), note: t.note() || \"\", flagged: t.flagged(), completed: t.completed(), dropped: t.dropped(), blocked: t.blocked(), available: t.available(), inInbox: t.inInbox(), dueDate: fmt(t.dueDate()), deferDate: fmt(t.deferDate()), completionDate: fmt(t.completionDate()), estimatedMinutes: t.estimatedMinutes(), tags: t.tags().map(x => x.name()), project: t.containingProject() ? t.containingProject().name() : null, projectId: t.containingProject() ? t.containingProject().id() : null}"
        }
        EntityType::Projects => {
            "{id: t.id(), name: t.name(), status: t.status(), note: t.note() || \"\", folder: t.folder() ? t.folder().name() : null, dueDate: fmt(t.dueDate())}"
        }
        EntityType::Tags => "{id: t.id(), name: t.name()}",
        EntityType::Folders => "{id: t.id(), name: t.name()}",
        EntityType::Perspectives => "{id: t.id(), name: t.name()}",
    }
}

fn hoisted_dates(ctx: &EmitCtx) -> String {
    if ctx.dates.is_empty() {
        return String::new();
    }
    let literals: Vec<String> = ctx
        .dates
        .iter()
        .map(|d| format!("new Date({})", js_str(d)))
        .collect();
    format!("  const D = [{}];\n", literals.join(", "))
}

fn hoisted_regexes(ctx: &EmitCtx) -> String {
    if ctx.regexes.is_empty() {
        return String::new();
    }
    let literals: Vec<String> = ctx
        .regexes
        .iter()
        .map(|r| format!("new RegExp({}, \"i\")", js_str(r)))
        .collect();
    format!("  const R = [{}];\n", literals.join(", "))
}

fn hoisted_tag_sets(ctx: &EmitCtx) -> String {
    if ctx.tag_sets.is_empty() {
        return String::new();
    }
    let literal = serde_json::to_string(&ctx.tag_sets).unwrap_or_else(|_| "[]".into());
    format!("  const P = {{tagSets: {literal}}};\n")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{CmpOp, Field, Filter};
    use crate::query::NormalizedQuery;

    #[test]
    fn single_lookup_uses_whose_by_id_only() {
        let script = single_lookup(EntityType::Tasks, "abc-123");
        assert!(script.contains("whose({id: \"abc-123\"})"));
        assert!(script.contains("found: false"));
        // Accessor-call style throughout
        assert!(script.contains("t.name()"));
    }

    #[test]
    fn read_script_filters_by_iteration_not_whose() {
        let mut q = NormalizedQuery::all(EntityType::Tasks);
        q.filter = Filter::And(vec![
            Filter::cmp(Field::Flagged, CmpOp::Eq, true),
            Filter::cmp(Field::DueDate, CmpOp::Le, "2025-03-17"),
        ]);
        let built = read_script(&q).unwrap();

        assert!(
            !built.source.contains("whose"),
            "whose() must not appear in external filter scripts"
        );
        assert!(built.source.contains("for (let i = 0;"));
        assert!(built.source.contains("t.flagged() === true"));
        // Hoisted date literal, rehydrated once
        assert!(built.source.contains("const D = [new Date("));
    }

    #[test]
    fn external_pagination_mirrors_embedded_rules() {
        let mut q = NormalizedQuery::all(EntityType::Tasks);
        q.offset = 5;
        q.limit = 10;
        let built = read_script(&q).unwrap();
        assert!(built.source.contains("const LIMIT = 10"));
        assert!(built.source.contains("const OFFSET = 5"));
        assert!(built.source.contains("skipped++"));
    }

    #[test]
    fn move_fallback_reassigns_container() {
        let script = move_fallback("task-1", Some("proj-9"));
        assert!(script.contains("assignedContainer = projects[0]"));
        assert!(script.contains("whose({id: \"task-1\"})"));
        assert!(script.contains("whose({id: \"proj-9\"})"));

        let to_inbox = move_fallback("task-1", None);
        assert!(to_inbox.contains("assignedContainer = null"));
    }

    #[test]
    fn synthetic_fields_are_direct_accessors_externally() {
        let mut q = NormalizedQuery::all(EntityType::Tasks);
        q.filter = Filter::cmp(Field::Available, CmpOp::Eq, true);
        let built = read_script(&q).unwrap();
        assert!(built.source.contains("t.available() === true"));
        assert!(!built.source.contains("Task.Status"));
    }
}
