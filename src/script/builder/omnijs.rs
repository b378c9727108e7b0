//! Embedded-dialect emitter (OmniJS, "inner")
//!
//! Emits the script evaluated inside the host via the outer bridge call.
//! Parameters travel as a JSON string parsed at script start, never inlined
//! into expressions, so large payloads cannot push the script over the byte
//! ceiling through repetition.

use serde_json::json;

use super::{emit_predicate, js_str, BuilderConfig, BuiltScript, Dialect, EmitCtx};
use crate::query::ast::Field;
use crate::query::{EntityType, NormalizedQuery, QueryError, SortDirection, SortSpec};

// ============================================================================
// SHARED JS HELPERS (also used by the bridge emitters)
// ============================================================================

/// Wire-form local date formatter
pub const FMT_FN: &str = r#"function fmt(d) {
  if (!d) return null;
  const p = n => (n < 10 ? "0" + n : "" + n);
  return d.getFullYear() + "-" + p(d.getMonth() + 1) + "-" + p(d.getDate()) + " " + p(d.getHours()) + ":" + p(d.getMinutes());
}"#;

/// Canonical task serializer used by readbacks and full-projection reads
pub const SERIALIZE_TASK_FN: &str = r#"function serializeTask(t) {
  return {
    id: t.id.primaryKey,
    name: t.name,
    note: t.note || "",
    flagged: t.flagged,
    completed: t.completed,
    dropped: t.taskStatus === Task.Status.Dropped,
    blocked: t.taskStatus === Task.Status.Blocked,
    available: t.taskStatus === Task.Status.Available,
    inInbox: t.inInbox,
    dueDate: fmt(t.dueDate),
    deferDate: fmt(t.deferDate),
    plannedDate: fmt(t.plannedDate),
    completionDate: fmt(t.completionDate),
    estimatedMinutes: t.estimatedMinutes,
    added: fmt(t.added),
    modified: fmt(t.modified),
    tags: t.tags.map(x => x.name),
    project: t.containingProject ? t.containingProject.name : null,
    projectId: t.containingProject ? t.containingProject.id.primaryKey : null,
    parentId: t.parent ? t.parent.id.primaryKey : null,
    sequential: t.sequential,
    repetitionRule: t.repetitionRule ? t.repetitionRule.ruleString : null
  };
}"#;

/// Canonical project serializer
pub const SERIALIZE_PROJECT_FN: &str = r#"function projectStatus(p) {
  if (p.status === Project.Status.OnHold) return "on_hold";
  if (p.status === Project.Status.Done) return "done";
  if (p.status === Project.Status.Dropped) return "dropped";
  return "active";
}
function serializeProject(p) {
  return {
    id: p.id.primaryKey,
    name: p.name,
    status: projectStatus(p),
    sequential: p.sequential,
    note: p.note || "",
    folder: p.parentFolder ? p.parentFolder.name : null,
    folderId: p.parentFolder ? p.parentFolder.id.primaryKey : null,
    taskCount: p.numberOfTasks,
    availableTaskCount: p.numberOfAvailableTasks,
    reviewIntervalWeeks: p.reviewInterval ? Math.round(p.reviewInterval.steps * (p.reviewInterval.unit === "weeks" ? 1 : p.reviewInterval.unit === "days" ? 1 / 7 : p.reviewInterval.unit === "months" ? 4 : 52)) : null,
    nextReviewDate: fmt(p.nextReviewDate),
    dueDate: fmt(p.dueDate),
    modified: fmt(p.modified)
  };
}"#;

/// Resolve or create a nested tag path ("A : B : C"); missing ancestors are
/// created along the way
pub const ENSURE_TAG_PATH_FN: &str = r#"function ensureTagPath(path) {
  const parts = path.split(":").map(s => s.trim()).filter(s => s.length > 0);
  let parent = null;
  let tag = null;
  for (const name of parts) {
    const coll = parent ? parent.children : tags;
    tag = null;
    for (const x of coll) {
      if (x.name.toLowerCase() === name.toLowerCase()) { tag = x; break; }
    }
    if (!tag) { tag = new Tag(name, parent ? parent.ending : null); }
    parent = tag;
  }
  return tag;
}"#;

/// Null-last comparator used by emitted sort chains
pub const CMP_VAL_FN: &str = r#"function cmpVal(a, b) {
  if (a === null || a === undefined) return (b === null || b === undefined) ? 0 : 1;
  if (b === null || b === undefined) return -1;
  return a < b ? -1 : (a > b ? 1 : 0);
}"#;

/// Wrap an embedded script for execution: the outer context passes the
/// source through the bridge call and returns its result
pub fn wrap_embedded(inner: &str) -> String {
    format!(
        "(() => {{\n  const app = Application(\"OmniFocus\");\n  app.includeStandardAdditions = true;\n  const omniJs = {};\n  return app.evaluateJavascript(omniJs);\n}})()",
        js_str(inner)
    )
}

// ============================================================================
// READ SCRIPT
// ============================================================================

/// Emit the embedded read script for a normalized query
pub fn read_script(
    query: &NormalizedQuery,
    cfg: &BuilderConfig,
) -> Result<BuiltScript, QueryError> {
    if query.entity == EntityType::Perspectives {
        return Ok(BuiltScript {
            source: wrap_embedded(&perspectives_script()),
            optimization: None,
        });
    }

    // Count-only over the inbox uses the pre-filtered collection
    let (collection, filter, optimization) = if query.count_only
        && query.entity == EntityType::Tasks
        && query.filter.entails_in_inbox()
    {
        (
            "inbox",
            query.filter.without_in_inbox(),
            Some("inbox_collection"),
        )
    } else {
        (entity_collection(query.entity), query.filter.clone(), None)
    };

    let var = entity_var(query.entity);
    let mut ctx = EmitCtx::default();
    let predicate = emit_predicate(&filter, var, Dialect::OmniJs, &mut ctx)?;

    let params = json!({
        "now": cfg.now.format("%Y-%m-%dT%H:%M:%S").to_string(),
        "dueSoon": (cfg.now + chrono::Duration::days(cfg.due_soon_days))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string(),
        "limit": query.limit,
        "offset": query.offset,
        "dates": ctx.dates,
        "regexes": ctx.regexes,
        "tagSets": ctx.tag_sets,
    });

    let body = if query.count_only {
        count_body(collection, var, &predicate)
    } else if query.sort.is_empty() {
        stream_body(query, collection, var, &predicate)
    } else {
        sorted_body(query, collection, var, &predicate)
    };

    let inner = format!(
        "(() => {{\n  const P = JSON.parse({params_literal});\n  const D = P.dates.map(s => new Date(s));\n  const R = P.regexes.map(p => new RegExp(p, \"i\"));\n  const NOW = new Date(P.now);\n  const DUE_SOON = new Date(P.dueSoon);\n  {fmt}\n  {cmp}\n{body}\n}})()",
        params_literal = js_str(&params.to_string()),
        fmt = FMT_FN,
        cmp = CMP_VAL_FN,
        body = body,
    );

    Ok(BuiltScript {
        source: wrap_embedded(&inner),
        optimization,
    })
}

/// Streaming page: skip counter increments only for predicate-passing rows,
/// buffer-full check runs before any work on the row
fn stream_body(query: &NormalizedQuery, collection: &str, var: &str, predicate: &str) -> String {
    let serializer = row_literal(query, var);
    let skip = if query.offset > 0 {
        "    if (skipped < P.offset) { skipped++; continue; }\n"
    } else {
        ""
    };
    format!(
        "  const rows = [];\n  let skipped = 0;\n  for (const {var} of {collection}) {{\n    if (rows.length >= P.limit) break;\n    if (!({predicate})) continue;\n{skip}    rows.push({serializer});\n  }}\n  return JSON.stringify({{items: rows, count: rows.length}});"
    )
}

/// Sorted page: collect matches, sort, slice; total is exact here
fn sorted_body(query: &NormalizedQuery, collection: &str, var: &str, predicate: &str) -> String {
    let serializer = row_literal(query, var);
    let comparator = sort_comparator(&query.sort);
    format!(
        "  const matches = [];\n  for (const {var} of {collection}) {{\n    if ({predicate}) matches.push({var});\n  }}\n  matches.sort((a, b) => {comparator});\n  const page = matches.slice(P.offset, P.offset + P.limit);\n  const rows = page.map({var} => ({serializer}));\n  return JSON.stringify({{items: rows, count: rows.length, total: matches.length}});"
    )
}

/// Count-only: a counter, never materialized rows
fn count_body(collection: &str, var: &str, predicate: &str) -> String {
    format!(
        "  let count = 0;\n  for (const {var} of {collection}) {{\n    if ({predicate}) count++;\n  }}\n  return JSON.stringify({{count: count}});"
    )
}

fn perspectives_script() -> String {
    r#"(() => {
  const rows = [];
  Perspective.BuiltIn.all.forEach(p => {
    rows.push({name: p.name, builtin: true});
  });
  Perspective.Custom.all.forEach(p => {
    rows.push({id: p.identifier, name: p.name, builtin: false, rules: p.archivedFilterRules || null});
  });
  return JSON.stringify({items: rows, count: rows.length});
})()"#
        .to_string()
}

// ============================================================================
// PROJECTION
// ============================================================================

fn entity_collection(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Tasks => "flattenedTasks",
        EntityType::Projects => "flattenedProjects",
        EntityType::Tags => "flattenedTags",
        EntityType::Folders => "flattenedFolders",
        EntityType::Perspectives => "[]",
    }
}

fn entity_var(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Tasks => "t",
        EntityType::Projects => "p",
        EntityType::Tags => "g",
        EntityType::Folders => "f",
        EntityType::Perspectives => "x",
    }
}

/// Default projections when the caller omits `fields`
fn default_fields(entity: EntityType) -> Vec<Field> {
    match entity {
        EntityType::Tasks => vec![
            Field::Id,
            Field::Name,
            Field::Flagged,
            Field::Completed,
            Field::Dropped,
            Field::Blocked,
            Field::Available,
            Field::InInbox,
            Field::DueDate,
            Field::DeferDate,
            Field::EstimatedMinutes,
            Field::Tags,
            Field::Project,
        ],
        EntityType::Projects => vec![
            Field::Id,
            Field::Name,
            Field::Status,
            Field::Sequential,
            Field::Folder,
            Field::NextReviewDate,
            Field::DueDate,
        ],
        _ => vec![Field::Id, Field::Name],
    }
}

/// Object literal for one projected row
fn row_literal(query: &NormalizedQuery, var: &str) -> String {
    let mut fields = query
        .fields
        .clone()
        .unwrap_or_else(|| default_fields(query.entity));
    // Id anchors every row regardless of projection
    if !fields.contains(&Field::Id) {
        fields.insert(0, Field::Id);
    }

    let entries: Vec<String> = fields
        .iter()
        .filter_map(|f| field_entry(query.entity, *f, var))
        .collect();
    format!("{{{}}}", entries.join(", "))
}

fn field_entry(entity: EntityType, field: Field, v: &str) -> Option<String> {
    use EntityType::*;

    let entry = match (entity, field) {
        (_, Field::Id) => format!("id: {v}.id.primaryKey"),
        (_, Field::Name) => format!("name: {v}.name"),
        (Tasks | Projects, Field::Note) => format!("note: {v}.note || \"\""),
        (Tasks, Field::Flagged) => format!("flagged: {v}.flagged"),
        (Tasks, Field::Completed) => format!("completed: {v}.completed"),
        (Tasks, Field::Dropped) => {
            format!("dropped: {v}.taskStatus === Task.Status.Dropped")
        }
        (Tasks, Field::Blocked) => {
            format!("blocked: {v}.taskStatus === Task.Status.Blocked")
        }
        (Tasks, Field::Available) => {
            format!("available: {v}.taskStatus === Task.Status.Available")
        }
        (Tasks, Field::InInbox) => format!("inInbox: {v}.inInbox"),
        (Tasks | Projects, Field::DueDate) => format!("dueDate: fmt({v}.dueDate)"),
        (Tasks, Field::DeferDate) => format!("deferDate: fmt({v}.deferDate)"),
        (Tasks, Field::PlannedDate) => format!("plannedDate: fmt({v}.plannedDate)"),
        (Tasks, Field::CompletionDate) => format!("completionDate: fmt({v}.completionDate)"),
        (Tasks | Projects, Field::Added) => format!("added: fmt({v}.added)"),
        (Tasks | Projects, Field::Modified) => format!("modified: fmt({v}.modified)"),
        (Tasks, Field::EstimatedMinutes) => format!("estimatedMinutes: {v}.estimatedMinutes"),
        (Tasks, Field::Tags) => format!("tags: {v}.tags.map(x => x.name)"),
        (Tasks, Field::Project) => format!(
            "project: {v}.containingProject ? {v}.containingProject.name : null, projectId: {v}.containingProject ? {v}.containingProject.id.primaryKey : null"
        ),
        (Tasks | Projects, Field::Sequential) => format!("sequential: {v}.sequential"),
        (Tasks, Field::RepetitionRule) => format!(
            "repetitionRule: {v}.repetitionRule ? {v}.repetitionRule.ruleString : null"
        ),
        (Tasks, Field::DaysOverdue) => format!(
            "daysOverdue: ({v}.dueDate !== null && {v}.dueDate < NOW) ? Math.floor((NOW - {v}.dueDate) / 86400000) : 0"
        ),
        (Tasks, Field::Reason) => format!(
            "reason: ({v}.dueDate !== null && {v}.dueDate < NOW) ? \"overdue\" : ({v}.dueDate !== null && {v}.dueDate <= DUE_SOON) ? \"due_soon\" : {v}.flagged ? \"flagged\" : {v}.inInbox ? \"inbox\" : \"available\""
        ),
        (Projects, Field::Status) => format!(
            "status: {v}.status === Project.Status.OnHold ? \"on_hold\" : {v}.status === Project.Status.Done ? \"done\" : {v}.status === Project.Status.Dropped ? \"dropped\" : \"active\""
        ),
        (Projects, Field::Folder) => format!(
            "folder: {v}.parentFolder ? {v}.parentFolder.name : null, folderId: {v}.parentFolder ? {v}.parentFolder.id.primaryKey : null"
        ),
        (Projects, Field::NextReviewDate) => format!("nextReviewDate: fmt({v}.nextReviewDate)"),
        (Tags, Field::Parent) => {
            format!("parentId: {v}.parent ? {v}.parent.id.primaryKey : null")
        }
        (Folders, Field::Parent) => {
            format!("parentId: {v}.parent ? {v}.parent.id.primaryKey : null")
        }
        _ => return None,
    };
    Some(entry)
}

// ============================================================================
// SORT
// ============================================================================

fn sort_comparator(specs: &[SortSpec]) -> String {
    let keys: Vec<String> = specs
        .iter()
        .map(|spec| {
            let a = sort_key_expr(spec.field, "a");
            let b = sort_key_expr(spec.field, "b");
            let sign = match spec.direction {
                SortDirection::Asc => "",
                SortDirection::Desc => "-",
            };
            format!("{sign}cmpVal({a}, {b})")
        })
        .collect();
    keys.join(" || ")
}

fn sort_key_expr(field: Field, var: &str) -> String {
    match field {
        Field::Name => format!("({var}.name || \"\").toLowerCase()"),
        Field::Flagged => format!("({var}.flagged ? 1 : 0)"),
        Field::EstimatedMinutes => format!("{var}.estimatedMinutes"),
        // Sorting by days overdue is sorting by due date
        Field::DaysOverdue => format!("{var}.dueDate"),
        Field::DueDate
        | Field::DeferDate
        | Field::PlannedDate
        | Field::CompletionDate
        | Field::Added
        | Field::Modified
        | Field::NextReviewDate => format!("{var}.{}", super::field_property(field)),
        other => format!("{var}.{}", super::field_property(other)),
    }
}

// ============================================================================
// TESTS
// ============================================================================
