//! Write pipeline: mutations, batch graphs, export side effects
//!
//! Every mutation goes through the bridge (write-then-readback in one
//! embedded script) and completes a cache write-guard so invalidation lands
//! at write-completion time. Batches are DAGs over tempIds: topologically
//! sorted before execution, compensated in reverse order when atomic.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use super::input::{BatchItem, MutationInput};
use super::{read, DispatchError, Dispatcher};
use crate::bridge::{MoveTarget, ProjectData, TagAction, TaskData};
use crate::cache::{CacheClass, Invalidation};
use crate::error::OmniError;
use crate::export::{self, ExportFormat};
use crate::response::Envelope;

/// Batch size ceiling
pub const MAX_BATCH_ITEMS: usize = 100;

pub(crate) async fn run_write(d: &Dispatcher, input: MutationInput) -> Result<Envelope, OmniError> {
    let envelope = match input.operation.as_str() {
        "create" => run_create(d, &input).await?,
        "update" => run_update(d, &input).await?,
        "complete" => run_complete(d, &input).await?,
        "delete" => run_delete(d, &input).await?,
        "move" => run_move(d, &input).await?,
        "tag_manage" => run_tag_manage(d, &input).await?,
        "bulk_delete" => run_bulk_delete(d, &input).await?,
        "batch" => run_batch(d, &input).await?,
        "export" => run_export(d, &input).await?,
        other => {
            return Err(DispatchError::UnknownOperation {
                operation: other.to_string(),
            }
            .into())
        }
    };

    if let Some(ref workflow) = input.workflow {
        d.cache.invalidate_workflow(workflow);
    }
    Ok(envelope)
}

// ============================================================================
// SINGLE MUTATIONS
// ============================================================================

async fn run_create(d: &Dispatcher, input: &MutationInput) -> Result<Envelope, OmniError> {
    let data = input.data.as_ref().ok_or_else(|| invalid("create needs data"))?;

    match target_of(input)? {
        "project" => {
            let project = ProjectData::from_value(data).map_err(|e| invalid(&e))?;
            if project.name.is_none() {
                return Err(invalid("project create needs data.name").into());
            }
            if input.dry_run {
                return Ok(dry_run_envelope("create", "project", data));
            }
            let guard = d.cache.begin_write(CacheClass::Projects);
            let row = d.bridge.create_project(&project).await?;
            guard.complete(Invalidation::Class);

            let summary = format!(
                "created project '{}' ({})",
                row.name.as_deref().unwrap_or(""),
                row.id
            );
            Ok(Envelope::ok(serde_json::to_value(row).unwrap_or(Value::Null)).with_summary(summary))
        }
        _ => {
            let mut task = TaskData::from_value(data).map_err(|e| invalid(&e))?;
            if task.name.is_none() {
                return Err(invalid("task create needs data.name").into());
            }
            if input.dry_run {
                return Ok(dry_run_envelope("create", "task", data));
            }
            resolve_project_ref(d, &mut task).await?;

            let guard = d.cache.begin_write(CacheClass::Tasks);
            let (row, warnings) = d.bridge.create_task(&task).await?;
            guard.complete(Invalidation::Class);

            let summary = format!(
                "created task '{}' ({})",
                row.name.as_deref().unwrap_or(""),
                row.id
            );
            Ok(Envelope::ok(serde_json::to_value(row).unwrap_or(Value::Null))
                .with_summary(summary)
                .with_warnings(warnings))
        }
    }
}

async fn run_update(d: &Dispatcher, input: &MutationInput) -> Result<Envelope, OmniError> {
    let id = required_id(input)?;
    let changes = input
        .changes
        .as_ref()
        .or(input.data.as_ref())
        .ok_or_else(|| invalid("update needs changes"))?;

    match target_of(input)? {
        "project" => {
            let project = ProjectData::from_value(changes).map_err(|e| invalid(&e))?;
            if input.dry_run {
                return Ok(dry_run_envelope("update", "project", changes));
            }
            let guard = d.cache.begin_write(CacheClass::Projects);
            let row = d.bridge.update_project(id, &project).await?;
            guard.complete(Invalidation::Class);
            Ok(
                Envelope::ok(serde_json::to_value(row).unwrap_or(Value::Null))
                    .with_summary(format!("updated project {id}")),
            )
        }
        _ => {
            let mut task = TaskData::from_value(changes).map_err(|e| invalid(&e))?;
            if input.dry_run {
                return Ok(dry_run_envelope("update", "task", changes));
            }
            resolve_project_ref(d, &mut task).await?;

            let invalidation = update_invalidation(&task);
            let guard = d.cache.begin_write(CacheClass::Tasks);
            let (row, warnings) = d.bridge.update_task(id, &task).await?;
            guard.complete(invalidation);

            Ok(Envelope::ok(serde_json::to_value(row).unwrap_or(Value::Null))
                .with_summary(format!("updated task {id}"))
                .with_warnings(warnings))
        }
    }
}

async fn run_complete(d: &Dispatcher, input: &MutationInput) -> Result<Envelope, OmniError> {
    let id = required_id(input)?;
    if input.dry_run {
        return Ok(dry_run_envelope("complete", "task", &json!({"id": id})));
    }
    let guard = d.cache.begin_write(CacheClass::Tasks);
    let row = d.bridge.complete_task(id).await?;
    guard.complete(Invalidation::Class);

    Ok(Envelope::ok(serde_json::to_value(row).unwrap_or(Value::Null))
        .with_summary(format!("completed task {id}")))
}

async fn run_delete(d: &Dispatcher, input: &MutationInput) -> Result<Envelope, OmniError> {
    let id = required_id(input)?;
    let target = target_of(input)?;
    if input.dry_run {
        return Ok(dry_run_envelope("delete", target, &json!({"id": id})));
    }
    let class = if target == "project" {
        CacheClass::Projects
    } else {
        CacheClass::Tasks
    };
    let guard = d.cache.begin_write(class);
    let outcome = d.bridge.delete(target, id).await?;
    guard.complete(Invalidation::Class);

    let summary = match &outcome.name {
        Some(name) => format!("deleted {target} '{name}' ({})", outcome.id),
        None => format!("deleted {target} {}", outcome.id),
    };
    Ok(Envelope::ok(json!({"id": outcome.id, "deleted": true})).with_summary(summary))
}

async fn run_move(d: &Dispatcher, input: &MutationInput) -> Result<Envelope, OmniError> {
    let id = required_id(input)?;
    let destination = input
        .destination
        .as_ref()
        .ok_or_else(|| invalid("move needs destination"))?;

    if input.dry_run {
        return Ok(dry_run_envelope("move", "task", &json!({"id": id})));
    }

    let target = match destination.to.as_str() {
        "inbox" => MoveTarget::Inbox,
        "project" => {
            let reference = destination
                .project
                .as_deref()
                .ok_or_else(|| invalid("destination.project is required for to: project"))?;
            MoveTarget::Project(resolve_project_id(d, reference).await?)
        }
        "parent" => {
            let parent = destination
                .parent_id
                .as_deref()
                .ok_or_else(|| invalid("destination.parentId is required for to: parent"))?;
            MoveTarget::Parent(parent.to_string())
        }
        other => return Err(invalid(&format!("unknown move destination '{other}'")).into()),
    };

    let guard = d.cache.begin_write(CacheClass::Tasks);
    let (row, warnings) = d.bridge.move_task(id, &target).await?;
    guard.complete(Invalidation::Class);

    Ok(Envelope::ok(serde_json::to_value(row).unwrap_or(Value::Null))
        .with_summary(format!("moved task {id} to {}", destination.to))
        .with_warnings(warnings))
}

async fn run_tag_manage(d: &Dispatcher, input: &MutationInput) -> Result<Envelope, OmniError> {
    let data = input
        .data
        .as_ref()
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("tag_manage needs a data object"))?;
    let action = parse_tag_action(data)?;

    if input.dry_run {
        return Ok(dry_run_envelope("tag_manage", "tag", input.data.as_ref().unwrap_or(&Value::Null)));
    }

    let guard = d.cache.begin_write(CacheClass::Tags);
    let row = d.bridge.tag_manage(&action).await?;
    guard.complete(Invalidation::Class);
    // Tag changes are observable through task queries too
    let task_guard = d.cache.begin_write(CacheClass::Tasks);
    task_guard.complete(Invalidation::Class);

    let summary = match &action {
        TagAction::Create { path } => format!("created tag path '{path}'"),
        TagAction::Rename { tag, new_name } => format!("renamed tag '{tag}' to '{new_name}'"),
        TagAction::Delete { tag } => format!("deleted tag '{tag}'"),
        TagAction::Merge { from, into } => format!("merged tag '{from}' into '{into}'"),
        TagAction::Nest { tag, .. } => format!("nested tag '{tag}'"),
    };
    Ok(Envelope::ok(serde_json::to_value(row).unwrap_or(Value::Null)).with_summary(summary))
}

async fn run_bulk_delete(d: &Dispatcher, input: &MutationInput) -> Result<Envelope, OmniError> {
    let ids = input
        .ids
        .as_ref()
        .filter(|ids| !ids.is_empty())
        .ok_or_else(|| invalid("bulk_delete needs a non-empty ids array"))?;
    if input.dry_run {
        return Ok(dry_run_envelope("bulk_delete", "task", &json!({"ids": ids})));
    }

    let guard = d.cache.begin_write(CacheClass::Tasks);
    let outcome = d.bridge.bulk_delete_tasks(ids).await?;
    guard.complete(Invalidation::Class);

    let summary = if outcome.missing.is_empty() {
        format!("deleted {} tasks", outcome.deleted.len())
    } else {
        format!(
            "deleted {} tasks, {} ids not found",
            outcome.deleted.len(),
            outcome.missing.len()
        )
    };
    Ok(Envelope::ok(json!({
        "deleted": outcome.deleted,
        "missing": outcome.missing,
    }))
    .with_summary(summary))
}

// ============================================================================
// BATCH
// ============================================================================

async fn run_batch(d: &Dispatcher, input: &MutationInput) -> Result<Envelope, OmniError> {
    let items = input
        .items
        .as_ref()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| invalid("batch needs a non-empty items array"))?;

    let order = validate_batch(items)?;
    if input.dry_run {
        let planned: Vec<_> = order
            .iter()
            .map(|&i| {
                json!({
                    "tempId": items[i].temp_id,
                    "operation": items[i].operation,
                    "target": items[i].target.as_deref().unwrap_or("task"),
                })
            })
            .collect();
        return Ok(Envelope::ok(json!({"dry_run": true, "planned": planned}))
            .with_summary(format!("{} operations planned, none executed", planned.len())));
    }

    let guard = d.cache.begin_write(CacheClass::Tasks);
    let project_guard = d.cache.begin_write(CacheClass::Projects);

    // tempId → (real id, target), in creation order for compensation
    let mut resolved: HashMap<String, (String, String)> = HashMap::new();
    let mut created: Vec<(String, String)> = Vec::new();
    let mut results: Vec<Value> = Vec::new();
    let mut failures = 0usize;

    for &idx in &order {
        let item = &items[idx];
        let label = item
            .temp_id
            .clone()
            .unwrap_or_else(|| format!("item-{idx}"));

        match execute_batch_item(d, item, &resolved).await {
            Ok(outcome) => {
                if let Some(ref temp_id) = item.temp_id {
                    resolved.insert(temp_id.clone(), (outcome.id.clone(), outcome.target.clone()));
                }
                if outcome.created {
                    created.push((outcome.id.clone(), outcome.target.clone()));
                }
                results.push(json!({
                    "tempId": item.temp_id,
                    "id": outcome.id,
                    "success": true,
                }));
            }
            Err(err) => {
                failures += 1;
                if input.atomic {
                    // Compensating deletes, reverse creation order
                    warn!(item = %label, error = %err, "atomic batch failed, rolling back");
                    let mut rolled_back = 0usize;
                    for (id, target) in created.iter().rev() {
                        if d.bridge.delete(target, id).await.is_ok() {
                            rolled_back += 1;
                        }
                    }
                    return Err(DispatchError::AtomicFailed {
                        failed_item: label,
                        detail: err.to_string(),
                        rolled_back,
                    }
                    .into());
                }
                results.push(json!({
                    "tempId": item.temp_id,
                    "success": false,
                    "error": {
                        "code": err.code().as_str(),
                        "message": err.to_string(),
                    },
                }));
            }
        }
    }

    guard.complete(Invalidation::Class);
    project_guard.complete(Invalidation::Class);

    let temp_ids: Map<String, Value> = resolved
        .iter()
        .map(|(temp, (real, _))| (temp.clone(), Value::String(real.clone())))
        .collect();

    let succeeded = results.len() - failures;
    let summary = if failures == 0 {
        format!("batch completed: {succeeded} operations")
    } else {
        format!("batch completed with errors: {succeeded} ok, {failures} failed")
    };
    Ok(Envelope::ok(json!({
        "results": results,
        "tempIds": temp_ids,
    }))
    .with_summary(summary))
}

struct BatchOutcome {
    id: String,
    target: String,
    created: bool,
}

async fn execute_batch_item(
    d: &Dispatcher,
    item: &BatchItem,
    resolved: &HashMap<String, (String, String)>,
) -> Result<BatchOutcome, OmniError> {
    let target = item.target.as_deref().unwrap_or("task").to_string();

    match item.operation.as_str() {
        "create" if target == "project" => {
            let data = item.data.as_ref().ok_or_else(|| invalid("create needs data"))?;
            let project = ProjectData::from_value(data).map_err(|e| invalid(&e))?;
            let row = d.bridge.create_project(&project).await?;
            Ok(BatchOutcome {
                id: row.id,
                target,
                created: true,
            })
        }
        "create" => {
            let data = item.data.as_ref().ok_or_else(|| invalid("create needs data"))?;
            let mut task = TaskData::from_value(data).map_err(|e| invalid(&e))?;
            if task.name.is_none() {
                return Err(invalid("task create needs data.name").into());
            }

            // A parentTempId points at whatever the parent item created:
            // a project hosts the task, a task adopts it as a subtask
            if let Some(ref parent_temp) = item.parent_temp_id {
                let (real_id, parent_target) = resolved
                    .get(parent_temp)
                    .cloned()
                    .ok_or_else(|| invalid(&format!("parentTempId '{parent_temp}' not yet created")))?;
                if parent_target == "project" {
                    task.project_id = Some(real_id);
                } else {
                    task.parent_id = Some(real_id);
                }
            }
            resolve_project_ref(d, &mut task).await?;

            let (row, _warnings) = d.bridge.create_task(&task).await?;
            Ok(BatchOutcome {
                id: row.id,
                target,
                created: true,
            })
        }
        "update" => {
            let id = item.id.as_deref().ok_or_else(|| invalid("update needs id"))?;
            let changes = item
                .changes
                .as_ref()
                .or(item.data.as_ref())
                .ok_or_else(|| invalid("update needs changes"))?;
            let mut task = TaskData::from_value(changes).map_err(|e| invalid(&e))?;
            resolve_project_ref(d, &mut task).await?;
            let (row, _warnings) = d.bridge.update_task(id, &task).await?;
            Ok(BatchOutcome {
                id: row.id,
                target,
                created: false,
            })
        }
        "complete" => {
            let id = item.id.as_deref().ok_or_else(|| invalid("complete needs id"))?;
            let row = d.bridge.complete_task(id).await?;
            Ok(BatchOutcome {
                id: row.id,
                target,
                created: false,
            })
        }
        "delete" => {
            let id = item.id.as_deref().ok_or_else(|| invalid("delete needs id"))?;
            let outcome = d.bridge.delete(&target, id).await?;
            Ok(BatchOutcome {
                id: outcome.id,
                target,
                created: false,
            })
        }
        other => Err(DispatchError::UnknownOperation {
            operation: format!("batch item operation '{other}'"),
        }
        .into()),
    }
}

/// Validate the batch graph and return a topological execution order
/// (stable: input order among unblocked items)
fn validate_batch(items: &[BatchItem]) -> Result<Vec<usize>, DispatchError> {
    if items.len() > MAX_BATCH_ITEMS {
        return Err(DispatchError::BatchTooLarge { len: items.len() });
    }

    let mut index_of: HashMap<&str, usize> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        if let Some(ref temp_id) = item.temp_id {
            if index_of.insert(temp_id.as_str(), i).is_some() {
                return Err(DispatchError::InvalidInput {
                    detail: format!("duplicate tempId '{temp_id}'"),
                });
            }
        }
    }

    // Parent edges; unknown parents rejected before any ordering
    let mut parent_of: Vec<Option<usize>> = vec![None; items.len()];
    for (i, item) in items.iter().enumerate() {
        if let Some(ref parent) = item.parent_temp_id {
            let parent_idx = *index_of.get(parent.as_str()).ok_or_else(|| {
                DispatchError::UnknownParent {
                    temp_id: item
                        .temp_id
                        .clone()
                        .unwrap_or_else(|| format!("item-{i}")),
                    parent: parent.clone(),
                }
            })?;
            parent_of[i] = Some(parent_idx);
        }
    }

    // Kahn's algorithm, stable over input order
    let mut blocked: Vec<usize> = parent_of
        .iter()
        .map(|p| if p.is_some() { 1 } else { 0 })
        .collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    for (i, parent) in parent_of.iter().enumerate() {
        if let Some(p) = parent {
            children[*p].push(i);
        }
    }

    let mut order = Vec::with_capacity(items.len());
    let mut ready: Vec<usize> = (0..items.len()).filter(|&i| blocked[i] == 0).collect();
    let mut cursor = 0;
    while cursor < ready.len() {
        let node = ready[cursor];
        cursor += 1;
        order.push(node);
        for &child in &children[node] {
            blocked[child] -= 1;
            if blocked[child] == 0 {
                ready.push(child);
            }
        }
    }

    if order.len() != items.len() {
        let stuck = (0..items.len())
            .find(|i| !order.contains(i))
            .unwrap_or(0);
        return Err(DispatchError::CircularDependency {
            temp_id: items[stuck]
                .temp_id
                .clone()
                .unwrap_or_else(|| format!("item-{stuck}")),
        });
    }
    Ok(order)
}

// ============================================================================
// EXPORT
// ============================================================================

async fn run_export(d: &Dispatcher, input: &MutationInput) -> Result<Envelope, OmniError> {
    let export_input = input
        .export
        .as_ref()
        .ok_or_else(|| invalid("export needs an export sink"))?;
    let query_input = input
        .query
        .as_ref()
        .ok_or_else(|| invalid("export needs a query"))?;

    let format = ExportFormat::from_user(&export_input.format)?;
    let query = read::compile_input(d, query_input)?;
    let outcome = read::execute(d, &query).await?;

    if input.dry_run {
        return Ok(Envelope::ok(json!({
            "dry_run": true,
            "rows": outcome.rows.len(),
            "path": export_input.path,
        }))
        .with_summary(format!("{} rows would be exported", outcome.rows.len())));
    }

    let summary = export::export_rows(&outcome.rows, format, Path::new(&export_input.path))?;
    debug!(path = %summary.path, rows = summary.rows, "export written");
    Ok(Envelope::ok(serde_json::to_value(&summary).unwrap_or(Value::Null)).with_summary(format!(
        "exported {} rows to {} as {}",
        summary.rows, summary.path, summary.format
    )))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Resolve a project name/id reference to an id, with ambiguity surfaced
async fn resolve_project_ref(d: &Dispatcher, task: &mut TaskData) -> Result<(), OmniError> {
    if let Some(reference) = task.project_ref.clone() {
        task.project_id = Some(resolve_project_id(d, &reference).await?);
    }
    Ok(())
}

async fn resolve_project_id(d: &Dispatcher, reference: &str) -> Result<String, OmniError> {
    let candidates = d.bridge.lookup_projects(reference).await?;

    let exact: Vec<&Value> = candidates
        .iter()
        .filter(|c| c.get("exact").and_then(Value::as_bool) == Some(true))
        .collect();
    let pick = |list: &[&Value]| -> Option<String> {
        (list.len() == 1)
            .then(|| list[0].get("id").and_then(Value::as_str).map(String::from))
            .flatten()
    };

    if let Some(id) = pick(&exact) {
        return Ok(id);
    }
    if exact.len() > 1 {
        return Err(DispatchError::MultipleMatches {
            entity: "project".into(),
            reference: reference.to_string(),
            candidates: exact.into_iter().cloned().collect(),
        }
        .into());
    }
    let all: Vec<&Value> = candidates.iter().collect();
    if let Some(id) = pick(&all) {
        return Ok(id);
    }
    if candidates.len() > 1 {
        return Err(DispatchError::MultipleMatches {
            entity: "project".into(),
            reference: reference.to_string(),
            candidates,
        }
        .into());
    }
    Err(DispatchError::NotFound {
        entity: "project".into(),
        reference: reference.to_string(),
    }
    .into())
}

/// Selective invalidation from the changed fields of an update
fn update_invalidation(task: &TaskData) -> Invalidation {
    let mut patterns: Vec<String> = ["all", "search", "smart_suggest"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut add = |names: &[&str]| {
        for name in names {
            if !patterns.iter().any(|p| p == name) {
                patterns.push(name.to_string());
            }
        }
    };

    if task.due_date.is_some() || task.clear_due_date {
        add(&["today", "upcoming", "overdue"]);
    }
    if task.flagged.is_some() {
        add(&["flagged", "today"]);
    }
    if task.defer_date.is_some() || task.clear_defer_date {
        add(&["available", "blocked"]);
    }
    if task.project_ref.is_some() || task.move_to_inbox || task.parent_id.is_some() {
        add(&["available", "blocked", "today"]);
    }
    Invalidation::Patterns(patterns)
}

fn parse_tag_action(data: &Map<String, Value>) -> Result<TagAction, OmniError> {
    let action = data
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("tag_manage needs data.action"))?;
    let get = |key: &str| -> Result<String, DispatchError> {
        data.get(key)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| invalid(&format!("tag_manage '{action}' needs data.{key}")))
    };

    Ok(match action {
        "create" => TagAction::Create { path: get("path")? },
        "rename" => TagAction::Rename {
            tag: get("tag")?,
            new_name: get("newName")?,
        },
        "delete" => TagAction::Delete { tag: get("tag")? },
        "merge" => TagAction::Merge {
            from: get("from")?,
            into: get("into")?,
        },
        "nest" => TagAction::Nest {
            tag: get("tag")?,
            parent: data.get("parent").and_then(Value::as_str).map(String::from),
        },
        other => {
            return Err(DispatchError::UnknownOperation {
                operation: format!("tag_manage action '{other}'"),
            }
            .into())
        }
    })
}

fn dry_run_envelope(operation: &str, target: &str, data: &Value) -> Envelope {
    Envelope::ok(json!({
        "dry_run": true,
        "operation": operation,
        "target": target,
        "data": data,
    }))
    .with_summary(format!("dry run: {operation} {target} validated, nothing executed"))
}

fn target_of(input: &MutationInput) -> Result<&str, OmniError> {
    match input.target.as_deref() {
        None | Some("task") => Ok("task"),
        Some("project") => Ok("project"),
        Some("tag") => Ok("tag"),
        Some(other) => Err(invalid(&format!("unknown target '{other}'")).into()),
    }
}

fn required_id(input: &MutationInput) -> Result<&str, OmniError> {
    input
        .id
        .as_deref()
        .ok_or_else(|| invalid(&format!("{} needs an id", input.operation)).into())
}

fn invalid(detail: &str) -> DispatchError {
    DispatchError::InvalidInput {
        detail: detail.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
