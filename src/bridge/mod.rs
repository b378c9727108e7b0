//! Bridge Consistency Protocol
//!
//! The host exposes two scripting contexts, and writes in one are not
//! reliably visible to reads from the other; tag assignments in particular
//! can read back empty across the boundary. Every mutation here compiles to
//! a single embedded script that performs the write, reads the canonical
//! post-state back in the same evaluation, and returns the serialized
//! entity. Nothing above this module verifies a write through the outer
//! context.
//!
//! Payloads travel as a JSON string parsed at script start. Inlining id
//! arrays into expressions would walk straight into the script byte ceiling.

pub mod repeat;

pub use repeat::{AnchorTo, Frequency, FrequencyUnit, HostRepeatParams, RepeatIntent};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::dates;
use crate::error::{ErrorCode, OmniError};
use crate::model::{ProjectRow, TagRow, TaskRow};
use crate::response::Warning;
use crate::script::builder::omnijs::{
    wrap_embedded, ENSURE_TAG_PATH_FN, FMT_FN, SERIALIZE_PROJECT_FN, SERIALIZE_TASK_FN,
};
use crate::script::builder::{js_str, jxa};
use crate::script::RobustRunner;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("write succeeded but readback does not reflect '{field}': {detail}")]
    ReadbackMismatch { field: String, detail: String },

    #[error("readback payload had an unexpected shape: {detail}")]
    ReadbackShape { detail: String },
}

impl BridgeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::NotFound { .. } => ErrorCode::NotFound,
            BridgeError::ReadbackMismatch { .. } => ErrorCode::BridgeReadbackMismatch,
            BridgeError::ReadbackShape { .. } => ErrorCode::InvalidJson,
        }
    }
}

// ============================================================================
// MUTATION PAYLOADS
// ============================================================================

/// Task create/update payload, normalized from the caller's `data`/`changes`
///
/// Explicit JSON `null` means "clear"; an absent key means "leave alone".
/// The distinction is preserved here as clear flags because both halves of
/// it matter for readback verification.
#[derive(Debug, Clone, Default)]
pub struct TaskData {
    pub name: Option<String>,
    pub note: Option<String>,
    pub flagged: Option<bool>,
    pub due_date: Option<String>,
    pub clear_due_date: bool,
    pub defer_date: Option<String>,
    pub clear_defer_date: bool,
    pub planned_date: Option<String>,
    pub clear_planned_date: bool,
    pub estimated_minutes: Option<i64>,
    /// Raw project reference as the caller wrote it (name or id)
    pub project_ref: Option<String>,
    /// Resolved by dispatch before the bridge runs
    pub project_id: Option<String>,
    pub move_to_inbox: bool,
    pub parent_id: Option<String>,
    /// Replace the whole tag set (nested paths allowed)
    pub tags: Option<Vec<String>>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub sequential: Option<bool>,
    pub repeat: Option<RepeatIntent>,
    pub clear_repeat: bool,
}

impl TaskData {
    /// Parse the caller's data/changes object; unknown keys are rejected
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let map = value
            .as_object()
            .ok_or_else(|| "mutation data must be an object".to_string())?;

        let mut data = TaskData::default();
        for (key, v) in map {
            match key.as_str() {
                "name" => data.name = Some(required_str(key, v)?),
                "note" => data.note = Some(required_str(key, v)?),
                "flagged" => {
                    data.flagged = Some(v.as_bool().ok_or("flagged must be a boolean")?)
                }
                "dueDate" => match v {
                    Value::Null => data.clear_due_date = true,
                    _ => data.due_date = Some(wire_date(key, v)?),
                },
                "deferDate" => match v {
                    Value::Null => data.clear_defer_date = true,
                    _ => data.defer_date = Some(wire_date(key, v)?),
                },
                "plannedDate" => match v {
                    Value::Null => data.clear_planned_date = true,
                    _ => data.planned_date = Some(wire_date(key, v)?),
                },
                "estimatedMinutes" => {
                    data.estimated_minutes =
                        Some(v.as_i64().ok_or("estimatedMinutes must be an integer")?)
                }
                "project" => match v {
                    Value::Null => data.move_to_inbox = true,
                    Value::String(s) => data.project_ref = Some(s.clone()),
                    _ => return Err("project must be a name, id, or null".into()),
                },
                "parentId" => data.parent_id = Some(required_str(key, v)?),
                "tags" => data.tags = Some(str_list(key, v)?),
                "addTags" => data.add_tags = str_list(key, v)?,
                "removeTags" => data.remove_tags = str_list(key, v)?,
                "sequential" => {
                    data.sequential = Some(v.as_bool().ok_or("sequential must be a boolean")?)
                }
                "repeatRule" => match v {
                    Value::Null => data.clear_repeat = true,
                    _ => {
                        data.repeat = Some(
                            serde_json::from_value(v.clone())
                                .map_err(|e| format!("repeatRule: {e}"))?,
                        )
                    }
                },
                other => return Err(format!("unknown field '{other}' in mutation data")),
            }
        }
        Ok(data)
    }

    fn payload(&self, id: Option<&str>) -> Value {
        json!({
            "id": id,
            "name": self.name,
            "note": self.note,
            "flagged": self.flagged,
            "dueDate": self.due_date.as_deref().map(iso_local),
            "clearDueDate": self.clear_due_date,
            "deferDate": self.defer_date.as_deref().map(iso_local),
            "clearDeferDate": self.clear_defer_date,
            "plannedDate": self.planned_date.as_deref().map(iso_local),
            "clearPlannedDate": self.clear_planned_date,
            "estimatedMinutes": self.estimated_minutes,
            "projectId": self.project_id,
            "moveToInbox": self.move_to_inbox,
            "parentId": self.parent_id,
            "tags": self.tags,
            "addTags": self.add_tags,
            "removeTags": self.remove_tags,
            "sequential": self.sequential,
            "repeat": self.repeat.as_ref().map(|r| {
                let host = repeat::translate(r);
                json!({
                    "ruleString": host.rule_string,
                    "method": host.method,
                    "anchorDateKey": host.anchor_date_key,
                    "scheduleType": host.schedule_type,
                    "catchUp": host.catch_up,
                })
            }),
            "clearRepeat": self.clear_repeat,
        })
    }
}

/// Project create/update payload
#[derive(Debug, Clone, Default)]
pub struct ProjectData {
    pub name: Option<String>,
    pub note: Option<String>,
    pub status: Option<String>,
    pub sequential: Option<bool>,
    pub folder_id: Option<String>,
    pub review_interval_weeks: Option<i64>,
    pub due_date: Option<String>,
    pub clear_due_date: bool,
}

impl ProjectData {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let map = value
            .as_object()
            .ok_or_else(|| "mutation data must be an object".to_string())?;

        let mut data = ProjectData::default();
        for (key, v) in map {
            match key.as_str() {
                "name" => data.name = Some(required_str(key, v)?),
                "note" => data.note = Some(required_str(key, v)?),
                "status" => data.status = Some(required_str(key, v)?),
                "sequential" => {
                    data.sequential = Some(v.as_bool().ok_or("sequential must be a boolean")?)
                }
                "folderId" => data.folder_id = Some(required_str(key, v)?),
                "reviewIntervalWeeks" => {
                    data.review_interval_weeks =
                        Some(v.as_i64().ok_or("reviewIntervalWeeks must be an integer")?)
                }
                "dueDate" => match v {
                    Value::Null => data.clear_due_date = true,
                    _ => data.due_date = Some(wire_date(key, v)?),
                },
                other => return Err(format!("unknown field '{other}' in project data")),
            }
        }
        Ok(data)
    }

    fn payload(&self, id: Option<&str>) -> Value {
        json!({
            "id": id,
            "name": self.name,
            "note": self.note,
            "status": self.status,
            "sequential": self.sequential,
            "folderId": self.folder_id,
            "reviewIntervalWeeks": self.review_interval_weeks,
            "dueDate": self.due_date.as_deref().map(iso_local),
            "clearDueDate": self.clear_due_date,
        })
    }
}

/// Where a task moves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTarget {
    Inbox,
    Project(String),
    Parent(String),
}

/// Tag management actions; nested paths create missing ancestors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagAction {
    Create { path: String },
    Rename { tag: String, new_name: String },
    Delete { tag: String },
    Merge { from: String, into: String },
    Nest { tag: String, parent: Option<String> },
}

#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BulkDeleteOutcome {
    pub deleted: Vec<String>,
    pub missing: Vec<String>,
}

// ============================================================================
// BRIDGE
// ============================================================================

pub struct Bridge {
    runner: Arc<RobustRunner>,
}

impl Bridge {
    pub fn new(runner: Arc<RobustRunner>) -> Self {
        Self { runner }
    }

    /// Create a task; position comes from parentId, then projectId, then the
    /// inbox. Field application and readback happen in the same script.
    pub async fn create_task(&self, data: &TaskData) -> Result<(TaskRow, Vec<Warning>), OmniError> {
        let payload = data.payload(None);
        let body = r#"  let parent = null;
  if (P.parentId) {
    parent = Task.byIdentifier(P.parentId);
    if (!parent) return JSON.stringify({found: false, what: "parent task", id: P.parentId});
  }
  let project = null;
  if (P.projectId) {
    project = Project.byIdentifier(P.projectId);
    if (!project) return JSON.stringify({found: false, what: "project", id: P.projectId});
  }
  const task = parent ? new Task(P.name, parent.ending)
    : project ? new Task(P.name, project)
    : new Task(P.name, inbox.ending);
  applyChanges(task, P, true);
  return JSON.stringify({ok: true, item: serializeTask(task)});"#;

        let row: TaskRow = self
            .run_item(&task_script(&payload, body), "task", "new")
            .await?;
        let warnings = verify_task_readback(data, &row)?;
        Ok((row, warnings))
    }

    /// Update a task in place; project/parent changes use the native move
    /// primitive inside the same script
    pub async fn update_task(
        &self,
        id: &str,
        data: &TaskData,
    ) -> Result<(TaskRow, Vec<Warning>), OmniError> {
        let payload = data.payload(Some(id));
        let body = r#"  const task = Task.byIdentifier(P.id);
  if (!task) return JSON.stringify({found: false, what: "task", id: P.id});
  applyChanges(task, P, false);
  return JSON.stringify({ok: true, item: serializeTask(task)});"#;

        let row: TaskRow = self.run_item(&task_script(&payload, body), "task", id).await?;
        let warnings = verify_task_readback(data, &row)?;
        Ok((row, warnings))
    }

    /// Complete a task; already-completed tasks are a no-op success
    pub async fn complete_task(&self, id: &str) -> Result<TaskRow, OmniError> {
        let payload = json!({ "id": id });
        let body = r#"  const task = Task.byIdentifier(P.id);
  if (!task) return JSON.stringify({found: false, what: "task", id: P.id});
  if (!task.completed) task.markComplete();
  return JSON.stringify({ok: true, item: serializeTask(task)});"#;

        self.run_item(&task_script(&payload, body), "task", id).await
    }

    /// Delete a task or project; readback is the tombstone
    pub async fn delete(&self, target: &str, id: &str) -> Result<DeleteOutcome, OmniError> {
        let payload = json!({ "id": id, "target": target });
        let body = r#"  const obj = P.target === "project" ? Project.byIdentifier(P.id) : Task.byIdentifier(P.id);
  if (!obj) return JSON.stringify({found: false, what: P.target, id: P.id});
  const name = obj.name;
  deleteObject(obj);
  return JSON.stringify({ok: true, item: {id: P.id, name: name}});"#;

        #[derive(serde::Deserialize)]
        struct Deleted {
            id: String,
            name: Option<String>,
        }
        let deleted: Deleted = self.run_item(&task_script(&payload, body), target, id).await?;
        Ok(DeleteOutcome {
            id: deleted.id,
            name: deleted.name,
        })
    }

    /// Delete many tasks in one script; the id list rides in the parsed
    /// payload, never in inline expressions
    pub async fn bulk_delete_tasks(&self, ids: &[String]) -> Result<BulkDeleteOutcome, OmniError> {
        let payload = json!({ "ids": ids });
        let body = r#"  const deleted = [];
  const missing = [];
  for (const id of P.ids) {
    const t = Task.byIdentifier(id);
    if (!t) { missing.push(id); continue; }
    deleteObject(t);
    deleted.push(id);
  }
  return JSON.stringify({ok: true, item: {deleted: deleted, missing: missing}});"#;

        #[derive(serde::Deserialize)]
        struct Bulk {
            deleted: Vec<String>,
            missing: Vec<String>,
        }
        let bulk: Bulk = self
            .run_item(&task_script(&payload, body), "tasks", "bulk")
            .await?;
        Ok(BulkDeleteOutcome {
            deleted: bulk.deleted,
            missing: bulk.missing,
        })
    }

    /// Move a task to the inbox, a project, or under a parent task
    ///
    /// The embedded move is canonical. If it fails, one outer-context
    /// container-assignment fallback runs; readback still goes through the
    /// embedded dialect so tags are observed correctly.
    pub async fn move_task(
        &self,
        id: &str,
        target: &MoveTarget,
    ) -> Result<(TaskRow, Vec<Warning>), OmniError> {
        let (target_kind, project_id, parent_id) = match target {
            MoveTarget::Inbox => ("inbox", None, None),
            MoveTarget::Project(p) => ("project", Some(p.as_str()), None),
            MoveTarget::Parent(p) => ("parent", None, Some(p.as_str())),
        };
        let payload = json!({
            "id": id,
            "target": target_kind,
            "projectId": project_id,
            "parentId": parent_id,
        });
        let body = r#"  const task = Task.byIdentifier(P.id);
  if (!task) return JSON.stringify({found: false, what: "task", id: P.id});
  let dest = null;
  if (P.target === "inbox") {
    dest = inbox.ending;
  } else if (P.target === "project") {
    const project = Project.byIdentifier(P.projectId);
    if (!project) return JSON.stringify({found: false, what: "project", id: P.projectId});
    dest = project;
  } else {
    const parent = Task.byIdentifier(P.parentId);
    if (!parent) return JSON.stringify({found: false, what: "parent task", id: P.parentId});
    dest = parent.ending;
  }
  moveTasks([task], dest);
  return JSON.stringify({ok: true, item: serializeTask(task)});"#;

        match self
            .run_item::<TaskRow>(&task_script(&payload, body), "task", id)
            .await
        {
            Ok(row) => Ok((row, Vec::new())),
            Err(OmniError::Script(e)) => {
                // Single fallback through the outer context, then re-read
                // through the embedded dialect
                warn!(error = %e, "embedded move failed, trying outer fallback");
                let fallback_project = match target {
                    MoveTarget::Project(p) => Some(p.as_str()),
                    MoveTarget::Inbox => None,
                    // Reparenting has no outer-context equivalent
                    MoveTarget::Parent(_) => return Err(e.into()),
                };
                let fallback = jxa::move_fallback(id, fallback_project);
                let result = self.runner.run(&fallback, None).await?;
                if result.get("moved").and_then(Value::as_bool) != Some(true) {
                    return Err(e.into());
                }
                let row = self.read_task(id).await?;
                let warnings = vec![Warning::new(
                    "MOVE_FALLBACK_USED",
                    "embedded move failed; the outer-context container assignment was used instead",
                )];
                Ok((row, warnings))
            }
            Err(other) => Err(other),
        }
    }

    /// Embedded-dialect read of one task (post-fallback readback and
    /// property-2 verification paths)
    pub async fn read_task(&self, id: &str) -> Result<TaskRow, OmniError> {
        let payload = json!({ "id": id });
        let body = r#"  const task = Task.byIdentifier(P.id);
  if (!task) return JSON.stringify({found: false, what: "task", id: P.id});
  return JSON.stringify({ok: true, item: serializeTask(task)});"#;
        self.run_item(&task_script(&payload, body), "task", id).await
    }

    /// Tag management; all actions read the affected tag back
    pub async fn tag_manage(&self, action: &TagAction) -> Result<TagRow, OmniError> {
        let (payload, body) = match action {
            TagAction::Create { path } => (
                json!({ "path": path }),
                r#"  const tag = ensureTagPath(P.path);
  return JSON.stringify({ok: true, item: serializeTag(tag)});"#,
            ),
            TagAction::Rename { tag, new_name } => (
                json!({ "tag": tag, "newName": new_name }),
                r#"  const tag = findTag(P.tag);
  if (!tag) return JSON.stringify({found: false, what: "tag", id: P.tag});
  tag.name = P.newName;
  return JSON.stringify({ok: true, item: serializeTag(tag)});"#,
            ),
            TagAction::Delete { tag } => (
                json!({ "tag": tag }),
                r#"  const tag = findTag(P.tag);
  if (!tag) return JSON.stringify({found: false, what: "tag", id: P.tag});
  const snapshot = serializeTag(tag);
  deleteObject(tag);
  return JSON.stringify({ok: true, item: snapshot});"#,
            ),
            TagAction::Merge { from, into } => (
                json!({ "from": from, "into": into }),
                r#"  const from = findTag(P.from);
  if (!from) return JSON.stringify({found: false, what: "tag", id: P.from});
  const into = findTag(P.into);
  if (!into) return JSON.stringify({found: false, what: "tag", id: P.into});
  for (const t of from.tasks) { t.addTag(into); t.removeTag(from); }
  deleteObject(from);
  return JSON.stringify({ok: true, item: serializeTag(into)});"#,
            ),
            TagAction::Nest { tag, parent } => (
                json!({ "tag": tag, "parent": parent }),
                r#"  const tag = findTag(P.tag);
  if (!tag) return JSON.stringify({found: false, what: "tag", id: P.tag});
  let parent = null;
  if (P.parent) {
    parent = findTag(P.parent);
    if (!parent) return JSON.stringify({found: false, what: "tag", id: P.parent});
  }
  moveTags([tag], parent ? parent.ending : tags.ending);
  return JSON.stringify({ok: true, item: serializeTag(tag)});"#,
            ),
        };

        let id_hint = match action {
            TagAction::Create { path } => path.clone(),
            TagAction::Rename { tag, .. }
            | TagAction::Delete { tag }
            | TagAction::Nest { tag, .. } => tag.clone(),
            TagAction::Merge { from, .. } => from.clone(),
        };
        self.run_item(&tag_script(&payload, body), "tag", &id_hint)
            .await
    }

    pub async fn create_project(&self, data: &ProjectData) -> Result<ProjectRow, OmniError> {
        let payload = data.payload(None);
        let body = r#"  let folder = null;
  if (P.folderId) {
    folder = Folder.byIdentifier(P.folderId);
    if (!folder) return JSON.stringify({found: false, what: "folder", id: P.folderId});
  }
  const project = new Project(P.name, folder);
  applyProjectChanges(project, P);
  return JSON.stringify({ok: true, item: serializeProject(project)});"#;
        self.run_item(&project_script(&payload, body), "project", "new")
            .await
    }

    pub async fn update_project(&self, id: &str, data: &ProjectData) -> Result<ProjectRow, OmniError> {
        let payload = data.payload(Some(id));
        let body = r#"  const project = Project.byIdentifier(P.id);
  if (!project) return JSON.stringify({found: false, what: "project", id: P.id});
  applyProjectChanges(project, P);
  return JSON.stringify({ok: true, item: serializeProject(project)});"#;
        self.run_item(&project_script(&payload, body), "project", id)
            .await
    }

    /// Stamp a project reviewed now; the next review date moves with the
    /// host's review interval
    pub async fn mark_project_reviewed(&self, id: &str) -> Result<ProjectRow, OmniError> {
        let payload = json!({ "id": id });
        let body = r#"  const project = Project.byIdentifier(P.id);
  if (!project) return JSON.stringify({found: false, what: "project", id: P.id});
  project.lastReviewDate = new Date();
  return JSON.stringify({ok: true, item: serializeProject(project)});"#;
        self.run_item(&project_script(&payload, body), "project", id)
            .await
    }

    /// List projects matching a name reference (dispatch resolves ambiguity)
    pub async fn lookup_projects(&self, reference: &str) -> Result<Vec<Value>, OmniError> {
        let payload = json!({ "ref": reference });
        let inner = format!(
            "(() => {{\n  const P = JSON.parse({});\n  const byId = Project.byIdentifier(P.ref);\n  if (byId) {{\n    return JSON.stringify({{items: [{{id: byId.id.primaryKey, name: byId.name, exact: true}}]}});\n  }}\n  const lower = P.ref.toLowerCase();\n  const items = [];\n  for (const p of flattenedProjects) {{\n    const name = p.name.toLowerCase();\n    if (name === lower) {{\n      items.push({{id: p.id.primaryKey, name: p.name, exact: true}});\n    }} else if (name.indexOf(lower) !== -1) {{\n      items.push({{id: p.id.primaryKey, name: p.name, exact: false}});\n    }}\n  }}\n  return JSON.stringify({{items: items}});\n}})()",
            js_str(&payload.to_string())
        );
        let value = self.runner.run(&wrap_embedded(&inner), None).await?;
        let items = value
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| BridgeError::ReadbackShape {
                detail: format!("lookup returned {value}"),
            })?;
        Ok(items)
    }

    async fn run_item<T: DeserializeOwned>(
        &self,
        script: &str,
        entity: &str,
        id: &str,
    ) -> Result<T, OmniError> {
        debug!(entity = entity, bytes = script.len(), "running bridge script");
        let value = self.runner.run(script, None).await?;
        Ok(parse_item(value, entity, id)?)
    }
}

// ============================================================================
// SCRIPT ASSEMBLY
// ============================================================================

const PARSE_DATE_FN: &str = "function parseDate(s) { return s ? new Date(s) : null; }";

const FIND_TAG_FN: &str = r#"function findTag(ref) {
  for (const t of flattenedTags) {
    if (t.id.primaryKey === ref) return t;
  }
  const parts = ref.split(":").map(s => s.trim()).filter(s => s.length > 0);
  let parent = null;
  let tag = null;
  for (const name of parts) {
    const coll = parent ? parent.children : tags;
    tag = null;
    for (const x of coll) {
      if (x.name.toLowerCase() === name.toLowerCase()) { tag = x; break; }
    }
    if (!tag) return null;
    parent = tag;
  }
  return tag;
}"#;

const SERIALIZE_TAG_FN: &str = r#"function tagPath(t) {
  const parts = [t.name];
  let p = t.parent;
  while (p) { parts.unshift(p.name); p = p.parent; }
  return parts.join(" : ");
}
function serializeTag(t) {
  return {
    id: t.id.primaryKey,
    name: t.name,
    parentId: t.parent ? t.parent.id.primaryKey : null,
    path: tagPath(t),
    taskCount: t.remainingTasks.length
  };
}"#;

const APPLY_REPEAT_FN: &str = r#"function applyRepeat(task, r) {
  const method = r.method === "DeferUntilDate" ? Task.RepetitionMethod.DeferUntilDate
    : r.method === "DueDate" ? Task.RepetitionMethod.DueDate
    : Task.RepetitionMethod.Fixed;
  task.repetitionRule = new Task.RepetitionRule(r.ruleString, method);
}"#;

const APPLY_CHANGES_FN: &str = r#"function applyChanges(task, P, creating) {
  if (!creating && P.name !== null) task.name = P.name;
  if (P.note !== null) task.note = P.note;
  if (P.flagged !== null) task.flagged = P.flagged;
  if (P.dueDate !== null) task.dueDate = parseDate(P.dueDate);
  if (P.clearDueDate) task.dueDate = null;
  if (P.deferDate !== null) task.deferDate = parseDate(P.deferDate);
  if (P.clearDeferDate) task.deferDate = null;
  if (P.plannedDate !== null) task.plannedDate = parseDate(P.plannedDate);
  if (P.clearPlannedDate) task.plannedDate = null;
  if (P.estimatedMinutes !== null) task.estimatedMinutes = P.estimatedMinutes;
  if (P.sequential !== null) task.sequential = P.sequential;
  if (!creating && P.projectId) {
    const project = Project.byIdentifier(P.projectId);
    if (project) moveTasks([task], project);
  }
  if (!creating && P.moveToInbox) moveTasks([task], inbox.ending);
  if (!creating && P.parentId) {
    const parent = Task.byIdentifier(P.parentId);
    if (parent) moveTasks([task], parent.ending);
  }
  if (P.tags !== null) {
    task.clearTags();
    for (const path of P.tags) task.addTag(ensureTagPath(path));
  }
  for (const path of P.addTags) task.addTag(ensureTagPath(path));
  for (const path of P.removeTags) {
    const tag = findTag(path);
    if (tag) task.removeTag(tag);
  }
  if (P.repeat) applyRepeat(task, P.repeat);
  if (P.clearRepeat) task.repetitionRule = null;
}"#;

const APPLY_PROJECT_CHANGES_FN: &str = r#"function applyProjectChanges(project, P) {
  if (P.name !== null) project.name = P.name;
  if (P.note !== null) project.note = P.note;
  if (P.sequential !== null) project.sequential = P.sequential;
  if (P.status !== null) {
    project.status = P.status === "on_hold" ? Project.Status.OnHold
      : P.status === "done" ? Project.Status.Done
      : P.status === "dropped" ? Project.Status.Dropped
      : Project.Status.Active;
  }
  if (P.reviewIntervalWeeks !== null) {
    project.reviewInterval = {unit: "weeks", steps: P.reviewIntervalWeeks, fixed: false};
  }
  if (P.dueDate !== null) project.dueDate = parseDate(P.dueDate);
  if (P.clearDueDate) project.dueDate = null;
}"#;

fn task_script(payload: &Value, body: &str) -> String {
    let inner = format!(
        "(() => {{\n  const P = JSON.parse({payload});\n  {fmt}\n  {serialize}\n  {parse_date}\n  {ensure_tag}\n  {find_tag}\n  {apply_repeat}\n  {apply_changes}\n{body}\n}})()",
        payload = js_str(&payload.to_string()),
        fmt = FMT_FN,
        serialize = SERIALIZE_TASK_FN,
        parse_date = PARSE_DATE_FN,
        ensure_tag = ENSURE_TAG_PATH_FN,
        find_tag = FIND_TAG_FN,
        apply_repeat = APPLY_REPEAT_FN,
        apply_changes = APPLY_CHANGES_FN,
        body = body,
    );
    wrap_embedded(&inner)
}

fn tag_script(payload: &Value, body: &str) -> String {
    let inner = format!(
        "(() => {{\n  const P = JSON.parse({payload});\n  {ensure_tag}\n  {find_tag}\n  {serialize}\n{body}\n}})()",
        payload = js_str(&payload.to_string()),
        ensure_tag = ENSURE_TAG_PATH_FN,
        find_tag = FIND_TAG_FN,
        serialize = SERIALIZE_TAG_FN,
        body = body,
    );
    wrap_embedded(&inner)
}

fn project_script(payload: &Value, body: &str) -> String {
    let inner = format!(
        "(() => {{\n  const P = JSON.parse({payload});\n  {fmt}\n  {serialize}\n  {parse_date}\n  {apply}\n{body}\n}})()",
        payload = js_str(&payload.to_string()),
        fmt = FMT_FN,
        serialize = SERIALIZE_PROJECT_FN,
        parse_date = PARSE_DATE_FN,
        apply = APPLY_PROJECT_CHANGES_FN,
        body = body,
    );
    wrap_embedded(&inner)
}

// ============================================================================
// READBACK
// ============================================================================

fn parse_item<T: DeserializeOwned>(value: Value, entity: &str, id: &str) -> Result<T, BridgeError> {
    if value.get("found").and_then(Value::as_bool) == Some(false) {
        let what = value
            .get("what")
            .and_then(Value::as_str)
            .unwrap_or(entity)
            .to_string();
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(id)
            .to_string();
        return Err(BridgeError::NotFound { entity: what, id });
    }
    let item = value
        .get("item")
        .cloned()
        .ok_or_else(|| BridgeError::ReadbackShape {
            detail: format!("no item in {value}"),
        })?;
    serde_json::from_value(item).map_err(|e| BridgeError::ReadbackShape {
        detail: e.to_string(),
    })
}

/// Compare the requested change set with what the readback shows
///
/// The due-date clear is the sanctioned exception: the host ignores the nil
/// assignment silently, so a surviving due date becomes a warning, not an
/// error. Everything else that fails to stick is a hard mismatch.
fn verify_task_readback(data: &TaskData, row: &TaskRow) -> Result<Vec<Warning>, BridgeError> {
    let mut warnings = Vec::new();

    if let Some(ref name) = data.name {
        if row.name.as_deref() != Some(name.as_str()) {
            return Err(mismatch("name", name, &row.name));
        }
    }
    if let Some(flagged) = data.flagged {
        if row.flagged != Some(flagged) {
            return Err(mismatch("flagged", &flagged, &row.flagged));
        }
    }
    if let Some(ref note) = data.note {
        if row.note.as_deref() != Some(note.as_str()) {
            return Err(mismatch("note", note, &row.note));
        }
    }

    verify_date("dueDate", data.due_date.as_deref(), row.due_date.as_deref())?;
    verify_date(
        "deferDate",
        data.defer_date.as_deref(),
        row.defer_date.as_deref(),
    )?;
    verify_date(
        "plannedDate",
        data.planned_date.as_deref(),
        row.planned_date.as_deref(),
    )?;

    if data.clear_due_date && row.due_date.is_some() {
        warnings.push(Warning::new(
            "BRIDGE_READBACK_MISMATCH",
            "the host ignored the due-date clear; the previous due date is still set",
        ));
    }
    if data.clear_defer_date && row.defer_date.is_some() {
        return Err(mismatch("deferDate", &"null", &row.defer_date));
    }

    let row_tags: Vec<String> = row
        .tags
        .clone()
        .unwrap_or_default()
        .iter()
        .map(|t| t.to_lowercase())
        .collect();
    let wanted: Vec<&str> = data
        .tags
        .iter()
        .flatten()
        .chain(data.add_tags.iter())
        .map(|p| leaf_name(p))
        .collect();
    for tag in wanted {
        if !row_tags.contains(&tag.to_lowercase()) {
            return Err(BridgeError::ReadbackMismatch {
                field: "tags".into(),
                detail: format!("tag '{tag}' missing after write; readback saw {row_tags:?}"),
            });
        }
    }
    for path in &data.remove_tags {
        let leaf = leaf_name(path).to_lowercase();
        if row_tags.contains(&leaf) {
            return Err(BridgeError::ReadbackMismatch {
                field: "tags".into(),
                detail: format!("tag '{leaf}' still present after removal"),
            });
        }
    }

    if data.repeat.is_some() && row.repetition_rule.is_none() {
        return Err(mismatch("repeatRule", &"rule", &row.repetition_rule));
    }
    if data.clear_repeat && row.repetition_rule.is_some() {
        return Err(mismatch("repeatRule", &"null", &row.repetition_rule));
    }

    Ok(warnings)
}

fn verify_date(field: &str, requested: Option<&str>, actual: Option<&str>) -> Result<(), BridgeError> {
    let Some(requested) = requested else {
        return Ok(());
    };
    let want = dates::parse_wire(requested).ok();
    let got = actual.and_then(|s| dates::parse_wire(s).ok());
    // Compare to minute precision, the wire form's resolution
    let trunc = |d: chrono::NaiveDateTime| d.format("%Y-%m-%d %H:%M").to_string();
    match (want, got) {
        (Some(w), Some(g)) if trunc(w) == trunc(g) => Ok(()),
        _ => Err(BridgeError::ReadbackMismatch {
            field: field.into(),
            detail: format!("requested {requested}, readback saw {actual:?}"),
        }),
    }
}

fn mismatch<A: std::fmt::Debug, B: std::fmt::Debug>(field: &str, want: &A, got: &B) -> BridgeError {
    BridgeError::ReadbackMismatch {
        field: field.into(),
        detail: format!("requested {want:?}, readback saw {got:?}"),
    }
}

fn leaf_name(path: &str) -> &str {
    path.rsplit(':').next().unwrap_or(path).trim()
}

fn required_str(key: &str, v: &Value) -> Result<String, String> {
    v.as_str()
        .map(String::from)
        .ok_or_else(|| format!("{key} must be a string"))
}

fn str_list(key: &str, v: &Value) -> Result<Vec<String>, String> {
    v.as_array()
        .ok_or_else(|| format!("{key} must be an array of strings"))?
        .iter()
        .map(|x| {
            x.as_str()
                .map(String::from)
                .ok_or_else(|| format!("{key} entries must be strings"))
        })
        .collect()
}

fn wire_date(key: &str, v: &Value) -> Result<String, String> {
    let raw = v.as_str().ok_or_else(|| format!("{key} must be a date string"))?;
    dates::parse_wire(raw)
        .map(|_| raw.trim().to_string())
        .map_err(|e| e.to_string())
}

fn iso_local(wire: &str) -> String {
    dates::parse_wire(wire)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|_| wire.to_string())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{MockExecutor, RobustRunner, ScriptError};
    use std::time::Duration;

    fn bridge_with(mock: Arc<MockExecutor>) -> Bridge {
        let runner = RobustRunner::new(mock, Duration::from_secs(300));
        Bridge::new(Arc::new(runner))
    }

    fn task_item(extra: Value) -> Value {
        let mut base = json!({
            "id": "t-1",
            "name": "Buy milk",
            "flagged": false,
            "completed": false,
            "inInbox": true,
            "tags": [],
        });
        base.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        json!({"ok": true, "item": base})
    }

    #[tokio::test]
    async fn create_reads_back_in_same_script() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(task_item(json!({"tags": ["@urgent"]})));
        let bridge = bridge_with(mock.clone());

        let mut data = TaskData::default();
        data.name = Some("Buy milk".into());
        data.add_tags = vec!["@urgent".into()];

        let (row, warnings) = bridge.create_task(&data).await.unwrap();
        assert_eq!(row.id, "t-1");
        // The same response carries the tag, no second read needed
        assert_eq!(row.tags.unwrap(), vec!["@urgent"]);
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn create_script_writes_and_serializes_in_one_evaluation() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(task_item(json!({})));
        let bridge = bridge_with(mock.clone());

        let mut data = TaskData::default();
        data.name = Some("Buy milk".into());
        let _ = bridge.create_task(&data).await;

        let script = mock.last_script().unwrap();
        assert!(script.contains("evaluateJavascript"));
        assert!(script.contains("JSON.parse"));
        assert!(script.contains("serializeTask"));
        assert!(script.contains("new Task"));
    }

    #[tokio::test]
    async fn tag_readback_mismatch_is_an_error() {
        let mock = Arc::new(MockExecutor::new());
        // Write "succeeds" but the readback shows no tags
        mock.push_ok(task_item(json!({"tags": []})));
        let bridge = bridge_with(mock);

        let mut data = TaskData::default();
        data.name = Some("Buy milk".into());
        data.add_tags = vec!["@urgent".into()];

        let err = bridge.create_task(&data).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::BridgeReadbackMismatch);
    }

    #[tokio::test]
    async fn due_date_clear_survival_is_a_warning_not_an_error() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(task_item(json!({"dueDate": "2025-03-20 09:00"})));
        let bridge = bridge_with(mock);

        let mut data = TaskData::default();
        data.clear_due_date = true;

        let (row, warnings) = bridge.update_task("t-1", &data).await.unwrap();
        assert!(row.due_date.is_some());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, "BRIDGE_READBACK_MISMATCH");
    }

    #[tokio::test]
    async fn missing_task_is_not_found() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(json!({"found": false, "what": "task", "id": "nope"}));
        let bridge = bridge_with(mock);

        let err = bridge.complete_task("nope").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn complete_is_guarded_for_idempotence() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(task_item(json!({"completed": true})));
        let bridge = bridge_with(mock.clone());

        let row = bridge.complete_task("t-1").await.unwrap();
        assert_eq!(row.completed, Some(true));

        // The script itself guards the second completion
        let script = mock.last_script().unwrap();
        assert!(script.contains("if (!task.completed) task.markComplete()"));
    }

    #[tokio::test]
    async fn move_falls_back_once_then_reads_back_embedded() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_err(ScriptError::Failed {
            exit_code: Some(1),
            stderr: "moveTasks failed".into(),
        });
        mock.push_ok(json!({"moved": true}));
        mock.push_ok(task_item(json!({"projectId": "p-9", "inInbox": false})));
        let bridge = bridge_with(mock.clone());

        let (row, warnings) = bridge
            .move_task("t-1", &MoveTarget::Project("p-9".into()))
            .await
            .unwrap();
        assert_eq!(row.project_id.as_deref(), Some("p-9"));
        assert_eq!(warnings[0].code, "MOVE_FALLBACK_USED");

        let scripts = mock.scripts();
        assert_eq!(scripts.len(), 3);
        // Embedded attempt, outer fallback, embedded readback
        assert!(scripts[0].contains("moveTasks"));
        assert!(scripts[1].contains("assignedContainer"));
        assert!(scripts[2].contains("serializeTask"));
        assert!(scripts[2].contains("evaluateJavascript"));
    }

    #[tokio::test]
    async fn bulk_delete_ships_ids_as_parsed_payload() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(json!({"ok": true, "item": {"deleted": ["a", "b"], "missing": ["c"]}}));
        let bridge = bridge_with(mock.clone());

        let ids: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        let outcome = bridge.bulk_delete_tasks(&ids).await.unwrap();
        assert_eq!(outcome.deleted, vec!["a", "b"]);
        assert_eq!(outcome.missing, vec!["c"]);

        let script = mock.last_script().unwrap();
        assert!(script.contains("JSON.parse"));
        // Ids live in the payload string, not in inline array expressions
        assert!(!script.contains("[\"a\", \"b\", \"c\"]"));
        assert!(script.contains("for (const id of P.ids)"));
    }

    #[tokio::test]
    async fn repeat_intent_travels_translated() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(task_item(json!({"repetitionRule": "FREQ=WEEKLY"})));
        let bridge = bridge_with(mock.clone());

        let mut data = TaskData::default();
        data.repeat = Some(RepeatIntent {
            frequency: Frequency::Parts {
                unit: FrequencyUnit::Weekly,
                interval: 1,
            },
            anchor_to: AnchorTo::WhenDeferred,
            skip_missed: true,
        });

        let (_, warnings) = bridge.update_task("t-1", &data).await.unwrap();
        assert!(warnings.is_empty());

        let script = mock.last_script().unwrap();
        assert!(script.contains("FREQ=WEEKLY"));
        assert!(script.contains("DeferUntilDate"));
        assert!(script.contains("FromCompletion"));
    }

    #[tokio::test]
    async fn clear_repeat_must_be_observable() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(task_item(json!({"repetitionRule": "FREQ=DAILY"})));
        let bridge = bridge_with(mock);

        let mut data = TaskData::default();
        data.clear_repeat = true;

        let err = bridge.update_task("t-1", &data).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::BridgeReadbackMismatch);
    }

    #[tokio::test]
    async fn tag_create_uses_nested_path_helper() {
        let mock = Arc::new(MockExecutor::new());
        mock.push_ok(json!({"ok": true, "item": {
            "id": "g-3", "name": "deep", "parentId": "g-2", "path": "a : b : deep", "taskCount": 0
        }}));
        let bridge = bridge_with(mock.clone());

        let tag = bridge
            .tag_manage(&TagAction::Create {
                path: "a : b : deep".into(),
            })
            .await
            .unwrap();
        assert_eq!(tag.path.as_deref(), Some("a : b : deep"));

        let script = mock.last_script().unwrap();
        assert!(script.contains("ensureTagPath"));
    }

    #[test]
    fn task_data_parses_null_as_clear() {
        let data = TaskData::from_value(&json!({
            "name": "x",
            "dueDate": null,
            "deferDate": "2025-03-20",
            "repeatRule": null
        }))
        .unwrap();
        assert!(data.clear_due_date);
        assert!(data.due_date.is_none());
        assert_eq!(data.defer_date.as_deref(), Some("2025-03-20"));
        assert!(data.clear_repeat);
    }

    #[test]
    fn task_data_rejects_unknown_keys_and_bad_dates() {
        assert!(TaskData::from_value(&json!({"priority": 5}))
            .unwrap_err()
            .contains("unknown field"));
        assert!(TaskData::from_value(&json!({"dueDate": "2025-03-20T00:00:00Z"}))
            .unwrap_err()
            .contains("timezone"));
    }

    #[test]
    fn leaf_name_takes_last_segment() {
        assert_eq!(leaf_name("a : b : c"), "c");
        assert_eq!(leaf_name("solo"), "solo");
    }
}
