//! Health probe scripts (outer dialect)
//!
//! Small JXA programs the Robust Runner uses to tell *where* the connection
//! is broken: interpreter, application, document, or the core collections.
//! Each returns `{"ok": true, ...}` on success so the caller can distinguish
//! a failing probe from a probe that ran but found trouble.

use serde_json::Value;

/// Near-free ping used after the staleness window
pub const PING: &str = r#"(() => {
  return JSON.stringify({ok: true});
})()"#;

/// Is the application itself scriptable
pub const APP: &str = r#"(() => {
  const app = Application("OmniFocus");
  return JSON.stringify({ok: true, name: app.name()});
})()"#;

/// Is a document open and reachable
pub const DOCUMENT: &str = r#"(() => {
  const app = Application("OmniFocus");
  const doc = app.defaultDocument;
  return JSON.stringify({ok: doc !== null && doc.name() !== null});
})()"#;

/// Are the core collections iterable
pub const COLLECTIONS: &str = r#"(() => {
  const app = Application("OmniFocus");
  const doc = app.defaultDocument;
  const tasks = doc.flattenedTasks.length;
  const projects = doc.flattenedProjects.length;
  return JSON.stringify({ok: tasks >= 0 && projects >= 0, tasks: tasks, projects: projects});
})()"#;

/// A probe passed when it ran and reported `ok: true`
pub fn passed(result: &Value) -> bool {
    result.get("ok").and_then(Value::as_bool) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn probes_are_wrapped_and_small() {
        for probe in [PING, APP, DOCUMENT, COLLECTIONS] {
            assert!(probe.trim_start().starts_with("(()"));
            assert!(probe.len() < 1_000);
            assert!(probe.contains("JSON.stringify"));
        }
    }

    #[test]
    fn passed_requires_ok_true() {
        assert!(passed(&json!({"ok": true, "tasks": 3})));
        assert!(!passed(&json!({"ok": false})));
        assert!(!passed(&json!({})));
        assert!(!passed(&json!(null)));
    }
}
