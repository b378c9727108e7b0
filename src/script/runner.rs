//! Script Runner: osascript child processes
//!
//! One child per call: the script goes in on stdin, stdout comes back parsed.
//! The byte ceiling is checked before spawn because the host truncates
//! oversized scripts without an error, and a truncated script can half-run.
//! A semaphore caps in-flight children; the host serializes them anyway.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use super::{ensure_wrapped, Executor, ScriptError};
use crate::config::Config;

/// Timeout for the synchronous host availability check
const HOST_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Executes target-dialect scripts in an external osascript interpreter
pub struct ScriptRunner {
    config: Config,
    permits: Arc<Semaphore>,
}

impl ScriptRunner {
    pub fn new(config: Config) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency));
        Self { config, permits }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Check whether the osascript interpreter responds at all (5s budget)
    ///
    /// Synchronous on purpose: this backs the `diagnose` CLI path, which has
    /// no runtime yet.
    pub fn host_available(&self) -> bool {
        std::process::Command::new(&self.config.osascript_path)
            .args(["-l", "JavaScript", "-e", "1"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .and_then(|mut child| match child.wait_timeout(HOST_CHECK_TIMEOUT)? {
                Some(status) => Ok(status.success()),
                None => {
                    let _ = child.kill();
                    Ok(false)
                }
            })
            .unwrap_or(false)
    }

    async fn execute(&self, script: &str, timeout: Duration) -> Result<Value, ScriptError> {
        let size = script.len();
        if size > self.config.max_script_size {
            // Refused before spawn; no child process is created
            return Err(ScriptError::TooLarge {
                size,
                limit: self.config.max_script_size,
            });
        }

        let script = ensure_wrapped(script);

        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ScriptError::Spawn {
                detail: e.to_string(),
            })?;

        debug!(bytes = size, timeout_ms = timeout.as_millis() as u64, "spawning osascript");

        let mut child = Command::new(&self.config.osascript_path)
            .args(["-l", "JavaScript", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScriptError::Spawn {
                detail: e.to_string(),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| ScriptError::Spawn {
            detail: "child stdin was not captured".into(),
        })?;
        stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|e| ScriptError::Spawn {
                detail: format!("writing script to stdin: {e}"),
            })?;
        drop(stdin);

        // kill_on_drop reaps the child when the timeout drops the future
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ScriptError::Spawn {
                detail: format!("waiting for child: {e}"),
            })?,
            Err(_) => {
                let ms = timeout.as_millis() as u64;
                warn!(timeout_ms = ms, "osascript call timed out, child killed");
                return Err(ScriptError::Timeout { ms });
            }
        };

        if !output.status.success() {
            return Err(ScriptError::Failed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_stdout(&String::from_utf8_lossy(&output.stdout))?)
    }
}

#[async_trait]
impl Executor for ScriptRunner {
    async fn run(&self, script: &str, timeout: Option<Duration>) -> Result<Value, ScriptError> {
        let timeout = timeout.unwrap_or(self.config.script_timeout);
        self.execute(script, timeout).await
    }
}

/// Parse host stdout: JSON document, raw string, or null on empty
fn parse_stdout(raw: &str) -> Result<Value, ScriptError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| ScriptError::InvalidJson {
            detail: e.to_string(),
        });
    }
    // Quoted scalars round-trip through JSON too; anything else is raw text
    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(trimmed.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_script_is_refused_before_spawn() {
        let runner = ScriptRunner::new(
            Config::default()
                .with_max_script_size(100)
                .with_osascript_path("/definitely/not/a/real/binary"),
        );
        let script = "x".repeat(101);

        let err = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(runner.run(&script, None))
            .unwrap_err();

        // Spawn would have failed with the bogus path, so hitting TooLarge
        // proves the ceiling ran first
        match err {
            ScriptError::TooLarge { size, limit } => {
                assert_eq!(size, 101);
                assert_eq!(limit, 100);
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn boundary_sizes() {
        let runner = ScriptRunner::new(
            Config::default().with_osascript_path("/definitely/not/a/real/binary"),
        );
        let rt = tokio::runtime::Runtime::new().unwrap();

        // One under the ceiling passes the size gate (and dies at spawn)
        let just_under = "x".repeat(99_999);
        assert!(matches!(
            rt.block_on(runner.run(&just_under, None)).unwrap_err(),
            ScriptError::Spawn { .. }
        ));

        // One over is refused
        let just_over = "x".repeat(100_001);
        assert!(matches!(
            rt.block_on(runner.run(&just_over, None)).unwrap_err(),
            ScriptError::TooLarge { .. }
        ));
    }

    #[test]
    fn missing_interpreter_is_spawn_failed() {
        let runner = ScriptRunner::new(
            Config::default().with_osascript_path("/definitely/not/a/real/binary"),
        );
        let err = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(runner.run("1", None))
            .unwrap_err();
        assert!(matches!(err, ScriptError::Spawn { .. }));
    }

    #[test]
    fn host_available_is_false_for_missing_binary() {
        let runner = ScriptRunner::new(
            Config::default().with_osascript_path("/definitely/not/a/real/binary"),
        );
        assert!(!runner.host_available());
    }

    #[test]
    fn stdout_parsing_shapes() {
        assert_eq!(parse_stdout("").unwrap(), Value::Null);
        assert_eq!(parse_stdout("  \n").unwrap(), Value::Null);
        assert_eq!(
            parse_stdout("{\"ok\": true}").unwrap(),
            serde_json::json!({"ok": true})
        );
        assert_eq!(
            parse_stdout("[1, 2]").unwrap(),
            serde_json::json!([1, 2])
        );
        assert_eq!(
            parse_stdout("plain text result").unwrap(),
            Value::String("plain text result".into())
        );
        // JSON-shaped but broken is a typed error, not a silent string
        assert!(matches!(
            parse_stdout("{broken"),
            Err(ScriptError::InvalidJson { .. })
        ));
    }
}
