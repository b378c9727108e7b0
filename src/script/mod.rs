//! Script Execution Subsystem
//!
//! `runner` spawns the osascript interpreter and owns size limits and
//! timeouts; `robust` wraps it with staleness detection and the diagnosis
//! cascade; `builder` emits the two target dialects; `probes` holds the
//! health-check scripts; `mock` is the scripted fake every test runs against.

pub mod builder;
pub mod mock;
pub mod probes;
pub mod robust;
pub mod runner;

pub use mock::MockExecutor;
pub use robust::RobustRunner;
pub use runner::ScriptRunner;

use async_trait::async_trait;
use serde_json::Value;
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

use crate::error::ErrorCode;

// ============================================================================
// EXECUTOR TRAIT
// ============================================================================

/// Anything that can execute a target-dialect script and return its output
///
/// The real implementation is `ScriptRunner`; tests substitute
/// `MockExecutor`. The `timeout` overrides the configured per-call default
/// when present.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, script: &str, timeout: Option<Duration>) -> Result<Value, ScriptError>;
}

// ============================================================================
// ERRORS
// ============================================================================

/// Script Runner faults, surfaced verbatim with their structured codes
#[derive(Error, Debug, Clone)]
pub enum ScriptError {
    /// The host silently truncates oversized scripts, so the ceiling is
    /// enforced before spawn
    #[error("script is {size} bytes, over the {limit} byte ceiling")]
    TooLarge { size: usize, limit: usize },

    #[error("host output looked like JSON but failed to parse: {detail}")]
    InvalidJson { detail: String },

    #[error("script failed (exit {exit_code:?}): {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("could not spawn the scripting interpreter: {detail}")]
    Spawn { detail: String },

    #[error("script timed out after {ms} ms")]
    Timeout { ms: u64 },
}

impl ScriptError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ScriptError::TooLarge { .. } => ErrorCode::ScriptTooLarge,
            ScriptError::InvalidJson { .. } => ErrorCode::InvalidJson,
            ScriptError::Failed { .. } => ErrorCode::ScriptFailed,
            ScriptError::Spawn { .. } => ErrorCode::SpawnFailed,
            ScriptError::Timeout { .. } => ErrorCode::Timeout,
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            ScriptError::TooLarge { size, limit } => Some(serde_json::json!({
                "script_bytes": size,
                "limit_bytes": limit,
            })),
            ScriptError::Failed { exit_code, stderr } => Some(serde_json::json!({
                "exit_code": exit_code,
                "stderr": stderr,
            })),
            _ => None,
        }
    }
}

// ============================================================================
// SCRIPT WRAPPING
// ============================================================================

/// The IIFE preamble that binds the application handle
///
/// Every outer-dialect script needs the handle before touching the document;
/// scripts from the builder arrive wrapped already and pass through verbatim
/// to avoid double-wrapping.
pub fn ensure_wrapped(script: &str) -> Cow<'_, str> {
    if is_wrapped(script) {
        Cow::Borrowed(script)
    } else {
        Cow::Owned(format!(
            "(() => {{\n  const app = Application(\"OmniFocus\");\n  app.includeStandardAdditions = true;\n  const doc = app.defaultDocument;\n{script}\n}})()"
        ))
    }
}

fn is_wrapped(script: &str) -> bool {
    let head = script.trim_start();
    head.starts_with("(()") || head.starts_with("(function") || head.starts_with("(async")
}
