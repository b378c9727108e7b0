//! # Omnibridge Error Module
//!
//! Unified error handling with recovery suggestions.
//!
//! Each subsystem declares its own `thiserror` enum next to the code that
//! raises it (`script::ScriptError`, `script::robust::HealthError`,
//! `query::QueryError`, `dispatch::DispatchError`, `bridge::BridgeError`,
//! `export::ExportError`). This module provides:
//!
//! - `ErrorCode`: the closed code set that reaches LLM-side callers
//! - A `Suggestion` trait for unified recovery-hint access
//! - `OmniError`: the top-level enum wrapping the subsystem errors
//!
//! The Response Shaper consumes `OmniError` and copies code, message and
//! suggestion into the envelope's `error` slot. No stack traces leak.

use thiserror::Error;

// ============================================================================
// ERROR CODES
// ============================================================================

/// The closed error code set. Every error that reaches a caller carries
/// exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Input and reference errors
    ValidationError,
    NotFound,
    MultipleMatches,

    // Script Runner faults
    ScriptTooLarge,
    InvalidJson,
    ScriptFailed,
    SpawnFailed,
    Timeout,

    // Robust Runner diagnoses
    ConnectionLost,
    AppUnreachable,
    DocUnreachable,
    CollectionUnreachable,
    ExecutionFailingDespiteHealth,

    // Bridge Protocol
    BridgeReadbackMismatch,

    // Export side effects
    PermissionDenied,
    DiskFull,
    PathNotFound,

    // Batch mutations
    AtomicOperationFailed,
}

impl ErrorCode {
    /// Wire representation used in the response envelope
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::MultipleMatches => "MULTIPLE_MATCHES",
            ErrorCode::ScriptTooLarge => "SCRIPT_TOO_LARGE",
            ErrorCode::InvalidJson => "INVALID_JSON",
            ErrorCode::ScriptFailed => "SCRIPT_FAILED",
            ErrorCode::SpawnFailed => "SPAWN_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
            ErrorCode::AppUnreachable => "APP_UNREACHABLE",
            ErrorCode::DocUnreachable => "DOC_UNREACHABLE",
            ErrorCode::CollectionUnreachable => "COLLECTION_UNREACHABLE",
            ErrorCode::ExecutionFailingDespiteHealth => "EXECUTION_FAILING_DESPITE_HEALTH",
            ErrorCode::BridgeReadbackMismatch => "BRIDGE_READBACK_MISMATCH",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::DiskFull => "DISK_FULL",
            ErrorCode::PathNotFound => "PATH_NOT_FOUND",
            ErrorCode::AtomicOperationFailed => "ATOMIC_OPERATION_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SUGGESTION TRAIT
// ============================================================================

/// Trait for errors that can provide recovery suggestions
///
/// Suggestions are concrete and actionable ("reduce batch size", "retry after
/// the host wakes"), or absent when no deterministic recovery exists.
pub trait Suggestion {
    /// Get a recovery suggestion for this error, if available
    fn suggestion(&self) -> Option<&str>;
}

// ============================================================================
// OMNI ERROR (Top-level)
// ============================================================================

/// Top-level error type wrapping the subsystem errors
///
/// Everything above the Script Runner propagates through this type; the
/// dispatch layer folds it into the response envelope.
#[derive(Error, Debug)]
pub enum OmniError {
    /// Script Runner fault (size, spawn, exit, timeout, output parse)
    #[error("{0}")]
    Script(#[from] crate::script::ScriptError),

    /// Robust Runner diagnosis (staleness, probe cascade)
    #[error("{0}")]
    Health(#[from] crate::script::robust::HealthError),

    /// Query compilation error (bad filter, bad date, bad mode)
    #[error("{0}")]
    Query(#[from] crate::query::QueryError),

    /// Tool dispatch error (bad input shape, references, batch graph)
    #[error("{0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),

    /// Bridge protocol error (readback did not reflect the write)
    #[error("{0}")]
    Bridge(#[from] crate::bridge::BridgeError),

    /// Export side-effect failure
    #[error("{0}")]
    Export(#[from] crate::export::ExportError),
}

impl OmniError {
    /// The closed code surfaced to callers
    pub fn code(&self) -> ErrorCode {
        match self {
            OmniError::Script(e) => e.code(),
            OmniError::Health(e) => e.code(),
            OmniError::Query(_) => ErrorCode::ValidationError,
            OmniError::Dispatch(e) => e.code(),
            OmniError::Bridge(e) => e.code(),
            OmniError::Export(e) => e.code(),
        }
    }

    /// Structured details for the envelope, where the error carries any
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            OmniError::Dispatch(e) => e.details(),
            OmniError::Script(e) => e.details(),
            _ => None,
        }
    }
}

impl Suggestion for OmniError {
    fn suggestion(&self) -> Option<&str> {
        match self {
            OmniError::Script(e) => e.suggestion(),
            OmniError::Health(e) => e.suggestion(),
            OmniError::Query(e) => e.suggestion(),
            OmniError::Dispatch(e) => e.suggestion(),
            OmniError::Bridge(e) => e.suggestion(),
            OmniError::Export(e) => e.suggestion(),
        }
    }
}

// ============================================================================
// SUGGESTION IMPLEMENTATIONS
// ============================================================================

impl Suggestion for crate::script::ScriptError {
    fn suggestion(&self) -> Option<&str> {
        use crate::script::ScriptError;

        match self {
            ScriptError::TooLarge { .. } => Some(
                "Reduce the query scope or batch size; the host truncates oversized scripts silently, so the ceiling is enforced here",
            ),
            ScriptError::InvalidJson { .. } => {
                Some("The host returned malformed output; retry once, then run the system diagnostics operation")
            }
            ScriptError::Failed { .. } => {
                Some("Check that OmniFocus is running and not showing a modal dialog")
            }
            ScriptError::Spawn { .. } => {
                Some("Verify osascript is available on PATH (macOS only) or set OMNIBRIDGE_OSASCRIPT_PATH")
            }
            ScriptError::Timeout { .. } => {
                Some("Narrow the query with a mode or filter, or raise OMNIBRIDGE_SCRIPT_TIMEOUT_MS")
            }
        }
    }
}

impl Suggestion for crate::script::robust::HealthError {
    fn suggestion(&self) -> Option<&str> {
        use crate::script::robust::HealthError;

        Some(match self {
            HealthError::ConnectionLost { .. } => {
                "The scripting connection went stale; retry after OmniFocus wakes"
            }
            HealthError::AppUnreachable { .. } => {
                "Launch OmniFocus and grant automation permission to this process"
            }
            HealthError::DocUnreachable { .. } => {
                "OmniFocus is running but no document is open; open your database window"
            }
            HealthError::CollectionUnreachable { .. } => {
                "The database is reachable but collections are not; restart OmniFocus"
            }
            HealthError::FailingDespiteHealth { .. } => {
                "Host probes pass but calls keep failing; inspect the last stderr via system diagnostics"
            }
        })
    }
}

impl Suggestion for crate::query::QueryError {
    fn suggestion(&self) -> Option<&str> {
        use crate::query::QueryError;

        Some(match self {
            QueryError::UnknownField { .. } => {
                "Check the filter field name against the documented task/project/tag attributes"
            }
            QueryError::UnknownOperator { .. } => {
                "Use one of: EQUALS, NOT_EQUALS, CONTAINS, STARTS_WITH, ENDS_WITH, IN, NOT_IN, OR, AND, <, <=, >, >="
            }
            QueryError::InvalidDate { .. } => {
                "Dates accept exactly two forms: YYYY-MM-DD or YYYY-MM-DD HH:mm (local time, no timezone suffix)"
            }
            QueryError::UnknownMode { .. } => {
                "Use one of: today, upcoming, overdue, available, blocked, flagged, smart_suggest, search, all"
            }
            QueryError::MissingSearchTerm => {
                "Mode 'search' needs filters.search with the text to look for"
            }
            QueryError::InvalidValue { .. } => {
                "Check the value type against the field: booleans for flags, strings for names, date forms for dates"
            }
        })
    }
}

impl Suggestion for crate::dispatch::DispatchError {
    fn suggestion(&self) -> Option<&str> {
        use crate::dispatch::DispatchError;

        match self {
            DispatchError::InvalidInput { .. } => {
                Some("Remove unknown fields and match the documented input shape for this tool")
            }
            DispatchError::NotFound { .. } => {
                Some("Verify the id with a read call first; deleted entities stay gone")
            }
            DispatchError::MultipleMatches { .. } => {
                Some("Reference the entity by id instead of name; candidates are listed in details")
            }
            DispatchError::BatchTooLarge { .. } => Some("Split the batch; the maximum is 100 items"),
            DispatchError::CircularDependency { .. } => {
                Some("Remove the parentTempId cycle; batch items must form a DAG")
            }
            DispatchError::UnknownParent { .. } => {
                Some("Every parentTempId must reference a tempId defined in the same batch")
            }
            DispatchError::AtomicFailed { .. } => {
                Some("The batch rolled back; fix the failing item and resubmit")
            }
            DispatchError::UnknownOperation { .. } => None,
        }
    }
}

impl Suggestion for crate::bridge::BridgeError {
    fn suggestion(&self) -> Option<&str> {
        use crate::bridge::BridgeError;

        match self {
            BridgeError::NotFound { .. } => {
                Some("Verify the id with a read call first; deleted entities stay gone")
            }
            BridgeError::ReadbackMismatch { .. } => Some(
                "The write ran but readback shows the old value; for due-date clearing this is a known host limitation",
            ),
            BridgeError::ReadbackShape { .. } => {
                Some("The readback payload was not the expected entity; run system diagnostics")
            }
        }
    }
}

impl Suggestion for crate::export::ExportError {
    fn suggestion(&self) -> Option<&str> {
        use crate::export::ExportError;

        Some(match self {
            ExportError::PermissionDenied { .. } => {
                "Choose a path the server process can write, for example under your home directory"
            }
            ExportError::DiskFull { .. } => "Free disk space or export to another volume",
            ExportError::PathNotFound { .. } => {
                "Create the parent directory first; intermediate directories are not created"
            }
            ExportError::UnknownFormat { .. } => "Use one of: json, csv, markdown",
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
