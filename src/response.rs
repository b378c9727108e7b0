//! Response Shaper: the LLM-facing envelope
//!
//! Summary-first: agents read `summary`, then `data` only when they need it.
//! Errors carry a closed code, a user-readable message, and a concrete
//! suggestion when a deterministic recovery exists. Metadata records timing
//! and cache provenance so callers can reason about freshness.

use serde::Serialize;
use serde_json::Value;

use crate::error::{OmniError, Suggestion};

// ============================================================================
// ENVELOPE
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Metadata {
    pub operation_time_ms: u64,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<Warning>,
}

/// Non-fatal finding attached to an otherwise successful response
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Warning {
    pub code: String,
    pub message: String,
}

impl Warning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

// ============================================================================
// CONSTRUCTORS
// ============================================================================

impl Envelope {
    /// Successful response; callers layer summary and metadata on top
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            summary: None,
            metadata: Metadata::default(),
            error: None,
        }
    }

    /// Failed response shaped from a typed error
    pub fn fail(err: &OmniError) -> Self {
        Self {
            success: false,
            data: None,
            summary: None,
            metadata: Metadata::default(),
            error: Some(ErrorBody {
                code: err.code().as_str(),
                message: err.to_string(),
                suggestion: err.suggestion().map(String::from),
                details: err.details(),
            }),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_operation_time(mut self, ms: u64) -> Self {
        self.metadata.operation_time_ms = ms;
        self
    }

    pub fn with_query_time(mut self, ms: u64) -> Self {
        self.metadata.query_time_ms = Some(ms);
        self
    }

    pub fn with_total_count(mut self, count: u64) -> Self {
        self.metadata.total_count = Some(count);
        self
    }

    pub fn from_cache(mut self) -> Self {
        self.metadata.from_cache = true;
        self
    }

    pub fn with_optimization(mut self, name: impl Into<String>) -> Self {
        self.metadata.optimization = Some(name.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<Warning>) -> Self {
        self.metadata.warnings = warnings;
        self
    }

    pub fn with_health(mut self, health: Value) -> Self {
        self.metadata.health = Some(health);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_envelope_shape() {
        let env = Envelope::ok(json!([1, 2, 3]))
            .with_summary("3 items")
            .with_operation_time(12)
            .with_total_count(3);

        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["summary"], "3 items");
        assert_eq!(v["metadata"]["operation_time_ms"], 12);
        assert_eq!(v["metadata"]["total_count"], 3);
        assert_eq!(v["metadata"]["from_cache"], false);
        assert!(v.get("error").is_none());
    }

    #[test]
    fn fail_envelope_carries_code_and_suggestion() {
        let err: OmniError = crate::script::ScriptError::Timeout { ms: 120_000 }.into();
        let env = Envelope::fail(&err);

        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "TIMEOUT");
        assert!(v["error"]["suggestion"]
            .as_str()
            .unwrap()
            .contains("OMNIBRIDGE_SCRIPT_TIMEOUT_MS"));
        assert!(v.get("data").is_none());
    }

    #[test]
    fn warnings_serialize_only_when_present() {
        let env = Envelope::ok(json!({}));
        let v = serde_json::to_value(&env).unwrap();
        assert!(v["metadata"].get("warnings").is_none());

        let env = env.with_warnings(vec![Warning::new("BRIDGE_READBACK_MISMATCH", "due date kept")]);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["metadata"]["warnings"][0]["code"], "BRIDGE_READBACK_MISMATCH");
    }

    #[test]
    fn cache_provenance_is_visible() {
        let env = Envelope::ok(json!({})).from_cache();
        assert!(env.metadata.from_cache);
    }
}
