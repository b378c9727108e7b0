//! Tool Dispatch: four verbs over the core
//!
//! `read`, `write`, `analyze`, `system`. Each handler parses its strict
//! input shape, runs the pipeline, and folds any error into the response
//! envelope; nothing below the MCP framing ever panics a request.

pub mod analyze;
pub mod input;
pub mod read;
pub mod system;
pub mod write;

pub use input::{
    AnalysisInput, AnalyzeRequest, BatchItem, ExportInput, MutationInput, QueryInput, ReadRequest,
    SortInput, SystemRequest, WriteRequest,
};

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

use crate::bridge::Bridge;
use crate::cache::CacheManager;
use crate::config::Config;
use crate::error::{ErrorCode, OmniError};
use crate::response::Envelope;
use crate::script::{Executor, RobustRunner, ScriptRunner};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid input: {detail}")]
    InvalidInput { detail: String },

    #[error("unknown operation '{operation}'")]
    UnknownOperation { operation: String },

    #[error("{entity} '{reference}' not found")]
    NotFound { entity: String, reference: String },

    #[error("{entity} reference '{reference}' is ambiguous ({} candidates)", candidates.len())]
    MultipleMatches {
        entity: String,
        reference: String,
        candidates: Vec<Value>,
    },

    #[error("batch has {len} items, over the 100 item maximum")]
    BatchTooLarge { len: usize },

    #[error("batch dependency cycle involving tempId '{temp_id}'")]
    CircularDependency { temp_id: String },

    #[error("batch item '{temp_id}' references unknown parentTempId '{parent}'")]
    UnknownParent { temp_id: String, parent: String },

    #[error("atomic batch failed at '{failed_item}': {detail}; rolled back {rolled_back} items")]
    AtomicFailed {
        failed_item: String,
        detail: String,
        rolled_back: usize,
    },
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::InvalidInput { .. }
            | DispatchError::UnknownOperation { .. }
            | DispatchError::BatchTooLarge { .. }
            | DispatchError::CircularDependency { .. }
            | DispatchError::UnknownParent { .. } => ErrorCode::ValidationError,
            DispatchError::NotFound { .. } => ErrorCode::NotFound,
            DispatchError::MultipleMatches { .. } => ErrorCode::MultipleMatches,
            DispatchError::AtomicFailed { .. } => ErrorCode::AtomicOperationFailed,
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            DispatchError::MultipleMatches { candidates, .. } => {
                Some(serde_json::json!({ "candidates": candidates }))
            }
            DispatchError::AtomicFailed {
                failed_item,
                rolled_back,
                ..
            } => Some(serde_json::json!({
                "failed_item": failed_item,
                "rolled_back": rolled_back,
            })),
            _ => None,
        }
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

pub struct Dispatcher {
    pub(crate) runner: Arc<RobustRunner>,
    pub(crate) bridge: Bridge,
    pub(crate) cache: Arc<CacheManager>,
    pub(crate) config: Config,
}

impl Dispatcher {
    /// Production wiring: osascript runner behind the robust wrapper
    pub fn new(config: Config) -> Self {
        let executor: Arc<dyn Executor> = Arc::new(ScriptRunner::new(config.clone()));
        Self::with_executor(executor, config)
    }

    /// Test and embedding wiring with an arbitrary executor
    pub fn with_executor(executor: Arc<dyn Executor>, config: Config) -> Self {
        let runner = Arc::new(RobustRunner::new(executor, config.staleness_window));
        let bridge = Bridge::new(Arc::clone(&runner));
        Self {
            runner,
            bridge,
            cache: Arc::new(CacheManager::new()),
            config,
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    // ------------------------------------------------------------------
    // Verbs
    // ------------------------------------------------------------------

    pub async fn handle_read(&self, input: Value) -> Envelope {
        let started = Instant::now();
        let result = match parse_request::<ReadRequest>(input) {
            Ok(request) => read::run_read(self, request.query).await,
            Err(e) => Err(e.into()),
        };
        finish("read", started, result)
    }

    pub async fn handle_write(&self, input: Value) -> Envelope {
        let started = Instant::now();
        let result = match parse_request::<WriteRequest>(input) {
            Ok(request) => write::run_write(self, request.mutation).await,
            Err(e) => Err(e.into()),
        };
        finish("write", started, result)
    }

    pub async fn handle_analyze(&self, input: Value) -> Envelope {
        let started = Instant::now();
        let result = match parse_request::<AnalyzeRequest>(input) {
            Ok(request) => analyze::run_analysis(self, request.analysis).await,
            Err(e) => Err(e.into()),
        };
        finish("analyze", started, result)
    }

    pub async fn handle_system(&self, input: Value) -> Envelope {
        let started = Instant::now();
        let result = match parse_request::<SystemRequest>(input) {
            Ok(request) => system::run_system(self, request).await,
            Err(e) => Err(e.into()),
        };
        finish("system", started, result)
    }
}

fn parse_request<T: serde::de::DeserializeOwned>(input: Value) -> Result<T, DispatchError> {
    serde_json::from_value(input).map_err(|e| DispatchError::InvalidInput {
        detail: e.to_string(),
    })
}

fn finish(verb: &str, started: Instant, result: Result<Envelope, OmniError>) -> Envelope {
    let elapsed = started.elapsed().as_millis() as u64;
    let envelope = match result {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(verb, error = %err, code = %err.code(), "request failed");
            Envelope::fail(&err)
        }
    };
    envelope.with_operation_time(elapsed)
}
