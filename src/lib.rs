//! # Omnibridge
//!
//! MCP server exposing an OmniFocus database to LLM agents.
//!
//! ## Overview
//!
//! Tool calls arrive over stdio JSON-RPC (framed by `rmcp`), get compiled
//! into JavaScript for the `osascript` host, run in a child process, and
//! come back as summarized, cached envelopes. The two scripting dialects:
//!
//! | Dialect | Context | Used for |
//! |---------|---------|----------|
//! | JXA | external ("outer") | probes, single-id lookups, move fallback |
//! | OmniJS | embedded ("inner") | bulk reads, complex filters, mutations |
//!
//! Writes are the hard part: the two contexts do not reliably see each
//! other's changes, so every mutation compiles to one embedded script that
//! writes and reads the post-state back in the same evaluation
//! ([`bridge`]).
//!
//! ## Modules
//!
//! - [`query`] - filter DSL compiler, AST, mode presets, fingerprints
//! - [`script`] - runner, robust wrapper, dialect emitters, probes
//! - [`bridge`] - write-then-readback consistency protocol
//! - [`cache`] - TTL store with selective invalidation
//! - [`dispatch`] - the four verbs: read, write, analyze, system
//! - [`analyze`] - velocity, overdue, patterns, meeting notes
//! - [`server`] - rmcp stdio framing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use omnibridge::{Config, Dispatcher};
//! use serde_json::json;
//!
//! let dispatcher = Dispatcher::new(Config::from_env());
//! let envelope = dispatcher
//!     .handle_read(json!({"query": {"type": "tasks", "mode": "today"}}))
//!     .await;
//! println!("{}", envelope.summary.unwrap_or_default());
//! ```

pub mod analyze;
pub mod bridge;
pub mod cache;
pub mod config;
pub mod dates;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod model;
pub mod query;
pub mod response;
pub mod script;
pub mod server;

pub use cache::{CacheClass, CacheManager, Invalidation};
pub use config::Config;
pub use dispatch::{Dispatcher, DispatchError};
pub use error::{ErrorCode, OmniError, Suggestion};
pub use model::{FolderRow, PerspectiveRow, ProjectRow, TagRow, TaskRow};
pub use response::{Envelope, Warning};
pub use script::{Executor, MockExecutor, RobustRunner, ScriptRunner};
pub use server::{run_server, OmniToolServer};
