//! MCP server with stdio transport
//!
//! The framing layer. Four tools route straight into the dispatcher; the
//! core never parses JSON-RPC itself. Logs go to stderr so stdout stays
//! clean for the protocol.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, JsonObject, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ErrorData as McpError;
use rmcp::ServiceExt;
use serde_json::{json, Value};
use tracing::info;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::response::Envelope;

/// Cache sweep cadence
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// MCP server handler exposing the four omnibridge tools
#[derive(Clone)]
pub struct OmniToolServer {
    dispatcher: Arc<Dispatcher>,
}

impl OmniToolServer {
    pub fn new(config: Config) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(config)),
        }
    }

    pub fn with_dispatcher(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    fn tools() -> Vec<Tool> {
        vec![
            tool(
                "read",
                "Query OmniFocus tasks, projects, tags, folders, or perspectives. \
                 Supports modes (today, overdue, available, flagged, search, ...), \
                 filters, sorting, pagination, field projection, and countOnly.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "object",
                            "properties": {
                                "type": {"type": "string", "enum": ["tasks", "projects", "tags", "folders", "perspectives"]},
                                "mode": {"type": "string"},
                                "filters": {"type": "object"},
                                "sort": {"type": "array"},
                                "limit": {"type": "integer"},
                                "offset": {"type": "integer"},
                                "countOnly": {"type": "boolean"},
                                "fields": {"type": "array", "items": {"type": "string"}},
                                "dueSoonDays": {"type": "integer"}
                            },
                            "required": ["type"]
                        }
                    },
                    "required": ["query"],
                    "additionalProperties": false
                }),
            ),
            tool(
                "write",
                "Mutate OmniFocus: create, update, complete, delete, move, \
                 tag_manage, bulk_delete, batch (with tempId dependency graphs, \
                 max 100 items), and export. Dates use YYYY-MM-DD or \
                 YYYY-MM-DD HH:mm, local time.",
                json!({
                    "type": "object",
                    "properties": {
                        "mutation": {
                            "type": "object",
                            "properties": {
                                "operation": {"type": "string", "enum": ["create", "update", "complete", "delete", "move", "tag_manage", "bulk_delete", "batch", "export"]},
                                "target": {"type": "string", "enum": ["task", "project", "tag"]},
                                "id": {"type": "string"},
                                "ids": {"type": "array", "items": {"type": "string"}},
                                "data": {"type": "object"},
                                "changes": {"type": "object"},
                                "items": {"type": "array"},
                                "dryRun": {"type": "boolean"},
                                "atomic": {"type": "boolean"},
                                "destination": {"type": "object"},
                                "export": {"type": "object"},
                                "query": {"type": "object"},
                                "workflow": {"type": "string"}
                            },
                            "required": ["operation"]
                        }
                    },
                    "required": ["mutation"],
                    "additionalProperties": false
                }),
            ),
            tool(
                "analyze",
                "Analyze the database: productivity_stats, task_velocity, \
                 overdue_analysis, pattern_analysis, workflow_analysis, \
                 recurring_tasks, manage_reviews, parse_meeting_notes.",
                json!({
                    "type": "object",
                    "properties": {
                        "analysis": {
                            "type": "object",
                            "properties": {
                                "type": {"type": "string"},
                                "params": {"type": "object"},
                                "scope": {"type": "object"}
                            },
                            "required": ["type"]
                        }
                    },
                    "required": ["analysis"],
                    "additionalProperties": false
                }),
            ),
            tool(
                "system",
                "Server operations: version, diagnostics (host probe cascade), \
                 metrics, cache_stats, cache_clear, cache_invalidate.",
                json!({
                    "type": "object",
                    "properties": {
                        "operation": {"type": "string", "enum": ["version", "diagnostics", "metrics", "cache_stats", "cache_clear", "cache_invalidate"]},
                        "workflow": {"type": "string"}
                    },
                    "required": ["operation"],
                    "additionalProperties": false
                }),
            ),
        ]
    }
}

fn tool(name: &'static str, description: &'static str, schema: Value) -> Tool {
    let schema: JsonObject =
        serde_json::from_value(schema).expect("tool schemas are valid JSON objects");
    Tool::new(Cow::Borrowed(name), Cow::Borrowed(description), Arc::new(schema))
}

fn tool_result(envelope: Envelope) -> CallToolResult {
    let is_error = !envelope.success;
    let text = envelope
        .summary
        .clone()
        .or_else(|| envelope.error.as_ref().map(|e| e.message.clone()))
        .unwrap_or_else(|| if is_error { "failed" } else { "ok" }.to_string());
    let structured = serde_json::to_value(&envelope).ok();

    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: structured,
        is_error: Some(is_error),
        meta: None,
    }
}

#[allow(clippy::manual_async_fn)]
impl ServerHandler for OmniToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..ServerInfo::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListToolsResult {
                tools: Self::tools(),
                next_cursor: None,
            })
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = Value::Object(request.arguments.unwrap_or_default().into_iter().collect());
        info!(tool = %request.name, "tool call");

        let envelope = match request.name.as_ref() {
            "read" => self.dispatcher.handle_read(args).await,
            "write" => self.dispatcher.handle_write(args).await,
            "analyze" => self.dispatcher.handle_analyze(args).await,
            "system" => self.dispatcher.handle_system(args).await,
            other => {
                return Err(McpError::invalid_params(
                    format!("unknown tool: {other}"),
                    None,
                ))
            }
        };
        Ok(tool_result(envelope))
    }
}

fn stdio() -> (tokio::io::Stdin, tokio::io::Stdout) {
    (tokio::io::stdin(), tokio::io::stdout())
}

/// Run the MCP server over stdio until the client disconnects
pub async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        max_script_size = config.max_script_size,
        timeout_ms = config.script_timeout.as_millis() as u64,
        "starting omnibridge MCP server"
    );

    let server = OmniToolServer::new(config);
    let _sweeper = server.dispatcher.cache().spawn_sweeper(SWEEP_INTERVAL);

    let running = server.serve(stdio()).await?;
    info!("MCP server running, waiting for client requests");
    running.waiting().await?;
    info!("MCP server shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_tools_are_exposed() {
        let tools = OmniToolServer::tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(names, vec!["read", "write", "analyze", "system"]);
    }

    #[test]
    fn tool_schemas_declare_required_fields() {
        for tool in OmniToolServer::tools() {
            let schema = serde_json::to_value(&*tool.input_schema).unwrap();
            assert!(schema.get("required").is_some(), "{} lacks required", tool.name);
        }
    }

    #[test]
    fn server_info_enables_tools() {
        let server = OmniToolServer::new(Config::default());
        let info = server.get_info();
        assert!(info.capabilities.tools.is_some());
    }

    #[test]
    fn envelope_folds_into_tool_result() {
        let ok = tool_result(Envelope::ok(json!({"a": 1})).with_summary("1 thing"));
        assert_eq!(ok.is_error, Some(false));
        assert!(ok.structured_content.is_some());

        let err: crate::error::OmniError =
            crate::script::ScriptError::Timeout { ms: 5 }.into();
        let failed = tool_result(Envelope::fail(&err));
        assert_eq!(failed.is_error, Some(true));
        let structured = failed.structured_content.unwrap();
        assert_eq!(structured["error"]["code"], "TIMEOUT");
    }
}
