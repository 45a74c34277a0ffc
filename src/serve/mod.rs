//! MCP server: JSON-RPC 2.0 over stdio.
//!
//! Handles initialize, tools/list, tools/call and ping. Requests are served one
//! line at a time; a blocking `codex_execute` holds up everything behind it.

pub mod protocol;
pub mod tools;

use std::io::{self, BufRead, Write};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::executor::execute_sync;
use crate::extract::MarkerExtractor;
use crate::launcher::{start_task, Invocation, SessionLauncher};
use crate::liveness::{CheckOptions, Inspector, OutputRecencyProbe};
use crate::store::FsTaskStore;

use protocol::{
    initialize_result, parse_line, text_content, write_message, Incoming, JsonRpcError,
    JsonRpcResponse, INVALID_PARAMS, METHOD_NOT_FOUND,
};

pub const SERVER_NAME: &str = "codex-mcp";

/// Everything a request handler needs. Holds no per-request state.
pub struct ServerState {
    pub config: Config,
    pub store: FsTaskStore,
    pub launcher: SessionLauncher,
    pub probe: OutputRecencyProbe,
    pub extractor: MarkerExtractor,
}

impl ServerState {
    pub fn new(config: Config) -> Result<Self> {
        let store = FsTaskStore::open(&config.task_dir)?;
        let probe = OutputRecencyProbe {
            idle_threshold: config.idle_threshold(),
        };
        let extractor = MarkerExtractor::new(&config.answer_marker, &config.answer_terminator);
        Ok(Self {
            store,
            launcher: SessionLauncher,
            probe,
            extractor,
            config,
        })
    }

    fn inspector(&self) -> Inspector<'_> {
        Inspector {
            store: &self.store,
            probe: &self.probe,
            extractor: &self.extractor,
            options: CheckOptions {
                pin_completion_time: self.config.pin_completion_time,
            },
        }
    }

    fn invocation(&self, args: &Value) -> Invocation {
        let subcommand = args
            .get("subcommand")
            .and_then(|v| v.as_str())
            .unwrap_or("exec");
        let prompt = args.get("prompt").and_then(|v| v.as_str());
        let extra: Vec<String> = args
            .get("args")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Invocation::new(&self.config.codex_bin, subcommand, prompt, &extra)
    }
}

/// Run the MCP server on stdio.
pub fn run_server(config: Config) -> Result<()> {
    info!("starting {} v{}", SERVER_NAME, env!("CARGO_PKG_VERSION"));
    info!(
        codex_bin = %config.codex_bin,
        task_dir = %config.task_dir.display(),
        idle_threshold_secs = config.idle_threshold_secs,
        "config loaded"
    );
    let state = ServerState::new(config)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(&state, stdin.lock(), stdout.lock())?;
    info!("stdin closed, shutting down");
    Ok(())
}

/// Serve requests from `reader` until EOF, one response line per request.
pub fn serve(state: &ServerState, reader: impl BufRead, mut writer: impl Write) -> Result<()> {
    for line in reader.lines() {
        let line = line?;
        if let Some(response) = handle_line(state, &line) {
            write_message(&mut writer, &response)?;
        }
    }
    Ok(())
}

/// Handle one input line. `None` for blank lines and notifications.
pub fn handle_line(state: &ServerState, line: &str) -> Option<JsonRpcResponse> {
    let request = match parse_line(line)? {
        Incoming::Request(req) => req,
        Incoming::Invalid(response) => return Some(response),
    };
    let method = request.method.unwrap_or_default();

    // Notifications (no id member at all) get no response; `"id": null` is answered
    let Some(id) = request.id else {
        debug!(%method, "notification");
        return None;
    };

    info!(%method, %id, "request");
    Some(handle_request(state, &method, id, request.params))
}

fn handle_request(
    state: &ServerState,
    method: &str,
    id: Value,
    params: Option<Value>,
) -> JsonRpcResponse {
    match method {
        "initialize" => {
            let result = initialize_result(SERVER_NAME, env!("CARGO_PKG_VERSION"));
            JsonRpcResponse::success(id, result)
        }
        "tools/list" => JsonRpcResponse::success(id, tools::list_tools()),
        "tools/call" => {
            let params = params.unwrap_or(Value::Null);
            let tool_name = params
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or(Value::Object(serde_json::Map::new()));

            match handle_tool_call(state, tool_name, &arguments) {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => JsonRpcResponse::error(id, e.code, e.message),
            }
        }
        "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
        _ => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", method)),
    }
}

fn handle_tool_call(
    state: &ServerState,
    tool_name: &str,
    args: &Value,
) -> std::result::Result<Value, JsonRpcError> {
    let text = match tool_name {
        tools::EXECUTE => handle_execute(state, args),
        tools::EXECUTE_ASYNC => handle_execute_async(state, args),
        tools::CHECK_RESULT => handle_check_result(state, args)?,
        _ => {
            return Err(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Unknown tool: {}", tool_name),
            })
        }
    };
    Ok(text_content(&text))
}

// --- Tool handlers ---

fn handle_execute(state: &ServerState, args: &Value) -> String {
    let invocation = state.invocation(args);
    let timeout = args.get("timeout").and_then(parse_timeout);
    debug!(command = %invocation.display(), ?timeout, "running codex synchronously");
    execute_sync(&invocation, timeout, &state.extractor)
}

/// Seconds as any JSON number or numeric string. Negative values time out at
/// once; anything unparsable or too large to represent means no limit.
fn parse_timeout(value: &Value) -> Option<Duration> {
    let secs = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => return None,
        _ => None,
    };
    match secs.filter(|s| s.is_finite()) {
        Some(secs) => Duration::try_from_secs_f64(secs.max(0.0)).ok(),
        None => {
            warn!(timeout = %value, "ignoring unusable timeout");
            None
        }
    }
}

fn handle_execute_async(state: &ServerState, args: &Value) -> String {
    let invocation = state.invocation(args);
    match start_task(&state.store, &state.launcher, &invocation) {
        Ok(task_id) => format!(
            "Codex task started in background.\nTask ID: {}\n\nUse codex_check_result(task_id=\"{}\") to retrieve the result.",
            task_id, task_id
        ),
        Err(e) => {
            warn!(command = %invocation.display(), "failed to start background task: {}", e);
            format!("Error starting Codex task: {}", e)
        }
    }
}

fn handle_check_result(
    state: &ServerState,
    args: &Value,
) -> std::result::Result<String, JsonRpcError> {
    let Some(task_id) = args.get("task_id").and_then(|v| v.as_str()) else {
        return Err(JsonRpcError {
            code: INVALID_PARAMS,
            message: "task_id is required".into(),
        });
    };

    match state.inspector().check(task_id) {
        Ok(report) => {
            debug!(%task_id, status = report.status(), "task checked");
            Ok(report.to_text())
        }
        Err(e) => {
            warn!(%task_id, "status check failed: {}", e);
            Ok(format!("Error checking task {}: {}", task_id, e))
        }
    }
}
