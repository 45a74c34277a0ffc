//! MCP tool definitions: the 3 tools exposed to the client.

use serde_json::{json, Value};

use super::protocol::tool_def;

pub const EXECUTE: &str = "codex_execute";
pub const EXECUTE_ASYNC: &str = "codex_execute_async";
pub const CHECK_RESULT: &str = "codex_check_result";

const SUBCOMMANDS: [&str; 4] = ["exec", "apply", "resume", "sandbox"];

const ARGS_DESCRIPTION: &str = "Additional command-line arguments. Model selection: [\"-m\", \"gpt-5-codex\"] for coding (default) or [\"-m\", \"gpt-5\"] for analysis. Reasoning effort: [\"--config\", \"model_reasoning_effort=low|medium|high\"] (gpt-5-codex supports low/medium/high; gpt-5 supports minimal/low/medium/high). Example: [\"--full-auto\", \"-m\", \"gpt-5\", \"--config\", \"model_reasoning_effort=high\"]. Always include \"--full-auto\" for non-interactive execution.";

fn subcommand_schema() -> Value {
    json!({
        "type": "string",
        "description": "Codex subcommand to execute",
        "enum": SUBCOMMANDS,
        "default": "exec"
    })
}

fn args_schema() -> Value {
    json!({
        "type": "array",
        "items": {"type": "string"},
        "description": ARGS_DESCRIPTION
    })
}

pub fn list_tools() -> Value {
    json!({
        "tools": [
            tool_def(EXECUTE,
                "Execute OpenAI Codex (GPT-5) synchronously with full control over subcommand and arguments. Returns only the core result, filtering out thinking process to save context. Common usage: subcommand=\"exec\", prompt=\"your task\", args=[\"--full-auto\"]",
                json!({
                    "type": "object",
                    "properties": {
                        "subcommand": subcommand_schema(),
                        "prompt": {
                            "type": "string",
                            "description": "Main prompt/argument for the command (required for exec, optional for others)"
                        },
                        "args": args_schema(),
                        "timeout": {
                            "type": "integer",
                            "description": "Timeout in seconds (default: no limit)"
                        }
                    },
                    "required": []
                })
            ),
            tool_def(EXECUTE_ASYNC,
                "Start a Codex task in the background and return immediately with a task_id. Use codex_check_result to retrieve the result later. This allows you to continue working while Codex runs.",
                json!({
                    "type": "object",
                    "properties": {
                        "subcommand": subcommand_schema(),
                        "prompt": {
                            "type": "string",
                            "description": "Main prompt/argument for the command"
                        },
                        "args": args_schema()
                    },
                    "required": []
                })
            ),
            tool_def(CHECK_RESULT,
                "Check the status of an async Codex task. Returns running/completed status and the result if available.",
                json!({
                    "type": "object",
                    "properties": {
                        "task_id": {
                            "type": "string",
                            "description": "The task_id returned by codex_execute_async"
                        }
                    },
                    "required": ["task_id"]
                })
            )
        ]
    })
}
