//! Codex CLI exposed as MCP tools, with detached background tasks.

pub mod config;
pub mod error;
pub mod executor;
pub mod extract;
pub mod launcher;
pub mod liveness;
pub mod serve;
pub mod store;
