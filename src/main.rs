use std::env;
use std::process;

use codex_mcp::config::Config;
use codex_mcp::serve;

fn print_usage() {
    eprintln!("Usage: codex-mcp [serve] [--version] [--help]");
    eprintln!();
    eprintln!("Runs an MCP server on stdio exposing codex_execute, codex_execute_async");
    eprintln!("and codex_check_result. Configured via ~/.config/codex-mcp/config.yaml");
    eprintln!("(or $CODEX_MCP_CONFIG) and CODEX_MCP_* environment variables.");
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = env::var("RUST_LOG")
        .or_else(|_| env::var("CODEX_MCP_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("serve") => {}
        Some("--version") | Some("-V") => {
            println!("codex-mcp {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Some("--help") | Some("-h") => {
            print_usage();
            return;
        }
        Some(other) => {
            eprintln!("codex-mcp: unknown argument {:?}", other);
            print_usage();
            process::exit(2);
        }
    }

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = serve::run_server(Config::load()) {
        tracing::error!("server stopped: {}", e);
        process::exit(1);
    }
}
