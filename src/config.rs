use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct Config {
    // External tool
    pub codex_bin: String,
    // Task store
    pub task_dir: PathBuf,
    // Liveness
    pub idle_threshold_secs: u64,
    pub pin_completion_time: bool,
    // Output extraction
    pub answer_marker: String,
    pub answer_terminator: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            codex_bin: "codex".to_string(),
            task_dir: PathBuf::from("/tmp/codex_tasks"),
            idle_threshold_secs: 10,
            pin_completion_time: false,
            answer_marker: "codex".to_string(),
            answer_terminator: "tokens used".to_string(),
        }
    }
}

impl Config {
    /// Load config from a flat `key: value` file, then apply env overrides.
    pub fn load_from(path: &Path) -> Self {
        let mut cfg = Self::default();
        if let Ok(content) = std::fs::read_to_string(path) {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once(':') {
                    cfg.apply(key.trim(), unquote(value.trim()));
                }
            }
        }
        cfg.apply_env_overrides();
        cfg
    }

    /// Load config from env overrides only (no config file).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    /// Load from `$CODEX_MCP_CONFIG` or ~/.config/codex-mcp/config.yaml, plus env.
    pub fn load() -> Self {
        let config_path = std::env::var("CODEX_MCP_CONFIG")
            .map(|p| expand_tilde(&p))
            .unwrap_or_else(|_| expand_tilde("~/.config/codex-mcp/config.yaml"));
        let path = Path::new(&config_path);
        if path.exists() {
            Self::load_from(path)
        } else {
            Self::from_env()
        }
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "codex_bin" if !value.is_empty() => self.codex_bin = value.to_string(),
            "task_dir" if !value.is_empty() => self.task_dir = PathBuf::from(expand_tilde(value)),
            "idle_threshold_secs" => {
                if let Ok(n) = value.parse() {
                    self.idle_threshold_secs = n;
                }
            }
            "pin_completion_time" => self.pin_completion_time = parse_flag(value),
            "answer_marker" if !value.is_empty() => self.answer_marker = value.to_string(),
            "answer_terminator" if !value.is_empty() => {
                self.answer_terminator = value.to_string()
            }
            _ => {} // Ignore unknown keys
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CODEX_MCP_BIN") {
            self.apply("codex_bin", &v);
        }
        if let Ok(v) = std::env::var("CODEX_MCP_TASK_DIR") {
            self.apply("task_dir", &v);
        }
        if let Ok(v) = std::env::var("CODEX_MCP_IDLE_SECS") {
            self.apply("idle_threshold_secs", &v);
        }
        if let Ok(v) = std::env::var("CODEX_MCP_PIN_COMPLETION") {
            self.apply("pin_completion_time", &v);
        }
    }
}

fn parse_flag(value: &str) -> bool {
    !["", "0", "false", "no", "off"].contains(&value.to_lowercase().as_str())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Expand ~ to home directory.
fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") || path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/foo/bar");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("/foo/bar"));
    }

    #[test]
    fn test_expand_tilde_no_tilde() {
        assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"tokens used\""), "tokens used");
        assert_eq!(unquote("codex"), "codex");
        assert_eq!(unquote("\""), "\"");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("Off"));
        assert!(!parse_flag("no"));
    }

    #[test]
    fn test_apply_ignores_bad_values() {
        let mut cfg = Config::default();
        cfg.apply("idle_threshold_secs", "soon");
        cfg.apply("codex_bin", "");
        cfg.apply("mystery", "42");
        assert_eq!(cfg.idle_threshold_secs, 10);
        assert_eq!(cfg.codex_bin, "codex");
    }
}
