//! Output Extractor: reduce raw stdout/stderr to the final answer.
//!
//! Codex prints its reasoning trace on stderr and, when stdout is empty, the final
//! answer starts right after `codex` followed by a newline and runs to the
//! `tokens used` footer. The marker is not anchored to the start of a line, so
//! `run codex\n` also opens a segment.
//! This is text scanning only; there is no grammar behind it.

use regex::Regex;

pub const NO_OUTPUT: &str = "No output from Codex";

pub trait OutputExtractor {
    fn extract(&self, stdout: &str, stderr: &str) -> String;
}

/// Carves the last `<marker>\n ... <terminator>` segment out of stderr.
pub struct MarkerExtractor {
    segment: Regex,
}

impl MarkerExtractor {
    pub fn new(marker: &str, terminator: &str) -> Self {
        let pattern = format!(
            r"(?s){}\n(.+?)(?:{}|\z)",
            regex::escape(marker),
            regex::escape(terminator)
        );
        let segment = Regex::new(&pattern).expect("marker pattern is built from escaped literals");
        Self { segment }
    }
}

impl Default for MarkerExtractor {
    fn default() -> Self {
        Self::new("codex", "tokens used")
    }
}

impl OutputExtractor for MarkerExtractor {
    fn extract(&self, stdout: &str, stderr: &str) -> String {
        let out = stdout.trim();
        if !out.is_empty() {
            return out.to_string();
        }
        if !stderr.is_empty() {
            let carved = self
                .segment
                .captures_iter(stderr)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
                .last();
            if let Some(answer) = carved {
                return answer.to_string();
            }
        }
        NO_OUTPUT.to_string()
    }
}
