//! Liveness Inspector: decides whether a detached task is still running.
//!
//! The launcher is not a reaping parent we can ask for an exit status, and a
//! `kill(pid, 0)` probe reports zombies as alive. Instead we look at output
//! recency: a task whose captures were written within the idle threshold is
//! running, anything quieter is treated as completed.
//!
//! Known limitation: a task that goes silent for longer than the threshold is
//! reported as completed while it is still executing.

use std::time::{Duration, SystemTime};

use tracing::info;

use crate::error::Result;
use crate::extract::OutputExtractor;
use crate::store::{epoch_seconds, TaskRecord, TaskStatus, TaskStore};

pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(10);

/// Strategy for deciding whether a launched task is still active.
pub trait LivenessProbe {
    fn is_running(
        &self,
        store: &dyn TaskStore,
        record: &TaskRecord,
        now: SystemTime,
    ) -> Result<bool>;
}

/// Running iff some capture artifact was modified less than `idle_threshold` ago.
pub struct OutputRecencyProbe {
    pub idle_threshold: Duration,
}

impl Default for OutputRecencyProbe {
    fn default() -> Self {
        Self {
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
        }
    }
}

impl LivenessProbe for OutputRecencyProbe {
    fn is_running(
        &self,
        store: &dyn TaskStore,
        record: &TaskRecord,
        now: SystemTime,
    ) -> Result<bool> {
        let Some(last_write) = store.last_output_at(&record.task_id)? else {
            return Ok(false);
        };
        // A write stamped in the future counts as zero idle time.
        let idle = now.duration_since(last_write).unwrap_or(Duration::ZERO);
        Ok(idle < self.idle_threshold)
    }
}

/// Outcome of a status check.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskReport {
    Running {
        task_id: String,
        elapsed_seconds: u64,
        command: String,
    },
    Completed {
        task_id: String,
        elapsed_seconds: u64,
        result: String,
    },
    NotFound {
        task_id: String,
    },
}

impl TaskReport {
    pub fn status(&self) -> &'static str {
        match self {
            TaskReport::Running { .. } => "running",
            TaskReport::Completed { .. } => "completed",
            TaskReport::NotFound { .. } => "not_found",
        }
    }

    /// Text shown to the caller of `codex_check_result`.
    pub fn to_text(&self) -> String {
        match self {
            TaskReport::Running {
                task_id,
                elapsed_seconds,
                command,
            } => format!(
                "Task {} is still running.\nElapsed: {}s\nCommand: {}",
                task_id, elapsed_seconds, command
            ),
            TaskReport::Completed {
                task_id,
                elapsed_seconds,
                result,
            } => format!(
                "Task {} completed in {}s.\n\nResult:\n{}",
                task_id, elapsed_seconds, result
            ),
            TaskReport::NotFound { task_id } => format!("Task {} not found", task_id),
        }
    }
}

/// Check options that don't belong to the probe itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    /// Keep the first observed completion time instead of restamping it on each check.
    pub pin_completion_time: bool,
}

pub struct Inspector<'a> {
    pub store: &'a dyn TaskStore,
    pub probe: &'a dyn LivenessProbe,
    pub extractor: &'a dyn OutputExtractor,
    pub options: CheckOptions,
}

impl Inspector<'_> {
    pub fn check(&self, task_id: &str) -> Result<TaskReport> {
        self.check_at(task_id, SystemTime::now())
    }

    /// Status check as of `now`. Completed checks re-read and re-extract output every time.
    pub fn check_at(&self, task_id: &str, now: SystemTime) -> Result<TaskReport> {
        let Some(mut record) = self.store.load(task_id)? else {
            return Ok(TaskReport::NotFound {
                task_id: task_id.to_string(),
            });
        };
        let now_secs = epoch_seconds(now);

        if self.probe.is_running(self.store, &record, now)? {
            return Ok(TaskReport::Running {
                task_id: record.task_id,
                elapsed_seconds: whole_seconds(now_secs - record.started_at),
                command: record.command,
            });
        }

        let output = self.store.read_output(task_id)?;
        let result = self.extractor.extract(&output.stdout, &output.stderr);

        let first_completion = record.status != TaskStatus::Completed;
        if first_completion || !self.options.pin_completion_time || record.completed_at.is_none() {
            record.completed_at = Some(now_secs);
        }
        record.status = TaskStatus::Completed;
        self.store.save(&record)?;
        if first_completion {
            info!(task_id = %record.task_id, "background task completed");
        }

        let completed_at = record.completed_at.unwrap_or(now_secs);
        Ok(TaskReport::Completed {
            task_id: record.task_id,
            elapsed_seconds: whole_seconds(completed_at - record.started_at),
            result,
        })
    }
}

fn whole_seconds(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        secs as u64
    } else {
        0
    }
}
