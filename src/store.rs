//! Task Store: persisted identity, status and captured output of background tasks.
//!
//! Each task id owns three artifacts in the task directory:
//! `<id>.stdout`, `<id>.stderr` and `<id>.meta` (pretty JSON). Nothing here ever
//! deletes a task that was handed out; retention is left to the operator.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

const ID_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
}

/// Metadata artifact contents. Timestamps are float UNIX seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub pid: u32,
    pub status: TaskStatus,
    pub command: String,
    pub started_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<f64>,
}

/// Freshly reserved task id with its two open capture sinks.
pub struct CaptureSinks {
    pub task_id: String,
    pub stdout: File,
    pub stderr: File,
}

/// Raw captured text of a task. Missing artifacts read as empty.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

pub trait TaskStore {
    /// Allocate an id never used by existing artifacts and create its capture sinks.
    fn create_captures(&self) -> Result<CaptureSinks>;

    /// Remove capture sinks of an id whose launch failed before metadata was written.
    fn discard_captures(&self, task_id: &str);

    fn save(&self, record: &TaskRecord) -> Result<()>;

    /// `None` when the metadata artifact does not exist.
    fn load(&self, task_id: &str) -> Result<Option<TaskRecord>>;

    /// Most recent write time across whichever capture artifacts exist.
    fn last_output_at(&self, task_id: &str) -> Result<Option<SystemTime>>;

    fn read_output(&self, task_id: &str) -> Result<CapturedOutput>;
}

/// Filesystem-backed store rooted at a single task directory.
pub struct FsTaskStore {
    dir: PathBuf,
}

impl FsTaskStore {
    /// Open the store, creating the task directory if absent.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Artifact path for `task_id`, or `None` if the id could escape the directory.
    pub fn artifact_path(&self, task_id: &str, ext: &str) -> Option<PathBuf> {
        if is_valid_task_id(task_id) {
            Some(self.dir.join(format!("{}.{}", task_id, ext)))
        } else {
            None
        }
    }

    fn capture_paths(&self, task_id: &str) -> Vec<PathBuf> {
        ["stdout", "stderr"]
            .iter()
            .filter_map(|ext| self.artifact_path(task_id, ext))
            .collect()
    }
}

impl TaskStore for FsTaskStore {
    fn create_captures(&self) -> Result<CaptureSinks> {
        let mut last_err = None;
        for _ in 0..ID_ATTEMPTS {
            let task_id = new_task_id();
            let (Some(out_path), Some(err_path), Some(meta_path)) = (
                self.artifact_path(&task_id, "stdout"),
                self.artifact_path(&task_id, "stderr"),
                self.artifact_path(&task_id, "meta"),
            ) else {
                continue;
            };
            if meta_path.exists() {
                continue;
            }

            let stdout = match create_new(&out_path) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let stderr = match create_new(&err_path) {
                Ok(f) => f,
                Err(e) => {
                    let _ = fs::remove_file(&out_path);
                    if e.kind() == io::ErrorKind::AlreadyExists {
                        last_err = Some(e);
                        continue;
                    }
                    return Err(e.into());
                }
            };

            debug!(%task_id, dir = %self.dir.display(), "capture artifacts created");
            return Ok(CaptureSinks {
                task_id,
                stdout,
                stderr,
            });
        }
        Err(last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no free task id"))
            .into())
    }

    fn discard_captures(&self, task_id: &str) {
        for path in self.capture_paths(task_id) {
            let _ = fs::remove_file(path);
        }
    }

    fn save(&self, record: &TaskRecord) -> Result<()> {
        let (Some(path), Some(tmp)) = (
            self.artifact_path(&record.task_id, "meta"),
            self.artifact_path(&record.task_id, "meta.tmp"),
        ) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid task id: {:?}", record.task_id),
            )
            .into());
        };
        let json = serde_json::to_string_pretty(record)?;
        {
            let mut f = File::create(&tmp)?;
            f.write_all(json.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let Some(path) = self.artifact_path(task_id, "meta") else {
            return Ok(None);
        };
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn last_output_at(&self, task_id: &str) -> Result<Option<SystemTime>> {
        let mut latest: Option<SystemTime> = None;
        for path in self.capture_paths(task_id) {
            let modified = match fs::metadata(&path) {
                Ok(m) => m.modified()?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            latest = Some(latest.map_or(modified, |t| t.max(modified)));
        }
        Ok(latest)
    }

    fn read_output(&self, task_id: &str) -> Result<CapturedOutput> {
        Ok(CapturedOutput {
            stdout: read_capture(self.artifact_path(task_id, "stdout"))?,
            stderr: read_capture(self.artifact_path(task_id, "stderr"))?,
        })
    }
}

/// Short opaque token: first 8 hex chars of a v4 UUID.
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Ids are restricted to `[A-Za-z0-9_-]+` so they can never name a path outside the store.
pub fn is_valid_task_id(task_id: &str) -> bool {
    !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Current wall-clock time as float UNIX seconds.
pub fn now_epoch() -> f64 {
    epoch_seconds(chrono::Utc::now())
}

pub fn epoch_seconds(at: impl Into<chrono::DateTime<chrono::Utc>>) -> f64 {
    at.into().timestamp_micros() as f64 / 1_000_000.0
}

fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().append(true).create_new(true).open(path)
}

fn read_capture(path: Option<PathBuf>) -> Result<String> {
    let Some(path) = path else {
        return Ok(String::new());
    };
    match fs::read(&path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task_id: &str) -> TaskRecord {
        TaskRecord {
            task_id: task_id.to_string(),
            pid: 4242,
            status: TaskStatus::Running,
            command: "codex exec hi".to_string(),
            started_at: 1_700_000_000.5,
            completed_at: None,
        }
    }

    #[test]
    fn test_task_id_shape() {
        let id = new_task_id();
        assert_eq!(id.len(), 8);
        assert!(is_valid_task_id(&id));
    }

    #[test]
    fn test_rejects_path_like_ids() {
        assert!(!is_valid_task_id(""));
        assert!(!is_valid_task_id("../etc/passwd"));
        assert!(!is_valid_task_id("a/b"));
        assert!(!is_valid_task_id("abc.meta"));
        assert!(is_valid_task_id("ab12-cd_3"));
    }

    #[test]
    fn test_create_captures_makes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTaskStore::open(dir.path().join("tasks")).unwrap();
        let sinks = store.create_captures().unwrap();
        assert!(store.artifact_path(&sinks.task_id, "stdout").unwrap().exists());
        assert!(store.artifact_path(&sinks.task_id, "stderr").unwrap().exists());
        assert!(store.load(&sinks.task_id).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTaskStore::open(dir.path()).unwrap();
        let rec = record("abcd1234");
        store.save(&rec).unwrap();
        assert_eq!(store.load("abcd1234").unwrap(), Some(rec));
        assert!(!store.artifact_path("abcd1234", "meta.tmp").unwrap().exists());
    }

    #[test]
    fn test_metadata_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTaskStore::open(dir.path()).unwrap();
        store.save(&record("abcd1234")).unwrap();
        let raw = fs::read_to_string(dir.path().join("abcd1234.meta")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["task_id"], "abcd1234");
        assert_eq!(v["pid"], 4242);
        assert_eq!(v["status"], "running");
        assert!(v.get("completed_at").is_none());
    }

    #[test]
    fn test_load_missing_and_invalid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTaskStore::open(dir.path()).unwrap();
        assert!(store.load("nope1234").unwrap().is_none());
        assert!(store.load("").unwrap().is_none());
        assert!(store.load("../x").unwrap().is_none());
    }

    #[test]
    fn test_read_output_missing_artifacts_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTaskStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("t1.stdout"), "partial").unwrap();
        let out = store.read_output("t1").unwrap();
        assert_eq!(out.stdout, "partial");
        assert_eq!(out.stderr, "");
        assert!(store.last_output_at("t1").unwrap().is_some());
        assert!(store.last_output_at("t2").unwrap().is_none());
    }

    #[test]
    fn test_discard_captures() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTaskStore::open(dir.path()).unwrap();
        let sinks = store.create_captures().unwrap();
        let id = sinks.task_id.clone();
        drop(sinks);
        store.discard_captures(&id);
        assert!(!store.artifact_path(&id, "stdout").unwrap().exists());
        assert!(!store.artifact_path(&id, "stderr").unwrap().exists());
    }
}
