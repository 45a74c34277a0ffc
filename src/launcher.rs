//! Process Launcher: starts the external tool fully detached, output redirected to files.

use std::fs::File;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info, warn};

use crate::error::{Result, TaskError};
use crate::store::{now_epoch, TaskRecord, TaskStatus, TaskStore};

/// One invocation of the external tool: `<program> <subcommand> [prompt] [args...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub subcommand: String,
    pub prompt: Option<String>,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: &str, subcommand: &str, prompt: Option<&str>, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            subcommand: subcommand.to_string(),
            // An empty prompt is treated as no prompt.
            prompt: prompt.filter(|p| !p.is_empty()).map(str::to_string),
            args: args.to_vec(),
        }
    }

    /// Arguments after the program name.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.subcommand.clone()];
        if let Some(ref prompt) = self.prompt {
            argv.push(prompt.clone());
        }
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Space-joined command line, for display only.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.argv());
        parts.join(" ")
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.argv());
        cmd
    }
}

/// Spawn with output redirected to two sinks; return the pid without waiting.
pub trait ProcessLauncher {
    fn spawn_detached(&self, invocation: &Invocation, stdout: File, stderr: File) -> io::Result<u32>;
}

/// Launches in a new session so the child outlives this server.
pub struct SessionLauncher;

impl ProcessLauncher for SessionLauncher {
    fn spawn_detached(&self, invocation: &Invocation, stdout: File, stderr: File) -> io::Result<u32> {
        let mut cmd = invocation.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        unsafe {
            cmd.pre_exec(|| {
                // New session: no controlling terminal, own process group.
                nix::unistd::setsid().map_err(io::Error::from)?;
                Ok(())
            });
        }
        let mut child = cmd.spawn()?;
        let pid = child.id();

        // Reap on exit so finished tasks don't linger as zombies.
        // Liveness never looks at this.
        let spawned = thread::Builder::new()
            .name(format!("reap-{}", pid))
            .spawn(move || match child.wait() {
                Ok(status) => debug!(pid, %status, "background task exited"),
                Err(e) => warn!(pid, "wait failed: {}", e),
            });
        if let Err(e) = spawned {
            warn!(pid, "could not start reaper thread: {}", e);
        }
        Ok(pid)
    }
}

/// Launch a background task and persist its initial record. Returns the task id.
///
/// All three artifacts exist once this returns `Ok`. Never waits on the child.
pub fn start_task(
    store: &dyn TaskStore,
    launcher: &dyn ProcessLauncher,
    invocation: &Invocation,
) -> Result<String> {
    let sinks = store.create_captures()?;
    let task_id = sinks.task_id;

    let pid = match launcher.spawn_detached(invocation, sinks.stdout, sinks.stderr) {
        Ok(pid) => pid,
        Err(source) => {
            store.discard_captures(&task_id);
            return Err(TaskError::Spawn {
                program: invocation.program.clone(),
                source,
            });
        }
    };

    let record = TaskRecord {
        task_id: task_id.clone(),
        pid,
        status: TaskStatus::Running,
        command: invocation.display(),
        started_at: now_epoch(),
        completed_at: None,
    };
    store.save(&record)?;
    info!(%task_id, pid, command = %record.command, "background task started");
    Ok(task_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsTaskStore;

    struct FailingLauncher;

    impl ProcessLauncher for FailingLauncher {
        fn spawn_detached(&self, _: &Invocation, _: File, _: File) -> io::Result<u32> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such binary"))
        }
    }

    #[test]
    fn test_invocation_argv() {
        let inv = Invocation::new("codex", "exec", Some("fix it"), &["--full-auto".to_string()]);
        assert_eq!(inv.argv(), vec!["exec", "fix it", "--full-auto"]);
        assert_eq!(inv.display(), "codex exec fix it --full-auto");
    }

    #[test]
    fn test_empty_prompt_is_dropped() {
        let inv = Invocation::new("codex", "resume", Some(""), &[]);
        assert_eq!(inv.prompt, None);
        assert_eq!(inv.argv(), vec!["resume"]);
    }

    #[test]
    fn test_spawn_failure_leaves_no_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTaskStore::open(dir.path()).unwrap();
        let inv = Invocation::new("codex", "exec", Some("x"), &[]);
        let err = start_task(&store, &FailingLauncher, &inv).unwrap_err();
        assert!(matches!(err, TaskError::Spawn { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_start_task_writes_running_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTaskStore::open(dir.path()).unwrap();
        let inv = Invocation::new("sh", "-c", Some("echo started"), &[]);
        let task_id = start_task(&store, &SessionLauncher, &inv).unwrap();

        let rec = store.load(&task_id).unwrap().expect("metadata written");
        assert_eq!(rec.status, TaskStatus::Running);
        assert_eq!(rec.command, "sh -c echo started");
        assert!(rec.pid > 0);
        assert!(rec.completed_at.is_none());
        assert!(store.artifact_path(&task_id, "stdout").unwrap().exists());
        assert!(store.artifact_path(&task_id, "stderr").unwrap().exists());
    }
}
