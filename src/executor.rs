use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::extract::OutputExtractor;
use crate::launcher::Invocation;

pub const TIMEOUT_MESSAGE: &str = "Error: Codex execution timed out";

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long to wait for pipe readers after the group has been killed.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Raw result of a blocking run.
#[derive(Debug)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

/// Run `invocation` to completion and return the extracted answer.
///
/// Never fails at the protocol level: timeouts and launch faults come back as text.
pub fn execute_sync(
    invocation: &Invocation,
    timeout: Option<Duration>,
    extractor: &dyn OutputExtractor,
) -> String {
    match execute_capture(invocation, timeout) {
        Ok(out) if out.timed_out => {
            warn!(command = %invocation.display(), elapsed_ms = out.elapsed_ms, "codex timed out");
            TIMEOUT_MESSAGE.to_string()
        }
        Ok(out) => {
            debug!(exit_code = out.exit_code, elapsed_ms = out.elapsed_ms, "codex finished");
            extractor.extract(&out.stdout, &out.stderr)
        }
        Err(e) => {
            warn!(command = %invocation.display(), "codex failed to run: {}", e);
            format!("Error calling Codex: {}", e)
        }
    }
}

/// Spawn, capture both pipes in memory, and wait with an optional timeout.
///
/// The timeout bounds the whole run, including reading the pipes: a descendant
/// that outlives the child while holding stdout or stderr open still counts.
pub fn execute_capture(invocation: &Invocation, timeout: Option<Duration>) -> io::Result<ExecOutput> {
    let start = Instant::now();
    let deadline = timeout.map(|limit| start + limit);

    let mut child = spawn_group(invocation)?;

    // Drain both pipes concurrently so a chatty child never blocks on a full pipe.
    let (tx, rx) = mpsc::channel();
    let mut pending = 0;
    if let Some(pipe) = child.stdout.take() {
        drain(pipe, Stream::Stdout, tx.clone());
        pending += 1;
    }
    if let Some(pipe) = child.stderr.take() {
        drain(pipe, Stream::Stderr, tx.clone());
        pending += 1;
    }
    drop(tx);

    let mut captured = Captured::default();
    let (exit_code, timed_out) = match wait_until(&mut child, deadline)? {
        Some(code) => {
            if collect(&rx, &mut captured, pending, deadline) {
                (code, false)
            } else {
                debug!("pipes still open at deadline, killing process group");
                kill_group(&mut child);
                (-1, true)
            }
        }
        None => {
            collect(&rx, &mut captured, pending, Some(Instant::now() + DRAIN_GRACE));
            (-1, true)
        }
    };

    Ok(ExecOutput {
        stdout: captured.stdout,
        stderr: captured.stderr,
        exit_code,
        timed_out,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

/// Spawn `invocation` as the leader of a new process group with both pipes captured.
fn spawn_group(invocation: &Invocation) -> io::Result<Child> {
    let mut cmd = invocation.command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    unsafe {
        cmd.pre_exec(|| {
            // New process group so we can kill all children on timeout
            libc::setpgid(0, 0);
            Ok(())
        });
    }
    cmd.spawn()
}

/// Poll the child until it exits (`Some(code)`) or `deadline` passes (`None`).
/// The group is killed before returning on deadline or on a wait error.
fn wait_until(child: &mut Child, deadline: Option<Instant>) -> io::Result<Option<i32>> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status.code().unwrap_or(-1))),
            Ok(None) => {}
            Err(e) => {
                warn!("waiting on codex failed ({}), killing process group", e);
                kill_group(child);
                return Err(e);
            }
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            kill_group(child);
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill the child's entire process group (child + its subprocesses).
fn kill_group(child: &mut Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        debug!("killpg failed ({}), killing child only", e);
        let _ = child.kill();
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct Captured {
    stdout: String,
    stderr: String,
}

fn drain<R: Read + Send + 'static>(mut reader: R, stream: Stream, tx: Sender<(Stream, Vec<u8>)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send((stream, buf));
    });
}

/// Gather drained pipes until all `pending` have reported. Returns `false` if
/// `deadline` passed first.
fn collect(
    rx: &Receiver<(Stream, Vec<u8>)>,
    captured: &mut Captured,
    mut pending: usize,
    deadline: Option<Instant>,
) -> bool {
    while pending > 0 {
        let received = match deadline {
            Some(d) => rx.recv_timeout(d.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok((stream, bytes)) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                match stream {
                    Stream::Stdout => captured.stdout = text,
                    Stream::Stderr => captured.stderr = text,
                }
                pending -= 1;
            }
            Err(RecvTimeoutError::Timeout) => return false,
            Err(RecvTimeoutError::Disconnected) => return true,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::MarkerExtractor;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh", "-c", Some(script), &[])
    }

    #[test]
    fn test_stdout_returned_trimmed() {
        let text = execute_sync(&sh("echo hello"), None, &MarkerExtractor::default());
        assert_eq!(text, "hello");
    }

    #[test]
    fn test_stderr_segment_extracted() {
        let script = "printf 'thinking\\ncodex\\nanswer here\\ntokens used: 9\\n' >&2";
        let text = execute_sync(&sh(script), None, &MarkerExtractor::default());
        assert_eq!(text, "answer here");
    }

    #[test]
    fn test_silent_process_falls_back() {
        let text = execute_sync(&sh("echo oops >&2; exit 3"), None, &MarkerExtractor::default());
        assert_eq!(text, "No output from Codex");
    }

    #[test]
    fn test_capture_reports_exit_code() {
        let out = execute_capture(&sh("exit 7"), None).unwrap();
        assert_eq!(out.exit_code, 7);
        assert!(!out.timed_out);
    }

    #[test]
    fn test_spawn_failure_is_text() {
        let inv = Invocation::new("/nonexistent/codex-binary", "exec", None, &[]);
        let text = execute_sync(&inv, None, &MarkerExtractor::default());
        assert!(text.starts_with("Error calling Codex:"), "got: {}", text);
    }

    #[test]
    fn test_kill_group_reaches_background_children() {
        let mut child = spawn_group(&sh("sleep 60 & sleep 60")).unwrap();
        let mut stdout = child.stdout.take().unwrap();
        thread::sleep(Duration::from_millis(200));

        let start = Instant::now();
        kill_group(&mut child);
        child.wait().unwrap();
        // Every holder of the pipe is gone, so EOF arrives immediately.
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_collect_stops_at_deadline() {
        let (tx, rx) = mpsc::channel::<(Stream, Vec<u8>)>();
        tx.send((Stream::Stdout, b"partial".to_vec())).unwrap();
        let mut captured = Captured::default();
        let deadline = Some(Instant::now() + Duration::from_millis(100));
        assert!(!collect(&rx, &mut captured, 2, deadline));
        assert_eq!(captured.stdout, "partial");
        drop(tx);
    }
}
