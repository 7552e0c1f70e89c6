//! Isolated worker processes
//!
//! A [`WorkerProcess`] runs one child with stdout and stderr merged into a
//! single captured pipe, and is polled without blocking until that pipe
//! closes. The child is placed in its own process group, which is killed
//! when the wrapper is killed or dropped; on Linux the child is additionally
//! killed by the kernel if this process dies.

use std::borrow::Cow;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as sys;

#[cfg(not(unix))]
mod fallback;
#[cfg(not(unix))]
use fallback as sys;

/// Upper bound on bytes consumed by one `poll`
const MAX_READ_PER_POLL: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Result of one [`WorkerProcess::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// `start` was never called or failed
    NotStarted,
    /// Output was captured; more may be pending
    Output,
    /// Still running with nothing to read right now
    Running,
    /// Output closed and the exit code was collected
    Done,
}

struct Running {
    child: Child,
    output: sys::OutputPipe,
    group: sys::ProcessGroup,
}

/// One child process with captured, merged output.
#[derive(Default)]
pub struct WorkerProcess {
    running: Option<Running>,
    output: Vec<u8>,
    exit_code: Option<i32>,
    done: bool,
}

impl WorkerProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `command` with merged, captured output.
    ///
    /// On failure the wrapper stays neither running nor done.
    pub fn start(&mut self, mut command: Command) -> io::Result<()> {
        if self.running.is_some() || self.done {
            return Err(io::Error::other("worker process already started"));
        }

        let (reader, writer) = io::pipe()?;
        command
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);
        sys::configure(&mut command);

        let spawned = command.spawn();
        // The command holds our copies of the write end; the pipe only
        // reports closed once they are gone.
        drop(command);
        let mut child = spawned?;

        let mut group = sys::ProcessGroup::attach(&child);
        let output = match sys::OutputPipe::new(reader) {
            Ok(output) => output,
            Err(e) => {
                // Reap the child we can no longer observe
                if let Err(kill_err) = group.kill_and_reap(&mut child) {
                    tracing::warn!(pid = child.id(), "cannot reap worker: {}", kill_err);
                }
                return Err(e);
            }
        };
        tracing::debug!(pid = child.id(), "worker process started");

        self.running = Some(Running {
            child,
            output,
            group,
        });
        Ok(())
    }

    /// Check the output pipe without blocking.
    pub fn poll(&mut self) -> PollStatus {
        if self.done {
            return PollStatus::Done;
        }
        let Some(running) = &mut self.running else {
            return PollStatus::NotStarted;
        };

        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        while total < MAX_READ_PER_POLL {
            match running.output.read(&mut chunk) {
                Ok(0) => {
                    self.finish();
                    return PollStatus::Done;
                }
                Ok(n) => {
                    // Normalize line endings
                    self.output
                        .extend(chunk[..n].iter().copied().filter(|&b| b != b'\r'));
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("worker output pipe failed: {}", e);
                    self.finish();
                    return PollStatus::Done;
                }
            }
        }

        if total > 0 {
            PollStatus::Output
        } else {
            PollStatus::Running
        }
    }

    /// Collect the exit code and release every handle.
    fn finish(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        self.exit_code = match sys::wait_exit(&mut running.child, &mut running.group) {
            Ok(code) => Some(code),
            Err(e) => {
                tracing::warn!(pid = running.child.id(), "cannot collect worker exit code: {}", e);
                None
            }
        };
        self.done = true;
        tracing::debug!(
            pid = running.child.id(),
            exit_code = ?self.exit_code,
            "worker process finished"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Output captured so far, with carriage returns removed
    pub fn captured_output(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    /// Exit code once done; signals map to `128 + signal`.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Terminate the child and its group and discard captured output.
    ///
    /// Safe to call at any time, any number of times.
    pub fn kill(&mut self) {
        if let Some(mut running) = self.running.take() {
            if let Err(e) = running.group.kill_and_reap(&mut running.child) {
                tracing::warn!(pid = running.child.id(), "cannot reap killed worker: {}", e);
            }
            tracing::debug!(pid = running.child.id(), "worker process killed");
            self.done = true;
        }
        self.output.clear();
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    fn run_to_end(worker: &mut WorkerProcess) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while worker.poll() != PollStatus::Done {
            assert!(Instant::now() < deadline, "worker did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_captures_merged_output() {
        let mut worker = WorkerProcess::new();
        worker
            .start(shell("printf 'out\\r\\n'; printf 'err\\n' >&2; exit 0"))
            .unwrap();
        assert!(worker.is_running());
        run_to_end(&mut worker);

        assert!(worker.is_done());
        assert!(!worker.is_running());
        assert_eq!(worker.exit_code(), Some(0));
        assert_eq!(worker.captured_output(), "out\nerr\n");
    }

    #[test]
    fn test_exit_code() {
        let mut worker = WorkerProcess::new();
        worker.start(shell("echo failing; exit 3")).unwrap();
        run_to_end(&mut worker);
        assert_eq!(worker.exit_code(), Some(3));
        assert_eq!(worker.poll(), PollStatus::Done);
    }

    #[test]
    fn test_signal_exit_code() {
        let mut worker = WorkerProcess::new();
        worker.start(shell("kill -9 $$")).unwrap();
        run_to_end(&mut worker);
        assert_eq!(worker.exit_code(), Some(128 + 9));
    }

    #[test]
    fn test_poll_does_not_block() {
        let mut worker = WorkerProcess::new();
        worker.start(shell("sleep 5")).unwrap();

        let started = Instant::now();
        assert_eq!(worker.poll(), PollStatus::Running);
        assert!(started.elapsed() < Duration::from_secs(1));

        worker.kill();
        assert!(!worker.is_running());
        assert_eq!(worker.exit_code(), None);
    }

    #[test]
    fn test_kill_is_idempotent() {
        let mut worker = WorkerProcess::new();
        worker.kill();
        assert_eq!(worker.poll(), PollStatus::NotStarted);

        worker.start(shell("echo hi; sleep 5")).unwrap();
        worker.kill();
        worker.kill();
        assert_eq!(worker.captured_output(), "");

        let mut finished = WorkerProcess::new();
        finished.start(shell("echo done")).unwrap();
        run_to_end(&mut finished);
        finished.kill();
        assert_eq!(finished.exit_code(), Some(0));
    }

    #[test]
    fn test_spawn_failure() {
        let mut worker = WorkerProcess::new();
        let err = worker.start(Command::new("/nonexistent/rewind-worker"));
        assert!(err.is_err());
        assert!(!worker.is_running());
        assert!(!worker.is_done());
    }

    #[test]
    fn test_background_children_are_killed() {
        let mut worker = WorkerProcess::new();
        // The grandchild keeps the pipe open; only the group kill ends it
        worker
            .start(shell("sleep 30 & echo started; wait"))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.captured_output().contains("started") {
            assert!(Instant::now() < deadline);
            worker.poll();
            std::thread::sleep(Duration::from_millis(5));
        }
        let started = Instant::now();
        worker.kill();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_large_output() {
        let mut worker = WorkerProcess::new();
        worker
            .start(shell("i=0; while [ $i -lt 20000 ]; do echo line$i; i=$((i+1)); done"))
            .unwrap();
        run_to_end(&mut worker);
        let output = worker.captured_output();
        assert_eq!(output.lines().count(), 20000);
        assert!(output.ends_with("line19999\n"));
    }
}
