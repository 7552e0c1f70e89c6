//! Process control for platforms without process groups or non-blocking
//! pipes: a reader thread forwards output over a channel.

use std::io::{self, PipeReader, Read};
use std::process::{Child, Command};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

pub(super) fn configure(_command: &mut Command) {}

/// Merged output pipe drained by a background thread.
pub(super) struct OutputPipe {
    chunks: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl OutputPipe {
    pub(super) fn new(mut reader: PipeReader) -> io::Result<Self> {
        let (tx, chunks) = mpsc::channel();
        thread::Builder::new()
            .name("worker-output".into())
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            })?;
        Ok(Self {
            chunks,
            pending: Vec::new(),
        })
    }
}

impl Read for OutputPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.chunks.try_recv() {
                Ok(chunk) => self.pending = chunk,
                Err(TryRecvError::Empty) => return Err(io::ErrorKind::WouldBlock.into()),
                // Reader thread saw end of stream
                Err(TryRecvError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Kills the child directly; there is no group to tear down.
pub(super) struct ProcessGroup;

impl ProcessGroup {
    pub(super) fn attach(_child: &Child) -> Self {
        Self
    }

    pub(super) fn kill_and_reap(&mut self, child: &mut Child) -> io::Result<()> {
        if let Err(e) = child.kill() {
            // Already exited; still needs reaping
            tracing::debug!(pid = child.id(), "kill failed: {}", e);
        }
        child.wait().map(|_| ())
    }
}

pub(super) fn wait_exit(child: &mut Child, _group: &mut ProcessGroup) -> io::Result<i32> {
    Ok(child.wait()?.code().unwrap_or(-1))
}
