//! Unix process control: process groups and non-blocking pipe reads

use std::io::{self, PipeReader, Read};
use std::os::fd::AsRawFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command};

/// Put the child in a fresh process group and, on Linux, have the kernel
/// kill it when this process exits.
pub(super) fn configure(command: &mut Command) {
    command.process_group(0);

    #[cfg(target_os = "linux")]
    {
        // SAFETY: prctl is async-signal-safe and touches no parent state
        unsafe {
            command.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
}

/// Read end of the merged stdout/stderr pipe, in non-blocking mode.
pub(super) struct OutputPipe {
    reader: PipeReader,
}

impl OutputPipe {
    pub(super) fn new(reader: PipeReader) -> io::Result<Self> {
        let fd = reader.as_raw_fd();
        // SAFETY: fd is owned by `reader` and open for the duration of the calls
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { reader })
    }
}

impl Read for OutputPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

/// Guard over the child's process group.
///
/// The group id equals the child's pid until the child is reaped; the guard
/// is disarmed at that point so a recycled id is never signalled.
pub(super) struct ProcessGroup {
    pgid: Option<libc::pid_t>,
}

impl ProcessGroup {
    pub(super) fn attach(child: &Child) -> Self {
        Self {
            pgid: libc::pid_t::try_from(child.id()).ok(),
        }
    }

    fn signal_group(&self) {
        if let Some(pgid) = self.pgid {
            // SAFETY: plain syscall; ESRCH just means the group is empty
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }

    /// SIGKILL every process in the group and reap the child.
    pub(super) fn kill_and_reap(&mut self, child: &mut Child) -> io::Result<()> {
        self.signal_group();
        let status = child.wait();
        self.disarm();
        status.map(|_| ())
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.signal_group();
    }
}

/// Wait for the child to exit after its output closed.
///
/// The child is observed without being reaped first, so its group id stays
/// reserved while leftover group members are killed.
pub(super) fn wait_exit(child: &mut Child, group: &mut ProcessGroup) -> io::Result<i32> {
    if let Some(pid) = group.pgid {
        loop {
            // SAFETY: siginfo_t is plain data and only written by the kernel
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                tracing::debug!(pid, "waitid failed: {}", err);
                break;
            }
        }
        group.signal_group();
    }

    let status = child.wait();
    group.disarm();
    let status = status?;
    Ok(status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1))
}
