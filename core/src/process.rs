//! Child processes with merged output.
//!
//! A spawned unit writes stdout and stderr into the same pipe and runs in its
//! own process group, so the whole tree it starts (ssh, rsync, the program)
//! can be signalled at once.

use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{LaunchError, Result};
use crate::invocation::Invocation;


/// Longest wait for output before cancellation is checked again.
pub const POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Time a child gets after SIGTERM before SIGKILL.
pub const TERMINATE_GRACE: Duration = Duration::from_millis(500);


/// A running child plus the read end of its output pipe.
pub struct MergedChild {
    pub child: Child,
    pub output: File,
}

/// Start `inv` with stdout and stderr sharing one pipe. With `nonblocking`
/// the returned read end never blocks.
pub fn spawn_merged(inv: &Invocation, nonblocking: bool) -> Result<MergedChild> {
    let spawn_err = |source: std::io::Error| LaunchError::Spawn {
        program: inv.program.clone(),
        source,
    };

    let (read_end, write_end) = pipe().map_err(spawn_err)?;
    let write_clone = write_end.try_clone().map_err(spawn_err)?;

    let mut cmd = inv.to_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(write_end))
        .stderr(Stdio::from(write_clone))
        .process_group(0);
    let child = cmd.spawn().map_err(spawn_err)?;
    // The parent's copies of the write end live in `cmd`; dropping it lets
    // the reader see end-of-stream once the child exits.
    drop(cmd);

    if nonblocking {
        set_nonblocking(read_end.as_raw_fd()).map_err(spawn_err)?;
    }
    debug!(program = %inv.program, pid = child.id(), "spawned");
    Ok(MergedChild {
        child,
        output: read_end,
    })
}

fn pipe() -> std::io::Result<(File, File)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for fd in fds {
        unsafe {
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }
    }
    let read_end = unsafe { File::from_raw_fd(fds[0]) };
    let write_end = unsafe { File::from_raw_fd(fds[1]) };
    Ok((read_end, write_end))
}

fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}


/// Block until one of `fds` is readable or `timeout` passes. EINTR and other
/// poll failures just end the wait early.
pub fn wait_readable(fds: &[RawFd], timeout: Duration) {
    if fds.is_empty() {
        std::thread::sleep(timeout);
        return;
    }
    let mut polled: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    unsafe {
        libc::poll(polled.as_mut_ptr(), polled.len() as libc::nfds_t, millis);
    }
}


/// Numeric status of a finished process; a signal death becomes
/// `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => status.signal().map(|sig| 128 + sig).unwrap_or(1),
    }
}

/// Stop a child's process group: SIGTERM, then SIGKILL once `grace` has
/// passed. Returns the reaped status.
pub fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    let pgid = child.id() as libc::pid_t;
    unsafe {
        libc::kill(-pgid, libc::SIGTERM);
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
    child.wait()
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn stdout_and_stderr_are_merged() {
        let mut unit = spawn_merged(&sh("echo out; echo err 1>&2; exit 3"), false).unwrap();
        let mut text = String::new();
        unit.output.read_to_string(&mut text).unwrap();
        let status = unit.child.wait().unwrap();
        assert_eq!(text, "out\nerr\n");
        assert_eq!(exit_code(status), 3);
    }

    #[test]
    fn nonblocking_read_would_block() {
        let mut unit = spawn_merged(&sh("sleep 1"), true).unwrap();
        let mut buf = [0u8; 16];
        let err = unit.output.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
        terminate(&mut unit.child, Duration::from_millis(200)).unwrap();
    }

    #[test]
    fn terminate_reports_signal_status() {
        let mut unit = spawn_merged(&sh("sleep 30"), true).unwrap();
        let status = terminate(&mut unit.child, Duration::from_secs(2)).unwrap();
        assert_eq!(exit_code(status), 128 + libc::SIGTERM);
    }

    #[test]
    fn wait_readable_wakes_on_output() {
        let unit = spawn_merged(&sh("echo ready"), true).unwrap();
        let started = Instant::now();
        wait_readable(&[unit.output.as_raw_fd()], Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = spawn_merged(&Invocation::new("/nonexistent/fleetrun-test"), false).err().unwrap();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }
}
