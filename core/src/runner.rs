//! Command runner abstraction for blocking collaborator calls.
//!
//! `CommandRunner` is the trait the collective launcher uses to run staging
//! steps and the collective job. `ProcessRunner` is the production
//! implementation; `MockRunner` is the test double that records calls and
//! returns preset responses.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::error::{LaunchError, Result};
use crate::invocation::Invocation;
use crate::process::{exit_code, spawn_merged, terminate, wait_readable, POLL_INTERVAL, TERMINATE_GRACE};


/// Status and combined output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOutput {
    pub status: i32,
    pub output: String,
}

impl RunOutput {
    pub fn ok(output: &str) -> Self {
        RunOutput {
            status: 0,
            output: output.to_string(),
        }
    }

    pub fn failed(status: i32, output: &str) -> Self {
        RunOutput {
            status,
            output: output.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Trait for running invocations to completion.
pub trait CommandRunner {
    /// Run and capture combined output.
    fn run(&self, inv: &Invocation) -> Result<RunOutput>;

    /// Run, forwarding combined output to `out` as it arrives until the
    /// stream closes. Returns the exit status.
    fn stream(&self, inv: &Invocation, out: &mut dyn Write) -> Result<i32>;
}


/// Production runner. Each command runs in its own process group; once the
/// cancel flag is raised the whole group is stopped and the call fails with
/// `Interrupted`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner<'a> {
    cancel: Option<&'a AtomicBool>,
}

/// Why a drain loop ended.
enum Stop {
    Closed,
    Interrupted,
    Output(std::io::Error),
}

impl<'a> ProcessRunner<'a> {
    pub fn new() -> Self {
        ProcessRunner { cancel: None }
    }

    pub fn with_cancel(flag: &'a AtomicBool) -> Self {
        ProcessRunner { cancel: Some(flag) }
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Feed every chunk of output to `sink`, then reap. The child is stopped
    /// instead when cancelled or when `sink` fails.
    fn drain(&self, inv: &Invocation, sink: &mut dyn FnMut(&[u8]) -> std::io::Result<()>) -> Result<i32> {
        let mut unit = spawn_merged(inv, true)?;
        let fd = unit.output.as_raw_fd();
        let mut buf = [0u8; 4096];
        let stop = loop {
            if self.cancelled() {
                break Stop::Interrupted;
            }
            match unit.output.read(&mut buf) {
                Ok(0) => break Stop::Closed,
                Ok(n) => {
                    if let Err(e) = sink(&buf[..n]) {
                        break Stop::Output(e);
                    }
                }
                Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted) => {
                    wait_readable(&[fd], POLL_INTERVAL);
                }
                Err(_) => break Stop::Closed,
            }
        };

        let wait_err = |source: std::io::Error| LaunchError::Spawn {
            program: inv.program.clone(),
            source,
        };
        match stop {
            Stop::Closed => {
                let status = unit.child.wait().map_err(wait_err)?;
                Ok(exit_code(status))
            }
            Stop::Interrupted => {
                let status = terminate(&mut unit.child, TERMINATE_GRACE).map_err(wait_err)?;
                warn!(program = %inv.program, code = exit_code(status), "interrupted, command stopped");
                Err(LaunchError::Interrupted)
            }
            Stop::Output(e) => {
                let status = terminate(&mut unit.child, TERMINATE_GRACE).map_err(wait_err)?;
                warn!(program = %inv.program, code = exit_code(status), "output lost, command stopped");
                Err(LaunchError::io("cannot write output", "<stdout>", e))
            }
        }
    }
}

impl CommandRunner for ProcessRunner<'_> {
    fn run(&self, inv: &Invocation) -> Result<RunOutput> {
        let mut output = Vec::new();
        let status = self.drain(inv, &mut |chunk| {
            output.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(RunOutput {
            status,
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }

    fn stream(&self, inv: &Invocation, out: &mut dyn Write) -> Result<i32> {
        self.drain(inv, &mut |chunk| {
            out.write_all(chunk)?;
            out.flush()
        })
    }
}


/// Test-double runner that records invocations and returns pre-configured
/// responses in order. Once the responses run out every call succeeds with
/// empty output.
pub struct MockRunner {
    responses: RefCell<Vec<RunOutput>>,
    invocations: RefCell<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> Self {
        MockRunner {
            responses: RefCell::new(Vec::new()),
            invocations: RefCell::new(Vec::new()),
        }
    }

    pub fn with_responses(responses: Vec<RunOutput>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        MockRunner {
            responses: RefCell::new(reversed),
            invocations: RefCell::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    /// Program names in call order.
    pub fn programs(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(|i| i.program.clone())
            .collect()
    }

    fn next(&self, inv: &Invocation) -> RunOutput {
        self.invocations.borrow_mut().push(inv.clone());
        self.responses.borrow_mut().pop().unwrap_or_default()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, inv: &Invocation) -> Result<RunOutput> {
        Ok(self.next(inv))
    }

    fn stream(&self, inv: &Invocation, out: &mut dyn Write) -> Result<i32> {
        let response = self.next(inv);
        let _ = out.write_all(response.output.as_bytes());
        Ok(response.status)
    }
}
