//! Direct-strategy supervision.
//!
//! Every group runs as one unit: a process whose combined output is read
//! without blocking. A single control thread sweeps the running units,
//! forwards whatever bytes are available, and reaps each unit once its
//! stream closes. Units move `Idle -> Running -> Closed` exactly once.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::Visibility;
use crate::deploy::{Directive, GroupPlan};
use crate::error::{LaunchError, Result};
use crate::invocation::{quote, Invocation};
use crate::process::{exit_code, spawn_merged, terminate, wait_readable};
pub use crate::process::{POLL_INTERVAL, TERMINATE_GRACE};


/// Status reported by a direct unit whose deploy step failed.
pub const DEPLOY_FAILED_STATUS: i32 = 125;

const READ_CHUNK: usize = 4096;


// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// One group's work, ready to be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub group: String,
    pub invocation: Invocation,
    /// True when the invocation deploys before launching.
    pub deploys: bool,
}

impl Unit {
    /// Turn a planned directive into a single unit. A deploy step is chained
    /// in front of the launch so that a failed deploy skips the launch and
    /// surfaces as `DEPLOY_FAILED_STATUS`.
    pub fn from_plan(plan: &GroupPlan) -> Unit {
        match (&plan.directive, plan.directive.deploy()) {
            (Directive::Staged { launch, .. }, Some(deploy)) => {
                let script = format!(
                    "{{ {}; }} || {{ echo {}; exit {}; }}; {}",
                    deploy.to_shell(),
                    quote(&format!("{}: deploy failed", plan.group)),
                    DEPLOY_FAILED_STATUS,
                    launch.to_shell()
                );
                Unit {
                    group: plan.group.clone(),
                    invocation: Invocation::new("sh").arg("-c").arg(script),
                    deploys: true,
                }
            }
            _ => Unit {
                group: plan.group.clone(),
                invocation: plan.directive.launch().clone(),
                deploys: false,
            },
        }
    }
}

/// Result of one non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    WouldBlock,
    /// End of stream or an unrecoverable read error.
    Closed,
}

/// A running unit's output stream plus its process.
pub trait OutputSource {
    fn read_available(&mut self, buf: &mut [u8]) -> ReadOutcome;

    /// Descriptor to wait on, if the source has one.
    fn raw_fd(&self) -> Option<RawFd>;

    /// Reap after the stream closed; returns the exit status.
    fn finish(&mut self) -> i32;

    /// Stop the unit early; returns the exit status.
    fn terminate(&mut self) -> i32;
}

/// Starts units.
pub trait UnitSpawner {
    fn spawn(&self, unit: &Unit) -> Result<Box<dyn OutputSource>>;
}


/// Production spawner: real processes with a non-blocking merged pipe.
pub struct ProcessSpawner;

impl UnitSpawner for ProcessSpawner {
    fn spawn(&self, unit: &Unit) -> Result<Box<dyn OutputSource>> {
        let merged = spawn_merged(&unit.invocation, true)?;
        Ok(Box::new(ProcessSource {
            child: merged.child,
            output: merged.output,
        }))
    }
}

struct ProcessSource {
    child: Child,
    output: std::fs::File,
}

impl OutputSource for ProcessSource {
    fn read_available(&mut self, buf: &mut [u8]) -> ReadOutcome {
        match self.output.read(buf) {
            Ok(0) => ReadOutcome::Closed,
            Ok(n) => ReadOutcome::Data(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => ReadOutcome::WouldBlock,
            Err(e) => {
                debug!(error = %e, "read failed, closing stream");
                ReadOutcome::Closed
            }
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.output.as_raw_fd())
    }

    fn finish(&mut self) -> i32 {
        match self.child.wait() {
            Ok(status) => exit_code(status),
            Err(e) => {
                error!(error = %e, "wait failed");
                1
            }
        }
    }

    fn terminate(&mut self) -> i32 {
        match terminate(&mut self.child, TERMINATE_GRACE) {
            Ok(status) => exit_code(status),
            Err(e) => {
                error!(error = %e, "terminate failed");
                1
            }
        }
    }
}


// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisionReport {
    /// Final status per group, in configuration order.
    pub statuses: Vec<(String, i32)>,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl SupervisionReport {
    pub fn failures(&self) -> Vec<(&str, i32)> {
        self.statuses
            .iter()
            .filter(|(_, code)| *code != 0)
            .map(|(name, code)| (name.as_str(), *code))
            .collect()
    }

    pub fn success(&self) -> bool {
        !self.interrupted && self.failures().is_empty()
    }
}

pub fn failure_line(group: &str, code: i32) -> String {
    format!("[{}][ERR] exited with code {}", group, code)
}

pub fn elapsed_line(elapsed: Duration) -> String {
    format!("Elapsed time: {} ms", elapsed.as_millis())
}


// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

enum UnitState {
    Idle,
    Running(Box<dyn OutputSource>),
    Closed(i32),
}

struct Slot {
    unit: Unit,
    visible: bool,
    state: UnitState,
}

pub struct Supervisor<'a, W: Write> {
    spawner: &'a dyn UnitSpawner,
    out: W,
    visibility: Visibility,
    cancel: Option<&'a AtomicBool>,
    interval: Duration,
}

impl<'a, W: Write> Supervisor<'a, W> {
    pub fn new(spawner: &'a dyn UnitSpawner, out: W, visibility: Visibility) -> Self {
        Supervisor {
            spawner,
            out,
            visibility,
            cancel: None,
            interval: POLL_INTERVAL,
        }
    }

    /// Stop every unit once `flag` becomes true.
    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Start every unit, supervise them to completion, print the report.
    /// If the output itself fails, every unit still running is stopped
    /// before the error is returned.
    pub fn run(&mut self, units: Vec<Unit>) -> Result<SupervisionReport> {
        let mut slots: Vec<Slot> = units
            .into_iter()
            .map(|unit| Slot {
                visible: self.visibility.shows(&unit.group),
                unit,
                state: UnitState::Idle,
            })
            .collect();

        let start = Instant::now();
        let interrupted = match self.supervise(&mut slots) {
            Ok(interrupted) => interrupted,
            Err(e) => {
                abandon(&mut slots);
                return Err(e);
            }
        };

        let elapsed = start.elapsed();
        self.line(&elapsed_line(elapsed))?;

        Ok(SupervisionReport {
            statuses: slots
                .into_iter()
                .map(|s| {
                    let code = match s.state {
                        UnitState::Closed(code) => code,
                        _ => 1,
                    };
                    (s.unit.group, code)
                })
                .collect(),
            elapsed,
            interrupted,
        })
    }

    /// Start and sweep until every slot is closed. Returns whether the run
    /// was cancelled.
    fn supervise(&mut self, slots: &mut [Slot]) -> Result<bool> {
        for slot in slots.iter_mut() {
            self.start(slot)?;
        }

        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            if self.cancelled() {
                warn!("interrupted, stopping running groups");
                self.stop_all(slots)?;
                return Ok(true);
            }

            for slot in slots.iter_mut() {
                self.sweep(slot, &mut buf)?;
            }

            if slots.iter().all(|s| matches!(s.state, UnitState::Closed(_))) {
                return Ok(false);
            }
            self.wait_ready(slots);
        }
    }

    fn start(&mut self, slot: &mut Slot) -> Result<()> {
        info!(group = %slot.unit.group, "starting");
        debug!(group = %slot.unit.group, command = %slot.unit.invocation.to_shell(), "unit command");
        match self.spawner.spawn(&slot.unit) {
            Ok(source) => slot.state = UnitState::Running(source),
            Err(e) => {
                // A group that cannot start does not stop its siblings.
                error!(group = %slot.unit.group, error = %e, "failed to start");
                slot.state = UnitState::Closed(127);
                self.line(&failure_line(&slot.unit.group, 127))?;
            }
        }
        Ok(())
    }

    fn sweep(&mut self, slot: &mut Slot, buf: &mut [u8]) -> Result<()> {
        let UnitState::Running(ref mut source) = slot.state else {
            return Ok(());
        };
        match source.read_available(buf) {
            ReadOutcome::Data(n) => {
                if slot.visible {
                    self.write(&buf[..n])?;
                }
            }
            ReadOutcome::WouldBlock => {}
            ReadOutcome::Closed => {
                let code = source.finish();
                slot.state = UnitState::Closed(code);
                self.closed(&slot.unit, code)?;
            }
        }
        Ok(())
    }

    fn closed(&mut self, unit: &Unit, code: i32) -> Result<()> {
        if code == 0 {
            info!(group = %unit.group, "finished");
            return Ok(());
        }
        if unit.deploys && code == DEPLOY_FAILED_STATUS {
            warn!(group = %unit.group, "deploy failed, launch skipped");
        } else {
            warn!(group = %unit.group, code, "exited with non-zero status");
        }
        self.line(&failure_line(&unit.group, code))
    }

    fn stop_all(&mut self, slots: &mut [Slot]) -> Result<()> {
        for slot in slots.iter_mut() {
            if let UnitState::Running(ref mut source) = slot.state {
                let code = source.terminate();
                slot.state = UnitState::Closed(code);
                self.line(&failure_line(&slot.unit.group, code))?;
            }
        }
        Ok(())
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Block until some running stream is readable or the interval passes.
    fn wait_ready(&self, slots: &[Slot]) {
        let mut fds = Vec::new();
        for slot in slots {
            if let UnitState::Running(ref source) = slot.state {
                match source.raw_fd() {
                    Some(fd) => fds.push(fd),
                    None => {
                        std::thread::sleep(self.interval);
                        return;
                    }
                }
            }
        }
        if !fds.is_empty() {
            wait_readable(&fds, self.interval);
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.out
            .write_all(bytes)
            .and_then(|_| self.out.flush())
            .map_err(|e| LaunchError::io("cannot write output", "<stdout>", e))
    }

    fn line(&mut self, text: &str) -> Result<()> {
        self.write(format!("{}\n", text).as_bytes())
    }
}


/// Stop whatever is still running without reporting it anywhere.
fn abandon(slots: &mut [Slot]) {
    for slot in slots.iter_mut() {
        if let UnitState::Running(ref mut source) = slot.state {
            let code = source.terminate();
            warn!(group = %slot.unit.group, code, "output lost, group stopped");
            slot.state = UnitState::Closed(code);
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
