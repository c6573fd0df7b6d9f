//! Launcher: wires configuration, classification, planning and one of the
//! two execution strategies together.
//!
//! `Launcher` holds the pieces built once per run and exposes each stage
//! separately so the strategies can be exercised with injected spawners and
//! runners. `launch` is the production entry point used by the binary.

use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use tracing::{debug, info};

use crate::collective::{CollectiveLauncher, CollectivePlan};
use crate::config::{Group, LaunchConfig, Overrides, Strategy};
use crate::context::{absolute, resolve_executable, LaunchContext};
use crate::deploy::{DeploymentPlanner, Directive, GroupPlan};
use crate::error::{LaunchError, Result};
use crate::host::HostClassifier;
use crate::libraries::shared_libraries;
use crate::rankfile;
use crate::registry::CommandRegistry;
use crate::runner::{CommandRunner, ProcessRunner};
use crate::signals;
use crate::supervisor::{ProcessSpawner, SupervisionReport, Supervisor, Unit, UnitSpawner};


/// Exit status used when the run was interrupted by a signal.
pub const INTERRUPTED_STATUS: i32 = 130;


/// What the binary asks for.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub config: PathBuf,
    pub executable: PathBuf,
    /// Arguments after the executable.
    pub args: Vec<String>,
    pub overrides: Overrides,
}


pub struct Launcher<'a> {
    ctx: &'a LaunchContext,
    registry: &'a CommandRegistry,
    libraries: &'a [PathBuf],
}

impl<'a> Launcher<'a> {
    pub fn new(ctx: &'a LaunchContext, registry: &'a CommandRegistry, libraries: &'a [PathBuf]) -> Self {
        Launcher {
            ctx,
            registry,
            libraries,
        }
    }

    // -- direct --------------------------------------------------------------

    pub fn direct_plans(&self, groups: &[Group], locality: &[bool]) -> Vec<GroupPlan> {
        let planner = DeploymentPlanner::new(self.ctx, self.registry, self.libraries);
        groups
            .iter()
            .zip(locality)
            .map(|(group, &local)| planner.plan(group, local))
            .collect()
    }

    pub fn run_direct(
        &self,
        plans: &[GroupPlan],
        spawner: &dyn UnitSpawner,
        cancel: Option<&AtomicBool>,
        out: &mut dyn Write,
    ) -> Result<SupervisionReport> {
        let units: Vec<Unit> = plans.iter().map(Unit::from_plan).collect();
        let mut supervisor = Supervisor::new(spawner, out, self.ctx.global.visibility.clone());
        if let Some(flag) = cancel {
            supervisor = supervisor.with_cancel(flag);
        }
        supervisor.run(units)
    }

    // -- collective ----------------------------------------------------------

    pub fn collective_plan(&self, groups: &[Group], locality: &[bool], runner: &dyn CommandRunner) -> CollectivePlan {
        CollectiveLauncher::new(self.ctx, self.registry, self.libraries, runner).prepare(
            groups,
            locality,
            &rankfile::default_path(),
        )
    }

    pub fn run_collective(
        &self,
        plan: &CollectivePlan,
        groups: &[Group],
        runner: &dyn CommandRunner,
        out: &mut dyn Write,
    ) -> Result<()> {
        CollectiveLauncher::new(self.ctx, self.registry, self.libraries, runner).run(
            plan,
            groups,
            self.keep_rank_file(),
            out,
        )
    }

    /// The rank file stays behind when every group's output is shown.
    pub fn keep_rank_file(&self) -> bool {
        self.ctx.global.visibility.shows_all()
    }
}


// ---------------------------------------------------------------------------
// Dry-run listings
// ---------------------------------------------------------------------------

/// Per-group listing: destination, then the staging and launch commands.
pub fn direct_listing(plans: &[GroupPlan]) -> String {
    let mut text = String::new();
    for plan in plans {
        let _ = writeln!(text, "On {}", plan.destination);
        if let Some(deploy) = plan.directive.deploy() {
            let _ = writeln!(text, "(deploy)\n  {}", deploy.to_shell());
        }
        match (&plan.directive, &plan.remote_command) {
            (_, Some(remote)) => {
                let _ = writeln!(text, "(ssh)\n  {}\n", remote);
            }
            (Directive::Shared { launch } | Directive::Staged { launch, .. }, None) => {
                let _ = writeln!(text, "{}\n", launch.to_shell());
            }
        }
    }
    text
}

/// Collective listing. The rank file contents are printed unless the file
/// itself is kept.
pub fn collective_listing(plan: &CollectivePlan, groups: &[Group], keep_rank_file: bool) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "RankFile: {}", plan.rank_file.display());
    if !keep_rank_file {
        text.push_str(&rankfile::render(groups));
    }
    for stage in &plan.stages {
        let how = if stage.local { "Copying on" } else { "Deploying on" };
        let _ = writeln!(text, "{} {}\n  {}", how, stage.destination, stage.deploy.to_shell());
    }
    let _ = writeln!(text, "Command:  {}", plan.launch.to_shell());
    text
}


// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Load, plan and run. Returns the process exit status for a completed run;
/// fatal conditions come back as errors.
pub fn launch(request: &LaunchRequest, out: &mut dyn Write) -> Result<i32> {
    let executable = resolve_executable(&request.executable)?;
    let config_file = absolute(&request.config)?;
    let config = LaunchConfig::load(&config_file, &request.overrides)?;
    info!(
        strategy = %config.global.strategy,
        groups = config.groups.len(),
        shared = config.global.shared_filesystem,
        "configuration loaded"
    );

    let cwd = std::env::current_dir().map_err(|e| LaunchError::io("cannot determine current directory", ".", e))?;
    let registry = CommandRegistry::from_args(&request.args, &cwd);
    debug!(files = registry.len(), "command-line files registered");

    let libraries = if !config.global.shared_filesystem && config.groups.iter().any(|g| g.pass_dl) {
        shared_libraries(&executable, &ProcessRunner::new())
    } else {
        Vec::new()
    };

    let classifier = HostClassifier::system()?;
    let locality = classifier.classify_all(&config.groups)?;
    let ctx = LaunchContext::new(
        config.global.clone(),
        executable,
        config_file,
        classifier.hostname().to_string(),
    );
    let launcher = Launcher::new(&ctx, &registry, &libraries);
    let write_err = |e: std::io::Error| LaunchError::io("cannot write output", "<stdout>", e);

    match ctx.global.strategy {
        Strategy::Direct => {
            let plans = launcher.direct_plans(&config.groups, &locality);
            if ctx.global.dry_run {
                out.write_all(direct_listing(&plans).as_bytes()).map_err(write_err)?;
                return Ok(0);
            }
            let cancel = signals::install();
            let report = launcher.run_direct(&plans, &ProcessSpawner, Some(cancel), out)?;
            if report.interrupted {
                Ok(INTERRUPTED_STATUS)
            } else if report.success() {
                Ok(0)
            } else {
                Ok(1)
            }
        }
        Strategy::Collective => {
            let cancel = signals::install();
            let runner = ProcessRunner::with_cancel(cancel);
            let plan = launcher.collective_plan(&config.groups, &locality, &runner);
            if ctx.global.dry_run {
                if launcher.keep_rank_file() {
                    rankfile::RankFile::write(&plan.rank_file, &config.groups, true)?;
                }
                out.write_all(collective_listing(&plan, &config.groups, launcher.keep_rank_file()).as_bytes())
                    .map_err(write_err)?;
                return Ok(0);
            }
            match launcher.run_collective(&plan, &config.groups, &runner, out) {
                Ok(()) => Ok(0),
                Err(LaunchError::Interrupted) => Ok(INTERRUPTED_STATUS),
                Err(e) => Err(e),
            }
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
