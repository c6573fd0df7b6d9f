//! Collective-strategy launcher.
//!
//! Staging runs one group at a time in configuration order, then one blocking
//! `mpirun` owns the whole job. A failed stage aborts before `mpirun` is
//! issued: once any rank has started there is nothing to roll back.
//!
//! All side effects go through the injected `CommandRunner` (`ProcessRunner`
//! in production, `MockRunner` in tests) or through `stage`.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::Group;
use crate::context::{LaunchContext, CONFIG_FLAG};
use crate::deploy::{Deploy, DeploymentPlanner};
use crate::error::{LaunchError, Result};
use crate::invocation::{join_dir, Invocation};
use crate::rankfile::RankFile;
use crate::registry::CommandRegistry;
use crate::runner::CommandRunner;
use crate::stage;


/// Staging for one group in a collective launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStage {
    pub group: String,
    pub destination: String,
    pub local: bool,
    pub deploy: Deploy,
}

/// Everything a collective launch will do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectivePlan {
    /// Empty under a shared filesystem.
    pub stages: Vec<GroupStage>,
    pub launch: Invocation,
    pub rank_file: PathBuf,
}


pub struct CollectiveLauncher<'a> {
    ctx: &'a LaunchContext,
    registry: &'a CommandRegistry,
    libraries: &'a [PathBuf],
    runner: &'a dyn CommandRunner,
}

impl<'a> CollectiveLauncher<'a> {
    pub fn new(
        ctx: &'a LaunchContext,
        registry: &'a CommandRegistry,
        libraries: &'a [PathBuf],
        runner: &'a dyn CommandRunner,
    ) -> Self {
        CollectiveLauncher {
            ctx,
            registry,
            libraries,
            runner,
        }
    }

    /// Build the staging sequence and the `mpirun` invocation. `locality[i]`
    /// tells whether `groups[i]` is this machine.
    pub fn prepare(&self, groups: &[Group], locality: &[bool], rank_file: &Path) -> CollectivePlan {
        let planner = DeploymentPlanner::new(self.ctx, self.registry, self.libraries);
        let home = self.ctx.global.default_home_dir.as_str();
        let rank_str = rank_file.to_string_lossy().into_owned();
        let np = groups.len().to_string();

        if self.ctx.global.shared_filesystem {
            let launch = Invocation::new("mpirun")
                .args(["-np", np.as_str(), "--rankfile", rank_str.as_str()])
                .arg(self.ctx.executable_str())
                .args(self.registry.local_args())
                .arg(format!("{}={}", CONFIG_FLAG, self.ctx.config_str()));
            return CollectivePlan {
                stages: Vec::new(),
                launch,
                rank_file: rank_file.to_path_buf(),
            };
        }

        // One command line runs every rank, so every group shares one home.
        let stages = groups
            .iter()
            .zip(locality)
            .map(|(group, &local)| {
                let mut rebased = group.clone();
                rebased.set_home(home);
                let deploy = if local {
                    planner.local_stage(&rebased)
                } else {
                    planner.remote_deploy(&rebased)
                };
                GroupStage {
                    group: group.name.clone(),
                    destination: group.endpoint.destination(),
                    local,
                    deploy,
                }
            })
            .collect();

        let lib_dir = join_dir(home, "lib");
        let input_dir = join_dir(home, "files");
        let launch = Invocation::new("mpirun")
            .cwd(home)
            .env("LD_LIBRARY_PATH", format!("{}:$LD_LIBRARY_PATH", lib_dir))
            .args(["-x", "LD_LIBRARY_PATH", "-np", np.as_str(), "--rankfile", rank_str.as_str()])
            .arg(join_dir(home, &self.ctx.executable_name()))
            .args(self.registry.remote_args(&input_dir))
            .arg(format!("{}={}", CONFIG_FLAG, join_dir(home, &self.ctx.config_name())));

        CollectivePlan {
            stages,
            launch,
            rank_file: rank_file.to_path_buf(),
        }
    }

    /// Stage every group, then run the collective job to completion,
    /// streaming its output into `out`. A non-zero job status is an `Exec`
    /// error carrying that status.
    pub fn run(&self, plan: &CollectivePlan, groups: &[Group], keep_rank_file: bool, out: &mut dyn Write) -> Result<()> {
        let rank_file = RankFile::write(&plan.rank_file, groups, keep_rank_file)?;
        info!(path = %rank_file.path().display(), ranks = groups.len(), "rank file ready");

        for stage in &plan.stages {
            info!(group = %stage.group, local = stage.local, "deploying");
            if let Err(e) = stage::execute(&stage.group, &stage.deploy, self.runner) {
                warn!(group = %stage.group, "staging failed, collective launch aborted");
                return Err(e);
            }
        }

        info!(ranks = groups.len(), "starting collective job");
        let status = self.runner.stream(&plan.launch, out)?;
        if status != 0 {
            return Err(LaunchError::Exec {
                label: plan.launch.program.clone(),
                code: status,
            });
        }
        Ok(())
    }
}
