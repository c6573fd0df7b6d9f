//! Per-group deployment planning.
//!
//! `DeploymentPlanner` turns a group into a `Directive`: either a single
//! invocation (shared filesystem) or a deploy step followed by a launch step.
//! Planning is pure; executing the result is the job of the supervisor or
//! the collective launcher.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::field::canonical_flag;
use crate::config::Group;
use crate::context::{LaunchContext, CONFIG_FLAG, GROUP_FLAG};
use crate::invocation::{expand_local_path, join_dir, quote, Invocation};
use crate::registry::CommandRegistry;

use super::rsync;
use super::ssh::SshTarget;


// ---------------------------------------------------------------------------
// DeployStep / Deploy
// ---------------------------------------------------------------------------

/// One staging action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployStep {
    /// An external command (ssh, rsync).
    Run(Invocation),
    /// Create a local directory and its parents.
    MakeDir(PathBuf),
    /// Copy local files or directories into a local directory.
    Copy { sources: Vec<PathBuf>, dest: PathBuf },
}

impl DeployStep {
    pub fn to_shell(&self) -> String {
        match self {
            DeployStep::Run(inv) => inv.to_shell(),
            DeployStep::MakeDir(dir) => format!("mkdir -p {}", quote(&dir.to_string_lossy())),
            DeployStep::Copy { sources, dest } => {
                let mut line = String::from("cp -fr");
                for s in sources {
                    line.push(' ');
                    line.push_str(&quote(&s.to_string_lossy()));
                }
                line.push(' ');
                line.push_str(&quote(&dest.to_string_lossy()));
                line
            }
        }
    }
}

/// The staging steps for one group, run in order; the first failure stops
/// the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Deploy {
    pub steps: Vec<DeployStep>,
}

impl Deploy {
    /// Steps joined with `&&`.
    pub fn to_shell(&self) -> String {
        self.steps
            .iter()
            .map(DeployStep::to_shell)
            .collect::<Vec<_>>()
            .join(" && ")
    }
}


// ---------------------------------------------------------------------------
// Directive
// ---------------------------------------------------------------------------

/// What has to happen for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Shared filesystem: run in place, nothing staged.
    Shared { launch: Invocation },
    /// Stage first (when `deploy` is present), then launch. The launch must
    /// not run if the deploy fails.
    Staged {
        deploy: Option<Deploy>,
        launch: Invocation,
    },
}

impl Directive {
    pub fn launch(&self) -> &Invocation {
        match self {
            Directive::Shared { launch } | Directive::Staged { launch, .. } => launch,
        }
    }

    pub fn deploy(&self) -> Option<&Deploy> {
        match self {
            Directive::Shared { .. } => None,
            Directive::Staged { deploy, .. } => deploy.as_ref(),
        }
    }
}

/// A group's directive plus what is needed to present it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    pub group: String,
    /// `user@host` as printed in listings.
    pub destination: String,
    pub local: bool,
    /// The command line run on the remote host, for remote groups.
    pub remote_command: Option<String>,
    pub directive: Directive,
}


// ---------------------------------------------------------------------------
// DeploymentPlanner
// ---------------------------------------------------------------------------

pub struct DeploymentPlanner<'a> {
    ctx: &'a LaunchContext,
    registry: &'a CommandRegistry,
    /// Shared libraries of the executable, shipped when `pass_dl` is set.
    libraries: &'a [PathBuf],
}

impl<'a> DeploymentPlanner<'a> {
    pub fn new(ctx: &'a LaunchContext, registry: &'a CommandRegistry, libraries: &'a [PathBuf]) -> Self {
        DeploymentPlanner {
            ctx,
            registry,
            libraries,
        }
    }

    /// Files staged into the group's input directory: everything on the
    /// command line with `pass_all_files`, otherwise the whitelisted
    /// basenames that are actually registered. Unknown names are dropped.
    pub fn staging_set(&self, group: &Group) -> Vec<PathBuf> {
        if group.pass_all_files {
            return self.registry.all_paths();
        }
        let mut set: Vec<PathBuf> = Vec::new();
        for name in &group.files {
            if let Some(path) = self.registry.get(name) {
                if !set.iter().any(|p| p == path) {
                    set.push(path.to_path_buf());
                }
            }
        }
        set
    }

    /// Libraries pushed into the group's `lib` directory.
    pub fn library_set(&self, group: &Group) -> Vec<PathBuf> {
        let mut libs: Vec<PathBuf> = Vec::new();
        if group.pass_dl {
            libs.extend(
                self.libraries
                    .iter()
                    .filter(|lib| {
                        let name = lib.file_name().map(|n| n.to_string_lossy().into_owned());
                        !group.rm_dl.iter().any(|r| Some(r) == name.as_ref())
                    })
                    .cloned(),
            );
        }
        libs.extend(group.my_dl.iter().map(PathBuf::from));
        libs
    }

    /// Key/value parameters handed to every remote launch.
    pub fn runtime_params(&self, group: &Group) -> Vec<(String, String)> {
        vec![
            ("FLEETRUN_DRY".into(), canonical_flag(self.ctx.global.dry_run).into()),
            ("FLEETRUN_PASS_DL".into(), canonical_flag(group.pass_dl).into()),
            ("FLEETRUN_PASS_ALL".into(), canonical_flag(group.pass_all_files).into()),
            ("FLEETRUN_HOME".into(), group.home_dir.clone()),
            ("FLEETRUN_LIB".into(), group.lib_dir.clone()),
            ("FLEETRUN_INPUT".into(), group.input_dir.clone()),
            ("FLEETRUN_SSH_DIR".into(), self.ctx.global.ssh_key_dir.clone()),
        ]
    }

    /// Run the program in place with the arguments as given.
    pub fn local_launch(&self, group: &Group) -> Invocation {
        Invocation::new(self.ctx.executable_str())
            .args(self.registry.local_args())
            .arg(format!("{}={}", CONFIG_FLAG, self.ctx.config_str()))
            .arg(format!("{}={}", GROUP_FLAG, group.name))
    }

    /// The staged program as run on a remote host.
    pub fn remote_launch(&self, group: &Group) -> Invocation {
        let mut inv = Invocation::new(join_dir(&group.home_dir, &self.ctx.executable_name()))
            .cwd(group.home_dir.clone())
            .env("LD_LIBRARY_PATH", format!("{}:$LD_LIBRARY_PATH", group.lib_dir));
        for (key, value) in self.runtime_params(group) {
            inv = inv.env(key, value);
        }
        inv.args(self.registry.remote_args(&group.input_dir))
            .arg(format!(
                "{}={}",
                CONFIG_FLAG,
                join_dir(&group.home_dir, &self.ctx.config_name())
            ))
            .arg(format!("{}={}", GROUP_FLAG, group.name))
    }

    /// Stage executable, configuration, inputs and libraries on a remote
    /// group, then apply its removal lists.
    pub fn remote_deploy(&self, group: &Group) -> Deploy {
        let target = self.ssh_target(group);
        let mut steps = vec![DeployStep::Run(target.run(
            &Invocation::new("mkdir").args([
                "-p",
                group.home_dir.as_str(),
                group.lib_dir.as_str(),
                group.input_dir.as_str(),
            ]),
        ))];

        steps.push(DeployStep::Run(rsync::push(
            &target,
            &[self.ctx.executable.clone(), self.ctx.config_file.clone()],
            &group.home_dir,
            false,
        )));

        let inputs = self.staging_set(group);
        if !inputs.is_empty() {
            steps.push(DeployStep::Run(rsync::push(&target, &inputs, &group.input_dir, false)));
        }

        let libs = self.library_set(group);
        if !libs.is_empty() {
            steps.push(DeployStep::Run(rsync::push(&target, &libs, &group.lib_dir, false)));
        }

        let mut removals: Vec<String> = Vec::new();
        removals.extend(group.rm_dl.iter().map(|n| join_dir(&group.lib_dir, n)));
        removals.extend(group.rm_files.iter().map(|n| join_dir(&group.input_dir, n)));
        if !removals.is_empty() {
            steps.push(DeployStep::Run(
                target.run(&Invocation::new("rm").arg("-rf").args(removals)),
            ));
        }

        Deploy { steps }
    }

    /// Stage a group on this machine with plain filesystem copies.
    pub fn local_stage(&self, group: &Group) -> Deploy {
        let home = expand_local_path(&group.home_dir);
        let input = expand_local_path(&group.input_dir);
        let mut steps = vec![
            DeployStep::MakeDir(home.clone()),
            DeployStep::Copy {
                sources: vec![self.ctx.executable.clone(), self.ctx.config_file.clone()],
                dest: home,
            },
            DeployStep::MakeDir(input.clone()),
        ];
        let inputs = self.staging_set(group);
        if !inputs.is_empty() {
            steps.push(DeployStep::Copy {
                sources: inputs,
                dest: input,
            });
        }
        Deploy { steps }
    }

    pub fn ssh_target(&self, group: &Group) -> SshTarget {
        SshTarget::new(&group.endpoint, &self.ctx.global.ssh_key_dir)
    }

    /// Plan one group for the direct strategy.
    pub fn plan(&self, group: &Group, local: bool) -> GroupPlan {
        let (directive, remote_command) = if self.ctx.global.shared_filesystem {
            if local {
                (Directive::Shared { launch: self.local_launch(group) }, None)
            } else {
                let remote = self.local_launch(group);
                let line = remote.to_shell();
                let launch = self.ssh_target(group).run_line(&line);
                (Directive::Shared { launch }, Some(line))
            }
        } else if local {
            (
                Directive::Staged {
                    deploy: None,
                    launch: self.local_launch(group),
                },
                None,
            )
        } else {
            let remote = self.remote_launch(group);
            let line = remote.to_shell();
            let launch = self.ssh_target(group).run_line(&line);
            (
                Directive::Staged {
                    deploy: Some(self.remote_deploy(group)),
                    launch,
                },
                Some(line),
            )
        };
        GroupPlan {
            group: group.name.clone(),
            destination: group.endpoint.destination(),
            local,
            remote_command,
            directive,
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
