//! Staging and launch planning.
//!
//! `ssh` and `rsync` build collaborator invocations; `plan` combines them
//! into per-group directives.

pub mod plan;
pub mod rsync;
pub mod ssh;

pub use plan::{Deploy, DeployStep, DeploymentPlanner, Directive, GroupPlan};
pub use ssh::SshTarget;
