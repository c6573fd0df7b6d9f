//! Fleetrun core: plans, stages, launches and supervises one executable
//! across a set of configured groups.
//!
//! Planning (`config`, `host`, `registry`, `deploy`, `rankfile`) is pure.
//! Side effects are confined to `process`, `runner`, `stage`, `supervisor`
//! and `collective`, and `launcher` wires the two halves together.

pub mod collective;
pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod host;
pub mod invocation;
pub mod launcher;
pub mod libraries;
pub mod process;
pub mod rankfile;
pub mod registry;
pub mod runner;
pub mod signals;
pub mod stage;
pub mod supervisor;

pub use config::{GlobalConfig, Group, LaunchConfig, Overrides, Strategy, Visibility};
pub use context::LaunchContext;
pub use error::{LaunchError, Result};
pub use launcher::{launch, LaunchRequest};
