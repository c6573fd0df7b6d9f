//! Rank file for the collective launch.
//!
//! One line per group in configuration order: `rank <i>=<host> slot=0:*`.
//! The file lives in the temp directory under a name carrying the launcher's
//! pid, and is removed when the guard drops unless it was asked to stay.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::Group;
use crate::error::{LaunchError, Result};


/// Rank file contents for `groups`. Line `i` always names `groups[i]`'s
/// host; reachability plays no part.
pub fn render(groups: &[Group]) -> String {
    groups
        .iter()
        .enumerate()
        .map(|(i, g)| format!("rank {}={} slot=0:*\n", i, g.host()))
        .collect()
}

/// Default location: `<tmp>/fleetrun-rankfile-<pid>`.
pub fn default_path() -> PathBuf {
    std::env::temp_dir().join(format!("fleetrun-rankfile-{}", std::process::id()))
}


/// A written rank file. Removed on drop unless `keep` is set.
#[derive(Debug)]
pub struct RankFile {
    path: PathBuf,
    keep: bool,
}

impl RankFile {
    pub fn write(path: &Path, groups: &[Group], keep: bool) -> Result<RankFile> {
        std::fs::write(path, render(groups))
            .map_err(|e| LaunchError::io("cannot write rank file", path, e))?;
        debug!(path = %path.display(), ranks = groups.len(), "rank file written");
        Ok(RankFile {
            path: path.to_path_buf(),
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RankFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "cannot remove rank file");
        }
    }
}
