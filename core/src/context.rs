//! The immutable launch context.
//!
//! Everything process-wide (resolved settings, the target executable, the
//! configuration artifact, the local hostname) is bundled here once and
//! passed by reference to every component.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::config::GlobalConfig;
use crate::error::{LaunchError, Result};
use crate::invocation::basename;


/// Flag carrying the configuration path to the launched program.
pub const CONFIG_FLAG: &str = "--fleet-config";
/// Flag carrying the group name to the launched program.
pub const GROUP_FLAG: &str = "--fleet-group";


#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub global: GlobalConfig,
    /// Absolute path of the program to launch.
    pub executable: PathBuf,
    /// Absolute path of the configuration document, staged with the program.
    pub config_file: PathBuf,
    pub hostname: String,
}

impl LaunchContext {
    pub fn new(global: GlobalConfig, executable: PathBuf, config_file: PathBuf, hostname: String) -> Self {
        LaunchContext {
            global,
            executable,
            config_file,
            hostname,
        }
    }

    pub fn executable_name(&self) -> String {
        basename(&self.executable)
    }

    pub fn config_name(&self) -> String {
        basename(&self.config_file)
    }

    pub fn executable_str(&self) -> String {
        self.executable.to_string_lossy().into_owned()
    }

    pub fn config_str(&self) -> String {
        self.config_file.to_string_lossy().into_owned()
    }
}


/// Make `path` absolute against the current directory without touching the
/// filesystem.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| LaunchError::io("cannot determine current directory", path, e))?;
    Ok(cwd.join(path).components().collect())
}

/// Resolve the target executable: it must exist, be a regular file, and be
/// executable by this user.
pub fn resolve_executable(path: &Path) -> Result<PathBuf> {
    let abs = absolute(path)?;
    let unavailable = || LaunchError::ExecutableUnavailable(abs.clone());
    let meta = std::fs::metadata(&abs).map_err(|_| unavailable())?;
    if !meta.is_file() {
        return Err(unavailable());
    }
    let c_path = CString::new(abs.as_os_str().as_bytes()).map_err(|_| unavailable())?;
    if unsafe { libc::access(c_path.as_ptr(), libc::X_OK) } != 0 {
        return Err(unavailable());
    }
    Ok(abs)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn executable_must_have_exec_bit() {
        let dir = tempfile::tempdir().unwrap();
        let prog = dir.path().join("app");
        std::fs::write(&prog, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&prog, std::fs::Permissions::from_mode(0o644)).unwrap();
        // root can read anything but still needs an exec bit for X_OK.
        assert!(matches!(
            resolve_executable(&prog),
            Err(LaunchError::ExecutableUnavailable(_))
        ));

        std::fs::set_permissions(&prog, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(resolve_executable(&prog).unwrap(), prog);
    }

    #[test]
    fn missing_or_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_executable(&dir.path().join("nope")).is_err());
        assert!(resolve_executable(dir.path()).is_err());
    }

    #[test]
    fn absolute_keeps_absolute_paths() {
        assert_eq!(absolute(Path::new("/a/b")).unwrap(), PathBuf::from("/a/b"));
        assert!(absolute(Path::new("rel/x")).unwrap().is_absolute());
    }
}
