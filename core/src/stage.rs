//! Executing deploy steps.
//!
//! `Run` steps go through a `CommandRunner`; `MakeDir` and `Copy` are done
//! in-process, walking directories with `walkdir`.

use std::os::unix::fs::MetadataExt;
use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::deploy::{Deploy, DeployStep};
use crate::error::{LaunchError, Result};
use crate::runner::CommandRunner;


/// Run every step of `deploy` in order. The first failing step aborts with a
/// `Deploy` error naming the group.
pub fn execute(group: &str, deploy: &Deploy, runner: &dyn CommandRunner) -> Result<()> {
    info!(group, steps = deploy.steps.len(), "staging");
    for step in &deploy.steps {
        debug!(group, step = %step.to_shell(), "deploy step");
        let failed = |message: String| LaunchError::Deploy {
            group: group.to_string(),
            message,
        };
        match step {
            DeployStep::Run(inv) => {
                let result = runner.run(inv)?;
                if !result.success() {
                    return Err(failed(format!(
                        "'{}' exited with status {}: {}",
                        inv.program,
                        result.status,
                        result.output.trim()
                    )));
                }
            }
            DeployStep::MakeDir(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| failed(format!("{}: {}", dir.display(), e)))?;
            }
            DeployStep::Copy { sources, dest } => {
                for source in sources {
                    copy_into(source, dest).map_err(|e| failed(e.to_string()))?;
                }
            }
        }
    }
    Ok(())
}

/// Copy a file or a whole directory tree into `dest_dir`, keeping its
/// basename. Existing files are overwritten, except that a file already
/// staged in place is left alone: copying it onto itself would truncate it.
pub fn copy_into(source: &Path, dest_dir: &Path) -> Result<()> {
    let name = source
        .file_name()
        .ok_or_else(|| LaunchError::io("cannot copy", source, std::io::ErrorKind::InvalidInput.into()))?;
    let target = dest_dir.join(name);

    if same_file(source, &target) {
        debug!(path = %source.display(), "already in place");
        return Ok(());
    }
    if source.is_file() {
        std::fs::copy(source, &target).map_err(|e| LaunchError::io("cannot copy", source, e))?;
        return Ok(());
    }

    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            LaunchError::io("cannot walk", path, e.into())
        })?;
        let rel = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let dest = target.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest).map_err(|e| LaunchError::io("cannot create directory", &dest, e))?;
        } else if !same_file(entry.path(), &dest) {
            std::fs::copy(entry.path(), &dest).map_err(|e| LaunchError::io("cannot copy", entry.path(), e))?;
        }
    }
    Ok(())
}

/// Both paths exist and name the same inode.
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::Invocation;
    use crate::runner::{MockRunner, RunOutput};
    use std::path::PathBuf;

    #[test]
    fn copies_files_and_trees() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir_all(src.path().join("data/sub")).unwrap();
        std::fs::write(src.path().join("data/sub/b.txt"), "b").unwrap();

        copy_into(&src.path().join("a.txt"), dst.path()).unwrap();
        copy_into(&src.path().join("data"), dst.path()).unwrap();

        assert_eq!(std::fs::read_to_string(dst.path().join("a.txt")).unwrap(), "a");
        assert_eq!(
            std::fs::read_to_string(dst.path().join("data/sub/b.txt")).unwrap(),
            "b"
        );
    }

    #[test]
    fn copy_onto_itself_keeps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        std::fs::write(&app, "#!/bin/sh\necho staged app\n").unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/in.txt"), "input").unwrap();

        copy_into(&app, dir.path()).unwrap();
        copy_into(&dir.path().join("data"), dir.path()).unwrap();
        // Same directory reached through a different spelling.
        copy_into(&app, &dir.path().join("data/..")).unwrap();

        assert_eq!(std::fs::read_to_string(&app).unwrap(), "#!/bin/sh\necho staged app\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("data/in.txt")).unwrap(), "input");
    }

    #[test]
    fn restaging_from_the_home_dir() {
        let home = tempfile::tempdir().unwrap();
        let app = home.path().join("app");
        std::fs::write(&app, "bin").unwrap();
        let deploy = Deploy {
            steps: vec![
                DeployStep::MakeDir(home.path().to_path_buf()),
                DeployStep::Copy {
                    sources: vec![app.clone()],
                    dest: home.path().to_path_buf(),
                },
            ],
        };
        execute("g0", &deploy, &MockRunner::new()).unwrap();
        assert_eq!(std::fs::read(&app).unwrap(), b"bin");
    }

    #[test]
    fn execute_local_steps() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("app"), "bin").unwrap();
        let home = root.path().join("home");
        let deploy = Deploy {
            steps: vec![
                DeployStep::MakeDir(home.clone()),
                DeployStep::Copy {
                    sources: vec![src.path().join("app")],
                    dest: home.clone(),
                },
            ],
        };
        execute("g0", &deploy, &MockRunner::new()).unwrap();
        assert!(home.join("app").is_file());
    }

    #[test]
    fn first_failing_step_stops() {
        let runner = MockRunner::with_responses(vec![
            RunOutput::ok(""),
            RunOutput::failed(23, "rsync: connection refused\n"),
        ]);
        let deploy = Deploy {
            steps: vec![
                DeployStep::Run(Invocation::new("ssh")),
                DeployStep::Run(Invocation::new("rsync")),
                DeployStep::Run(Invocation::new("ssh")),
            ],
        };
        let err = execute("g1", &deploy, &runner).unwrap_err();
        assert!(matches!(err, LaunchError::Deploy { ref group, .. } if group == "g1"));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(runner.programs(), vec!["ssh", "rsync"]);
    }

    #[test]
    fn missing_source_is_deploy_error() {
        let dst = tempfile::tempdir().unwrap();
        let deploy = Deploy {
            steps: vec![DeployStep::Copy {
                sources: vec![PathBuf::from("/nonexistent/fleetrun/input")],
                dest: dst.path().to_path_buf(),
            }],
        };
        let err = execute("g0", &deploy, &MockRunner::new()).unwrap_err();
        assert!(matches!(err, LaunchError::Deploy { .. }));
    }
}
