//! Bulk file transfer via rsync.

use std::path::PathBuf;

use crate::invocation::Invocation;

use super::ssh::SshTarget;


/// Push `sources` into `dest_dir` on the target. With `delete`, files in
/// `dest_dir` that are not among the sources are removed.
pub fn push(target: &SshTarget, sources: &[PathBuf], dest_dir: &str, delete: bool) -> Invocation {
    let mut inv = Invocation::new("rsync").arg("-az");
    if delete {
        inv = inv.arg("--delete");
    }
    inv = inv.arg("-e").arg(target.transport());
    for source in sources {
        inv = inv.arg(source.to_string_lossy().into_owned());
    }
    inv.arg(format!(
        "{}:{}",
        target.endpoint.destination(),
        ensure_trailing_slash(&remote_relative(dest_dir))
    ))
}

/// rsync does not expand shell variables in remote paths, but relative
/// paths are taken from the remote login directory. A leading `$HOME/` or
/// `~/` is therefore dropped.
pub fn remote_relative(dir: &str) -> String {
    for prefix in ["$HOME", "${HOME}", "~"] {
        if let Some(rest) = dir.strip_prefix(prefix) {
            if rest.is_empty() {
                return ".".to_string();
            }
            if let Some(rel) = rest.strip_prefix('/') {
                return if rel.is_empty() { ".".into() } else { rel.to_string() };
            }
        }
    }
    dir.to_string()
}

fn ensure_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoint;

    fn target() -> SshTarget {
        SshTarget::new(&Endpoint::parse("ops@node2:2200"), "/keys")
    }

    #[test]
    fn push_builds_archive_transfer() {
        let inv = push(
            &target(),
            &[PathBuf::from("/build/app"), PathBuf::from("/etc/app.json")],
            "/srv/g2",
            false,
        );
        assert_eq!(inv.program, "rsync");
        assert_eq!(
            inv.args,
            vec![
                "-az",
                "-e",
                "ssh -i /keys/id_fleetrun -p 2200 -o StrictHostKeyChecking=no",
                "/build/app",
                "/etc/app.json",
                "ops@node2:/srv/g2/",
            ]
        );
    }

    #[test]
    fn push_with_delete() {
        let inv = push(&target(), &[PathBuf::from("/a")], "/srv/x/", true);
        assert_eq!(inv.args[1], "--delete");
        assert_eq!(inv.args.last().unwrap(), "ops@node2:/srv/x/");
    }

    #[test]
    fn home_relative_destinations() {
        assert_eq!(remote_relative("$HOME/opt/fleetrun"), "opt/fleetrun");
        assert_eq!(remote_relative("~/work"), "work");
        assert_eq!(remote_relative("$HOME"), ".");
        assert_eq!(remote_relative("$HOME/"), ".");
        assert_eq!(remote_relative("/tmp/fleetrun"), "/tmp/fleetrun");
        assert_eq!(remote_relative("$HOMEDIR/x"), "$HOMEDIR/x");
    }
}
