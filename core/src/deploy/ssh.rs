//! SSH argument building.
//!
//! `SshTarget` turns a group endpoint and the credential directory into ssh
//! argument vectors. Nothing here runs ssh; callers receive an `Invocation`.

use crate::config::Endpoint;
use crate::invocation::{expand_local_path, join_dir, Invocation};


/// File name of the private key inside the credential directory.
pub const KEY_FILE: &str = "id_fleetrun";


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub endpoint: Endpoint,
    pub key_dir: String,
}

impl SshTarget {
    pub fn new(endpoint: &Endpoint, key_dir: &str) -> Self {
        SshTarget {
            endpoint: endpoint.clone(),
            key_dir: key_dir.to_string(),
        }
    }

    /// The key lives on this machine, so a `$HOME` or `~` prefix is expanded
    /// here. rsync splits its `-e` transport without a shell.
    pub fn key_path(&self) -> String {
        expand_local_path(&join_dir(&self.key_dir, KEY_FILE))
            .to_string_lossy()
            .into_owned()
    }

    /// Options shared by interactive ssh and the rsync transport.
    fn options(&self) -> Vec<String> {
        let mut args = vec!["-i".to_string(), self.key_path()];
        if !self.endpoint.port.is_empty() {
            args.push("-p".to_string());
            args.push(self.endpoint.port.clone());
        }
        args.push("-o".to_string());
        args.push("StrictHostKeyChecking=no".to_string());
        args
    }

    /// Base ssh arguments (no tty, key, port, destination) without a command.
    pub fn base_args(&self) -> Vec<String> {
        let mut args = vec!["-T".to_string()];
        args.extend(self.options());
        args.push(self.endpoint.destination());
        args
    }

    /// `ssh ... <destination> '<remote>'`. The remote invocation is flattened
    /// into one string so the remote shell handles `cd`, `&&` and env
    /// assignments.
    pub fn run(&self, remote: &Invocation) -> Invocation {
        self.run_line(&remote.to_shell())
    }

    pub fn run_line(&self, line: &str) -> Invocation {
        Invocation::new("ssh").args(self.base_args()).arg(line)
    }

    /// Transport command for `rsync -e`.
    pub fn transport(&self) -> String {
        let mut cmd = vec!["ssh".to_string()];
        cmd.extend(self.options());
        cmd.join(" ")
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn target(raw: &str) -> SshTarget {
        SshTarget::new(&Endpoint::parse(raw), "/keys")
    }

    #[test]
    fn base_args_with_port_and_user() {
        let args = target("deploy@10.0.0.1:2222").base_args();
        assert_eq!(args[0], "-T");
        assert!(args.contains(&"/keys/id_fleetrun".to_string()));
        assert!(args.contains(&"-p".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert_eq!(args.last().unwrap(), "deploy@10.0.0.1");
    }

    #[test]
    fn base_args_without_port_or_user() {
        let args = target("node3").base_args();
        assert!(!args.contains(&"-p".to_string()));
        assert_eq!(args.last().unwrap(), "node3");
    }

    #[test]
    fn run_passes_remote_command_as_one_argument() {
        let remote = Invocation::new("./app").arg("x y").cwd("/srv/g1");
        let inv = target("node3").run(&remote);
        assert_eq!(inv.program, "ssh");
        assert_eq!(inv.args.last().unwrap(), "cd /srv/g1 && ./app 'x y'");
    }

    #[test]
    fn home_relative_key_is_expanded_locally() {
        let Ok(home) = std::env::var("HOME") else { return };
        let target = SshTarget::new(&Endpoint::parse("node3"), "$HOME/.ssh");
        assert_eq!(target.key_path(), format!("{}/.ssh/id_fleetrun", home));
        assert!(!target.transport().contains('$'));
        assert!(!target.base_args().iter().any(|a| a.contains('$')));
    }

    #[test]
    fn transport_includes_key_and_port() {
        assert_eq!(
            target("node3:2200").transport(),
            "ssh -i /keys/id_fleetrun -p 2200 -o StrictHostKeyChecking=no"
        );
    }
}
