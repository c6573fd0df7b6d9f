//! Structured command invocations.
//!
//! An `Invocation` is a program plus argument vector, environment assignments
//! and an optional working directory. It is only flattened into shell text at
//! the boundary where a shell is unavoidable: the remote command handed to
//! ssh, the deploy-then-launch chain, local words that carry `$VAR` or `~`,
//! and the dry-run listing.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};


// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// `KEY=VALUE` assignments applied to the program's environment.
    pub env: Vec<(String, String)>,
    /// Directory the program runs in.
    pub cwd: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Render as a single POSIX shell line:
    /// `cd <cwd> && KEY=VALUE ... program args...`.
    pub fn to_shell(&self) -> String {
        let mut line = String::new();
        if let Some(ref dir) = self.cwd {
            line.push_str("cd ");
            line.push_str(&quote(dir));
            line.push_str(" && ");
        }
        for (key, value) in &self.env {
            line.push_str(key);
            line.push('=');
            line.push_str(&quote(value));
            line.push(' ');
        }
        line.push_str(&quote(&self.program));
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        line
    }

    /// True when some word only means something once a shell expands it.
    pub fn needs_shell(&self) -> bool {
        let expands = |w: &str| w.contains('$') || w.starts_with('~');
        expands(&self.program)
            || self.args.iter().any(|a| expands(a))
            || self.env.iter().any(|(_, v)| expands(v))
            || self.cwd.as_deref().is_some_and(expands)
    }

    /// Shell line that replaces the shell with the program:
    /// `cd <cwd> && export KEY=VALUE && exec program args...`.
    pub fn to_exec_shell(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref dir) = self.cwd {
            parts.push(format!("cd {}", quote(dir)));
        }
        for (key, value) in &self.env {
            parts.push(format!("export {}={}", key, quote(value)));
        }
        let mut exec = format!("exec {}", quote(&self.program));
        for arg in &self.args {
            exec.push(' ');
            exec.push_str(&quote(arg));
        }
        parts.push(exec);
        parts.join(" && ")
    }

    /// Build a `std::process::Command` for local execution. Invocations
    /// whose words need expansion run as `sh -c` over `to_exec_shell`, so
    /// `$HOME` and `$LD_LIBRARY_PATH` take the caller's values. Words that
    /// `quote` wraps (remote command lines) stay literal.
    pub fn to_command(&self) -> Command {
        if self.needs_shell() {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(self.to_exec_shell());
            return cmd;
        }
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}


// ---------------------------------------------------------------------------
// Shell helpers
// ---------------------------------------------------------------------------

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '/' | '.' | '_' | '-' | '=' | ':' | ',' | '@' | '+' | '%' | '$' | '{' | '}' | '~')
}

/// Quote one word for a POSIX shell. Words made only of safe characters
/// (which include `$` so that `$HOME`-style paths expand on the far side) are
/// left untouched; everything else is single-quoted.
pub fn quote(word: &str) -> String {
    if !word.is_empty() && word.chars().all(is_shell_safe) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Expand a leading `$HOME`, `${HOME}` or `~` using the local environment.
pub fn expand_local_path(path: &str) -> PathBuf {
    let home = match std::env::var("HOME") {
        Ok(h) => h,
        Err(_) => return PathBuf::from(path),
    };
    for prefix in ["$HOME", "${HOME}", "~"] {
        if let Some(rest) = path.strip_prefix(prefix) {
            if rest.is_empty() || rest.starts_with('/') {
                return PathBuf::from(format!("{}{}", home, rest));
            }
        }
    }
    PathBuf::from(path)
}

/// Join a directory and a child name with exactly one separator.
pub fn join_dir(dir: &str, child: &str) -> String {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() && dir.starts_with('/') {
        return format!("/{}", child);
    }
    format!("{}/{}", trimmed, child)
}

/// Final path component of a local path, as it will appear once staged.
pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_leaves_safe_words_alone() {
        assert_eq!(quote("/opt/app/bin"), "/opt/app/bin");
        assert_eq!(quote("--fleet-group=g1"), "--fleet-group=g1");
        assert_eq!(quote("$HOME/opt/fleetrun"), "$HOME/opt/fleetrun");
    }

    #[test]
    fn quote_wraps_unsafe_words() {
        assert_eq!(quote("two words"), "'two words'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn to_shell_renders_cwd_env_and_args() {
        let inv = Invocation::new("/home/u/app")
            .arg("input file.txt")
            .arg("-n")
            .env("LD_LIBRARY_PATH", "/home/u/lib:$LD_LIBRARY_PATH")
            .cwd("/home/u");
        assert_eq!(
            inv.to_shell(),
            "cd /home/u && LD_LIBRARY_PATH=/home/u/lib:$LD_LIBRARY_PATH /home/u/app 'input file.txt' -n"
        );
    }

    #[test]
    fn to_shell_plain_program() {
        assert_eq!(Invocation::new("true").to_shell(), "true");
    }

    #[test]
    fn join_dir_trims_trailing_separators() {
        assert_eq!(join_dir("/tmp/fleetrun/", "lib"), "/tmp/fleetrun/lib");
        assert_eq!(join_dir("/tmp/fleetrun", "files"), "/tmp/fleetrun/files");
        assert_eq!(join_dir("/", "lib"), "/lib");
    }

    #[test]
    fn expand_local_path_only_touches_prefix() {
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(
                expand_local_path("$HOME/opt"),
                PathBuf::from(format!("{}/opt", home))
            );
            assert_eq!(expand_local_path("~"), PathBuf::from(home.clone()));
        }
        assert_eq!(expand_local_path("/abs/$HOME"), PathBuf::from("/abs/$HOME"));
        assert_eq!(expand_local_path("~user/x"), PathBuf::from("~user/x"));
    }

    #[test]
    fn plain_invocations_need_no_shell() {
        let inv = Invocation::new("/build/app").arg("-n").env("FLEETRUN_GROUP", "g1").cwd("/srv");
        assert!(!inv.needs_shell());
        assert_eq!(inv.to_command().get_program(), "/build/app");
    }

    #[test]
    fn exec_shell_exports_then_execs() {
        let inv = Invocation::new("mpirun")
            .arg("-x")
            .arg("LD_LIBRARY_PATH")
            .env("LD_LIBRARY_PATH", "/srv/lib:$LD_LIBRARY_PATH")
            .cwd("/srv");
        assert!(inv.needs_shell());
        assert_eq!(
            inv.to_exec_shell(),
            "cd /srv && export LD_LIBRARY_PATH=/srv/lib:$LD_LIBRARY_PATH && exec mpirun -x LD_LIBRARY_PATH"
        );
        assert_eq!(inv.to_command().get_program(), "sh");
    }

    fn captured(inv: &Invocation) -> String {
        let output = inv.to_command().output().unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap()
    }

    #[test]
    fn local_words_expand_before_exec() {
        let home = match std::env::var("HOME") {
            Ok(h) => h,
            Err(_) => return,
        };
        let inv = Invocation::new("printf").arg("%s").arg("$HOME/.ssh/id_fleetrun");
        assert_eq!(captured(&inv), format!("{}/.ssh/id_fleetrun", home));

        let inv = Invocation::new("sh")
            .arg("-c")
            .arg("printf %s \"$FLEET_LIBS\"")
            .env("FLEET_LIBS", "/srv/lib:$HOME");
        assert_eq!(captured(&inv), format!("/srv/lib:{}", home));
    }

    #[test]
    fn remote_lines_stay_literal() {
        let inv = Invocation::new("printf")
            .arg("%s")
            .arg("cd $HOME/fleet && ./app")
            .env("UNUSED", "$HOME");
        assert_eq!(captured(&inv), "cd $HOME/fleet && ./app");
    }

    #[test]
    fn basename_of_file_and_dir() {
        assert_eq!(basename(Path::new("/x/a.txt")), "a.txt");
        assert_eq!(basename(Path::new("/x/data/")), "data");
    }
}
