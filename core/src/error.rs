//! Launcher error types.
//!
//! Every fatal condition the launcher can hit maps to one `LaunchError`
//! variant. Optional configuration fields never produce an error: they fall
//! back to a default through `config::field` instead.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for launcher operations.
pub type Result<T> = std::result::Result<T, LaunchError>;

#[derive(Debug, Error)]
pub enum LaunchError {
    /// The configuration document could not be parsed at all.
    #[error("cannot parse configuration {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// A required field is absent (e.g. a group without a name).
    #[error("missing required field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// Two groups share the same name.
    #[error("group '{0}' is defined more than once")]
    DuplicateGroup(String),

    /// Locality of a group's host cannot be determined.
    #[error("cannot resolve host '{host}' for group '{group}': {message}")]
    HostResolution {
        group: String,
        host: String,
        message: String,
    },

    /// The target executable is missing or not executable.
    #[error("unable to find or execute '{}'", .0.display())]
    ExecutableUnavailable(PathBuf),

    /// A staging step reported failure.
    #[error("deploy to group '{group}' failed: {message}")]
    Deploy { group: String, message: String },

    /// A launched program exited with a non-zero status.
    #[error("'{label}' exited with status {code}")]
    Exec { label: String, code: i32 },

    /// SIGINT or SIGTERM arrived while a command was running.
    #[error("interrupted")]
    Interrupted,

    /// A process could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem I/O error with context.
    #[error("{context} ({}): {source}", .path.display())]
    Io {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    pub fn io(context: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LaunchError::Io {
            context: context.into(),
            path: path.into(),
            source,
        }
    }

    /// Exit status the binary should terminate with for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Exec { code, .. } if *code != 0 => *code,
            LaunchError::Interrupted => crate::launcher::INTERRUPTED_STATUS,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_error_carries_its_status() {
        let err = LaunchError::Exec {
            label: "mpirun".into(),
            code: 3,
        };
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("status 3"));
    }

    #[test]
    fn other_errors_exit_with_one() {
        let err = LaunchError::DuplicateGroup("g1".into());
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "group 'g1' is defined more than once");
    }

    #[test]
    fn interruption_exits_like_sigint() {
        assert_eq!(LaunchError::Interrupted.exit_code(), 130);
    }

    #[test]
    fn io_error_mentions_path() {
        let err = LaunchError::io(
            "cannot read configuration",
            "/nope/cfg.json",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.to_string().contains("/nope/cfg.json"));
    }
}
