//! Command-line file registry.
//!
//! The arguments that follow the executable are scanned once. Every argument
//! that names an existing local path is registered under its basename (the
//! name it will have once staged) and is rewritten to the staged location
//! when a remote command line is built. Other arguments pass through.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::invocation::{basename, join_dir};


#[derive(Debug, Clone, PartialEq, Eq)]
enum Argument {
    /// An existing local path, staged under `name`.
    File { original: String, name: String },
    Plain(String),
}

/// Basename to absolute local path, plus the original argument list.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    /// Registered files in first-seen order.
    order: Vec<String>,
    files: HashMap<String, PathBuf>,
    args: Vec<Argument>,
}

impl CommandRegistry {
    /// Scan `args`, resolving relative paths against `cwd`.
    pub fn from_args(args: &[String], cwd: &Path) -> Self {
        let mut registry = CommandRegistry::default();
        for arg in args {
            let path: PathBuf = cwd.join(arg).components().collect();
            if !arg.is_empty() && path.exists() {
                let name = basename(&path);
                if !registry.files.contains_key(&name) {
                    registry.order.push(name.clone());
                }
                registry.files.insert(name.clone(), path);
                registry.args.push(Argument::File {
                    original: arg.clone(),
                    name,
                });
            } else {
                registry.args.push(Argument::Plain(arg.clone()));
            }
        }
        registry
    }

    /// Absolute local path of a registered basename.
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }

    /// Every registered path, in first-seen order.
    pub fn all_paths(&self) -> Vec<PathBuf> {
        self.order
            .iter()
            .filter_map(|n| self.files.get(n).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Arguments exactly as given, for local execution.
    pub fn local_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| match a {
                Argument::File { original, .. } => original.clone(),
                Argument::Plain(s) => s.clone(),
            })
            .collect()
    }

    /// Arguments for a staged execution: files point into `input_dir`,
    /// other arguments lose any leading directory prefix.
    pub fn remote_args(&self, input_dir: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| match a {
                Argument::File { name, .. } => join_dir(input_dir, name),
                Argument::Plain(s) => strip_directory(s).to_string(),
            })
            .collect()
    }
}


fn strip_directory(arg: &str) -> &str {
    match arg.rfind(['/', '\\']) {
        Some(pos) => &arg[pos + 1..],
        None => arg,
    }
}
