//! Launch configuration model.
//!
//! `GlobalConfig` holds the process-wide settings and `Group` describes one
//! target. Both are built once from a structured document (JSON, or YAML by
//! file extension) plus command-line `Overrides`, and are immutable afterwards.
//!
//! Optional fields are read fail-soft through `field`; only an unparseable
//! document, a missing `groups` array, a group without a name, or a repeated
//! group name abort the load.

pub mod endpoint;
pub mod field;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{LaunchError, Result};
use crate::invocation::join_dir;
pub use endpoint::Endpoint;
use field::{flag_or, opt_string, string_or, word_list, Defaulted};


/// Credential directory used when neither the command line nor the document
/// names one.
pub const DEFAULT_SSH_KEY_DIR: &str = "$HOME/.ssh";
/// Default remote home for the direct strategy.
pub const DEFAULT_DIRECT_HOME: &str = "$HOME/opt/fleetrun";
/// Default home for the collective strategy.
pub const DEFAULT_COLLECTIVE_HOME: &str = "/tmp/fleetrun";


// ---------------------------------------------------------------------------
// Strategy / Visibility
// ---------------------------------------------------------------------------

/// How the groups are launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// One independently supervised process per group ("TCP").
    Direct,
    /// One collective job spanning every group ("MPI").
    Collective,
}

impl Strategy {
    /// Parse the document / command-line spelling. Only `"MPI"` selects the
    /// collective strategy; `"TCP"` selects direct.
    pub fn from_protocol(raw: &str) -> Option<Self> {
        match raw {
            "TCP" => Some(Strategy::Direct),
            "MPI" => Some(Strategy::Collective),
            _ => None,
        }
    }

    pub fn default_home(self) -> &'static str {
        match self {
            Strategy::Direct => DEFAULT_DIRECT_HOME,
            Strategy::Collective => DEFAULT_COLLECTIVE_HOME,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Direct => write!(f, "TCP"),
            Strategy::Collective => write!(f, "MPI"),
        }
    }
}

/// Which groups have their output printed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Every group's output is shown.
    All,
    /// Only the named groups are shown (empty set: nothing is shown).
    Only(BTreeSet<String>),
    #[default]
    None,
}

impl Visibility {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Visibility::Only(names.into_iter().map(Into::into).collect())
    }

    pub fn shows(&self, group: &str) -> bool {
        match self {
            Visibility::All => true,
            Visibility::Only(names) => names.contains(group),
            Visibility::None => false,
        }
    }

    pub fn shows_all(&self) -> bool {
        matches!(self, Visibility::All)
    }
}


// ---------------------------------------------------------------------------
// Overrides / GlobalConfig
// ---------------------------------------------------------------------------

/// Settings supplied on the command line. Anything set here wins over the
/// document.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub strategy: Option<Strategy>,
    pub shared_filesystem: Option<bool>,
    pub ssh_key_dir: Option<String>,
    pub default_home_dir: Option<String>,
    pub dry_run: bool,
    pub visibility: Visibility,
}

/// Process-wide launch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalConfig {
    pub strategy: Strategy,
    /// When true nothing is staged: every target already sees the
    /// executable, configuration and inputs at the same paths.
    pub shared_filesystem: bool,
    pub ssh_key_dir: String,
    pub default_home_dir: String,
    pub dry_run: bool,
    pub visibility: Visibility,
}

impl GlobalConfig {
    fn from_document(doc: &Map<String, Value>, overrides: &Overrides) -> GlobalConfig {
        let strategy = overrides.strategy.unwrap_or_else(|| {
            opt_string(doc, "protocol")
                .map(|p| Strategy::from_protocol(&p).unwrap_or(Strategy::Direct))
                .unwrap_or(Strategy::Direct)
        });

        let shared_filesystem = match overrides.shared_filesystem {
            Some(shared) => shared,
            None => logged(flag_or(doc, "shared_filesystem", true), "shared_filesystem"),
        };

        let ssh_key_dir = match overrides.ssh_key_dir {
            Some(ref dir) => dir.clone(),
            None => logged(string_or(doc, "ssh_key_dir", DEFAULT_SSH_KEY_DIR), "ssh_key_dir"),
        };

        let default_home_dir = match overrides.default_home_dir {
            Some(ref dir) => dir.clone(),
            None => logged(
                string_or(doc, "default_home_dir", strategy.default_home()),
                "default_home_dir",
            ),
        };

        GlobalConfig {
            strategy,
            shared_filesystem,
            ssh_key_dir,
            default_home_dir,
            dry_run: overrides.dry_run,
            visibility: overrides.visibility.clone(),
        }
    }
}


// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// One configured target running one instance of the executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub endpoint: Endpoint,
    pub home_dir: String,
    /// Always `<home_dir>/lib`.
    pub lib_dir: String,
    /// Always `<home_dir>/files`.
    pub input_dir: String,
    /// Ship the executable's shared-library dependencies. Unrecognised
    /// values count as `yes`.
    pub pass_dl: bool,
    /// Library names removed from `lib_dir` after deployment.
    pub rm_dl: Vec<String>,
    /// Extra libraries to deploy.
    pub my_dl: Vec<String>,
    /// Stage every command-line file. Unrecognised values count as `no`.
    pub pass_all_files: bool,
    /// Items removed from `input_dir` after deployment.
    pub rm_files: Vec<String>,
    /// Basenames of command-line files to stage when `pass_all_files` is off.
    pub files: Vec<String>,
}

impl Group {
    /// A group with every optional field at its default.
    pub fn new(name: &str, endpoint: Endpoint, home_dir: &str) -> Group {
        let mut group = Group {
            name: name.to_string(),
            endpoint,
            home_dir: String::new(),
            lib_dir: String::new(),
            input_dir: String::new(),
            pass_dl: true,
            rm_dl: Vec::new(),
            my_dl: Vec::new(),
            pass_all_files: false,
            rm_files: Vec::new(),
            files: Vec::new(),
        };
        group.set_home(home_dir);
        group
    }

    /// Point the group at a new home, re-deriving the library and input
    /// directories.
    pub fn set_home(&mut self, home_dir: &str) {
        self.home_dir = home_dir.to_string();
        self.lib_dir = join_dir(home_dir, "lib");
        self.input_dir = join_dir(home_dir, "files");
    }

    pub fn host(&self) -> &str {
        &self.endpoint.host
    }

    fn from_value(index: usize, value: &Value, default_home: &str) -> Result<Group> {
        let obj = value.as_object().ok_or_else(|| LaunchError::MissingField {
            field: "name".into(),
            context: format!("group #{} (not an object)", index),
        })?;
        let name = match obj.get("name") {
            Some(Value::String(n)) if !n.is_empty() => n.clone(),
            _ => {
                return Err(LaunchError::MissingField {
                    field: "name".into(),
                    context: format!("group #{}", index),
                })
            }
        };

        let endpoint = match opt_string(obj, "endpoint") {
            Some(raw) => Endpoint::parse(&raw),
            None => {
                debug!(group = %name, "no endpoint, using loopback");
                Endpoint::loopback()
            }
        };
        let home_dir = logged(string_or(obj, "home_dir", default_home), "home_dir");

        let mut group = Group::new(&name, endpoint, &home_dir);
        group.pass_dl = logged(flag_or(obj, "pass_dl", true), "pass_dl");
        group.rm_dl = word_list(obj, "rm_dl").value;
        group.my_dl = word_list(obj, "my_dl").value;
        group.pass_all_files = logged(flag_or(obj, "pass_all_files", false), "pass_all_files");
        group.rm_files = word_list(obj, "rm_files").value;
        group.files = word_list(obj, "files").value;
        Ok(group)
    }
}


// ---------------------------------------------------------------------------
// LaunchConfig
// ---------------------------------------------------------------------------

/// The loaded configuration: global settings plus groups in document order.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub global: GlobalConfig,
    pub groups: Vec<Group>,
}

impl LaunchConfig {
    /// Load a configuration document from disk. Files ending in `.yaml` or
    /// `.yml` are read as YAML, everything else as JSON.
    pub fn load(path: &Path, overrides: &Overrides) -> Result<LaunchConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LaunchError::io("cannot read configuration", path, e))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let value: Value = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| LaunchError::ConfigParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| LaunchError::ConfigParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };
        Self::from_value(&value, path, overrides)
    }

    /// Build a configuration from an already-parsed document.
    pub fn from_value(value: &Value, source: &Path, overrides: &Overrides) -> Result<LaunchConfig> {
        let structural = |message: &str| LaunchError::ConfigParse {
            path: source.to_path_buf(),
            message: message.to_string(),
        };
        let doc = value
            .as_object()
            .ok_or_else(|| structural("top level must be an object"))?;
        let global = GlobalConfig::from_document(doc, overrides);

        let raw_groups = doc
            .get("groups")
            .and_then(Value::as_array)
            .ok_or_else(|| structural("'groups' must be an array"))?;

        let mut seen = HashSet::new();
        let mut groups = Vec::with_capacity(raw_groups.len());
        for (index, raw) in raw_groups.iter().enumerate() {
            let group = Group::from_value(index, raw, &global.default_home_dir)?;
            if !seen.insert(group.name.clone()) {
                return Err(LaunchError::DuplicateGroup(group.name));
            }
            groups.push(group);
        }

        Ok(LaunchConfig { global, groups })
    }
}


fn logged<T: fmt::Debug>(field: Defaulted<T>, name: &str) -> T {
    if field.defaulted {
        debug!(field = name, value = ?field.value, "default applied");
    }
    field.value
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
