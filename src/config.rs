//! Controller-side configuration: defaults for every target and what is known about each node.

use crate::core::context::{
    Context, OsFamily, Packager, TargetFacts, DEFAULT_MAX_VERSIONS, DEFAULT_SCRATCH_DIR,
};
use crate::core::node::{Endpoint, Node};
use anyhow::Context as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The name of the configuration file inside [config_dir].
pub const CONFIG_FILE: &str = "config.yaml";

/// Returns a [PathBuf] to the directory where Cairn's configuration should live.
///
/// When compiled for testing, this returns `CARGO_MANIFEST_DIR` plus `resources/etc/cairn`.
/// Otherwise, it returns `/etc/cairn`.
pub fn config_dir() -> PathBuf {
    // Omit the leading slash so that PathBuf::push appends instead of replacing.
    const CONFIG_DIR: &str = "etc/cairn";

    let mut path = PathBuf::new();

    #[cfg(test)]
    {
        path.push(env!("CARGO_MANIFEST_DIR"));
        path.push("resources");
    }
    #[cfg(not(test))]
    path.push("/");

    path.push(CONFIG_DIR);
    path
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Where staged, checksum, and backup files live on targets.
    pub scratch_dir: String,

    /// Backups retained per managed file.
    pub max_versions: usize,

    /// Replace managed files even when they were modified outside of Cairn.
    pub force_overwrite: bool,

    /// The SSH login user. When absent, the SSH configuration decides.
    pub login_user: Option<String>,

    pub nodes: IndexMap<String, NodeConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scratch_dir: DEFAULT_SCRATCH_DIR.to_owned(),
            max_versions: DEFAULT_MAX_VERSIONS,
            force_overwrite: false,
            login_user: None,
            nodes: IndexMap::new(),
        }
    }
}

/// What the controller knows about one node before connecting to it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeConfig {
    #[serde(default)]
    pub os_family: OsFamily,

    /// Overrides the os family's usual packager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packager: Option<Packager>,

    /// The address to connect to. Defaults to the node's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            os_family: OsFamily::default(),
            packager: None,
            address: None,
            ssh_port: default_ssh_port(),
        }
    }
}

impl NodeConfig {
    pub fn facts(&self) -> TargetFacts {
        let facts = TargetFacts::new(self.os_family);
        match self.packager {
            Some(packager) => facts.with_packager(packager),
            None => facts,
        }
    }
}

/// A named [NodeConfig], as seen by the compiler.
#[derive(Clone, Copy, Debug)]
pub struct InventoryNode<'c> {
    pub name: &'c str,
    pub config: &'c NodeConfig,
}

impl Node for InventoryNode<'_> {
    fn name(&self) -> &str {
        self.name
    }

    fn address(&self) -> Option<&str> {
        self.config.address.as_deref()
    }

    fn ssh_port(&self) -> u16 {
        self.config.ssh_port
    }
}

impl Config {
    /// Loads `config.yaml` from [config_dir].
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(config_dir().join(CONFIG_FILE))
    }

    /// Loads a configuration file. A missing file yields the defaults.
    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no configuration file; using defaults");
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read configuration {}", path.display()))
            }
        };
        serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse configuration {}", path.display()))
    }

    /// Returns the entry for `host`. Hosts without one get the defaults.
    pub fn node<'c>(&'c self, host: &'c str) -> InventoryNode<'c> {
        static UNKNOWN: NodeConfig = NodeConfig {
            os_family: OsFamily::Debian,
            packager: None,
            address: None,
            ssh_port: 22,
        };
        let (name, config) = self
            .nodes
            .get_key_value(host)
            .map(|(name, config)| (name.as_str(), config))
            .unwrap_or((host, &UNKNOWN));
        InventoryNode { name, config }
    }

    /// Builds the [Context] every action on `host` starts from.
    pub fn context_for(&self, host: &str) -> Context {
        Context {
            scratch_dir: self.scratch_dir.clone(),
            facts: self.node(host).config.facts(),
            force_overwrite: self.force_overwrite,
            max_versions: self.max_versions,
            ..Context::default()
        }
    }

    pub fn endpoint_for(&self, host: &str) -> Endpoint {
        Endpoint::for_node(&self.node(host), self.login_user.clone())
    }
}
