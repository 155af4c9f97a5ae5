//! Types for representing task files.

use crate::core::action::Action;
use crate::core::context::Overrides;
#[cfg(doc)]
use crate::core::manifest::Manifest;
use anyhow::Context as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Represents a task file; typically used in the context of a [Manifest].
///
/// This type is typically parsed from a task file, but it can be constructed programmatically as
/// well.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Task {
    /// The file from which this value was parsed (if any).
    #[serde(skip)]
    pub source: Option<PathBuf>,

    /// The [Task]'s name. Used for informational, logging, and debugging purposes.
    pub name: String,

    /// The user that privileged fragments switch to with `sudo`.
    ///
    /// If this field is empty, privileged fragments run as `root`.
    #[serde(skip_serializing_if = "str::is_empty", default)]
    pub user: String,

    /// Whether this task's fragments run through `sudo`. When `false`, they run as the login user
    /// and [Self::user] is ignored.
    #[serde(skip_serializing_if = "is_true", default = "yes")]
    pub privileged: bool,

    /// Software components to install before [Self::actions] run. Each one names an entry in the
    /// enclosing [Manifest]'s settings.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub install: Vec<String>,

    /// The list of [Action]s that comprise this [Task].
    ///
    /// Order is preserved from the source file. Actions are compiled in order.
    #[serde(default)]
    pub actions: Vec<Action>,

    /// [Task]-level variables, substituted into actions when they are compiled.
    ///
    /// Order is preserved from the source file but is typically unimportant.
    #[serde(skip_serializing_if = "IndexMap::is_empty", default)]
    pub vars: IndexMap<String, String>,
}

fn yes() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

impl Default for Task {
    fn default() -> Self {
        Task {
            source: None,
            name: String::new(),
            user: String::new(),
            privileged: true,
            install: vec![],
            actions: vec![],
            vars: IndexMap::new(),
        }
    }
}

impl Task {
    /// The context changes this task applies while its actions compile.
    pub fn overrides(&self) -> Overrides {
        if !self.privileged {
            return Overrides::new().unprivileged();
        }
        let overrides = Overrides::new().privileged();
        if self.user.is_empty() {
            overrides
        } else {
            overrides.user(&self.user)
        }
    }
}

/// Loads every [Task] in a task file. A task file may hold several YAML documents.
pub fn load_tasks(path: impl AsRef<Path>) -> anyhow::Result<Vec<Task>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read task file {}", path.display()))?;

    let mut tasks = vec![];
    for document in serde_yaml::Deserializer::from_str(&text) {
        let mut task = Task::deserialize(document)
            .with_context(|| format!("failed to parse task file {}", path.display()))?;
        task.source = Some(path.to_owned());
        tasks.push(task);
    }
    Ok(tasks)
}
