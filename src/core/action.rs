//! Types for representing individual actions.
//!
//! An [Action] is a `{kind, target, options}` triple. The kind picks one entry from a fixed
//! catalog of primitives; each primitive knows which option keys it accepts, how to parse them,
//! and how to compile them into checked fragments.

use crate::core::session::Session;
#[cfg(doc)]
use crate::core::plan::Plan;
use crate::core::{manifest::Manifest, task::Task};
use crate::{Error, Result};
use indexmap::IndexMap;
use regex::{NoExpand, Regex};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt::{self, Display};
use std::str::FromStr;
use tracing::debug;

pub mod attrs;
pub mod debconf;
pub mod directory;
pub mod fifo;
pub mod file;
pub mod group;
pub mod package;
pub mod package_manager;
pub mod package_source;
pub mod remote_directory;
pub mod remote_file;
pub mod rpm;
pub mod rsync;
pub mod service;
pub mod symlink;
pub mod user;

/// The catalog of action kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Directory,
    File,
    Symlink,
    Fifo,
    User,
    Group,
    Service,
    Package,
    PackageSource,
    PackageManager,
    RemoteFile,
    RemoteDirectory,
    Rsync,
    Debconf,
    Rpm,
    Deb,
}

impl Kind {
    pub const ALL: [Kind; 16] = [
        Kind::Directory,
        Kind::File,
        Kind::Symlink,
        Kind::Fifo,
        Kind::User,
        Kind::Group,
        Kind::Service,
        Kind::Package,
        Kind::PackageSource,
        Kind::PackageManager,
        Kind::RemoteFile,
        Kind::RemoteDirectory,
        Kind::Rsync,
        Kind::Debconf,
        Kind::Rpm,
        Kind::Deb,
    ];

    /// The name used for this kind in YAML.
    pub fn name(self) -> &'static str {
        use Kind::*;
        match self {
            Directory => "directory",
            File => "file",
            Symlink => "symlink",
            Fifo => "fifo",
            User => "user",
            Group => "group",
            Service => "service",
            Package => "package",
            PackageSource => "package-source",
            PackageManager => "package-manager",
            RemoteFile => "remote-file",
            RemoteDirectory => "remote-directory",
            Rsync => "rsync",
            Debconf => "debconf",
            Rpm => "rpm",
            Deb => "deb",
        }
    }

    /// The option keys this kind recognizes.
    pub fn options(self) -> &'static [&'static str] {
        self.entry().options
    }

    fn entry(self) -> Entry {
        use Kind::*;
        match self {
            Directory => Entry::of::<directory::Directory>(),
            File => Entry::of::<file::File>(),
            Symlink => Entry::of::<symlink::Symlink>(),
            Fifo => Entry::of::<fifo::Fifo>(),
            User => Entry::of::<user::User>(),
            Group => Entry::of::<group::Group>(),
            Service => Entry::of::<service::Service>(),
            Package => Entry::of::<package::Package>(),
            PackageSource => Entry::of::<package_source::PackageSource>(),
            PackageManager => Entry::of::<package_manager::PackageManager>(),
            RemoteFile => Entry::of::<remote_file::RemoteFile>(),
            RemoteDirectory => Entry::of::<remote_directory::RemoteDirectory>(),
            Rsync => Entry::of::<rsync::Rsync>(),
            Debconf => Entry::of::<debconf::Debconf>(),
            Rpm => Entry::of::<rpm::Rpm>(),
            Deb => Entry::of::<rpm::Deb>(),
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Kind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnknownKind(s.to_owned()))
    }
}

/// One primitive in the catalog.
pub(crate) trait Primitive {
    const KIND: Kind;

    /// Every option key the primitive accepts.
    const OPTIONS: &'static [&'static str];

    type Options: DeserializeOwned;

    /// Checks option values beyond what their types enforce.
    fn validate(_target: &str, _options: &Self::Options) -> Result<()> {
        Ok(())
    }

    fn compile(target: &str, options: Self::Options, session: &mut Session) -> Result<()>;
}

/// A row of the dispatch table.
struct Entry {
    options: &'static [&'static str],
    check: fn(&Action) -> Result<()>,
    run: fn(&Action, &mut Session) -> Result<()>,
}

impl Entry {
    fn of<P: Primitive>() -> Self {
        Entry {
            options: P::OPTIONS,
            check: |action| parse::<P>(action).map(drop),
            run: |action, session| {
                let options = parse::<P>(action)?;
                debug!(kind = %P::KIND, target = action.target(), "compiling action");
                P::compile(action.target(), options, session)
            },
        }
    }
}

fn parse<P: Primitive>(action: &Action) -> Result<P::Options> {
    if action.target.trim().is_empty() {
        return Err(Error::invalid(P::KIND, P::KIND.name(), "target is empty"));
    }
    if let Some(key) = action
        .options
        .keys()
        .find(|key| !P::OPTIONS.contains(&key.as_str()))
    {
        return Err(Error::UnknownOption {
            kind: P::KIND,
            key: key.clone(),
        });
    }

    let mapping: Mapping = action
        .options
        .iter()
        .map(|(key, value)| (Value::String(key.clone()), value.clone()))
        .collect();
    let options = serde_yaml::from_value(Value::Mapping(mapping)).map_err(|e| {
        Error::MalformedOptions {
            kind: P::KIND,
            reason: e.to_string(),
        }
    })?;
    P::validate(&action.target, &options)?;
    Ok(options)
}

/// A declarative description of one piece of desired state.
///
/// # (De)serialization
///
/// In YAML, an action is a mapping whose first key names the kind and holds the target. Every
/// other key is an option:
///
/// ```yaml
/// - directory: /srv/www
///   owner: www-data
///   mode: "0755"
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(
    try_from = "IndexMap<String, Value>",
    into = "IndexMap<String, Value>"
)]
pub struct Action {
    kind: Kind,
    target: String,
    options: IndexMap<String, Value>,
}

impl Action {
    pub fn new(kind: Kind, target: impl Into<String>) -> Self {
        Action {
            kind,
            target: target.into(),
            options: IndexMap::new(),
        }
    }

    /// Sets option `key`. Keys are not checked until the action is validated.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Sets every option in `options`, replacing existing keys.
    pub fn with_options(mut self, options: IndexMap<String, Value>) -> Self {
        self.options.extend(options);
        self
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Action::new(Kind::Directory, path)
    }

    pub fn file(path: impl Into<String>) -> Self {
        Action::new(Kind::File, path)
    }

    pub fn package(name: impl Into<String>) -> Self {
        Action::new(Kind::Package, name)
    }

    pub fn package_source(name: impl Into<String>) -> Self {
        Action::new(Kind::PackageSource, name)
    }

    pub fn remote_file(path: impl Into<String>) -> Self {
        Action::new(Kind::RemoteFile, path)
    }

    pub fn rpm(path: impl Into<String>) -> Self {
        Action::new(Kind::Rpm, path)
    }

    pub fn deb(path: impl Into<String>) -> Self {
        Action::new(Kind::Deb, path)
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn options(&self) -> &IndexMap<String, Value> {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Checks option keys and values without emitting anything.
    pub fn validate(&self) -> Result<()> {
        (self.kind.entry().check)(self)
    }

    /// Compiles this action into `session`.
    pub fn compile(&self, session: &mut Session) -> Result<()> {
        (self.kind.entry().run)(self, session)
    }

    /// Replaces `$var` and `${var}` in the target and in every string within the options.
    fn substitute(&mut self, regex: &Regex, value: &str) {
        fn walk(value: &mut Value, replace: &dyn Fn(&mut String)) {
            match value {
                Value::String(s) => replace(s),
                Value::Sequence(items) => items.iter_mut().for_each(|item| walk(item, replace)),
                Value::Mapping(mapping) => mapping
                    .iter_mut()
                    .for_each(|(_, item)| walk(item, replace)),
                Value::Tagged(tagged) => walk(&mut tagged.value, replace),
                Value::Null | Value::Bool(_) | Value::Number(_) => (),
            }
        }

        let replace = |s: &mut String| {
            let replaced = regex.replace_all(s, NoExpand(value)).into_owned();
            *s = replaced;
        };
        replace(&mut self.target);
        for option in self.options.values_mut() {
            walk(option, &replace);
        }
    }
}

impl TryFrom<IndexMap<String, Value>> for Action {
    type Error = Error;

    fn try_from(map: IndexMap<String, Value>) -> Result<Self> {
        let mut entries = map.into_iter();
        let (name, target) = entries.next().ok_or(Error::MissingKind)?;
        let kind: Kind = name.parse()?;
        let target = match target {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(Error::invalid(
                    kind,
                    name,
                    format!("target must be a string, not {other:?}"),
                ))
            }
        };
        Ok(Action {
            kind,
            target,
            options: entries.collect(),
        })
    }
}

impl From<Action> for IndexMap<String, Value> {
    fn from(action: Action) -> Self {
        let mut map = IndexMap::with_capacity(action.options.len() + 1);
        map.insert(action.kind.name().to_owned(), Value::String(action.target));
        map.extend(action.options);
        map
    }
}

/// An [Action] in the context of a single [Manifest], [Task], and host.
///
/// A [HostAction] is typically produced while compiling a [Plan]. It carries where the action
/// came from so that variables can be substituted and problems can be traced to their source.
#[derive(Clone, Debug, PartialEq)]
pub struct HostAction {
    /// The host on which this [Action] should run.
    host: String,

    /// The [Manifest] that listed the [Task] containing this [Action].
    manifest: Manifest,

    /// The [Task] that listed this [Action], directly or through a component it installs.
    task: Task,

    /// The [Action] to be compiled for the host.
    action: Action,
}

impl HostAction {
    /// Creates a new [HostAction].
    ///
    /// # Panics
    ///
    /// Panics if `manifest` does not run on `host` or does not include `task`. Either would be a
    /// bug in the calling code.
    pub fn new(host: &str, manifest: &Manifest, task: &Task, action: &Action) -> Self {
        assert!(
            manifest.hosts.iter().any(|hst| hst == host),
            "Cannot create HostAction for manifest \"{}\" and host \"{}\" because the manifest does not \
            include this host:\n\
            {:?}",
            manifest.name,
            host,
            manifest,
        );
        assert!(
            manifest.include.iter().any(|tsk| tsk == task),
            "Cannot create HostAction for manifest \"{}\" and task \"{}\" because the manifest does not \
            include this task:\n\
            {:?}\n\
            {:?}",
            manifest.name,
            task.name,
            manifest,
            task,
        );

        HostAction {
            host: host.to_string(),
            manifest: manifest.clone(),
            task: task.clone(),
            action: action.clone(),
        }
    }

    /// The target host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The manifest that caused this [Action] to run.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The [Task] that contains this [Action].
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// The original [Action].
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Returns the [Action] with manifest and task variables substituted.
    ///
    /// # Variable precedence
    ///
    /// [Task] variables take precedence over [Manifest] variables. For example, if in
    /// [Manifest::vars] you set the variable `breakfast` to be `cake` and in [Task::vars] you set
    /// `breakfast` to be `pie`, the final value of `breakfast` will be `pie`.
    ///
    /// # Variable substitution
    ///
    /// There are two forms of variable substitution, applied to the target and to every string
    /// inside the options, however deeply nested:
    ///
    /// 1. Simple substitution (`$var`): any occurrence of `$var` is replaced with the variable
    ///    named `var`, if one exists. Matching works on word boundaries, so `$foobar.baz` matches
    ///    the variable `foobar` but not `foo`. Use braced substitution for that: `${foo}bar`.
    ///
    /// 2. Braced substitution (`${var}`): any occurrence of `${var}` is replaced with the variable
    ///    named `var`, if one exists. This is a simple text substitution and is not recursive.
    ///
    /// References to unknown variables are left alone and reach the target's shell unchanged.
    ///
    /// # Substitution order
    ///
    /// Variables are substituted in the order in which they are defined, and variables defined in
    /// [Manifest::vars] are substituted before variables defined in [Task::vars]. Cascading
    /// substitutions therefore work to a limited degree, though relying on them is discouraged.
    pub fn compile(&self) -> Action {
        let mut action = self.action.clone();

        let mut vars = self.manifest.vars.clone();
        for (var, value) in &self.task.vars {
            let _ = vars.insert(var.clone(), value.clone());
        }

        // One regex per variable keeps a substituted value from being matched again by the same
        // variable's braced or bare form.
        for (var, value) in vars {
            let pattern = format!(r"\${}\b|\$\{{{}}}", regex::escape(&var), regex::escape(&var));
            let Ok(regex) = Regex::new(&pattern) else {
                continue;
            };
            action.substitute(&regex, &value);
        }
        action
    }
}
