//! The installation strategy resolver.
//!
//! A component's [Settings] say how it gets onto a node: from the packager's default sources, from
//! a package source registered first, from an RPM or DEB file downloaded to the node, or from a
//! repository that such a file sets up. [resolve] turns the settings plus the node's
//! [TargetFacts] into an ordinary sequence of [Action]s. It is a pure function: the same inputs
//! always produce the same actions, and a bad or incompatible setting fails before any action is
//! produced.
//!
//! ```yaml
//! settings:
//!   nginx:
//!     install-strategy: package-source
//!     package-source:
//!       name: nginx
//!       apt:
//!         url: https://nginx.org/packages/debian
//!     packages: [nginx]
//!     package-options: {}
//! ```

use crate::core::action::Action;
use crate::core::context::{Packager, TargetFacts};
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt::{self, Display};
use std::str::FromStr;
use tracing::debug;

/// How to install one component, as written in a manifest.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// One of the [StrategyKind] names. Inferred from the parameters when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_strategy: Option<String>,

    /// Everything else.
    #[serde(flatten)]
    pub params: IndexMap<String, Value>,
}

impl Settings {
    pub fn new(strategy: impl Into<String>) -> Self {
        Settings {
            install_strategy: Some(strategy.into()),
            params: IndexMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// The strategy named by the settings, or the one their parameters imply.
    pub fn strategy_kind(&self) -> Result<StrategyKind> {
        if let Some(name) = &self.install_strategy {
            return name.parse();
        }
        let has = |key: &str| self.params.contains_key(key);
        let kind = if has("rpm") && has("packages") {
            StrategyKind::RpmRepo
        } else if has("rpm") {
            StrategyKind::Rpm
        } else if has("debs") {
            StrategyKind::Deb
        } else if has("package-source") {
            StrategyKind::PackageSource
        } else if has("packages") {
            StrategyKind::Packages
        } else {
            return Err(Error::MissingStrategyParam {
                strategy: "unspecified".into(),
                key: "install-strategy".into(),
            });
        };
        debug!(strategy = %kind, "inferred install strategy");
        Ok(kind)
    }
}

/// The names of the install strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Packages,
    PackageSource,
    Rpm,
    RpmRepo,
    Deb,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Packages => "packages",
            StrategyKind::PackageSource => "package-source",
            StrategyKind::Rpm => "rpm",
            StrategyKind::RpmRepo => "rpm-repo",
            StrategyKind::Deb => "deb",
        }
    }

    /// Fails unless the strategy works with `packager`.
    pub fn check(self, packager: Packager) -> Result<()> {
        let compatible = match self {
            StrategyKind::Packages => true,
            StrategyKind::PackageSource => !matches!(packager, Packager::Pacman | Packager::Brew),
            StrategyKind::Rpm | StrategyKind::RpmRepo => packager.is_rpm_family(),
            StrategyKind::Deb => packager.is_debian_family(),
        };
        match compatible {
            true => Ok(()),
            false => Err(Error::IncompatibleStrategy {
                strategy: self.name().into(),
                packager,
            }),
        }
    }
}

impl Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            StrategyKind::Packages,
            StrategyKind::PackageSource,
            StrategyKind::Rpm,
            StrategyKind::RpmRepo,
            StrategyKind::Deb,
        ]
        .into_iter()
        .find(|kind| kind.name() == s)
        .ok_or_else(|| Error::UnknownStrategy(s.to_owned()))
    }
}

/// Packages to install along with the options each install gets.
#[derive(Clone, Debug, PartialEq)]
pub struct Packages {
    pub names: Vec<String>,
    pub options: IndexMap<String, Value>,
}

impl Packages {
    fn actions(&self) -> impl Iterator<Item = Action> + '_ {
        self.names
            .iter()
            .map(|name| Action::package(name.as_str()).with_options(self.options.clone()))
    }
}

/// A file downloaded to the scratch directory.
#[derive(Clone, Debug, PartialEq)]
pub struct Download {
    /// Where the file lands, relative to the scratch directory.
    pub name: String,

    /// Options for the `remote-file` action that fetches it.
    pub options: IndexMap<String, Value>,
}

impl Download {
    fn action(&self, path: &str) -> Action {
        Action::remote_file(path).with_options(self.options.clone())
    }
}

/// A parsed install strategy.
#[derive(Clone, Debug, PartialEq)]
pub enum Strategy {
    Packages(Packages),
    PackageSource {
        source: Action,
        packages: Packages,
    },
    Rpm(Download),
    RpmRepo {
        rpm: Download,
        packages: Packages,
    },
    Deb {
        source: Action,

        /// The directory the package source points at.
        repository: String,

        deb: Download,
        packages: Packages,
    },
}

impl Strategy {
    /// Parses the parameters `settings` holds for its strategy.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let kind = settings.strategy_kind()?;
        let params = Params {
            strategy: kind,
            params: &settings.params,
        };
        Ok(match kind {
            StrategyKind::Packages => Strategy::Packages(params.packages()?),
            StrategyKind::PackageSource => Strategy::PackageSource {
                source: params.package_source()?.0,
                packages: params.packages()?,
            },
            StrategyKind::Rpm => Strategy::Rpm(params.download("rpm")?),
            StrategyKind::RpmRepo => Strategy::RpmRepo {
                rpm: params.download("rpm")?,
                packages: params.packages()?,
            },
            StrategyKind::Deb => {
                let (source, repository) = params.package_source()?;
                let repository = repository.ok_or_else(|| params.missing("package-source.apt.path"))?;
                Strategy::Deb {
                    source,
                    repository,
                    deb: params.download("debs")?,
                    packages: params.packages()?,
                }
            }
        })
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Packages(_) => StrategyKind::Packages,
            Strategy::PackageSource { .. } => StrategyKind::PackageSource,
            Strategy::Rpm(_) => StrategyKind::Rpm,
            Strategy::RpmRepo { .. } => StrategyKind::RpmRepo,
            Strategy::Deb { .. } => StrategyKind::Deb,
        }
    }

    /// The actions that carry out this strategy, in order.
    pub fn actions(&self) -> Vec<Action> {
        match self {
            Strategy::Packages(packages) => packages.actions().collect(),
            Strategy::PackageSource { source, packages } => {
                std::iter::once(source.clone()).chain(packages.actions()).collect()
            }
            Strategy::Rpm(rpm) => vec![rpm.action(&rpm.name), Action::rpm(rpm.name.as_str())],
            Strategy::RpmRepo { rpm, packages } => {
                [rpm.action(&rpm.name), Action::rpm(rpm.name.as_str())]
                    .into_iter()
                    .chain(packages.actions())
                    .collect()
            }
            Strategy::Deb {
                source,
                repository,
                deb,
                packages,
            } => {
                let path = format!("{}/{}", repository.trim_end_matches('/'), deb.name);
                [
                    source.clone(),
                    deb.action(&path),
                    Action::deb(path).with("repository", repository.as_str()),
                ]
                .into_iter()
                .chain(packages.actions())
                .collect()
            }
        }
    }
}

/// Typed access to strategy parameters, with errors that name the strategy and key.
struct Params<'s> {
    strategy: StrategyKind,
    params: &'s IndexMap<String, Value>,
}

impl Params<'_> {
    fn missing(&self, key: &str) -> Error {
        Error::MissingStrategyParam {
            strategy: self.strategy.name().into(),
            key: key.into(),
        }
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> Error {
        Error::InvalidStrategyParam {
            strategy: self.strategy.name().into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    fn get(&self, key: &str) -> Result<&Value> {
        self.params.get(key).ok_or_else(|| self.missing(key))
    }

    fn mapping<'v>(&self, key: &str, value: &'v Value) -> Result<&'v Mapping> {
        value
            .as_mapping()
            .ok_or_else(|| self.invalid(key, "expected a mapping"))
    }

    fn string(&self, key: &str, value: Option<&Value>) -> Result<String> {
        match value {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
            Some(Value::String(_)) => Err(self.invalid(key, "must not be empty")),
            Some(_) => Err(self.invalid(key, "expected a string")),
            None => Err(self.missing(key)),
        }
    }

    fn packages(&self) -> Result<Packages> {
        let names = match self.get("packages")? {
            Value::Sequence(items) => items
                .iter()
                .map(|item| self.string("packages", Some(item)))
                .collect::<Result<Vec<_>>>()?,
            _ => return Err(self.invalid("packages", "expected a list of package names")),
        };
        // A package source's options say how its packages are pulled from it, so it must set them.
        let options = match self.params.get("package-options") {
            None if self.strategy == StrategyKind::PackageSource => {
                return Err(self.missing("package-options"))
            }
            None => IndexMap::new(),
            Some(value) => options(self.mapping("package-options", value)?)
                .map_err(|key| self.invalid("package-options", format!("key {key:?} is not a string")))?,
        };
        Ok(Packages { names, options })
    }

    /// The `package-source` action, and the local repository path for apt if one is set.
    fn package_source(&self) -> Result<(Action, Option<String>)> {
        let section = self.mapping("package-source", self.get("package-source")?)?;
        let name = self.string("package-source.name", section.get("name"))?;
        let mut rest = section.clone();
        rest.remove("name");
        let rest = options(&rest)
            .map_err(|key| self.invalid("package-source", format!("key {key:?} is not a string")))?;

        let path = rest
            .get("apt")
            .and_then(Value::as_mapping)
            .and_then(|apt| apt.get("path"))
            .map(|path| self.string("package-source.apt.path", Some(path)))
            .transpose()?;
        Ok((Action::package_source(name).with_options(rest), path))
    }

    /// A `{remote-file, name}` section.
    fn download(&self, key: &str) -> Result<Download> {
        let section = self.mapping(key, self.get(key)?)?;
        let name_key = format!("{key}.name");
        let name = self.string(&name_key, section.get("name"))?;

        let remote_key = format!("{key}.remote-file");
        let options = match section.get("remote-file") {
            Some(Value::String(url)) => IndexMap::from([("url".to_owned(), Value::from(url.as_str()))]),
            Some(Value::Mapping(mapping)) => options(mapping).map_err(|key| {
                self.invalid(&remote_key, format!("key {key:?} is not a string"))
            })?,
            Some(_) => return Err(self.invalid(&remote_key, "expected a URL or remote-file options")),
            None => return Err(self.missing(&remote_key)),
        };
        Ok(Download { name, options })
    }
}

/// Converts a YAML mapping to action options, or returns the first key that isn't a string.
fn options(mapping: &Mapping) -> std::result::Result<IndexMap<String, Value>, Value> {
    mapping
        .iter()
        .map(|(key, value)| match key {
            Value::String(key) => Ok((key.clone(), value.clone())),
            other => Err(other.clone()),
        })
        .collect()
}

/// Resolves `settings` into actions for a node with `facts`.
///
/// Every action produced is validated, so anything returned compiles without configuration
/// errors.
pub fn resolve(settings: &Settings, facts: &TargetFacts) -> Result<Vec<Action>> {
    let strategy = Strategy::from_settings(settings)?;
    strategy.kind().check(facts.packager)?;
    let actions = strategy.actions();
    for action in &actions {
        action.validate()?;
    }
    Ok(actions)
}

/// Read-only access to [Settings] by component name.
pub trait SettingsStore {
    fn settings(&self, component: &str) -> Option<&Settings>;
}

impl SettingsStore for IndexMap<String, Settings> {
    fn settings(&self, component: &str) -> Option<&Settings> {
        self.get(component)
    }
}

/// Looks up `component` in `store` and resolves its settings.
pub fn resolve_component(
    store: &dyn SettingsStore,
    component: &str,
    facts: &TargetFacts,
) -> Result<Vec<Action>> {
    let settings = store
        .settings(component)
        .ok_or_else(|| Error::UnknownComponent(component.to_owned()))?;
    debug!(component, "resolving install strategy");
    resolve(settings, facts)
}
