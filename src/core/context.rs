//! Per-target state consulted while compiling actions.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Whether fragments run with elevated privileges on the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecMode {
    /// Run through `sudo` as [Context::acting_user].
    #[default]
    Privileged,

    /// Run directly as the login user.
    Unprivileged,
}

/// Operating system families Cairn knows how to manage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    #[default]
    Debian,
    Ubuntu,
    Centos,
    Rhel,
    Fedora,
    Amzn,
    Suse,
    Arch,
    Darwin,
}

impl OsFamily {
    /// The packager a node of this family uses unless configured otherwise.
    pub fn packager(self) -> Packager {
        use OsFamily::*;
        match self {
            Debian | Ubuntu => Packager::Apt,
            Centos | Rhel | Fedora | Amzn => Packager::Yum,
            Suse => Packager::Zypper,
            Arch => Packager::Pacman,
            Darwin => Packager::Brew,
        }
    }
}

/// Package managers the action library can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Packager {
    Apt,
    Aptitude,
    Yum,
    Zypper,
    Pacman,
    Brew,
}

impl Packager {
    pub fn is_debian_family(self) -> bool {
        matches!(self, Packager::Apt | Packager::Aptitude)
    }

    pub fn is_rpm_family(self) -> bool {
        matches!(self, Packager::Yum | Packager::Zypper)
    }

    pub fn name(self) -> &'static str {
        use Packager::*;
        match self {
            Apt => "apt",
            Aptitude => "aptitude",
            Yum => "yum",
            Zypper => "zypper",
            Pacman => "pacman",
            Brew => "brew",
        }
    }
}

impl Display for Packager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What is known about a target before anything runs on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TargetFacts {
    pub os_family: OsFamily,
    pub packager: Packager,
}

impl TargetFacts {
    /// Facts for a node of `os_family` using that family's usual packager.
    pub fn new(os_family: OsFamily) -> Self {
        TargetFacts {
            os_family,
            packager: os_family.packager(),
        }
    }

    pub fn with_packager(mut self, packager: Packager) -> Self {
        self.packager = packager;
        self
    }
}

impl Default for Packager {
    fn default() -> Self {
        OsFamily::default().packager()
    }
}

/// Scoping state for one target's compilation.
///
/// A [Context] is plain data. It is established once per target and threaded explicitly through
/// every action; nested groups override parts of it through
/// [Session::scope](crate::core::Session::scope), which restores the previous value when the group
/// ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Context {
    pub exec_mode: ExecMode,

    /// The user `sudo` switches to in [ExecMode::Privileged].
    pub acting_user: String,

    /// Where staged, checksum, and backup files live on the target.
    pub scratch_dir: String,

    pub facts: TargetFacts,

    /// Replace managed files even when they were modified outside of Cairn.
    pub force_overwrite: bool,

    /// Backups retained per managed file unless an action says otherwise.
    pub max_versions: usize,
}

pub const DEFAULT_SCRATCH_DIR: &str = "/var/lib/cairn";
pub const DEFAULT_MAX_VERSIONS: usize = 5;

impl Default for Context {
    fn default() -> Self {
        Context {
            exec_mode: ExecMode::Privileged,
            acting_user: "root".to_owned(),
            scratch_dir: DEFAULT_SCRATCH_DIR.to_owned(),
            facts: TargetFacts::default(),
            force_overwrite: false,
            max_versions: DEFAULT_MAX_VERSIONS,
        }
    }
}

impl Context {
    /// Returns a copy of this context with `overrides` applied.
    pub fn merged(&self, overrides: &Overrides) -> Context {
        let mut context = self.clone();
        if let Some(mode) = overrides.exec_mode {
            context.exec_mode = mode;
        }
        if let Some(user) = &overrides.acting_user {
            context.acting_user = user.clone();
        }
        if let Some(dir) = &overrides.scratch_dir {
            context.scratch_dir = dir.clone();
        }
        if let Some(force) = overrides.force_overwrite {
            context.force_overwrite = force;
        }
        context
    }

    /// Resolves `path` against the scratch directory if it is relative.
    pub fn scratch_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("{}/{}", self.scratch_dir.trim_end_matches('/'), path)
        }
    }
}

/// Partial replacement for a [Context]. Unset fields keep their current values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    pub exec_mode: Option<ExecMode>,
    pub acting_user: Option<String>,
    pub scratch_dir: Option<String>,
    pub force_overwrite: Option<bool>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn privileged(mut self) -> Self {
        self.exec_mode = Some(ExecMode::Privileged);
        self
    }

    pub fn unprivileged(mut self) -> Self {
        self.exec_mode = Some(ExecMode::Unprivileged);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.acting_user = Some(user.into());
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<String>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn force_overwrite(mut self, force: bool) -> Self {
        self.force_overwrite = Some(force);
        self
    }
}
