//! The `package` primitive: install, remove, or upgrade one package with the target's packager.

use super::{Kind, Primitive};
use crate::core::context::Packager;
use crate::core::script::{checked, quote};
use crate::core::session::Session;
use crate::Result;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageAction {
    #[default]
    Install,
    Remove,
    Upgrade,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub action: PackageAction,

    /// Pin an exact version. Ignored by packagers that can't pin.
    pub version: Option<String>,

    /// Remove configuration files too (apt and aptitude).
    pub purge: bool,

    /// Repositories to enable for this install only (yum).
    pub enable: Vec<String>,

    /// Repositories to disable for this install only (yum).
    pub disable: Vec<String>,

    /// Accept packages that fail signature checks.
    pub allow_unsigned: bool,
}

const APT_GET: &str = "DEBIAN_FRONTEND=noninteractive apt-get -q -y";
const APTITUDE: &str = "DEBIAN_FRONTEND=noninteractive aptitude -q -y";

impl Options {
    /// `name` with the pinned version in the packager's syntax.
    fn spec(&self, packager: Packager, name: &str) -> String {
        match (&self.version, packager) {
            (Some(version), Packager::Apt | Packager::Aptitude) => {
                format!("{}={}", quote(name), quote(version))
            }
            (Some(version), Packager::Yum | Packager::Zypper) => {
                quote(&format!("{name}-{version}")).into_owned()
            }
            _ => quote(name).into_owned(),
        }
    }

    fn install(&self, packager: Packager, name: &str) -> String {
        let spec = self.spec(packager, name);
        match packager {
            Packager::Apt | Packager::Aptitude => {
                let tool = if packager == Packager::Apt { APT_GET } else { APTITUDE };
                let unsigned = if self.allow_unsigned {
                    " --allow-unauthenticated"
                } else {
                    ""
                };
                format!("{tool}{unsigned} install {spec}")
            }
            Packager::Yum => {
                let mut yum = "yum -q -y".to_owned();
                for repo in &self.enable {
                    yum += &format!(" --enablerepo={}", quote(repo));
                }
                for repo in &self.disable {
                    yum += &format!(" --disablerepo={}", quote(repo));
                }
                if self.allow_unsigned {
                    yum += " --nogpgcheck";
                }
                format!("{yum} install {spec}")
            }
            Packager::Zypper => {
                let unsigned = if self.allow_unsigned {
                    " --no-gpg-checks"
                } else {
                    ""
                };
                format!("zypper --non-interactive{unsigned} install {spec}")
            }
            Packager::Pacman => format!("pacman -S --noconfirm --needed {spec}"),
            Packager::Brew => format!("brew install {spec}"),
        }
    }

    fn remove(&self, packager: Packager, name: &str) -> String {
        let name = quote(name);
        match packager {
            Packager::Apt | Packager::Aptitude => {
                let tool = if packager == Packager::Apt { APT_GET } else { APTITUDE };
                let purge = if self.purge { " --purge" } else { "" };
                format!("{tool}{purge} remove {name}")
            }
            Packager::Yum => format!("! rpm -q {name} >/dev/null 2>&1 || yum -q -y remove {name}"),
            Packager::Zypper => format!("zypper --non-interactive remove {name}"),
            Packager::Pacman => {
                format!("! pacman -Q {name} >/dev/null 2>&1 || pacman -R --noconfirm {name}")
            }
            Packager::Brew => format!("brew uninstall {name}"),
        }
    }

    fn upgrade(&self, packager: Packager, name: &str) -> String {
        let spec = self.spec(packager, name);
        match packager {
            Packager::Apt => format!("{APT_GET} install --only-upgrade {spec}"),
            Packager::Aptitude => format!("{APTITUDE} safe-upgrade {spec}"),
            Packager::Yum => format!("yum -q -y upgrade {spec}"),
            Packager::Zypper => format!("zypper --non-interactive update {spec}"),
            Packager::Pacman => format!("pacman -S --noconfirm {spec}"),
            Packager::Brew => format!("brew upgrade {spec}"),
        }
    }
}

pub struct Package;

impl Primitive for Package {
    const KIND: Kind = Kind::Package;
    const OPTIONS: &'static [&'static str] = &[
        "action",
        "version",
        "purge",
        "enable",
        "disable",
        "allow-unsigned",
    ];
    type Options = Options;

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let packager = session.context().facts.packager;
        let fragment = match options.action {
            PackageAction::Install => {
                checked(format!("Package {target}"), [options.install(packager, target)])
            }
            PackageAction::Remove => checked(
                format!("Remove package {target}"),
                [options.remove(packager, target)],
            ),
            PackageAction::Upgrade => checked(
                format!("Upgrade package {target}"),
                [options.upgrade(packager, target)],
            ),
        };
        session.emit(fragment);
        Ok(())
    }
}
