//! The `package-manager` primitive. The target names an operation on the packager itself rather
//! than a path or package: `update`, `upgrade`, `add-scope`, or `configure`.

use super::attrs::required;
use super::{Kind, Primitive};
use crate::core::context::Packager;
use crate::core::script::{checked, quote};
use crate::core::session::Session;
use crate::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    /// Component to enable with `add-scope`, such as `contrib` or `non-free`.
    pub scope: Option<String>,

    /// HTTP proxy to set with `configure`.
    pub proxy: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Update,
    Upgrade,
    AddScope,
    Configure,
}

impl Operation {
    fn parse(target: &str) -> Result<Self> {
        match target {
            "update" => Ok(Operation::Update),
            "upgrade" => Ok(Operation::Upgrade),
            "add-scope" => Ok(Operation::AddScope),
            "configure" => Ok(Operation::Configure),
            other => Err(Error::invalid(
                Kind::PackageManager,
                Kind::PackageManager.name(),
                format!("`{other}` is not one of update, upgrade, add-scope, configure"),
            )),
        }
    }
}

fn update(packager: Packager) -> String {
    match packager {
        Packager::Apt => "DEBIAN_FRONTEND=noninteractive apt-get -qq update",
        Packager::Aptitude => "DEBIAN_FRONTEND=noninteractive aptitude -q -y update",
        Packager::Yum => "yum -q -y makecache",
        Packager::Zypper => "zypper --non-interactive refresh",
        Packager::Pacman => "pacman -Sy --noconfirm",
        Packager::Brew => "brew update",
    }
    .to_owned()
}

fn upgrade(packager: Packager) -> String {
    match packager {
        Packager::Apt => "DEBIAN_FRONTEND=noninteractive apt-get -q -y upgrade",
        Packager::Aptitude => "DEBIAN_FRONTEND=noninteractive aptitude -q -y safe-upgrade",
        Packager::Yum => "yum -q -y update",
        Packager::Zypper => "zypper --non-interactive update",
        Packager::Pacman => "pacman -Syu --noconfirm",
        Packager::Brew => "brew upgrade",
    }
    .to_owned()
}

fn check_scope(scope: &str) -> Result<()> {
    static SCOPE: OnceLock<Regex> = OnceLock::new();
    let regex =
        SCOPE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("scope pattern is valid"));
    match regex.is_match(scope) {
        true => Ok(()),
        false => Err(Error::invalid(
            Kind::PackageManager,
            "scope",
            format!("`{scope}` is not a repository component name"),
        )),
    }
}

pub struct PackageManager;

impl Primitive for PackageManager {
    const KIND: Kind = Kind::PackageManager;
    const OPTIONS: &'static [&'static str] = &["scope", "proxy"];
    type Options = Options;

    fn validate(target: &str, options: &Options) -> Result<()> {
        match Operation::parse(target)? {
            Operation::AddScope => check_scope(required(Self::KIND, "scope", options.scope.as_ref())?),
            Operation::Configure => required(Self::KIND, "proxy", options.proxy.as_ref()).map(drop),
            Operation::Update | Operation::Upgrade => Ok(()),
        }
    }

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let packager = session.context().facts.packager;
        let incompatible = || Error::IncompatiblePackager {
            kind: Self::KIND,
            packager,
        };

        let statements = match Operation::parse(target)? {
            Operation::Update => vec![update(packager)],
            Operation::Upgrade => vec![upgrade(packager)],
            Operation::AddScope => {
                if !packager.is_debian_family() {
                    return Err(incompatible());
                }
                let scope = required(Self::KIND, "scope", options.scope)?;
                let script = format!(
                    "/^deb(-src)?[[:space:]]/{{/[[:space:]]{scope}([[:space:]]|$)/!s/$/ {scope}/}}"
                );
                vec![
                    format!("sed -i -E {} /etc/apt/sources.list", quote(&script)),
                    update(packager),
                ]
            }
            Operation::Configure => {
                let proxy = required(Self::KIND, "proxy", options.proxy)?;
                match packager {
                    Packager::Apt | Packager::Aptitude => vec![format!(
                        "printf '%s\\n' {} > /etc/apt/apt.conf.d/01proxy",
                        quote(&format!("Acquire::http::Proxy \"{proxy}\";"))
                    )],
                    Packager::Yum => vec![
                        "sed -i '/^proxy=/d' /etc/yum.conf".to_owned(),
                        format!("printf 'proxy=%s\\n' {} >> /etc/yum.conf", quote(&proxy)),
                    ],
                    _ => return Err(incompatible()),
                }
            }
        };
        session.emit(checked(format!("Package manager {target}"), statements));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::fixtures::{fragments, fragments_in};
    use crate::core::context::{Context, OsFamily, TargetFacts};
    use crate::core::Action;

    fn on(os_family: OsFamily) -> Session {
        Session::new(Context {
            facts: TargetFacts::new(os_family),
            ..Context::default()
        })
    }

    #[test]
    fn update() {
        let action = Action::new(Kind::PackageManager, "update");
        assert_eq!(
            vec![checked(
                "Package manager update",
                ["DEBIAN_FRONTEND=noninteractive apt-get -qq update"]
            )],
            fragments(&action).unwrap()
        );
        assert_eq!(
            ["pacman -Sy --noconfirm"],
            fragments_in(on(OsFamily::Arch), &action).unwrap()[0].statements()
        );
    }

    #[test]
    fn upgrade() {
        let action = Action::new(Kind::PackageManager, "upgrade");
        assert_eq!(
            ["yum -q -y update"],
            fragments_in(on(OsFamily::Amzn), &action).unwrap()[0].statements()
        );
    }

    #[test]
    fn add_scope() {
        let action = Action::new(Kind::PackageManager, "add-scope").with("scope", "contrib");
        assert_eq!(
            [
                "sed -i -E '/^deb(-src)?[[:space:]]/{/[[:space:]]contrib([[:space:]]|$)/!s/$/ \
                contrib/}' /etc/apt/sources.list",
                "DEBIAN_FRONTEND=noninteractive apt-get -qq update",
            ],
            fragments(&action).unwrap()[0].statements()
        );
    }

    #[test]
    fn add_scope_is_apt_only() {
        let action = Action::new(Kind::PackageManager, "add-scope").with("scope", "contrib");
        assert!(matches!(
            fragments_in(on(OsFamily::Centos), &action),
            Err(Error::IncompatiblePackager { .. })
        ));
    }

    #[test]
    fn add_scope_checks_the_scope() {
        let action = Action::new(Kind::PackageManager, "add-scope").with("scope", "main/x; rm");
        assert!(matches!(
            action.validate(),
            Err(Error::InvalidOption { ref key, .. }) if key == "scope"
        ));
        let action = Action::new(Kind::PackageManager, "add-scope");
        assert!(matches!(
            action.validate(),
            Err(Error::MissingOption { ref key, .. }) if key == "scope"
        ));
    }

    #[test]
    fn configure_proxy() {
        let action = Action::new(Kind::PackageManager, "configure")
            .with("proxy", "http://proxy.local:3128");
        assert_eq!(
            ["printf '%s\\n' 'Acquire::http::Proxy \"http://proxy.local:3128\";' > \
            /etc/apt/apt.conf.d/01proxy"],
            fragments(&action).unwrap()[0].statements()
        );
        assert_eq!(
            [
                "sed -i '/^proxy=/d' /etc/yum.conf",
                "printf 'proxy=%s\\n' http://proxy.local:3128 >> /etc/yum.conf",
            ],
            fragments_in(on(OsFamily::Centos), &action).unwrap()[0].statements()
        );
    }

    #[test]
    fn rejects_unknown_operations() {
        assert!(Action::new(Kind::PackageManager, "dist-upgrade").validate().is_err());
    }
}
