//! The `rpm` and `deb` primitives: install package files already on the target.
//!
//! Relative paths resolve under the scratch directory, where `remote-file` puts downloads.

use super::{Kind, Primitive};
use crate::core::script::{checked, checked_from_script, quote, Form, Test};
use crate::core::session::Session;
use crate::{Error, Result};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RpmAction {
    #[default]
    Install,
    Remove,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RpmOptions {
    pub action: RpmAction,

    /// With `action: remove`, the installed package's name. Defaults to the target.
    pub package: Option<String>,
}

pub struct Rpm;

impl Primitive for Rpm {
    const KIND: Kind = Kind::Rpm;
    const OPTIONS: &'static [&'static str] = &["action", "package"];
    type Options = RpmOptions;

    fn compile(target: &str, options: RpmOptions, session: &mut Session) -> Result<()> {
        let packager = session.context().facts.packager;
        if !packager.is_rpm_family() {
            return Err(Error::IncompatiblePackager {
                kind: Self::KIND,
                packager,
            });
        }

        let fragment = match options.action {
            RpmAction::Install => {
                let path = session.context().scratch_path(target);
                checked(
                    format!("RPM {path}"),
                    [format!("rpm -U --replacepkgs --quiet {}", quote(&path))],
                )
            }
            RpmAction::Remove => {
                let package = options.package.as_deref().unwrap_or(target);
                checked_from_script(
                    format!("Remove RPM {package}"),
                    [Form::when(
                        Test::quiet(["rpm", "-q", package]),
                        vec![Form::exec(["rpm", "-e", package])],
                    )],
                )
            }
        };
        session.emit(fragment);
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DebOptions {
    /// Instead of installing the target, index this directory as a flat apt repository.
    pub repository: Option<String>,
}

pub struct Deb;

impl Primitive for Deb {
    const KIND: Kind = Kind::Deb;
    const OPTIONS: &'static [&'static str] = &["repository"];
    type Options = DebOptions;

    fn compile(target: &str, options: DebOptions, session: &mut Session) -> Result<()> {
        let packager = session.context().facts.packager;
        if !packager.is_debian_family() {
            return Err(Error::IncompatiblePackager {
                kind: Self::KIND,
                packager,
            });
        }

        let context = session.context();
        let path = context.scratch_path(target);
        let fragment = match options.repository {
            Some(repository) => {
                let repository = context.scratch_path(&repository);
                checked(
                    format!("Deb repository {repository}"),
                    [
                        format!(
                            "(cd {} && dpkg-scanpackages . /dev/null | gzip -9c > Packages.gz)",
                            quote(&repository)
                        ),
                        "DEBIAN_FRONTEND=noninteractive apt-get -qq update".to_owned(),
                    ],
                )
            }
            None => checked(
                format!("Deb {path}"),
                [format!(
                    "DEBIAN_FRONTEND=noninteractive dpkg -i -E {}",
                    quote(&path)
                )],
            ),
        };
        session.emit(fragment);
        Ok(())
    }
}
