//! The `directory` primitive.

use super::attrs::{change_mode, change_owner, check_mode, Mode};
use super::{Kind, Primitive};
use crate::core::script::{checked, quote};
use crate::core::session::Session;
use crate::Result;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectoryAction {
    #[default]
    Create,
    Touch,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub action: DirectoryAction,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<Mode>,

    /// `-R` for `chown` and `chgrp`; `-r` for deletion.
    pub recursive: bool,

    /// `-f` for deletion.
    pub force: bool,

    /// `-p` for `mkdir`.
    pub path: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            action: DirectoryAction::Create,
            owner: None,
            group: None,
            mode: None,
            recursive: true,
            force: true,
            path: true,
        }
    }
}

pub struct Directory;

impl Primitive for Directory {
    const KIND: Kind = Kind::Directory;
    const OPTIONS: &'static [&'static str] = &[
        "action",
        "owner",
        "group",
        "mode",
        "recursive",
        "force",
        "path",
    ];
    type Options = Options;

    fn validate(_target: &str, options: &Options) -> Result<()> {
        check_mode(Self::KIND, options.mode.as_ref())
    }

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let path = quote(target);
        let fragment = match options.action {
            DirectoryAction::Create | DirectoryAction::Touch => {
                let mut mkdir = "mkdir".to_owned();
                if let Some(mode) = &options.mode {
                    mkdir += &format!(" -m \"{mode}\"");
                }
                if options.path {
                    mkdir += " -p";
                }

                let mut statements = vec![format!("{mkdir} {path}")];
                statements.extend(change_owner(
                    target,
                    options.owner.as_deref(),
                    options.group.as_deref(),
                    options.recursive.then_some("-R"),
                ));
                statements.extend(change_mode(target, options.mode.as_ref()));
                checked(format!("Directory {target}"), statements)
            }
            DirectoryAction::Delete => {
                let mut rm = "rm".to_owned();
                if options.recursive {
                    rm += " -r";
                }
                if options.force {
                    rm += " -f";
                }
                checked(format!("Delete directory {target}"), [format!("{rm} {path}")])
            }
        };
        session.emit(fragment);
        Ok(())
    }
}
