//! The `file` primitive: existence, timestamps, and attributes of a file, but not its content.
//!
//! For content, see [remote_file](super::remote_file).

use super::attrs::{change_mode, change_owner, check_mode, Mode};
use super::{Kind, Primitive};
use crate::core::script::{checked, quote};
use crate::core::session::Session;
use crate::Result;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileAction {
    #[default]
    Create,
    Touch,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub action: FileAction,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<Mode>,
    pub force: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            action: FileAction::Create,
            owner: None,
            group: None,
            mode: None,
            force: true,
        }
    }
}

pub struct File;

impl Primitive for File {
    const KIND: Kind = Kind::File;
    const OPTIONS: &'static [&'static str] = &["action", "owner", "group", "mode", "force"];
    type Options = Options;

    fn validate(_target: &str, options: &Options) -> Result<()> {
        check_mode(Self::KIND, options.mode.as_ref())
    }

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let path = quote(target);
        let fragment = match options.action {
            FileAction::Delete => {
                let force = if options.force { " -f" } else { "" };
                checked(format!("Delete file {target}"), [format!("rm{force} {path}")])
            }
            action => {
                let mut statements = vec![match action {
                    FileAction::Touch => format!("touch {path}"),
                    _ => format!("[ -e {path} ] || touch {path}"),
                }];
                statements.extend(change_owner(
                    target,
                    options.owner.as_deref(),
                    options.group.as_deref(),
                    None,
                ));
                statements.extend(change_mode(target, options.mode.as_ref()));
                checked(format!("File {target}"), statements)
            }
        };
        session.emit(fragment);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::fixtures::fragments;
    use crate::core::Action;

    #[test]
    fn create_only_touches_missing_files() {
        let action = Action::file("/etc/motd").with("owner", "root").with("mode", "644");
        assert_eq!(
            vec![checked(
                "File /etc/motd",
                [
                    "[ -e /etc/motd ] || touch /etc/motd",
                    "chown root /etc/motd",
                    "chmod 644 /etc/motd",
                ]
            )],
            fragments(&action).unwrap()
        );
    }

    #[test]
    fn touch_always_touches() {
        let action = Action::file("/etc/motd").with("action", "touch");
        assert_eq!(["touch /etc/motd"], fragments(&action).unwrap()[0].statements());
    }

    #[test]
    fn delete() {
        let action = Action::file("/etc/motd").with("action", "delete");
        assert_eq!(
            vec![checked("Delete file /etc/motd", ["rm -f /etc/motd"])],
            fragments(&action).unwrap()
        );
    }
}
