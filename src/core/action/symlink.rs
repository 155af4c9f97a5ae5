//! The `symlink` primitive.

use super::attrs::{change_owner, required};
use super::{Kind, Primitive};
use crate::core::script::{checked, quote};
use crate::core::session::Session;
use crate::Result;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymlinkAction {
    #[default]
    Create,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub action: SymlinkAction,

    /// What the link points to.
    pub from: Option<String>,

    pub owner: Option<String>,
    pub group: Option<String>,
    pub force: bool,

    /// Replace a link to a directory instead of creating a link inside it.
    pub no_deref: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            action: SymlinkAction::Create,
            from: None,
            owner: None,
            group: None,
            force: true,
            no_deref: true,
        }
    }
}

pub struct Symlink;

impl Primitive for Symlink {
    const KIND: Kind = Kind::Symlink;
    const OPTIONS: &'static [&'static str] =
        &["action", "from", "owner", "group", "force", "no-deref"];
    type Options = Options;

    fn validate(_target: &str, options: &Options) -> Result<()> {
        if options.action == SymlinkAction::Create {
            required(Self::KIND, "from", options.from.as_ref())?;
        }
        Ok(())
    }

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let path = quote(target);
        let fragment = match options.action {
            SymlinkAction::Create => {
                let from = required(Self::KIND, "from", options.from)?;
                let mut ln = "ln -s".to_owned();
                if options.force {
                    ln += " -f";
                }
                if options.no_deref {
                    ln += " -n";
                }
                let mut statements = vec![format!("{ln} {} {path}", quote(&from))];
                statements.extend(change_owner(
                    target,
                    options.owner.as_deref(),
                    options.group.as_deref(),
                    Some("-h"),
                ));
                checked(format!("Link {target} to {from}"), statements)
            }
            SymlinkAction::Delete => checked(
                format!("Delete link {target}"),
                [format!("[ ! -L {path} ] || rm -f {path}")],
            ),
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
    use crate::Error;

    #[test]
    fn create() {
        let action = Action::new(Kind::Symlink, "/etc/nginx/sites-enabled/app")
            .with("from", "/etc/nginx/sites-available/app")
            .with("owner", "www-data");
        assert_eq!(
            vec![checked(
                "Link /etc/nginx/sites-enabled/app to /etc/nginx/sites-available/app",
                [
                    "ln -s -f -n /etc/nginx/sites-available/app /etc/nginx/sites-enabled/app",
                    "chown -h www-data /etc/nginx/sites-enabled/app",
                ]
            )],
            fragments(&action).unwrap()
        );
    }

    #[test]
    fn create_requires_from() {
        let action = Action::new(Kind::Symlink, "/usr/local/bin/app");
        assert!(matches!(
            action.validate(),
            Err(Error::MissingOption { ref key, .. }) if key == "from"
        ));
    }

    #[test]
    fn delete_only_removes_links() {
        let action = Action::new(Kind::Symlink, "/usr/local/bin/app").with("action", "delete");
        assert_eq!(
            ["[ ! -L /usr/local/bin/app ] || rm -f /usr/local/bin/app"],
            fragments(&action).unwrap()[0].statements()
        );
    }
}
