//! The `fifo` primitive.

use super::attrs::{change_mode, change_owner, check_mode, Mode};
use super::{Kind, Primitive};
use crate::core::script::{checked, quote};
use crate::core::session::Session;
use crate::Result;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FifoAction {
    #[default]
    Create,
    Delete,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub action: FifoAction,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<Mode>,
}

pub struct Fifo;

impl Primitive for Fifo {
    const KIND: Kind = Kind::Fifo;
    const OPTIONS: &'static [&'static str] = &["action", "owner", "group", "mode"];
    type Options = Options;

    fn validate(_target: &str, options: &Options) -> Result<()> {
        check_mode(Self::KIND, options.mode.as_ref())
    }

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let path = quote(target);
        let fragment = match options.action {
            FifoAction::Create => {
                let mut statements = vec![format!("[ -p {path} ] || mkfifo {path}")];
                statements.extend(change_owner(
                    target,
                    options.owner.as_deref(),
                    options.group.as_deref(),
                    None,
                ));
                statements.extend(change_mode(target, options.mode.as_ref()));
                checked(format!("FIFO {target}"), statements)
            }
            FifoAction::Delete => {
                checked(format!("Delete FIFO {target}"), [format!("rm -f {path}")])
            }
        };
        session.emit(fragment);
        Ok(())
    }
}
