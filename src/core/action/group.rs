//! The `group` primitive.

use super::{Kind, Primitive};
use crate::core::script::{checked_from_script, Form, Test, Word};
use crate::core::session::Session;
use crate::Result;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupAction {
    #[default]
    Create,
    Manage,
    Remove,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub action: GroupAction,
    pub system: bool,
    pub gid: Option<u32>,
}

pub struct Group;

impl Primitive for Group {
    const KIND: Kind = Kind::Group;
    const OPTIONS: &'static [&'static str] = &["action", "system", "gid"];
    type Options = Options;

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let exists = Test::quiet(["getent", "group", target]);

        let mut groupadd = vec![Word::lit("groupadd")];
        if options.system {
            groupadd.push(Word::lit("-r"));
        }
        if let Some(gid) = options.gid {
            groupadd.push(Word::lit("-g"));
            groupadd.push(Word::lit(gid.to_string()));
        }
        groupadd.push(Word::lit(target));
        let groupadd = Form::Exec(groupadd);

        let (label, form) = match options.action {
            GroupAction::Create => (
                format!("Group {target}"),
                Form::when(Test::not(exists), vec![groupadd]),
            ),
            GroupAction::Manage => {
                let groupmod = options.gid.map(|gid| {
                    Form::exec(["groupmod".to_owned(), "-g".into(), gid.to_string(), target.into()])
                });
                (
                    format!("Group {target}"),
                    Form::If {
                        test: exists,
                        then: groupmod.into_iter().collect(),
                        otherwise: vec![groupadd],
                    },
                )
            }
            GroupAction::Remove => (
                format!("Remove group {target}"),
                Form::when(exists, vec![Form::exec(["groupdel", target])]),
            ),
        };
        session.emit(checked_from_script(label, [form]));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::fixtures::fragments;
    use crate::core::Action;

    #[test]
    fn create() {
        let action = Action::new(Kind::Group, "web").with("system", true).with("gid", 901);
        assert_eq!(
            ["if ! getent group web >/dev/null 2>&1; then\n  groupadd -r -g 901 web\nfi"],
            fragments(&action).unwrap()[0].statements()
        );
    }

    #[test]
    fn manage_without_gid_leaves_existing_groups_alone() {
        let action = Action::new(Kind::Group, "web").with("action", "manage");
        assert_eq!(
            ["if getent group web >/dev/null 2>&1; then\n  :\nelse\n  groupadd web\nfi"],
            fragments(&action).unwrap()[0].statements()
        );
    }

    #[test]
    fn remove() {
        let action = Action::new(Kind::Group, "web").with("action", "remove");
        let fragments = fragments(&action).unwrap();
        assert_eq!("Remove group web", fragments[0].label());
        assert_eq!(
            ["if getent group web >/dev/null 2>&1; then\n  groupdel web\nfi"],
            fragments[0].statements()
        );
    }
}
