//! The `user` primitive: local accounts managed through `useradd` and friends.

use super::{Kind, Primitive};
use crate::core::script::{checked_from_script, Form, Test, Word};
use crate::core::session::Session;
use crate::{Error, Result};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserAction {
    /// Add the account if it doesn't exist; leave an existing account alone.
    #[default]
    Create,

    /// Add the account, or bring an existing account in line with the options.
    Manage,

    Remove,
    Lock,
    Unlock,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub action: UserAction,
    pub home: Option<String>,
    pub shell: Option<String>,
    pub comment: Option<String>,

    /// Primary group.
    pub group: Option<String>,

    /// Supplementary groups.
    pub groups: Vec<String>,

    pub system: bool,
    pub create_home: bool,

    /// An already-encrypted password.
    pub password: Option<String>,

    /// With `action: remove`, also delete the home directory.
    pub remove_home: bool,
}

impl Options {
    /// Flags shared by `useradd` and `usermod`.
    fn account_flags(&self) -> Vec<Word> {
        let mut words = vec![];
        let mut push = |flag: &str, value: &Option<String>| {
            if let Some(value) = value {
                words.push(Word::lit(flag));
                words.push(Word::lit(value.as_str()));
            }
        };
        push("-d", &self.home);
        push("-s", &self.shell);
        push("-c", &self.comment);
        push("-g", &self.group);
        push("-p", &self.password);
        if !self.groups.is_empty() {
            words.push(Word::lit("-G"));
            words.push(Word::lit(self.groups.join(",")));
        }
        words
    }

    fn useradd(&self, name: &str) -> Form {
        let mut words = vec![Word::lit("useradd")];
        if self.system {
            words.push(Word::lit("-r"));
        }
        if self.create_home {
            words.push(Word::lit("-m"));
        }
        words.extend(self.account_flags());
        words.push(Word::lit(name));
        Form::Exec(words)
    }

    fn usermod(&self, name: &str) -> Option<Form> {
        let flags = self.account_flags();
        if flags.is_empty() {
            return None;
        }
        let mut words = vec![Word::lit("usermod")];
        words.extend(flags);
        words.push(Word::lit(name));
        Some(Form::Exec(words))
    }
}

fn exists(name: &str) -> Test {
    Test::quiet(["getent", "passwd", name])
}

pub struct User;

impl Primitive for User {
    const KIND: Kind = Kind::User;
    const OPTIONS: &'static [&'static str] = &[
        "action",
        "home",
        "shell",
        "comment",
        "group",
        "groups",
        "system",
        "create-home",
        "password",
        "remove-home",
    ];
    type Options = Options;

    fn validate(target: &str, _options: &Options) -> Result<()> {
        match target.contains(|c: char| c.is_whitespace() || c == ':') {
            true => Err(Error::invalid(
                Self::KIND,
                Self::KIND.name(),
                format!("`{target}` is not a valid user name"),
            )),
            false => Ok(()),
        }
    }

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let (label, form) = match options.action {
            UserAction::Create => (
                format!("User {target}"),
                Form::when(Test::not(exists(target)), vec![options.useradd(target)]),
            ),
            UserAction::Manage => (
                format!("User {target}"),
                Form::If {
                    test: exists(target),
                    then: options.usermod(target).into_iter().collect(),
                    otherwise: vec![options.useradd(target)],
                },
            ),
            UserAction::Remove => {
                let mut words = vec![Word::lit("userdel")];
                if options.remove_home {
                    words.push(Word::lit("-r"));
                }
                words.push(Word::lit(target));
                (
                    format!("Remove user {target}"),
                    Form::when(exists(target), vec![Form::Exec(words)]),
                )
            }
            UserAction::Lock => (
                format!("Lock user {target}"),
                Form::exec(["usermod", "--lock", target]),
            ),
            UserAction::Unlock => (
                format!("Unlock user {target}"),
                Form::exec(["usermod", "--unlock", target]),
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
    fn create_is_guarded() {
        let action = Action::new(Kind::User, "deploy")
            .with("shell", "/bin/bash")
            .with("create-home", true)
            .with("groups", vec!["sudo", "adm"]);
        assert_eq!(
            [
                "if ! getent passwd deploy >/dev/null 2>&1; then\n  \
                useradd -m -s /bin/bash -G 'sudo,adm' deploy\nfi"
            ],
            fragments(&action).unwrap()[0].statements()
        );
    }

    #[test]
    fn manage_modifies_existing_accounts() {
        let action = Action::new(Kind::User, "deploy")
            .with("action", "manage")
            .with("home", "/srv/deploy");
        let expected = "\
if getent passwd deploy >/dev/null 2>&1; then
  usermod -d /srv/deploy deploy
else
  useradd -d /srv/deploy deploy
fi";
        assert_eq!([expected], fragments(&action).unwrap()[0].statements());
    }

    #[test]
    fn remove() {
        let action = Action::new(Kind::User, "deploy")
            .with("action", "remove")
            .with("remove-home", true);
        let fragments = fragments(&action).unwrap();
        assert_eq!("Remove user deploy", fragments[0].label());
        assert_eq!(
            ["if getent passwd deploy >/dev/null 2>&1; then\n  userdel -r deploy\nfi"],
            fragments[0].statements()
        );
    }

    #[test]
    fn lock() {
        let action = Action::new(Kind::User, "deploy").with("action", "lock");
        assert_eq!(
            ["usermod --lock deploy"],
            fragments(&action).unwrap()[0].statements()
        );
    }

    #[test]
    fn rejects_bad_names() {
        assert!(Action::new(Kind::User, "bad name").validate().is_err());
    }
}
