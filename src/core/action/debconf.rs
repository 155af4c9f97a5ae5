//! The `debconf` primitive: preseeds answers for Debian package configuration.

use super::attrs::required;
use super::{Kind, Primitive};
use crate::core::script::{checked, quote};
use crate::core::session::Session;
use crate::{Error, Result};
use serde::Deserialize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub question: Option<String>,

    /// The question type: `string`, `boolean`, `select`, `password`, and so on.
    #[serde(rename = "type")]
    pub kind: Option<String>,

    pub value: Option<String>,
}

pub struct Debconf;

impl Primitive for Debconf {
    const KIND: Kind = Kind::Debconf;
    const OPTIONS: &'static [&'static str] = &["question", "type", "value"];
    type Options = Options;

    fn validate(_target: &str, options: &Options) -> Result<()> {
        required(Self::KIND, "question", options.question.as_ref())?;
        required(Self::KIND, "type", options.kind.as_ref())?;
        required(Self::KIND, "value", options.value.as_ref())?;
        Ok(())
    }

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let packager = session.context().facts.packager;
        if !packager.is_debian_family() {
            return Err(Error::IncompatiblePackager {
                kind: Self::KIND,
                packager,
            });
        }

        let question = required(Self::KIND, "question", options.question)?;
        let kind = required(Self::KIND, "type", options.kind)?;
        let value = required(Self::KIND, "value", options.value)?;
        let selection = format!("{target} {question} {kind} {value}");
        session.emit(checked(
            format!("Debconf {target} {question}"),
            [format!(
                "printf '%s\\n' {} | debconf-set-selections",
                quote(&selection)
            )],
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::fixtures::{fragments, fragments_in};
    use crate::core::context::{Context, OsFamily, TargetFacts};
    use crate::core::Action;

    fn selection() -> Action {
        Action::new(Kind::Debconf, "postfix")
            .with("question", "postfix/main_mailer_type")
            .with("type", "select")
            .with("value", "Internet Site")
    }

    #[test]
    fn preseeds() {
        assert_eq!(
            vec![checked(
                "Debconf postfix postfix/main_mailer_type",
                ["printf '%s\\n' 'postfix postfix/main_mailer_type select Internet Site' | \
                debconf-set-selections"]
            )],
            fragments(&selection()).unwrap()
        );
    }

    #[test]
    fn apt_family_only() {
        let session = Session::new(Context {
            facts: TargetFacts::new(OsFamily::Fedora),
            ..Context::default()
        });
        assert!(matches!(
            fragments_in(session, &selection()),
            Err(Error::IncompatiblePackager { .. })
        ));
    }

    #[test]
    fn requires_every_field() {
        let action = Action::new(Kind::Debconf, "postfix").with("question", "q");
        assert!(matches!(
            action.validate(),
            Err(Error::MissingOption { ref key, .. }) if key == "type"
        ));
    }
}
