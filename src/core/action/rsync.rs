//! The `rsync` primitive: copies a controller-side directory tree to the target.
//!
//! The remote directory is created first so the login user can write to it; the copy itself runs on
//! the controller against the node's [Endpoint](crate::core::node::Endpoint).

use super::attrs::required;
use super::{Kind, Primitive};
use crate::core::script::{checked, quote};
use crate::core::session::Session;
use crate::{Error, Result};
use serde::Deserialize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    /// The controller-side source. A trailing `/` copies the directory's contents.
    pub from: Option<String>,

    /// Remove files on the target that don't exist in the source.
    pub delete: bool,

    pub exclude: Vec<String>,
}

pub struct Rsync;

impl Primitive for Rsync {
    const KIND: Kind = Kind::Rsync;
    const OPTIONS: &'static [&'static str] = &["from", "delete", "exclude"];
    type Options = Options;

    fn validate(_target: &str, options: &Options) -> Result<()> {
        required(Self::KIND, "from", options.from.as_ref()).map(drop)
    }

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let from = required(Self::KIND, "from", options.from)?;
        let endpoint = session
            .endpoint()
            .cloned()
            .ok_or(Error::NoEndpoint { kind: Self::KIND })?;

        let path = quote(target);
        let mut prepare = vec![format!("mkdir -p {path}")];
        if let Some(login) = &endpoint.login {
            prepare.push(format!("chown {} {path}", quote(login)));
        }
        session.emit(checked(format!("Prepare {target}"), prepare));

        let mut rsync = format!(
            "rsync -e {} -rlptz",
            quote(&format!("ssh -p {}", endpoint.ssh_port))
        );
        if options.delete {
            rsync += " --delete";
        }
        for pattern in &options.exclude {
            rsync += &format!(" --exclude={}", quote(pattern));
        }
        let destination = format!("{}:{target}", endpoint.destination());
        rsync += &format!(" {} {}", quote(&from), quote(&destination));
        session.emit_local(checked(format!("Rsync {from} to {target}"), [rsync]));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::Context;
    use crate::core::node::Endpoint;
    use crate::core::script::Step;
    use crate::core::Action;

    fn session() -> Session {
        Session::new(Context::default()).with_endpoint(Endpoint {
            address: "10.0.0.5".into(),
            ssh_port: 2222,
            login: Some("deploy".into()),
        })
    }

    #[test]
    fn prepares_then_copies_locally() {
        let action = Action::new(Kind::Rsync, "/srv/site")
            .with("from", "build/site/")
            .with("delete", true)
            .with("exclude", vec!["*.map"]);
        let mut session = session();
        action.compile(&mut session).unwrap();

        let steps = session.steps();
        assert_eq!(2, steps.len());
        match &steps[0] {
            Step::Remote(segment) => assert_eq!(
                ["mkdir -p /srv/site", "chown deploy /srv/site"],
                segment.fragments[0].statements()
            ),
            other => panic!("expected a remote step, got {other:?}"),
        }
        assert_eq!(
            Step::Local(checked(
                "Rsync build/site/ to /srv/site",
                ["rsync -e 'ssh -p 2222' -rlptz --delete --exclude='*.map' build/site/ \
                deploy@10.0.0.5:/srv/site"]
            )),
            steps[1]
        );
    }

    #[test]
    fn needs_an_endpoint() {
        let action = Action::new(Kind::Rsync, "/srv/site").with("from", "build/site/");
        let mut session = Session::default();
        assert!(matches!(
            action.compile(&mut session),
            Err(Error::NoEndpoint { kind: Kind::Rsync })
        ));
    }

    #[test]
    fn requires_from() {
        assert!(Action::new(Kind::Rsync, "/srv/site").validate().is_err());
    }
}
