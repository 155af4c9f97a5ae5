//! The `service` primitive.

use super::{Kind, Primitive};
use crate::core::script::{checked, quote};
use crate::core::session::Session;
use crate::Result;
use serde::Deserialize;
use std::fmt::{self, Display};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceAction {
    #[default]
    Start,
    Stop,
    Restart,
    Reload,
    Enable,
    Disable,
}

impl Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ServiceAction::*;
        f.write_str(match self {
            Start => "start",
            Stop => "stop",
            Restart => "restart",
            Reload => "reload",
            Enable => "enable",
            Disable => "disable",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceImpl {
    #[default]
    Systemd,
    Initd,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub action: ServiceAction,
    pub service_impl: ServiceImpl,

    /// Only act if an earlier action raised this flag.
    pub if_flag: Option<String>,
}

pub struct Service;

impl Primitive for Service {
    const KIND: Kind = Kind::Service;
    const OPTIONS: &'static [&'static str] = &["action", "service-impl", "if-flag"];
    type Options = Options;

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        if let Some(flag) = &options.if_flag {
            if !session.flag(flag) {
                debug!(
                    service = target,
                    flag = flag.as_str(),
                    "flag not raised; skipping service action"
                );
                return Ok(());
            }
        }

        let name = quote(target);
        let action = options.action;
        let statement = match options.service_impl {
            ServiceImpl::Systemd => format!("systemctl {action} {name}"),
            ServiceImpl::Initd => match action {
                ServiceAction::Enable | ServiceAction::Disable => {
                    let debian = session.context().facts.packager.is_debian_family();
                    match (debian, action) {
                        (true, ServiceAction::Enable) => format!("update-rc.d {name} defaults"),
                        (true, _) => format!("update-rc.d {name} disable"),
                        (false, ServiceAction::Enable) => format!("chkconfig {name} on"),
                        (false, _) => format!("chkconfig {name} off"),
                    }
                }
                _ => format!("/etc/init.d/{name} {action}"),
            },
        };
        session.emit(checked(format!("Service {target} {action}"), [statement]));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::fixtures::{fragments, fragments_in};
    use crate::core::context::{Context, OsFamily, TargetFacts};
    use crate::core::Action;

    #[test]
    fn systemd() {
        let action = Action::new(Kind::Service, "nginx").with("action", "reload");
        assert_eq!(
            vec![checked("Service nginx reload", ["systemctl reload nginx"])],
            fragments(&action).unwrap()
        );
    }

    #[test]
    fn initd() {
        let action = Action::new(Kind::Service, "nginx")
            .with("action", "restart")
            .with("service-impl", "initd");
        assert_eq!(
            ["/etc/init.d/nginx restart"],
            fragments(&action).unwrap()[0].statements()
        );
    }

    #[test]
    fn initd_enable_follows_the_os_family() {
        let action = Action::new(Kind::Service, "nginx")
            .with("action", "enable")
            .with("service-impl", "initd");
        assert_eq!(
            ["update-rc.d nginx defaults"],
            fragments(&action).unwrap()[0].statements()
        );

        let context = Context {
            facts: TargetFacts::new(OsFamily::Centos),
            ..Context::default()
        };
        assert_eq!(
            ["chkconfig nginx on"],
            fragments_in(Session::new(context), &action).unwrap()[0].statements()
        );
    }

    #[test]
    fn if_flag_skips_unless_raised() {
        let action = Action::new(Kind::Service, "nginx")
            .with("action", "restart")
            .with("if-flag", "nginx-conf");
        assert!(fragments(&action).unwrap().is_empty());

        let mut session = Session::default();
        session.set_flag("nginx-conf");
        assert_eq!(1, fragments_in(session, &action).unwrap().len());
    }
}
