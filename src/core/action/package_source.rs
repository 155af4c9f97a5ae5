//! The `package-source` primitive: registers a repository with the target's packager.
//!
//! The options hold one section per packager; only the section for the target's packager is used.
//! Aptitude reads the `apt` section when it has none of its own.
//!
//! ```yaml
//! - package-source: nginx
//!   apt:
//!     url: https://nginx.org/packages/debian
//!     key-url: https://nginx.org/keys/nginx_signing.key
//!   yum:
//!     url: https://nginx.org/packages/centos/$releasever/$basearch/
//!     gpgkey: https://nginx.org/keys/nginx_signing.key
//! ```

use super::{Kind, Primitive};
use crate::core::context::{Context, Packager};
use crate::core::script::{checked_from_script, quote, Form, Piece, Test, Word};
use crate::core::session::Session;
use crate::{Error, Result};
use serde::Deserialize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct AptSource {
    /// Repository URL.
    pub url: Option<String>,

    /// A directory on the target holding a flat repository, as built by the `deb` primitive.
    /// Relative paths resolve under the scratch directory.
    pub path: Option<String>,

    /// Distribution codename. Defaults to the target's own, as reported by `lsb_release`.
    pub release: Option<String>,

    pub scopes: Vec<String>,

    /// Signing key, stored dearmored under `/etc/apt/keyrings`.
    pub key_url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct YumSource {
    pub url: Option<String>,
    pub mirrorlist: Option<String>,
    pub gpgcheck: bool,
    pub gpgkey: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ZypperSource {
    pub url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub apt: Option<AptSource>,
    pub aptitude: Option<AptSource>,
    pub yum: Option<YumSource>,
    pub zypper: Option<ZypperSource>,
}

const KEYRINGS: &str = "/etc/apt/keyrings";

fn apt(name: &str, source: &AptSource, context: &Context) -> Result<Vec<Form>> {
    let list = quote(&format!("/etc/apt/sources.list.d/{name}.list")).into_owned();
    match (&source.url, &source.path) {
        (None, Some(path)) => {
            let line = format!("deb [trusted=yes] file:{} ./", context.scratch_path(path));
            Ok(vec![Form::raw(format!(
                "printf '%s\\n' {} > {list}",
                quote(&line)
            ))])
        }
        (Some(url), None) => {
            let mut forms = vec![];
            let mut options = String::new();
            if let Some(key_url) = &source.key_url {
                let keyring = format!("{KEYRINGS}/{name}.gpg");
                forms.push(Form::exec(["mkdir", "-p", KEYRINGS]));
                forms.push(Form::raw(format!(
                    "curl -fsSL {} | gpg --dearmor --yes -o {}",
                    quote(key_url),
                    quote(&keyring)
                )));
                options = format!("[signed-by={keyring}] ");
            }

            let scopes = match source.scopes.is_empty() {
                true => "main".to_owned(),
                false => source.scopes.join(" "),
            };
            let release = match &source.release {
                Some(release) => Piece::Text(release.clone()),
                None => {
                    forms.push(Form::raw("release=$(lsb_release -c -s)"));
                    Piece::Var("release".into())
                }
            };
            let line = Word::Interpolated(vec![
                Piece::Text(format!("deb {options}{url} ")),
                release,
                Piece::Text(format!(" {scopes}")),
            ]);
            forms.push(Form::raw(format!(
                "printf '%s\\n' {} > {list}",
                line.render()
            )));
            forms.push(Form::exec(["apt-get", "-qq", "update"]));
            Ok(forms)
        }
        _ => Err(Error::invalid(
            Kind::PackageSource,
            "apt",
            "exactly one of `url` and `path` must be set",
        )),
    }
}

fn yum(name: &str, source: &YumSource) -> Result<Vec<Form>> {
    let location = match (&source.url, &source.mirrorlist) {
        (Some(url), None) => format!("baseurl={url}"),
        (None, Some(mirrorlist)) => format!("mirrorlist={mirrorlist}"),
        _ => {
            return Err(Error::invalid(
                Kind::PackageSource,
                "yum",
                "exactly one of `url` and `mirrorlist` must be set",
            ))
        }
    };

    let mut lines = vec![
        format!("[{name}]"),
        format!("name={name}"),
        location,
        "enabled=1".to_owned(),
        format!("gpgcheck={}", u8::from(source.gpgcheck)),
    ];
    let mut forms = vec![];
    if let Some(gpgkey) = &source.gpgkey {
        lines.push(format!("gpgkey={gpgkey}"));
        forms.push(Form::exec(["rpm", "--import", gpgkey.as_str()]));
    }

    let body = lines.join("\n") + "\n";
    forms.push(Form::raw(format!(
        "printf '%s' {} > {}",
        quote(&body),
        quote(&format!("/etc/yum.repos.d/{name}.repo"))
    )));
    Ok(forms)
}

fn zypper(name: &str, source: &ZypperSource) -> Vec<Form> {
    vec![Form::when(
        Test::not(Test::quiet(["zypper", "lr", name])),
        vec![Form::exec([
            "zypper",
            "--non-interactive",
            "addrepo",
            "--refresh",
            source.url.as_str(),
            name,
        ])],
    )]
}

pub struct PackageSource;

impl Primitive for PackageSource {
    const KIND: Kind = Kind::PackageSource;
    const OPTIONS: &'static [&'static str] = &["apt", "aptitude", "yum", "zypper"];
    type Options = Options;

    fn validate(target: &str, _options: &Options) -> Result<()> {
        match target.contains(|c: char| c == '/' || c.is_whitespace()) {
            true => Err(Error::invalid(
                Self::KIND,
                Self::KIND.name(),
                format!("`{target}` can't be used as a file name"),
            )),
            false => Ok(()),
        }
    }

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let context = session.context();
        let packager = context.facts.packager;
        let forms = match packager {
            Packager::Apt => apt(
                target,
                options.apt.as_ref().ok_or_else(|| missing("apt"))?,
                context,
            )?,
            Packager::Aptitude => {
                let source = options.aptitude.as_ref().or(options.apt.as_ref());
                apt(target, source.ok_or_else(|| missing("aptitude"))?, context)?
            }
            Packager::Yum => yum(target, options.yum.as_ref().ok_or_else(|| missing("yum"))?)?,
            Packager::Zypper => zypper(
                target,
                options.zypper.as_ref().ok_or_else(|| missing("zypper"))?,
            ),
            Packager::Pacman | Packager::Brew => {
                return Err(Error::IncompatiblePackager {
                    kind: Self::KIND,
                    packager,
                })
            }
        };
        session.emit(checked_from_script(format!("Package source {target}"), forms));
        Ok(())
    }
}

fn missing(key: &str) -> Error {
    Error::missing(Kind::PackageSource, key)
}
