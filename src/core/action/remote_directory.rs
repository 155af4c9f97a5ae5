//! The `remote-directory` primitive: a directory filled from an archive.
//!
//! The archive itself is a managed file, downloaded or uploaded by a nested `remote-file` action
//! under `<scratch>/archives`, so it gets the same conflict checks and backups as any other.

use super::attrs::{change_mode, change_owner, check_mode, Mode};
use super::{Action, Kind, Primitive};
use crate::core::script::{checked, quote};
use crate::core::session::Session;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Unpack {
    Tar,
    Zip,
    Jar,
}

impl Unpack {
    /// Guesses the archive type from a file name.
    pub fn infer(name: &str) -> Option<Self> {
        const TAR: &[&str] = &[
            ".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".tar.xz", ".txz", ".tar.zst",
        ];
        let name = name.to_ascii_lowercase();
        if TAR.iter().any(|ext| name.ends_with(ext)) {
            Some(Unpack::Tar)
        } else if name.ends_with(".zip") {
            Some(Unpack::Zip)
        } else if name.ends_with(".jar") || name.ends_with(".war") {
            Some(Unpack::Jar)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub url: Option<String>,
    pub local_file: Option<PathBuf>,
    pub sha256: Option<String>,
    pub insecure: bool,
    pub overwrite_changes: bool,

    /// Archive type. Inferred from the source's file name when absent.
    pub unpack: Option<Unpack>,

    /// Leading path components dropped from tar entries.
    pub strip_components: u32,

    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<Mode>,

    /// Raise this session flag when the archive changes.
    pub flag_on_changed: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            url: None,
            local_file: None,
            sha256: None,
            insecure: false,
            overwrite_changes: false,
            unpack: None,
            strip_components: 1,
            owner: None,
            group: None,
            mode: None,
            flag_on_changed: None,
        }
    }
}

impl Options {
    /// The archive's file name, taken from whichever source is set.
    fn archive_name(&self) -> Result<String> {
        let name = match (&self.url, &self.local_file) {
            (Some(url), None) => {
                let path = url.split(['?', '#']).next().unwrap_or_default();
                path.rsplit('/').next().map(str::to_owned)
            }
            (None, Some(local)) => local
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            (None, None) => return Err(Error::missing(Kind::RemoteDirectory, "url|local-file")),
            (Some(_), Some(_)) => {
                return Err(Error::invalid(
                    Kind::RemoteDirectory,
                    "url|local-file",
                    "only one source may be given",
                ))
            }
        };
        name.filter(|name| !name.is_empty()).ok_or_else(|| {
            Error::invalid(
                Kind::RemoteDirectory,
                "url|local-file",
                "the source does not name a file",
            )
        })
    }

    fn unpack(&self) -> Result<Unpack> {
        match self.unpack {
            Some(unpack) => Ok(unpack),
            None => {
                let name = self.archive_name()?;
                Unpack::infer(&name).ok_or_else(|| {
                    Error::invalid(
                        Kind::RemoteDirectory,
                        "unpack",
                        format!("can't tell what kind of archive `{name}` is"),
                    )
                })
            }
        }
    }

    /// The nested `remote-file` action that brings the archive to the target.
    fn archive(&self, dir: &str) -> Result<Action> {
        let name = self.archive_name()?;
        let mut action = Action::remote_file(format!(
            "archives/{}/{name}",
            dir.trim_matches('/')
        ));
        if let Some(url) = &self.url {
            action = action.with("url", url.as_str());
        }
        if let Some(local) = &self.local_file {
            action = action.with("local-file", local.to_string_lossy().into_owned());
        }
        if let Some(sha256) = &self.sha256 {
            action = action.with("sha256", sha256.as_str());
        }
        if self.insecure {
            action = action.with("insecure", true);
        }
        if self.overwrite_changes {
            action = action.with("overwrite-changes", true);
        }
        if let Some(flag) = &self.flag_on_changed {
            action = action.with("flag-on-changed", flag.as_str());
        }
        Ok(action)
    }
}

pub struct RemoteDirectory;

impl Primitive for RemoteDirectory {
    const KIND: Kind = Kind::RemoteDirectory;
    const OPTIONS: &'static [&'static str] = &[
        "url",
        "local-file",
        "sha256",
        "insecure",
        "overwrite-changes",
        "unpack",
        "strip-components",
        "owner",
        "group",
        "mode",
        "flag-on-changed",
    ];
    type Options = Options;

    fn validate(target: &str, options: &Options) -> Result<()> {
        check_mode(Self::KIND, options.mode.as_ref())?;
        options.unpack()?;
        options.archive(target)?.validate()
    }

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let archive = options.archive(target)?;
        archive.compile(session)?;

        let archive_path = quote(&session.context().scratch_path(archive.target())).into_owned();
        let dir = quote(target);
        let unpack = match options.unpack()? {
            Unpack::Tar if options.strip_components > 0 => format!(
                "tar xf {archive_path} -C {dir} --strip-components={}",
                options.strip_components
            ),
            Unpack::Tar => format!("tar xf {archive_path} -C {dir}"),
            Unpack::Zip => format!("unzip -o -q {archive_path} -d {dir}"),
            Unpack::Jar => format!("(cd {dir} && jar -xf {archive_path})"),
        };

        let mut statements = vec![format!("mkdir -p {dir}"), unpack];
        statements.extend(change_owner(
            target,
            options.owner.as_deref(),
            options.group.as_deref(),
            Some("-R"),
        ));
        statements.extend(change_mode(target, options.mode.as_ref()));
        session.emit(checked(format!("Remote directory {target}"), statements));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::fixtures::fragments;

    #[test]
    fn infers_archive_types() {
        assert_eq!(Some(Unpack::Tar), Unpack::infer("app-1.0.tar.gz"));
        assert_eq!(Some(Unpack::Tar), Unpack::infer("APP.TGZ"));
        assert_eq!(Some(Unpack::Zip), Unpack::infer("app.zip"));
        assert_eq!(Some(Unpack::Jar), Unpack::infer("app.war"));
        assert_eq!(None, Unpack::infer("app.rar"));
    }

    #[test]
    fn downloads_then_unpacks() {
        let action = Action::new(Kind::RemoteDirectory, "/opt/app")
            .with("url", "https://example.com/dist/app-1.0.tar.gz?download=1")
            .with("owner", "app");
        let fragments = fragments(&action).unwrap();
        let labels: Vec<_> = fragments.iter().map(|f| f.label()).collect();
        assert_eq!(
            vec![
                "Remote file /var/lib/cairn/archives/opt/app/app-1.0.tar.gz",
                "Remote directory /opt/app",
            ],
            labels
        );
        assert_eq!(
            [
                "mkdir -p /opt/app",
                "tar xf /var/lib/cairn/archives/opt/app/app-1.0.tar.gz -C /opt/app \
                --strip-components=1",
                "chown -R app /opt/app",
            ],
            fragments[1].statements()
        );
    }

    #[test]
    fn zip_and_jar() {
        let zip = Action::new(Kind::RemoteDirectory, "/srv/site")
            .with("local-file", "build/site.zip");
        assert_eq!(
            "unzip -o -q /var/lib/cairn/archives/srv/site/site.zip -d /srv/site",
            fragments(&zip).unwrap()[2].statements()[1]
        );

        let jar = Action::new(Kind::RemoteDirectory, "/srv/app")
            .with("url", "https://example.com/app.bin")
            .with("unpack", "jar");
        assert_eq!(
            "(cd /srv/app && jar -xf /var/lib/cairn/archives/srv/app/app.bin)",
            fragments(&jar).unwrap()[1].statements()[1]
        );
    }

    #[test]
    fn strip_components_zero_omits_the_flag() {
        let action = Action::new(Kind::RemoteDirectory, "/opt/app")
            .with("url", "https://example.com/app.tar")
            .with("strip-components", 0);
        assert_eq!(
            "tar xf /var/lib/cairn/archives/opt/app/app.tar -C /opt/app",
            fragments(&action).unwrap()[1].statements()[1]
        );
    }

    #[test]
    fn needs_a_recognizable_archive() {
        let action =
            Action::new(Kind::RemoteDirectory, "/opt/app").with("url", "https://example.com/app");
        assert!(matches!(
            action.validate(),
            Err(Error::InvalidOption { ref key, .. }) if key == "unpack"
        ));
        assert!(Action::new(Kind::RemoteDirectory, "/opt/app").validate().is_err());
    }
}
