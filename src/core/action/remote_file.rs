//! The `remote-file` primitive: files whose full content Cairn owns.
//!
//! New content is staged next to the checksum and backups under the scratch directory, compared
//! with the live file, and only moved into place when it differs. Each install records the file's
//! checksum so that the next run can tell whether someone edited the file in between.

use super::attrs::{change_mode, change_owner, check_mode, Mode};
use super::{Kind, Primitive};
use crate::core::context::Overrides;
use crate::core::managed::{probe_checksums, sha256_hex, ManagedFile, Update};
use crate::core::script::{checked, checked_from_script, quote, Form, Test, Word};
use crate::core::session::Session;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

/// Where local files wait on the target between upload and staging.
pub const UPLOAD_DIR: &str = "/tmp/cairn-upload";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteFileAction {
    #[default]
    Create,
    Delete,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub action: RemoteFileAction,

    /// The file's content, verbatim.
    pub content: Option<String>,

    /// Download the content on the target.
    pub url: Option<String>,

    /// Upload the content from the controller.
    pub local_file: Option<PathBuf>,

    /// Expected digest of the content. Staged content that doesn't match is never installed.
    pub sha256: Option<String>,

    /// Skip TLS verification for `url`.
    pub insecure: bool,

    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<Mode>,

    /// Replace the file even if it was edited since the last install.
    pub overwrite_changes: bool,

    pub no_versioning: bool,

    /// Backups to keep. Defaults to the context's setting.
    pub max_versions: Option<usize>,

    /// Raise this session flag when the content changes.
    pub flag_on_changed: Option<String>,
}

enum Source<'o> {
    Content(&'o str),
    Url(&'o str),
    Local(&'o PathBuf),
}

impl Options {
    fn source(&self) -> Result<Source<'_>> {
        let sources = [
            self.content.as_deref().map(Source::Content),
            self.url.as_deref().map(Source::Url),
            self.local_file.as_ref().map(Source::Local),
        ];
        let mut sources = sources.into_iter().flatten();
        match (sources.next(), sources.next()) {
            (Some(source), None) => Ok(source),
            (None, _) => Err(Error::missing(Kind::RemoteFile, "content|url|local-file")),
            (Some(_), Some(_)) => Err(Error::invalid(
                Kind::RemoteFile,
                "content|url|local-file",
                "only one source may be given",
            )),
        }
    }
}

/// The name an uploaded file gets in [UPLOAD_DIR].
fn upload_path(path: &str) -> String {
    format!("{UPLOAD_DIR}/{}", path.trim_start_matches('/').replace('/', "_"))
}

/// Statements that check the staged file against `sha256`.
fn verify(staged: &str, sha256: Option<&str>) -> Option<String> {
    sha256.map(|sha256| {
        format!(
            "printf '%s  %s\\n' {sha256} {} | sha256sum -c --status -",
            quote(staged)
        )
    })
}

/// The `if` that moves staged content into place when it differs from the live file.
///
/// Backups are taken, and old ones evicted, only when there is a live file to back up.
fn install(file: &ManagedFile, update: &Update) -> Form {
    let path = update.path.as_str();
    let staged = update.staged.as_str();

    let mut replace = vec![];
    if let Some(backup) = &update.backup {
        let mut keep = vec![Form::exec(["cp", "-p", path, backup.as_str()])];
        if !update.evicted.is_empty() {
            let mut rm = vec![Word::lit("rm"), Word::lit("-f")];
            rm.extend(update.evicted.iter().map(|p| Word::lit(p.as_str())));
            keep.push(Form::Exec(rm));
        }
        replace.push(Form::when(Test::Exists(Word::lit(path)), keep));
    }
    replace.push(Form::exec(["mv", "-f", staged, path]));
    replace.push(Form::raw(format!(
        "sha256sum {} > {}",
        quote(path),
        quote(file.checksum_path())
    )));

    Form::If {
        test: Test::Raw(format!("cmp -s {} {}", quote(staged), quote(path))),
        then: vec![Form::exec(["rm", "-f", staged])],
        otherwise: replace,
    }
}

pub struct RemoteFile;

impl Primitive for RemoteFile {
    const KIND: Kind = Kind::RemoteFile;
    const OPTIONS: &'static [&'static str] = &[
        "action",
        "content",
        "url",
        "local-file",
        "sha256",
        "insecure",
        "owner",
        "group",
        "mode",
        "overwrite-changes",
        "no-versioning",
        "max-versions",
        "flag-on-changed",
    ];
    type Options = Options;

    fn validate(_target: &str, options: &Options) -> Result<()> {
        check_mode(Self::KIND, options.mode.as_ref())?;
        if let Some(sha256) = &options.sha256 {
            if sha256.len() != 64 || !sha256.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::invalid(
                    Self::KIND,
                    "sha256",
                    "expected 64 hexadecimal digits",
                ));
            }
        }
        match options.action {
            RemoteFileAction::Create => options.source().map(drop),
            RemoteFileAction::Delete => Ok(()),
        }
    }

    fn compile(target: &str, options: Options, session: &mut Session) -> Result<()> {
        let context = session.context().clone();
        let path = context.scratch_path(target);
        let file = ManagedFile::new(path.as_str(), &context.scratch_dir);

        if options.action == RemoteFileAction::Delete {
            session.emit(checked(
                format!("Delete remote file {path}"),
                [
                    format!("rm -f {}", quote(&path)),
                    format!("rm -f {}", quote(file.checksum_path())),
                ],
            ));
            return Ok(());
        }

        let versions = session
            .probe()
            .versions(file.backup_path())
            .map_err(Error::Probe)?;
        let file = file
            .with_max_versions(options.max_versions.unwrap_or(context.max_versions))
            .with_versioning(!options.no_versioning)
            .with_versions(versions);

        let overwrite = options.overwrite_changes || context.force_overwrite;
        let (recorded, live) = probe_checksums(session.probe(), &file)?;
        file.check_conflict(recorded.as_deref(), live.as_deref(), overwrite)?;

        let expected = options
            .sha256
            .as_ref()
            .map(|sha256| sha256.to_ascii_lowercase())
            .or_else(|| options.content.as_ref().map(sha256_hex));
        if let Some(flag) = &options.flag_on_changed {
            let unchanged = matches!((&live, &expected), (Some(live), Some(new)) if live == new);
            if unchanged {
                debug!(path = path.as_str(), "content unchanged");
            } else {
                session.set_flag(flag.as_str());
            }
        }
        let update = file.plan_update(expected.unwrap_or_default());

        let staged = file.staged_path();
        let copy = match options.source()? {
            Source::Content(content) => {
                format!("printf '%s' {} > {}", quote(content), quote(staged))
            }
            Source::Url(url) => {
                let insecure = if options.insecure { " -k" } else { "" };
                format!("curl -fsSL{insecure} -o {} {}", quote(staged), quote(url))
            }
            Source::Local(local) => {
                let uploaded = upload_path(&path);
                session.with_scope(&Overrides::new().unprivileged(), |session| {
                    session.emit(checked(
                        format!("Upload {path}"),
                        [format!("mkdir -p {UPLOAD_DIR}")],
                    ));
                    session.upload(local.clone(), uploaded.clone());
                    Ok(())
                })?;
                format!("mv -f {} {}", quote(&uploaded), quote(staged))
            }
        };

        // Staging, verification and installation share one fragment so that a failed check ends
        // it before anything is moved into place.
        let mut forms = vec![];
        if !overwrite {
            let (checksum, live) = (quote(file.checksum_path()), quote(&path));
            forms.push(Form::raw(format!(
                "! [ -e {checksum} ] || ! [ -e {live} ] || sha256sum -c --status {checksum}"
            )));
        }
        forms.push(Form::raw(format!("mkdir -p {}", quote(file.scratch_parent()))));
        forms.push(Form::Raw(copy));
        forms.extend(verify(staged, options.sha256.as_deref()).map(Form::Raw));
        forms.push(install(&file, &update));
        forms.extend(
            change_owner(&path, options.owner.as_deref(), options.group.as_deref(), None)
                .into_iter()
                .chain(change_mode(&path, options.mode.as_ref()))
                .map(Form::Raw),
        );
        let install = checked_from_script(format!("Remote file {path}"), forms);

        // Uploaded files belong to the login user until they are installed with privileges.
        let overrides = match options.local_file {
            Some(_) => Overrides::new().privileged(),
            None => Overrides::new(),
        };
        session.with_scope(&overrides, |session| {
            session.emit(install);
            Ok(())
        })?;
        Ok(())
    }
}
