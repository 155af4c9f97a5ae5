//! Content and version management for files whose contents Cairn owns.
//!
//! A managed file has a few companions under the scratch directory, all derived from its path:
//!
//! - `<scratch>/<path>.new`: the staged copy of the next content
//! - `<scratch>/<path>.sha256`: the `sha256sum` line recorded after the last install
//! - `<scratch>/<path>.~N~`: numbered backups of previous contents, oldest first
//!
//! Compilation never touches the target. What it needs to know about these files comes from a
//! [Probe], which answers with plain values.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Returns the lowercase hex SHA-256 digest of `content`.
pub fn sha256_hex(content: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(content.as_ref()))
}

/// Reads the digest from a `sha256sum` output line.
pub fn parse_checksum(line: &str) -> Option<String> {
    line.split_whitespace()
        .next()
        .filter(|digest| digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_ascii_lowercase)
}

/// The derived paths and retention state of one managed file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedFile {
    base: String,
    staged: String,
    checksum: String,
    backup: String,

    /// Backup version numbers present on the target, oldest first.
    retained: Vec<u32>,

    max_versions: usize,
    versioning: bool,
}

impl ManagedFile {
    /// Derives the companion paths of `base` under `scratch_dir`.
    pub fn new(base: impl Into<String>, scratch_dir: &str) -> Self {
        let base = base.into();
        let stem = format!(
            "{}/{}",
            scratch_dir.trim_end_matches('/'),
            base.trim_start_matches('/')
        );
        ManagedFile {
            staged: format!("{stem}.new"),
            checksum: format!("{stem}.sha256"),
            backup: stem,
            base,
            retained: vec![],
            max_versions: crate::core::context::DEFAULT_MAX_VERSIONS,
            versioning: true,
        }
    }

    pub fn with_max_versions(mut self, max_versions: usize) -> Self {
        self.max_versions = max_versions;
        self
    }

    pub fn with_versioning(mut self, versioning: bool) -> Self {
        self.versioning = versioning;
        self
    }

    /// Records which backup versions already exist. Order doesn't matter.
    pub fn with_versions(mut self, mut versions: Vec<u32>) -> Self {
        versions.sort_unstable();
        versions.dedup();
        self.retained = versions;
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base
    }

    pub fn staged_path(&self) -> &str {
        &self.staged
    }

    pub fn checksum_path(&self) -> &str {
        &self.checksum
    }

    /// The path that numbered backups extend.
    pub fn backup_path(&self) -> &str {
        &self.backup
    }

    /// The parent directory of the companion files.
    pub fn scratch_parent(&self) -> &str {
        match self.backup.rsplit_once('/') {
            Some(("", _)) => "/",
            Some((parent, _)) => parent,
            None => ".",
        }
    }

    pub fn version_path(&self, version: u32) -> String {
        format!("{}.~{version}~", self.backup)
    }

    pub fn retained_versions(&self) -> &[u32] {
        &self.retained
    }

    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    /// Fails if the file was changed since Cairn last installed it.
    ///
    /// `recorded` is the checksum saved at the last install and `live` the checksum of the file as
    /// it is now. A missing value on either side means there is nothing to protect.
    pub fn check_conflict(
        &self,
        recorded: Option<&str>,
        live: Option<&str>,
        overwrite: bool,
    ) -> Result<()> {
        match (recorded, live) {
            (Some(recorded), Some(live)) if recorded != live && !overwrite => {
                Err(Error::ContentConflict {
                    path: self.base.clone(),
                    recorded: recorded.to_owned(),
                    live: live.to_owned(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Plans the installation of new content whose digest is `checksum`.
    ///
    /// The current file is backed up to the next version number, and the oldest versions beyond
    /// [Self::max_versions] are evicted. Both happen only if the file exists when the update runs.
    pub fn plan_update(&self, checksum: impl Into<String>) -> Update {
        let mut retained = self.retained.clone();
        let mut backup = None;
        let mut evicted = vec![];

        if self.versioning && self.max_versions > 0 {
            let next = retained.last().map_or(1, |last| last + 1);
            retained.push(next);
            backup = Some(self.version_path(next));

            let excess = retained.len().saturating_sub(self.max_versions);
            evicted = retained
                .drain(..excess)
                .map(|version| self.version_path(version))
                .collect();
        }

        Update {
            path: self.base.clone(),
            staged: self.staged.clone(),
            checksum_path: self.checksum.clone(),
            backup,
            evicted,
            retained,
            checksum: checksum.into(),
        }
    }
}

/// The file operations that install one new version of a [ManagedFile].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub path: String,
    pub staged: String,
    pub checksum_path: String,

    /// Where the current content is copied before it is replaced.
    pub backup: Option<String>,

    /// Backups to delete, oldest first.
    pub evicted: Vec<String>,

    /// Backup versions present after the update.
    pub retained: Vec<u32>,

    /// Digest of the new content. Empty when it is only known once staged.
    pub checksum: String,
}

/// Read-only questions about files on a target.
///
/// Implementations answer from whatever they have on hand; [Offline] knows nothing, which makes
/// every file look unmanaged and leaves conflict detection to the checks built into the script.
pub trait Probe {
    /// Returns the SHA-256 of the file at `path`, or [None] if it doesn't exist.
    fn checksum(&self, path: &str) -> anyhow::Result<Option<String>>;

    /// Returns the contents of the file at `path`, or [None] if it doesn't exist.
    fn read(&self, path: &str) -> anyhow::Result<Option<String>>;

    /// Returns the numbered backup versions that exist for `backup_path`.
    fn versions(&self, backup_path: &str) -> anyhow::Result<Vec<u32>>;
}

/// A [Probe] for targets that can't be inspected.
#[derive(Clone, Copy, Debug, Default)]
pub struct Offline;

impl Probe for Offline {
    fn checksum(&self, _path: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    fn read(&self, _path: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    fn versions(&self, _backup_path: &str) -> anyhow::Result<Vec<u32>> {
        Ok(vec![])
    }
}

/// An in-memory file system that answers [Probe] questions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    pub fn write(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Performs `update` the way the generated script would, installing `content`.
    pub fn apply(&mut self, update: &Update, content: &str) {
        if let (Some(backup), Some(current)) = (&update.backup, self.files.get(&update.path)) {
            let current = current.clone();
            self.files.insert(backup.clone(), current);
            for path in &update.evicted {
                self.files.remove(path);
            }
        }
        self.files.insert(update.path.clone(), content.to_owned());
        let checksum = sha256_hex(content);
        self.files.insert(
            update.checksum_path.clone(),
            format!("{checksum}  {}\n", update.path),
        );
    }
}

impl Probe for Snapshot {
    fn checksum(&self, path: &str) -> anyhow::Result<Option<String>> {
        Ok(self.files.get(path).map(sha256_hex))
    }

    fn read(&self, path: &str) -> anyhow::Result<Option<String>> {
        Ok(self.files.get(path).cloned())
    }

    fn versions(&self, backup_path: &str) -> anyhow::Result<Vec<u32>> {
        let prefix = format!("{backup_path}.~");
        let mut versions: Vec<u32> = self
            .files
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix)?.strip_suffix('~')?.parse().ok())
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }
}

/// Loads the recorded and live checksums of `file` through `probe`.
pub fn probe_checksums(probe: &dyn Probe, file: &ManagedFile) -> Result<(Option<String>, Option<String>)> {
    let recorded = probe
        .read(file.checksum_path())
        .map_err(Error::Probe)?
        .as_deref()
        .and_then(parse_checksum);
    let live = probe.checksum(file.base_path()).map_err(Error::Probe)?;
    Ok((recorded, live))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    fn managed() -> ManagedFile {
        ManagedFile::new("/etc/app.conf", "/var/lib/cairn")
    }

    mod new {
        use super::*;

        #[test]
        fn derives_paths_under_scratch() {
            let file = managed();
            assert_eq!("/etc/app.conf", file.base_path());
            assert_eq!("/var/lib/cairn/etc/app.conf.new", file.staged_path());
            assert_eq!("/var/lib/cairn/etc/app.conf.sha256", file.checksum_path());
            assert_eq!("/var/lib/cairn/etc/app.conf", file.backup_path());
            assert_eq!("/var/lib/cairn/etc/app.conf.~3~", file.version_path(3));
            assert_eq!("/var/lib/cairn/etc", file.scratch_parent());
        }

        #[test]
        fn tolerates_trailing_slash() {
            let file = ManagedFile::new("/etc/app.conf", "/var/lib/cairn/");
            assert_eq!("/var/lib/cairn/etc/app.conf.new", file.staged_path());
        }
    }

    mod check_conflict {
        use super::*;

        #[test]
        fn fails_when_live_content_drifted() {
            let error = managed()
                .check_conflict(Some("aaa"), Some("bbb"), false)
                .unwrap_err();
            assert_eq!(ErrorClass::ContentConflict, error.class());
            assert!(error.to_string().contains("/etc/app.conf"));
        }

        #[test]
        fn overwrite_allows_drift() {
            assert!(managed()
                .check_conflict(Some("aaa"), Some("bbb"), true)
                .is_ok());
        }

        #[test]
        fn unmanaged_files_never_conflict() {
            assert!(managed().check_conflict(None, Some("bbb"), false).is_ok());
            assert!(managed().check_conflict(Some("aaa"), None, false).is_ok());
        }
    }

    mod plan_update {
        use super::*;

        #[test]
        fn first_update_backs_up_to_version_one() {
            let update = managed().plan_update("abc");
            assert_eq!(
                Some("/var/lib/cairn/etc/app.conf.~1~".to_owned()),
                update.backup
            );
            assert!(update.evicted.is_empty());
            assert_eq!(vec![1], update.retained);
        }

        #[test]
        fn evicts_oldest_beyond_max() {
            let update = managed()
                .with_max_versions(2)
                .with_versions(vec![4, 3])
                .plan_update("abc");
            assert_eq!(
                Some("/var/lib/cairn/etc/app.conf.~5~".to_owned()),
                update.backup
            );
            assert_eq!(vec!["/var/lib/cairn/etc/app.conf.~3~"], update.evicted);
            assert_eq!(vec![4, 5], update.retained);
        }

        #[test]
        fn no_versioning_skips_backups() {
            let update = managed()
                .with_versioning(false)
                .with_versions(vec![1])
                .plan_update("abc");
            assert_eq!(None, update.backup);
            assert!(update.evicted.is_empty());
        }

        #[test]
        fn keeps_exactly_max_versions_after_many_changes() {
            const MAX: usize = 3;
            let path = "/etc/app.conf";
            let mut snapshot = Snapshot::new().with_file(path, "v0");

            for i in 1..=MAX + 1 {
                let file = managed()
                    .with_max_versions(MAX)
                    .with_versions(snapshot.versions(file_backup()).unwrap());
                let content = format!("v{i}");
                let update = file.plan_update(sha256_hex(&content));
                snapshot.apply(&update, &content);
            }

            assert_eq!(vec![2, 3, 4], snapshot.versions(file_backup()).unwrap());
            // Version 1 held the original content and was evicted first.
            assert_eq!(None, snapshot.get("/var/lib/cairn/etc/app.conf.~1~"));
            assert_eq!(Some("v1"), snapshot.get("/var/lib/cairn/etc/app.conf.~2~"));
            assert_eq!(Some("v4"), snapshot.get(path));
        }

        #[test]
        fn missing_files_evict_nothing() {
            let backup = "/var/lib/cairn/etc/app.conf.~1~";
            let mut snapshot = Snapshot::new().with_file(backup, "v0");
            let update = managed()
                .with_max_versions(1)
                .with_versions(snapshot.versions(file_backup()).unwrap())
                .plan_update(sha256_hex("v1"));
            assert_eq!(vec![backup], update.evicted);

            snapshot.apply(&update, "v1");
            assert_eq!(Some("v0"), snapshot.get(backup));
            assert_eq!(Some("v1"), snapshot.get("/etc/app.conf"));
        }

        fn file_backup() -> &'static str {
            "/var/lib/cairn/etc/app.conf"
        }
    }

    mod probe_checksums {
        use super::*;

        #[test]
        fn reads_recorded_and_live_digests() {
            let digest = sha256_hex("old");
            let snapshot = Snapshot::new()
                .with_file("/etc/app.conf", "edited")
                .with_file(
                    "/var/lib/cairn/etc/app.conf.sha256",
                    format!("{digest}  /etc/app.conf\n"),
                );
            let (recorded, live) = probe_checksums(&snapshot, &managed()).unwrap();
            assert_eq!(Some(digest), recorded);
            assert_eq!(Some(sha256_hex("edited")), live);
        }

        #[test]
        fn offline_knows_nothing() {
            assert_eq!((None, None), probe_checksums(&Offline, &managed()).unwrap());
        }
    }

    #[test]
    fn parse_checksum_rejects_garbage() {
        assert_eq!(None, parse_checksum("not a digest"));
        assert_eq!(None, parse_checksum(""));
    }
}
