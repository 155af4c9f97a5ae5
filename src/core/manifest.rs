//! Types for representing manifest files.

use crate::core::action::HostAction;
#[cfg(doc)]
use crate::core::plan::Plan;
use crate::core::strategy::Settings;
use crate::core::task::{self, Task};
use anyhow::Context as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Represents a manifest; typically used in the context of a [Plan].
///
/// This type is typically built from a [ManifestFile] by [load_manifests], but it can be
/// constructed programmatically as well.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Manifest {
    /// The file this manifest was loaded from, if any.
    pub source: Option<PathBuf>,

    /// The [Manifest]'s name. Used for informational, logging, and debugging purposes.
    pub name: String,

    /// The list of hosts on which this manifest will run.
    pub hosts: Vec<String>,

    /// [Task]s (typically loaded from task files) that comprise this manifest.
    ///
    /// Order is preserved from the source file. Tasks are compiled in order.
    pub include: Vec<Task>,

    /// [Manifest]-level variables. [Task::vars] take precedence over these.
    pub vars: IndexMap<String, String>,

    /// Installation settings for the components that [Task::install] refers to, by name.
    pub settings: IndexMap<String, Settings>,
}

/// The on-disk form of a [Manifest]: tasks are referenced by path instead of inlined.
///
/// Relative task paths are resolved against the directory containing the manifest file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ManifestFile {
    pub name: String,

    pub hosts: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub include: Vec<PathBuf>,

    #[serde(skip_serializing_if = "IndexMap::is_empty", default)]
    pub vars: IndexMap<String, String>,

    #[serde(skip_serializing_if = "IndexMap::is_empty", default)]
    pub settings: IndexMap<String, Settings>,
}

/// Loads every [Manifest] in a manifest file, along with the task files each one includes.
///
/// A manifest file may hold several YAML documents, each of which is one manifest.
pub fn load_manifests(path: impl AsRef<Path>) -> anyhow::Result<Vec<Manifest>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest file {}", path.display()))?;
    let base = path.parent().unwrap_or(Path::new("."));

    let mut manifests = vec![];
    for document in serde_yaml::Deserializer::from_str(&text) {
        let file = ManifestFile::deserialize(document)
            .with_context(|| format!("failed to parse manifest file {}", path.display()))?;

        let mut include = vec![];
        for task_file in &file.include {
            include.extend(task::load_tasks(base.join(task_file))?);
        }

        manifests.push(Manifest {
            source: Some(path.to_owned()),
            name: file.name,
            hosts: file.hosts,
            include,
            vars: file.vars,
            settings: file.settings,
        });
    }
    Ok(manifests)
}

impl Manifest {
    pub fn runs_on(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == host)
    }

    /// Returns the declared actions of every task in this manifest, in the context of `host`, or
    /// [None] if this manifest doesn't run on `host`.
    ///
    /// Components listed under [Task::install] are not included; they are resolved against the
    /// target's facts when a [HostPlan](crate::core::plan::HostPlan) compiles.
    pub fn actions_for<'m>(
        &'m self,
        host: &'m str,
    ) -> Option<impl Iterator<Item = HostAction> + 'm> {
        if !self.runs_on(host) {
            return None;
        }
        Some(self.include.iter().flat_map(move |task| {
            task.actions
                .iter()
                .map(move |action| HostAction::new(host, self, task, action))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::plan;
    use super::*;
    use crate::core::Action;

    fn resource(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("resources/test/load_manifests")
            .join(name)
    }

    mod load_manifests {
        use super::*;

        #[test]
        fn loads_documents_and_tasks() {
            let manifests = load_manifests(resource("manifest1.yaml")).unwrap();
            assert_eq!(2, manifests.len());

            let web = &manifests[0];
            assert_eq!("web servers", web.name);
            assert_eq!(vec!["web1".to_owned(), "web2".to_owned()], web.hosts);
            assert_eq!(Some(resource("manifest1.yaml")), web.source);
            assert_eq!(Some(&"/srv/www".to_owned()), web.vars.get("root"));
            assert!(web.settings.contains_key("nginx"));

            assert_eq!(2, web.include.len());
            assert_eq!("install nginx", web.include[0].name);
            assert_eq!(vec!["nginx".to_owned()], web.include[0].install);
            assert_eq!(Some(resource("nginx.yaml")), web.include[0].source);
            assert_eq!(
                vec![Action::directory("$root").with("owner", "www-data")],
                web.include[1].actions
            );

            let db = &manifests[1];
            assert_eq!("databases", db.name);
            assert_eq!("postgres", db.include[0].user);
        }

        #[test]
        fn reports_missing_task_files() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("manifest.yaml");
            fs::write(&path, "name: broken\nhosts: [web1]\ninclude: [missing.yaml]\n").unwrap();

            let message = format!("{:#}", load_manifests(&path).unwrap_err());
            assert!(message.contains("missing.yaml"), "{message}");
        }

        #[test]
        fn reports_malformed_manifests() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("manifest.yaml");
            fs::write(&path, "hosts: web1\n").unwrap();

            let message = format!("{:#}", load_manifests(&path).unwrap_err());
            assert!(message.contains("failed to parse manifest file"), "{message}");
        }
    }

    mod actions_for {
        use super::*;

        #[test]
        fn yields_actions_in_order() {
            let (_, mut manifest, mut task, action) = plan();
            let second = Action::file("/srv/www/index.html");
            task.actions.push(second.clone());
            manifest.include = vec![task.clone(), task];

            let actions: Vec<_> = manifest
                .actions_for("web1")
                .unwrap()
                .map(|ha| ha.action().clone())
                .collect();
            assert_eq!(vec![action.clone(), second.clone(), action, second], actions);
        }

        #[test]
        fn skips_other_hosts() {
            let (_, manifest, _, _) = plan();
            assert!(manifest.actions_for("db1").is_none());
        }
    }
}
