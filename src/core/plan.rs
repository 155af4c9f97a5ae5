//! Types for representing an ordered list of manifests to run.

use crate::config::Config;
use crate::core::action::{Action, HostAction};
use crate::core::managed::{Offline, Probe};
use crate::core::manifest::{self, Manifest};
use crate::core::script::HostScript;
use crate::core::session::Session;
use crate::core::strategy;
use crate::core::task::Task;
use crate::Result;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// A plan of action for executing a given list of manifests.
///
/// This struct constitutes the public interface that executors use to interact with
/// [Manifest]s, [Task]s, and [Action]s on the controller.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Plan {
    /// The official, ordered list of manifests that comprise the plan.
    ///
    /// Everything else can be computed from these manifests.
    pub manifests: Vec<Manifest>,
}

impl Plan {
    /// Creates an empty [Plan], i.e. one with no [Manifest]s.
    pub fn new() -> Self {
        Plan {
            manifests: Vec::new(),
        }
    }

    /// This function is meant as the easy, default entry point for executors.
    ///
    /// It calls [manifest::load_manifests] for each file and keeps the manifests in order.
    pub fn from_manifest_files(files: &[impl AsRef<Path>]) -> anyhow::Result<Self> {
        let mut manifests = vec![];
        for file in files {
            manifests.extend(manifest::load_manifests(file)?);
        }
        Ok(Plan { manifests })
    }

    /// Returns a list of hosts involved in this `Plan` in alphabetical order.
    pub fn hosts(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self
            .manifests
            .iter()
            .flat_map(|manifest| &manifest.hosts)
            .collect();
        set.into_iter().cloned().collect()
    }

    /// Returns an execution plan for the specified host.
    ///
    /// Returns [None] if `host` was not in the plan's list of hosts.
    pub fn plan_for(&self, host: &str) -> Option<HostPlan> {
        // Borrow the host name from the plan itself so the HostPlan only refers to the plan.
        let host = self
            .manifests
            .iter()
            .flat_map(|manifest| &manifest.hosts)
            .find(|hst| *hst == host)?;
        Some(HostPlan { host, plan: self })
    }

    /// Compiles every host in the plan on its own thread, without probing any target.
    ///
    /// Results are returned in the order of [Self::hosts].
    pub fn compile_all(&self, config: &Config) -> Vec<(String, Result<HostScript>)> {
        let hosts = self.hosts();
        let compiled = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = hosts
                .iter()
                .filter_map(|host| self.plan_for(host))
                .map(|host_plan| {
                    scope.spawn(move |_| {
                        let result = host_plan.compile(config, Box::new(Offline));
                        (host_plan.host().to_owned(), result)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect::<Vec<_>>()
        });
        compiled.unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    }
}

/// A [Plan] in the context of a single host on which it will run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HostPlan<'p> {
    /// The host on which this plan will run.
    host: &'p str,

    /// The [Plan] to run on the host.
    plan: &'p Plan,
}

impl<'p> HostPlan<'p> {
    pub fn host(&self) -> &'p str {
        self.host
    }

    /// Returns every task that runs on this host, with the manifest that included it, in order.
    pub fn tasks(&self) -> impl Iterator<Item = (&'p Manifest, &'p Task)> + 'p {
        let host = self.host;
        self.plan
            .manifests
            .iter()
            .filter(move |manifest| manifest.runs_on(host))
            .flat_map(|manifest| manifest.include.iter().map(move |task| (manifest, task)))
    }

    /// Returns an iterator over the declared [Action]s on this host.
    ///
    /// Actions that come from installing components are not included; see [Self::compile].
    pub fn iter(&self) -> impl Iterator<Item = HostAction> + 'p {
        let host = self.host;
        self.plan
            .manifests
            .iter()
            .filter_map(move |manifest| manifest.actions_for(host))
            .flatten()
    }

    /// Compiles this host's tasks into a [HostScript].
    ///
    /// Each task's components are resolved first, against the host's facts and the settings of
    /// the manifest that included the task; their actions run before the task's own actions.
    /// Variables are substituted into every action, and every action is validated, before
    /// anything is compiled. Each task then compiles in a scope carrying its `user` and
    /// `privileged` settings.
    pub fn compile(&self, config: &Config, probe: Box<dyn Probe + Send>) -> Result<HostScript> {
        let context = config.context_for(self.host);
        let facts = context.facts;

        let mut tasks = vec![];
        for (manifest, task) in self.tasks() {
            let mut actions: Vec<Action> = vec![];
            for component in &task.install {
                actions.extend(strategy::resolve_component(
                    &manifest.settings,
                    component,
                    &facts,
                )?);
            }
            actions.extend(task.actions.iter().cloned());

            let actions: Vec<Action> = actions
                .iter()
                .map(|action| HostAction::new(self.host, manifest, task, action).compile())
                .collect();
            for action in &actions {
                action.validate()?;
            }
            tasks.push((task, actions));
        }

        info!(host = self.host, tasks = tasks.len(), "compiling host");
        let mut session = Session::new(context)
            .with_boxed_probe(probe)
            .with_endpoint(config.endpoint_for(self.host));
        for (task, actions) in &tasks {
            debug!(host = self.host, task = task.name.as_str(), "compiling task");
            session.with_scope(&task.overrides(), |session| {
                actions.iter().try_for_each(|action| session.run(action))
            })?;
        }
        Ok(session.finish(self.host))
    }
}
