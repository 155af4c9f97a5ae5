//! Compiles a [Plan] for every host and runs the resulting steps over SSH.

mod client;
mod report;

pub use client::{Client, ClientInterface, ConnectionManager, ManageClient, RemoteProbe};
pub use report::{Report, Reporter};

use crate::config::Config;
use crate::core::script::Step;
use crate::core::Plan;
use anyhow::{anyhow, bail};
use std::sync::Arc;
use tokio::task;
use tracing::{info, warn};

/// Runs `plan` on every host it names, one task per host.
///
/// A host stops at its first failing step. Every host's failure is returned, paired with the host
/// name.
pub async fn run_plan(plan: Plan, config: Config) -> Result<(), Vec<(String, anyhow::Error)>> {
    let config = Arc::new(config);
    let manager = ConnectionManager::new(config.clone());
    _run_plan(Arc::new(plan), config, manager, Reporter).await
}

/// The testable body of [run_plan].
async fn _run_plan<M, C, R>(
    plan: Arc<Plan>,
    config: Arc<Config>,
    manager: M,
    reporter: R,
) -> Result<(), Vec<(String, anyhow::Error)>>
where
    M: ManageClient<C> + Clone + Send + 'static,
    C: ClientInterface + Send + 'static,
    R: Report + Clone + Send + 'static,
{
    let mut handles = vec![];
    for host in plan.hosts() {
        let future = run_host_plan(
            host.clone(),
            plan.clone(),
            config.clone(),
            manager.clone(),
            reporter.clone(),
        );
        handles.push((host, tokio::spawn(future)));
    }

    let mut errors = vec![];
    for (host, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(join_error) => Err(join_error.into()),
        };
        if let Err(error) = result {
            warn!(host = host.as_str(), "{error:#}");
            errors.push((host, error));
        }
    }

    match errors.len() {
        0 => Ok(()),
        _ => Err(errors),
    }
}

/// Connects to `host`, compiles its plan against what the connection can see, and runs each step.
async fn run_host_plan<M, C, R>(
    host: String,
    plan: Arc<Plan>,
    config: Arc<Config>,
    mut manager: M,
    mut reporter: R,
) -> anyhow::Result<()>
where
    M: ManageClient<C>,
    C: ClientInterface + Send,
    R: Report,
{
    let mut client = manager.connect(&host).await?;
    let probe = client.probe();

    // Probing blocks on the runtime, so compilation can't happen on an async worker.
    let script = {
        let host = host.clone();
        task::spawn_blocking(move || {
            let host_plan = plan
                .plan_for(&host)
                .ok_or_else(|| anyhow!("no manifest runs on {host}"))?;
            Ok::<_, anyhow::Error>(host_plan.compile(&config, probe)?)
        })
        .await??
    };
    info!(host = host.as_str(), steps = script.steps.len(), "running host script");

    for step in &script.steps {
        reporter.starting(&host, step).await?;
        let output = match step {
            Step::Remote(segment) => client.run_script(segment).await?,
            Step::Upload { from, to } => client.upload(from, to).await?,
            Step::Local(fragment) => client.run_local(fragment).await?,
        };
        reporter.report(&host, step, &output).await?;

        if !output.status.success() {
            bail!("step failed: {}", step.title());
        }
    }
    Ok(())
}

#[cfg(test)]
mod test;
