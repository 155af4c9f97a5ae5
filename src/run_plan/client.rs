//! Provides an interface to run [Step]s on a node over SSH.
//!
//! [Step]: crate::core::script::Step

use crate::config::Config;
use crate::core::managed::{parse_checksum, Probe};
use crate::core::script::{quote, Fragment, Segment};
use anyhow::bail;
use async_trait::async_trait;
use openssh::{KnownHosts, Session};
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task;

/// Connects to nodes and returns values representing those connections.
#[async_trait]
pub trait ManageClient<CI: ClientInterface> {
    /// Connect to `host` and, on success, return an interface to the host.
    async fn connect(&mut self, host: &str) -> anyhow::Result<CI>;
}

/// The interface Cairn uses to run steps against a node. Maps directly to
/// [Step](crate::core::script::Step).
#[async_trait]
pub trait ClientInterface {
    /// Runs a rendered segment on the node, through `sudo` when the segment is privileged.
    async fn run_script(&mut self, segment: &Segment) -> anyhow::Result<Output>;

    /// Copies a controller-side file to `to` on the node as the login user.
    async fn upload(&mut self, from: &Path, to: &str) -> anyhow::Result<Output>;

    /// Runs a fragment on the controller.
    async fn run_local(&mut self, fragment: &Fragment) -> anyhow::Result<Output>;

    /// Returns a [Probe] that answers questions about files on the node.
    fn probe(&self) -> Box<dyn Probe + Send>;
}

/// Production implementation of [ManageClient].
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    config: Arc<Config>,
}

impl ConnectionManager {
    pub fn new(config: Arc<Config>) -> Self {
        ConnectionManager { config }
    }
}

#[async_trait]
impl ManageClient<Client> for ConnectionManager {
    async fn connect(&mut self, host: &str) -> anyhow::Result<Client> {
        let endpoint = self.config.endpoint_for(host);
        let destination = format!("ssh://{}:{}", endpoint.destination(), endpoint.ssh_port);
        Ok(Client {
            session: Arc::new(Session::connect_mux(&destination, KnownHosts::Add).await?),
            destination: endpoint.destination(),
            ssh_port: endpoint.ssh_port,
        })
    }
}

/// Production implementation of [ClientInterface].
pub struct Client {
    session: Arc<Session>,

    /// `[login@]address`, for `scp`.
    destination: String,

    ssh_port: u16,
}

#[async_trait]
impl ClientInterface for Client {
    async fn run_script(&mut self, segment: &Segment) -> anyhow::Result<Output> {
        let argv = segment.command();
        let mut command = self.session.command(argv[0].as_str());
        command.args(&argv[1..]).arg(segment.render());
        Ok(command.output().await?)
    }

    async fn upload(&mut self, from: &Path, to: &str) -> anyhow::Result<Output> {
        let to = format!("{}:{to}", self.destination);
        let port = self.ssh_port.to_string();
        Ok(task::block_in_place(move || {
            Command::new("scp")
                .args(["-q", "-P", port.as_str()])
                .arg(from)
                .arg(&to)
                .output()
        })?)
    }

    async fn run_local(&mut self, fragment: &Fragment) -> anyhow::Result<Output> {
        let script = fragment.render();
        Ok(task::block_in_place(move || {
            Command::new("sh").arg("-c").arg(&script).output()
        })?)
    }

    fn probe(&self) -> Box<dyn Probe + Send> {
        Box::new(RemoteProbe {
            session: self.session.clone(),
            handle: Handle::current(),
        })
    }
}

/// A [Probe] that asks the node over an existing SSH session.
///
/// Probes are called from compilation, which is synchronous, so each question blocks on the
/// runtime. Use it only off the async worker threads.
pub struct RemoteProbe {
    session: Arc<Session>,
    handle: Handle,
}

impl RemoteProbe {
    /// Runs `script` privileged and returns its stdout.
    fn run(&self, script: String) -> anyhow::Result<String> {
        let output = self.handle.block_on(async {
            self.session
                .command("sudo")
                .args(["-n", "sh", "-c"])
                .arg(&script)
                .output()
                .await
        })?;
        if !output.status.success() {
            bail!(
                "probe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Probe for RemoteProbe {
    fn checksum(&self, path: &str) -> anyhow::Result<Option<String>> {
        let path = quote(path);
        let stdout = self.run(format!("if [ -f {path} ]; then sha256sum {path}; fi"))?;
        Ok(parse_checksum(&stdout))
    }

    fn read(&self, path: &str) -> anyhow::Result<Option<String>> {
        let path = quote(path);
        let stdout = self.run(format!("if [ -f {path} ]; then printf +; cat {path}; fi"))?;
        Ok(stdout.strip_prefix('+').map(str::to_owned))
    }

    fn versions(&self, backup_path: &str) -> anyhow::Result<Vec<u32>> {
        let stdout = self.run(format!(
            "for f in {}.~*~; do [ -e \"$f\" ] && printf '%s\\n' \"$f\"; done; true",
            quote(backup_path)
        ))?;
        Ok(parse_versions(backup_path, &stdout))
    }
}

/// Extracts backup version numbers from a listing of `BACKUP.~N~` paths, in ascending order.
pub(super) fn parse_versions(backup_path: &str, listing: &str) -> Vec<u32> {
    let prefix = format!("{backup_path}.~");
    let mut versions: Vec<u32> = listing
        .lines()
        .filter_map(|line| line.strip_prefix(&prefix)?.strip_suffix('~')?.parse().ok())
        .collect();
    versions.sort_unstable();
    versions
}
