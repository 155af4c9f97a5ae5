use super::*;
use crate::core::fixtures::plan;
use crate::core::managed::{Offline, Probe};
use crate::core::script::{Fragment, Segment};
use crate::core::{Action, Task};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::sync::{Mutex, MutexGuard};

pub mod fixtures {
    use super::*;

    pub mod fixture {
        use super::*;

        pub struct Fixture {
            pub host: String,
            pub plan: Plan,
            pub config: Config,
            pub client_factory: Arc<Mutex<TestClientFactory>>,
            pub reporter: Arc<TestReporter>,
        }

        impl Fixture {
            pub fn new() -> Self {
                let (plan, mut manifest, _, _) = plan();
                let host = manifest.hosts.pop().unwrap();

                Fixture {
                    host,
                    plan,
                    config: Config::default(),
                    client_factory: TestClientFactory::new(),
                    reporter: TestReporter::new(),
                }
            }

            // Returns a locked and modifiable TestClientFactory.
            pub fn client_factory(&self) -> MutexGuard<'_, TestClientFactory> {
                self.client_factory.lock().unwrap()
            }

            // Replaces the actions of the fixture's only task.
            pub fn actions(&mut self, actions: Vec<Action>) {
                self.plan.manifests[0].include[0].actions = actions;
            }

            // Calls run_host_plan, passing in Fixture's fields.
            pub async fn run_host_plan(&self) -> anyhow::Result<()> {
                run_host_plan(
                    self.host.clone(),
                    Arc::new(self.plan.clone()),
                    Arc::new(self.config.clone()),
                    self.client_factory.clone(),
                    self.reporter.clone(),
                )
                .await
            }

            // Calls _run_plan, passing in Fixture's fields.
            pub async fn run_plan(&self) -> Result<(), Vec<(String, anyhow::Error)>> {
                _run_plan(
                    Arc::new(self.plan.clone()),
                    Arc::new(self.config.clone()),
                    self.client_factory.clone(),
                    self.reporter.clone(),
                )
                .await
            }

            // Returns the record of client calls for the fixture's host.
            pub fn recorded(&self) -> Vec<CommandRecord> {
                self.client_factory()
                    .client_commands()
                    .get(&self.host)
                    .map(|records| records.lock().unwrap().clone())
                    .unwrap_or_default()
            }

            // Returns the names of the client methods called for the fixture's host, in order.
            pub fn methods(&self) -> Vec<&'static str> {
                self.recorded().iter().map(|r| r.method_name).collect()
            }
        }
    }
    pub use fixture::*;

    pub mod client {
        use super::*;

        // A factory that tests can pass into _run_plan. Spawns TestClient values when asked to
        // connect, but keeps references to their records so tests can examine them later.
        #[derive(Debug, Default)]
        pub struct TestClientFactory {
            // A record of all ClientInterface methods invoked on all clients.
            client_commands: ClientCommands,

            // Clients that the connect method should not be able to reach.
            unreachable_clients: HashSet<String>,

            // Clients whose ClientInterface methods should return errors.
            failing_clients: HashSet<String>,

            // Maps host_name -> exit_code, to simulate failed steps.
            custom_exit_codes: HashMap<String, i32>,
        }

        impl TestClientFactory {
            pub fn new() -> Arc<Mutex<Self>> {
                Arc::new(Mutex::new(Self::default()))
            }

            pub fn set_unreachable(&mut self, host: impl Into<String>) {
                self.unreachable_clients.insert(host.into());
            }

            pub fn fail_client_command(&mut self, host: impl Into<String>) {
                self.failing_clients.insert(host.into());
            }

            pub fn exit_code(&mut self, host: impl Into<String>, code: i32) {
                self.custom_exit_codes.insert(host.into(), code);
            }

            pub fn client_commands(&self) -> &ClientCommands {
                &self.client_commands
            }
        }

        #[async_trait]
        impl ManageClient<TestClient> for Arc<Mutex<TestClientFactory>> {
            async fn connect(&mut self, host: &str) -> anyhow::Result<TestClient> {
                let mut factory = self.lock().unwrap();
                if factory.unreachable_clients.contains(host) {
                    bail!("unreachable");
                }

                let records = factory
                    .client_commands
                    .entry(host.to_owned())
                    .or_default()
                    .clone();

                Ok(TestClient {
                    records,
                    should_fail: factory.failing_clients.contains(host),
                    custom_exit_code: factory.custom_exit_codes.get(host).copied(),
                })
            }
        }

        // Maps host_name -> SharedRecords.
        type ClientCommands = HashMap<String, SharedRecords>;

        // The record of ClientInterface method calls for a single TestClient.
        type SharedRecords = Arc<Mutex<Vec<CommandRecord>>>;

        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct CommandRecord {
            pub method_name: &'static str,

            // The rendered script, or the upload destination.
            pub payload: String,
        }

        #[derive(Clone, Debug)]
        pub struct TestClient {
            records: SharedRecords,
            should_fail: bool,
            custom_exit_code: Option<i32>,
        }

        #[async_trait]
        impl ClientInterface for TestClient {
            async fn run_script(&mut self, segment: &Segment) -> anyhow::Result<Output> {
                self.record("run_script", segment.render())
            }

            async fn upload(&mut self, _from: &Path, to: &str) -> anyhow::Result<Output> {
                self.record("upload", to)
            }

            async fn run_local(&mut self, fragment: &Fragment) -> anyhow::Result<Output> {
                self.record("run_local", fragment.render())
            }

            fn probe(&self) -> Box<dyn Probe + Send> {
                Box::new(Offline)
            }
        }

        impl TestClient {
            // Records a call to a ClientInterface method.
            fn record(
                &mut self,
                method_name: &'static str,
                payload: impl Into<String>,
            ) -> anyhow::Result<Output> {
                self.records.lock().unwrap().push(CommandRecord {
                    method_name,
                    payload: payload.into(),
                });

                if self.should_fail {
                    bail!("expected");
                }
                let exit_code = self.custom_exit_code.unwrap_or(0);
                Ok(Output {
                    status: ExitStatus::from_raw(exit_code << 8),
                    stdout: vec![],
                    stderr: vec![],
                })
            }
        }
    }
    pub use client::*;

    pub mod report {
        use super::*;
        use crate::run_plan::report::{_report, _starting};

        // A Report implementation that writes to shared Vecs. _run_plan clones its reporter for
        // each host, so clones share the same buffers.
        #[derive(Debug, Default)]
        pub struct TestReporter {
            stdout: Mutex<Vec<u8>>,
            stderr: Mutex<Vec<u8>>,

            // Whether Report::report should return an error.
            should_fail: Mutex<bool>,
        }

        impl TestReporter {
            pub fn new() -> Arc<Self> {
                Arc::new(Self::default())
            }

            pub fn stdout(&self) -> String {
                String::from_utf8_lossy(&self.stdout.lock().unwrap()).into_owned()
            }

            // Instructs this TestReporter to fail every report.
            pub fn fail(&self) {
                *self.should_fail.lock().unwrap() = true;
            }
        }

        #[async_trait]
        impl Report for Arc<TestReporter> {
            async fn starting(&mut self, host: &str, step: &Step) -> io::Result<()> {
                _starting(self.stdout.lock().unwrap(), host, step)
            }

            async fn report(&mut self, host: &str, step: &Step, output: &Output) -> io::Result<()> {
                let result = _report(
                    self.stdout.lock().unwrap(),
                    self.stderr.lock().unwrap(),
                    host,
                    step,
                    output,
                );

                if *self.should_fail.lock().unwrap() {
                    Err(io::Error::other("expected"))
                } else {
                    result
                }
            }
        }
    }
    pub use report::*;
}
use fixtures::*;

mod _run_plan {
    use super::*;

    #[tokio::test]
    async fn runs_plan_for_all_hosts() {
        let mut fixture = Fixture::new();
        fixture.plan.manifests[0].hosts = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        fixture.run_plan().await.unwrap();

        let locked = fixture.client_factory();
        assert_eq!(3, locked.client_commands().len());
        for host in ["a", "b", "c"] {
            assert_eq!(1, locked.client_commands()[host].lock().unwrap().len());
        }
    }

    #[tokio::test]
    async fn returns_all_errors() {
        let mut fixture = Fixture::new();
        fixture.plan.manifests[0].hosts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        {
            let mut locked = fixture.client_factory();
            locked.fail_client_command("b");
            locked.set_unreachable("c");
        }

        let errors = fixture.run_plan().await.unwrap_err();
        let hosts: Vec<_> = errors.iter().map(|(host, _)| host.as_str()).collect();
        assert_eq!(vec!["b", "c"], hosts);
    }

    #[tokio::test]
    async fn returns_ok() {
        assert!(Fixture::new().run_plan().await.is_ok());
    }
}

mod run_host_plan {
    use super::*;

    #[tokio::test]
    async fn connects_to_host() {
        let fixture = Fixture::new();
        fixture.run_host_plan().await.unwrap();
        assert_eq!(1, fixture.client_factory().client_commands().len());
    }

    #[tokio::test]
    async fn returns_error_if_fails_to_connect() {
        let fixture = Fixture::new();
        fixture.client_factory().set_unreachable(&fixture.host);
        assert!(fixture.run_host_plan().await.is_err());
        assert!(fixture.recorded().is_empty());
    }

    #[tokio::test]
    async fn runs_the_compiled_script() {
        let fixture = Fixture::new();
        fixture.run_host_plan().await.unwrap();

        let recorded = fixture.recorded();
        assert_eq!(1, recorded.len());
        assert_eq!("run_script", recorded[0].method_name);
        assert!(recorded[0].payload.contains("mkdir /srv/www"));
        assert!(recorded[0].payload.contains("chown www-data /srv/www"));
    }

    #[tokio::test]
    async fn runs_each_step_in_order() {
        let mut fixture = Fixture::new();
        fixture.actions(vec![
            Action::directory("/srv/www"),
            Action::remote_file("/etc/app.conf").with("local-file", "files/app.conf"),
            Action::new(crate::core::action::Kind::Rsync, "/srv/site").with("from", "site/"),
        ]);

        fixture.run_host_plan().await.unwrap();

        assert_eq!(
            vec![
                "run_script",
                "run_script",
                "upload",
                "run_script",
                "run_local",
            ],
            fixture.methods()
        );
        assert_eq!("/tmp/cairn-upload/etc_app.conf", fixture.recorded()[2].payload);
    }

    #[tokio::test]
    async fn unprivileged_tasks_get_their_own_script() {
        let mut fixture = Fixture::new();
        let task = Task {
            name: "as login user".into(),
            privileged: false,
            actions: vec![Action::directory("/home/deploy/app")],
            ..Task::default()
        };
        fixture.plan.manifests[0].include.push(task);

        fixture.run_host_plan().await.unwrap();

        let recorded = fixture.recorded();
        assert_eq!(2, recorded.len());
        assert!(recorded[1].payload.contains("mkdir /home/deploy/app"));
    }

    #[tokio::test]
    async fn compile_errors_stop_before_running_anything() {
        let mut fixture = Fixture::new();
        fixture.actions(vec![Action::directory("/srv").with("colour", "blue")]);

        let error = fixture.run_host_plan().await.unwrap_err();
        assert!(error.to_string().contains("colour"), "{error}");
        assert!(fixture.recorded().is_empty());
    }

    #[tokio::test]
    async fn stops_at_the_first_failing_step() {
        let mut fixture = Fixture::new();
        fixture.actions(vec![
            Action::remote_file("/etc/app.conf").with("local-file", "files/app.conf"),
        ]);
        fixture.client_factory().exit_code(&fixture.host, 1);

        let error = fixture.run_host_plan().await.unwrap_err();
        assert!(error.to_string().starts_with("step failed: "), "{error}");
        assert_eq!(vec!["run_script"], fixture.methods());
    }

    #[tokio::test]
    async fn returns_error_if_the_client_fails() {
        let fixture = Fixture::new();
        fixture.client_factory().fail_client_command(&fixture.host);
        assert!(fixture.run_host_plan().await.is_err());
        assert_eq!(1, fixture.recorded().len());
    }

    #[tokio::test]
    async fn reports_each_step() {
        let fixture = Fixture::new();
        fixture.run_host_plan().await.unwrap();
        assert_eq!(
            "[web1] Starting  script (sudo root): Directory /srv/www\n\
            [web1] Completed script (sudo root): Directory /srv/www\n",
            fixture.reporter.stdout()
        );
    }

    #[tokio::test]
    async fn returns_error_if_reporting_fails() {
        let fixture = Fixture::new();
        fixture.reporter.fail();
        assert!(fixture.run_host_plan().await.is_err());
    }
}
