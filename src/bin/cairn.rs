use anyhow::{bail, Context, Result};
use cairn::config::{config_dir, Config, CONFIG_FILE};
use cairn::core::Plan;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cairn")]
#[command(version)]
#[command(about = "Compiles declarative manifests into checked shell scripts and runs them", long_about = None)]
struct Cli {
    /// Configuration file. Defaults to config.yaml in /etc/cairn.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the script each host would run, without connecting to any host
    Compile {
        /// Manifest files, in order
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },

    /// Compile and run the manifests on every host they name
    Run {
        /// Manifest files, in order
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    // RUST_LOG overrides the default, e.g. RUST_LOG=cairn=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| config_dir().join(CONFIG_FILE));
    let config = Config::load_from(&config_path)?;

    match cli.command {
        Commands::Compile { manifests } => compile(&manifests, &config),
        Commands::Run { manifests } => run(&manifests, config),
    }
}

fn compile(manifests: &[PathBuf], config: &Config) -> Result<()> {
    let plan = Plan::from_manifest_files(manifests)?;

    let mut failed = 0;
    for (host, result) in plan.compile_all(config) {
        match result {
            Ok(script) => print!("{}", script.render()),
            Err(error) => {
                eprintln!("[{host}] {error}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} host(s) failed to compile");
    }
    Ok(())
}

#[cfg(feature = "openssh")]
fn run(manifests: &[PathBuf], config: Config) -> Result<()> {
    let plan = Plan::from_manifest_files(manifests)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    if let Err(errors) = runtime.block_on(cairn::run_plan(plan, config)) {
        for (host, error) in &errors {
            eprintln!("[{host}] {error:#}");
        }
        bail!("{} host(s) failed", errors.len());
    }
    Ok(())
}

#[cfg(not(feature = "openssh"))]
fn run(_manifests: &[PathBuf], _config: Config) -> Result<()> {
    bail!("cairn was built without SSH support; rebuild with the `openssh` feature")
}
