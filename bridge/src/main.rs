//! CLI entry point for the service-discovery-to-load-balancer bridge.
//!
//! Owns everything `bridge-core` treats as an external collaborator:
//! argument parsing, config-file loading, and signal-driven lifecycle
//! control (rebuild on SIGHUP, orderly shutdown on SIGTERM/Ctrl-C).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use bridge_core::catalog::CatalogClient;
use bridge_core::config::{CliOverrides, Config, ConfigFile};
use bridge_core::supervisor::ExitOutcome;
use bridge_core::HttpCatalogClient;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Watch a service-discovery catalog and render load-balancer config on change.
#[derive(Parser, Debug)]
#[command(name = "lb-bridge")]
#[command(about = "Bridges discovery-catalog membership to load-balancer config")]
struct Args {
    /// Path to a JSON config file.
    #[arg(short = 'f', long = "config")]
    config: Option<PathBuf>,

    /// Catalog HTTP endpoint, host:port.
    #[arg(long)]
    address: Option<String>,

    /// Template file path. May be repeated; positional with --path.
    #[arg(long = "template")]
    templates: Vec<String>,

    /// Output file path. May be repeated; positional with --template.
    #[arg(long = "path")]
    paths: Vec<String>,

    /// Shell command invoked after every refresh.
    #[arg(long)]
    reload_command: Option<String>,

    /// A backend spec (`backend=[tag.]service[@dc][:port]`). May be repeated.
    #[arg(long = "backend")]
    backends: Vec<String>,

    /// Write rendered output to standard output once, then exit.
    #[arg(long = "dry-run", visible_alias = "once")]
    dry_run: bool,

    /// Quiescence window, e.g. "100ms". Disabled by default.
    #[arg(long)]
    quiet: Option<humantime::Duration>,

    /// Hard upper bound on the debounce delay, e.g. "5s". Disabled by default.
    #[arg(long)]
    max_wait: Option<humantime::Duration>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn cli_overrides(&self) -> CliOverrides {
        CliOverrides {
            address: self.address.clone(),
            templates: self.templates.clone(),
            paths: self.paths.clone(),
            reload_command: self.reload_command.clone(),
            backends: self.backends.clone(),
            dry_run: self.dry_run,
            quiet: self.quiet.map(Into::into),
            max_wait: self.max_wait.map(Into::into),
        }
    }

    fn load_config(&self) -> anyhow::Result<Config> {
        let file = match &self.config {
            Some(path) => ConfigFile::from_path(path)?,
            None => ConfigFile::default(),
        };
        Ok(Config::build(file, self.cli_overrides())?)
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "bridge=info,bridge_core=info",
        1 => "bridge=debug,bridge_core=debug",
        _ => "bridge=trace,bridge_core=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Outcome of one watch-run attempt: either it finished on its own, or an
/// external signal asked us to rebuild or shut down.
enum RunSignal {
    Finished(ExitOutcome),
    Reload,
    Shutdown,
}

async fn wait_finish(rx: &mut tokio::sync::oneshot::Receiver<ExitOutcome>) -> ExitOutcome {
    rx.await.unwrap_or(ExitOutcome::Ok)
}

#[cfg(unix)]
async fn reload_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut hangup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");
    hangup.recv().await;
}

#[cfg(not(unix))]
async fn reload_signal() {
    // No SIGHUP equivalent; never fires so only Ctrl-C drives shutdown.
    std::future::pending::<()>().await;
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to register Ctrl-C handler");
}

fn exit_code(outcome: ExitOutcome) -> ExitCode {
    match outcome {
        ExitOutcome::Ok => ExitCode::SUCCESS,
        ExitOutcome::BootstrapError | ExitOutcome::RenderError => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = match args.load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    let client: Arc<dyn CatalogClient> = Arc::new(HttpCatalogClient::new(&config.address));

    loop {
        let mut handle = bridge_core::start(config.clone(), Arc::clone(&client)).await;

        let signal = tokio::select! {
            outcome = wait_finish(&mut handle.finish) => RunSignal::Finished(outcome),
            _ = reload_signal() => RunSignal::Reload,
            _ = shutdown_signal() => RunSignal::Shutdown,
        };

        match signal {
            RunSignal::Finished(outcome) => return exit_code(outcome),
            RunSignal::Shutdown => {
                info!("shutting down");
                let _ = handle.stop.send(true);
                let _ = handle.finish.await;
                return ExitCode::SUCCESS;
            }
            RunSignal::Reload => {
                info!("reloading configuration");
                let _ = handle.stop.send(true);
                let _ = handle.finish.await;
                // Allow in-flight long-polls to drain before the new
                // supervisor's pollers open fresh connections.
                tokio::time::sleep(Duration::from_millis(50)).await;

                config = match args.load_config() {
                    Ok(cfg) => cfg,
                    Err(err) => {
                        error!(error = %err, "reload failed, keeping previous configuration");
                        continue;
                    }
                };
            }
        }
    }
}
