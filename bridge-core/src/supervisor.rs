//! Supervisor (component H): boots the catalog client, spawns one poller
//! per configured watch plan, owns the coalescer loop, and handles
//! stop/finish signaling.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{error, info};

use crate::aggregate::aggregate_all;
use crate::catalog::CatalogClient;
use crate::coalescer::{self, DebounceConfig, RefreshOutcome, Refresher};
use crate::config::Config;
use crate::poller;
use crate::render::{build_view, render_template};
use crate::store::Store;
use crate::write::{run_reload_command, write_output, OutputSpec};

/// Why the supervisor stopped. A "finish" without dry-run reporting
/// anything other than `Ok` signals abnormal termination to the outer
/// process (§4.H, §6 exit codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Clean shutdown, or dry-run's single successful pass.
    Ok,
    /// Catalog unreachable at startup.
    BootstrapError,
    /// Template parse/execute or output write failed.
    RenderError,
}

/// Handle returned to the caller (signal handler / `main`) for driving a
/// running supervisor.
pub struct SupervisorHandle {
    pub stop: watch::Sender<bool>,
    pub finish: oneshot::Receiver<ExitOutcome>,
}

struct RefreshState {
    store: Arc<Store>,
    outputs: Vec<OutputSpec>,
    reload_command: Option<String>,
    dry_run: bool,
    finish_tx: Mutex<Option<oneshot::Sender<ExitOutcome>>>,
}

#[async_trait]
impl Refresher for RefreshState {
    async fn refresh(&self) -> RefreshOutcome {
        let aggregated = aggregate_all(&self.store).await;
        let view = build_view(&aggregated);

        for spec in &self.outputs {
            let bytes = match render_template(&spec.template_path, &view) {
                Ok(bytes) => bytes,
                Err(err) => {
                    error!(path = %spec.template_path.display(), error = %err, "render failed");
                    self.finish(ExitOutcome::RenderError).await;
                    return RefreshOutcome::Stop;
                }
            };

            if self.dry_run {
                use std::io::Write;
                if std::io::stdout().write_all(&bytes).is_err() {
                    error!("failed to write dry-run output to stdout");
                }
                self.finish(ExitOutcome::Ok).await;
                return RefreshOutcome::Stop;
            }

            if let Err(err) = write_output(&spec.output_path, &bytes) {
                error!(path = %spec.output_path.display(), error = %err, "write failed");
                self.finish(ExitOutcome::RenderError).await;
                return RefreshOutcome::Stop;
            }
        }

        if let Some(command) = &self.reload_command {
            if let Err(err) = run_reload_command(command).await {
                error!(%command, error = %err, "failed to spawn reload command");
            }
        }

        RefreshOutcome::Continue
    }
}

impl RefreshState {
    async fn finish(&self, outcome: ExitOutcome) {
        if let Some(tx) = self.finish_tx.lock().await.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Starts the supervisor: probes the catalog, spawns pollers, and enters
/// the coalescer loop on a background task. Returns immediately with a
/// handle the caller uses to request a stop or await completion.
pub async fn start(config: Config, client: Arc<dyn CatalogClient>) -> SupervisorHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (finish_tx, finish_rx) = oneshot::channel();

    let store = Arc::new(Store::new());
    store.set_backends(&config.watch_plans).await;

    let refresh_state = Arc::new(RefreshState {
        store: Arc::clone(&store),
        outputs: config.outputs.clone(),
        reload_command: config.reload_command.clone(),
        dry_run: config.dry_run,
        finish_tx: Mutex::new(Some(finish_tx)),
    });

    tokio::spawn(run_watch(config, client, store, stop_tx.subscribe(), refresh_state));

    SupervisorHandle {
        stop: stop_tx,
        finish: finish_rx,
    }
}

async fn run_watch(
    config: Config,
    client: Arc<dyn CatalogClient>,
    store: Arc<Store>,
    stop_rx: watch::Receiver<bool>,
    refresh_state: Arc<RefreshState>,
) {
    info!(address = %config.address, "probing catalog");
    if let Err(err) = client.probe().await {
        error!(error = %err, "catalog unreachable at startup");
        refresh_state.finish(ExitOutcome::BootstrapError).await;
        return;
    }

    let (change_tx, change_rx) = mpsc::channel::<()>(1);

    for (index, plan) in config.watch_plans.iter().enumerate() {
        tokio::spawn(poller::run(
            plan.clone(),
            index,
            Arc::clone(&client),
            Arc::clone(&store),
            stop_rx.clone(),
            change_tx.clone(),
            config.dry_run,
        ));
    }
    drop(change_tx);

    let debounce = DebounceConfig {
        quiet: config.quiet,
        max_wait: config.max_wait,
    };

    coalescer::run(store, change_rx, stop_rx, debounce, refresh_state.clone()).await;

    // If the coalescer loop exited because `stop` fired rather than a
    // terminal refresh outcome, `finish` is still open; closing it here
    // reports clean shutdown.
    refresh_state.finish(ExitOutcome::Ok).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::QueryOptions;
    use crate::config::{CliOverrides, Config, ConfigFile};
    use crate::error::CatalogError;
    use crate::model::{HealthCheck, Node, QueryMeta, ServiceEntry, ServiceInstance};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeCatalog {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CatalogClient for FakeCatalog {
        async fn health_service(
            &self,
            _service: &str,
            _tag: &str,
            _only_passing: bool,
            _opts: QueryOptions,
        ) -> Result<(Vec<ServiceEntry>, QueryMeta), CatalogError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok((
                    vec![ServiceEntry {
                        node: Node {
                            name: "node1".to_string(),
                            address: "127.0.0.1".to_string(),
                        },
                        service: ServiceInstance {
                            id: "app".to_string(),
                            name: "app".to_string(),
                            tags: vec![],
                            port: 8000,
                        },
                        checks: vec![HealthCheck {
                            status: "passing".to_string(),
                            notes: String::new(),
                            output: String::new(),
                        }],
                    }],
                    QueryMeta { last_index: 1 },
                ))
            } else {
                // Block "forever" relative to the test's timeout by
                // sleeping well past it; the dry-run poller never reaches
                // this branch since it exits after its first pass.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!()
            }
        }

        async fn probe(&self) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dry_run_writes_once_and_finishes_ok() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("t.hbs");
        std::fs::write(&template_path, "{{#each app}}{{server_line this}}\n{{/each}}").unwrap();

        let cli = CliOverrides {
            templates: vec![template_path.to_string_lossy().to_string()],
            paths: vec![dir.path().join("out.conf").to_string_lossy().to_string()],
            backends: vec!["app=foo".to_string()],
            dry_run: true,
            ..Default::default()
        };
        let config = Config::build(ConfigFile::default(), cli).unwrap();

        let client: Arc<dyn CatalogClient> = Arc::new(FakeCatalog {
            calls: AtomicUsize::new(0),
        });

        let handle = start(config, client).await;
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.finish)
            .await
            .expect("supervisor should finish promptly in dry-run mode")
            .expect("finish sender should not be dropped without sending");

        assert_eq!(outcome, ExitOutcome::Ok);
    }

    /// Per-service fake: returns one entry for its first poll, then blocks
    /// past the test timeout, mirroring long-poll semantics closely enough
    /// to drive a real (non-dry-run) supervisor end to end.
    struct TwoServiceCatalog {
        foo_calls: AtomicUsize,
        bar_calls: AtomicUsize,
    }

    fn entry(node: &str, addr: &str) -> ServiceEntry {
        ServiceEntry {
            node: Node {
                name: node.to_string(),
                address: addr.to_string(),
            },
            service: ServiceInstance {
                id: "app".to_string(),
                name: "app".to_string(),
                tags: vec![],
                port: 8000,
            },
            checks: vec![HealthCheck {
                status: "passing".to_string(),
                notes: String::new(),
                output: String::new(),
            }],
        }
    }

    #[async_trait]
    impl CatalogClient for TwoServiceCatalog {
        async fn health_service(
            &self,
            service: &str,
            _tag: &str,
            _only_passing: bool,
            _opts: QueryOptions,
        ) -> Result<(Vec<ServiceEntry>, QueryMeta), CatalogError> {
            let counter = match service {
                "foo" => &self.foo_calls,
                "bar" => &self.bar_calls,
                other => panic!("unexpected service {other}"),
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                let e = match service {
                    "foo" => entry("node1", "127.0.0.1"),
                    _ => entry("node3", "127.0.0.3"),
                };
                Ok((vec![e], QueryMeta { last_index: 1 }))
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!()
            }
        }

        async fn probe(&self) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn two_watches_on_one_backend_render_in_configured_order() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("t.hbs");
        std::fs::write(&template_path, "{{#each app}}{{server_line this}}\n{{/each}}").unwrap();
        let output_path = dir.path().join("out.conf");

        let cli = CliOverrides {
            templates: vec![template_path.to_string_lossy().to_string()],
            paths: vec![output_path.to_string_lossy().to_string()],
            backends: vec!["app=foo".to_string(), "app=bar".to_string()],
            reload_command: Some("true".to_string()),
            ..Default::default()
        };
        let config = Config::build(ConfigFile::default(), cli).unwrap();

        let client: Arc<dyn CatalogClient> = Arc::new(TwoServiceCatalog {
            foo_calls: AtomicUsize::new(0),
            bar_calls: AtomicUsize::new(0),
        });

        let handle = start(config, client).await;

        let rendered = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(bytes) = std::fs::read(&output_path) {
                    if !bytes.is_empty() {
                        return bytes;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("output file should be written promptly");

        assert_eq!(
            String::from_utf8(rendered).unwrap(),
            "server 0_node1_app 127.0.0.1:8000\nserver 1_node3_app 127.0.0.3:8000\n"
        );

        let _ = handle.stop.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(5), handle.finish).await;
    }

    /// Fake catalog that reports one changed entry on its second poll, then
    /// blocks, so a non-dry-run supervisor performs exactly two refreshes.
    struct ChangingCatalog {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CatalogClient for ChangingCatalog {
        async fn health_service(
            &self,
            _service: &str,
            _tag: &str,
            _only_passing: bool,
            _opts: QueryOptions,
        ) -> Result<(Vec<ServiceEntry>, QueryMeta), CatalogError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match n {
                0 => Ok((vec![entry("node1", "127.0.0.1")], QueryMeta { last_index: 1 })),
                1 => Ok((vec![entry("node2", "127.0.0.2")], QueryMeta { last_index: 2 })),
                _ => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }

        async fn probe(&self) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn reload_failure_on_first_refresh_does_not_block_the_second() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("t.hbs");
        std::fs::write(&template_path, "{{#each app}}{{server_line this}}\n{{/each}}").unwrap();
        let output_path = dir.path().join("out.conf");
        let marker_path = dir.path().join("reload_ran_once");

        // First invocation: no marker yet -> create it and exit 1. Second
        // invocation: marker exists -> exit 0. Exercises testable property
        // #5 (reload errors are logged, never fatal).
        let reload_command = format!(
            "test -f {marker} && exit 0 || (touch {marker} && exit 1)",
            marker = marker_path.display()
        );

        let cli = CliOverrides {
            templates: vec![template_path.to_string_lossy().to_string()],
            paths: vec![output_path.to_string_lossy().to_string()],
            backends: vec!["app=foo".to_string()],
            reload_command: Some(reload_command),
            ..Default::default()
        };
        let config = Config::build(ConfigFile::default(), cli).unwrap();

        let client: Arc<dyn CatalogClient> = Arc::new(ChangingCatalog {
            calls: AtomicUsize::new(0),
        });

        let handle = start(config, client).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(text) = std::fs::read_to_string(&output_path) {
                    if text.contains("node2") {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("second refresh should still land after the first reload failed");

        assert!(marker_path.exists());

        let _ = handle.stop.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(5), handle.finish).await;
    }
}
