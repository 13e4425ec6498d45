//! Single-watch poller (component B): one independent task per configured
//! watch plan, maintaining a blocking long-poll loop against the catalog.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::catalog::{CatalogClient, QueryOptions, WAIT_TIME_CEILING};
use crate::spec::WatchPlan;
use crate::store::Store;

/// Base of the exponential backoff applied after a catalog error (§4.B,
/// testable property #8): `base * 2^(failures - 1)`, failures capped at 5.
pub const FAIL_SLEEP_BASE: Duration = Duration::from_secs(5);
const MAX_FAILURES: u32 = 5;

/// `backoff(5s, k) = 5s * 2^(k-1)` for k in 1..=5; k is capped at
/// [`MAX_FAILURES`] before this is called.
pub fn backoff(base: Duration, failures: u32) -> Duration {
    let failures = failures.clamp(1, MAX_FAILURES);
    base * 2u32.pow(failures - 1)
}

/// Runs the poll loop for a single watch plan until `stop` fires. Every
/// storage update that should trigger a refresh best-effort-pings
/// `change_tx`. `dry_run` makes the loop exit after its first successful
/// store update.
pub async fn run(
    plan: WatchPlan,
    index: usize,
    client: Arc<dyn CatalogClient>,
    store: Arc<Store>,
    mut stop: watch::Receiver<bool>,
    change_tx: mpsc::Sender<()>,
    dry_run: bool,
) {
    let mut wait_index: u64 = 0;
    let mut failures: u32 = 0;

    loop {
        if *stop.borrow() {
            debug!(spec = %plan.spec, "poller stopping");
            return;
        }

        let opts = QueryOptions {
            datacenter: plan.datacenter.clone(),
            wait_time: WAIT_TIME_CEILING,
            wait_index,
        };

        let result = client
            .health_service(&plan.service, &plan.tag, true, opts)
            .await;

        match result {
            Ok((entries, meta)) => {
                failures = 0;
                wait_index = meta.last_index;

                let normalized: Vec<_> = entries
                    .into_iter()
                    .map(|e| e.normalize(index, plan.port_override))
                    .collect();

                let pinged = store.update(&plan, normalized, false).await;
                if pinged {
                    let _ = change_tx.try_send(());
                }

                if dry_run {
                    debug!(spec = %plan.spec, "dry run: poller exiting after first pass");
                    return;
                }
            }
            Err(err) => {
                failures = (failures + 1).min(MAX_FAILURES);
                warn!(spec = %plan.spec, error = %err, failures, "catalog poll failed");

                // First return on error still lifts the readiness gate; see
                // the Open Question resolution in the design notes.
                let pinged = store.update(&plan, Vec::new(), true).await;
                if pinged {
                    let _ = change_tx.try_send(());
                }

                if dry_run {
                    return;
                }

                let sleep = backoff(FAIL_SLEEP_BASE, failures);
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            return;
                        }
                    }
                }
                // wait_index intentionally not advanced on error.
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_doubles_each_failure() {
        assert_eq!(backoff(Duration::from_secs(5), 1), Duration::from_secs(5));
        assert_eq!(backoff(Duration::from_secs(5), 2), Duration::from_secs(10));
        assert_eq!(backoff(Duration::from_secs(5), 3), Duration::from_secs(20));
        assert_eq!(backoff(Duration::from_secs(5), 4), Duration::from_secs(40));
        assert_eq!(backoff(Duration::from_secs(5), 5), Duration::from_secs(80));
    }

    #[test]
    fn backoff_caps_at_five_failures() {
        assert_eq!(backoff(Duration::from_secs(5), 5), backoff(Duration::from_secs(5), 9));
    }
}
