//! Change coalescer (component D): the supervisor's central select loop,
//! applying the readiness gate and quiescence timers before deciding a
//! refresh should run.
//!
//! Two one-shot timers, both cleared together on either fire, are the
//! entire state machine (§9 design notes) — no per-watch timers, debouncing
//! is global.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::store::Store;

/// What a refresh attempt tells the coalescer to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Render + write + reload succeeded; keep watching.
    Continue,
    /// Dry-run completed, or a fatal render/write error occurred — stop the
    /// coalescer loop either way (the caller distinguishes success from
    /// failure via its own state).
    Stop,
}

/// Performs one refresh cycle (aggregate -> render -> write -> reload).
/// Implemented by the supervisor; split out so the coalescer's timing
/// logic can be unit-tested against a fake.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self) -> RefreshOutcome;
}

/// Debounce configuration. `Duration::ZERO` on either field means
/// "disabled", per §4.D.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebounceConfig {
    pub quiet: Duration,
    pub max_wait: Duration,
}

/// Waits until `deadline`, or forever if `None`. Recomputed fresh from an
/// absolute `Instant` each time the select loop spins, so it is safe to
/// call every iteration without losing track of elapsed time.
async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Runs the coalescer loop until `stop` fires or a refresh returns
/// [`RefreshOutcome::Stop`].
pub async fn run(
    store: Arc<Store>,
    mut change_rx: mpsc::Receiver<()>,
    mut stop: watch::Receiver<bool>,
    debounce: DebounceConfig,
    refresher: Arc<dyn Refresher>,
) {
    let mut quiet_deadline: Option<Instant> = None;
    let mut max_wait_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            _ = stop.changed() => {
                if *stop.borrow() {
                    debug!("coalescer stopping");
                    return;
                }
            }

            maybe_ping = change_rx.recv() => {
                if maybe_ping.is_none() {
                    debug!("change channel closed, coalescer stopping");
                    return;
                }

                let ready = store.reported_count().await >= store.configured_count().await;
                if !ready {
                    continue;
                }

                // §4.D item 1: the immediate-vs-arm-timers decision turns on
                // `quiet` alone. A configured `max_wait` with no `quiet`
                // still means "no quiescence window", so every eligible
                // ping refreshes immediately.
                if debounce.quiet.is_zero() {
                    if force_refresh(refresher.as_ref()).await {
                        return;
                    }
                    continue;
                }

                let now = Instant::now();
                if !debounce.quiet.is_zero() {
                    quiet_deadline = Some(now + debounce.quiet);
                }
                if max_wait_deadline.is_none() && !debounce.max_wait.is_zero() {
                    max_wait_deadline = Some(now + debounce.max_wait);
                }
            }

            () = wait_deadline(quiet_deadline), if quiet_deadline.is_some() => {
                quiet_deadline = None;
                max_wait_deadline = None;
                if force_refresh(refresher.as_ref()).await {
                    return;
                }
            }

            () = wait_deadline(max_wait_deadline), if max_wait_deadline.is_some() => {
                quiet_deadline = None;
                max_wait_deadline = None;
                if force_refresh(refresher.as_ref()).await {
                    return;
                }
            }
        }
    }
}

async fn force_refresh(refresher: &dyn Refresher) -> bool {
    info!("refreshing");
    matches!(refresher.refresh().await, RefreshOutcome::Stop)
}
