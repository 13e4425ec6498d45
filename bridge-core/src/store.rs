//! Shared store (component C): a concurrency-safe mapping from watch plan
//! to its latest entries, plus the read-only backend → plan-list index.
//!
//! A single mutex protects both maps. Readers hold the lock only while
//! iterating; it is never held across I/O.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::model::ServiceEntry;
use crate::spec::WatchPlan;

#[derive(Debug, Default)]
struct Inner {
    /// Latest snapshot per watch plan. Presence of a key means the plan has
    /// returned at least once.
    servers: HashMap<WatchPlan, Vec<ServiceEntry>>,
    /// backend name -> ordered list of plans, built once at start and
    /// read-only thereafter.
    backends: HashMap<String, Vec<WatchPlan>>,
}

#[derive(Debug, Default)]
pub struct Store {
    inner: Mutex<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the read-only `backends` index from the configured plans.
    /// Called once at supervisor start.
    pub async fn set_backends(&self, plans: &[WatchPlan]) {
        let mut inner = self.inner.lock().await;
        for plan in plans {
            inner
                .backends
                .entry(plan.backend.clone())
                .or_default()
                .push(plan.clone());
        }
    }

    /// Total number of configured watch plans, derived from the `backends`
    /// index built at start.
    pub async fn configured_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.backends.values().map(|v| v.len()).sum()
    }

    /// Number of plans that have reported at least once.
    pub async fn reported_count(&self) -> usize {
        self.inner.lock().await.servers.len()
    }

    /// Applies the update policy from §4.B: store the new entries and
    /// report whether this update should trigger a change ping. Both the
    /// write and the ping are gated by the same condition: the plan is new
    /// (even on error), or the entries changed by deep equality. A repeated
    /// error on an already-present plan leaves the last-known-good entries
    /// untouched rather than overwriting them with an empty vector.
    pub async fn update(&self, plan: &WatchPlan, entries: Vec<ServiceEntry>, had_error: bool) -> bool {
        let mut inner = self.inner.lock().await;
        let present = inner.servers.contains_key(plan);

        let changed = if !present {
            true
        } else if had_error {
            false
        } else {
            inner.servers.get(plan) != Some(&entries)
        };

        if !present || changed {
            inner.servers.insert(plan.clone(), entries);
        }
        !present || changed
    }

    /// Takes a single consistent snapshot of `servers` for every plan
    /// belonging to `backend`, concatenated in configured order.
    pub async fn aggregate(&self, backend: &str) -> Option<Vec<ServiceEntry>> {
        let inner = self.inner.lock().await;
        let plans = inner.backends.get(backend)?;
        let mut out = Vec::new();
        for plan in plans {
            if let Some(entries) = inner.servers.get(plan) {
                out.extend(entries.iter().cloned());
            }
        }
        Some(out)
    }

    /// All configured backend names, in no particular order.
    pub async fn backend_names(&self) -> Vec<String> {
        self.inner.lock().await.backends.keys().cloned().collect()
    }
}
