//! Aggregator (component E): merges every watch plan feeding a backend
//! into one ordered entry list, for every configured backend at once.

use std::collections::HashMap;

use crate::model::ServiceEntry;
use crate::store::Store;

/// Produces a fresh `backend name -> entries` mapping covering every
/// configured backend. Backends with no reporting plans yet still get an
/// (empty) entry, so the renderer can distinguish "no backends" from
/// "all backends currently empty".
pub async fn aggregate_all(store: &Store) -> HashMap<String, Vec<ServiceEntry>> {
    let mut out = HashMap::new();
    for name in store.backend_names().await {
        let entries = store.aggregate(&name).await.unwrap_or_default();
        out.insert(name, entries);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::WatchPlan;

    fn plan(backend: &str, service: &str) -> WatchPlan {
        WatchPlan {
            spec: format!("{backend}={service}"),
            backend: backend.to_string(),
            service: service.to_string(),
            tag: String::new(),
            datacenter: String::new(),
            port_override: 0,
        }
    }

    fn entry(id: &str) -> ServiceEntry {
        use crate::model::{HealthCheck, Node, ServiceInstance};
        ServiceEntry {
            node: Node {
                name: id.to_string(),
                address: "127.0.0.1".to_string(),
            },
            service: ServiceInstance {
                id: id.to_string(),
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

    #[tokio::test]
    async fn merges_two_plans_in_configured_order() {
        let store = Store::new();
        let wp1 = plan("app", "foo");
        let wp2 = plan("app", "bar");
        store.set_backends(&[wp1.clone(), wp2.clone()]).await;
        store.update(&wp1, vec![entry("e1")], false).await;
        store.update(&wp2, vec![entry("e2")], false).await;

        let agg = aggregate_all(&store).await;
        let app = agg.get("app").expect("app backend present");
        assert_eq!(app.len(), 2);
        assert_eq!(app[0].node.name, "e1");
        assert_eq!(app[1].node.name, "e2");
    }

    #[tokio::test]
    async fn unreported_plan_contributes_nothing_yet() {
        let store = Store::new();
        let wp1 = plan("app", "foo");
        let wp2 = plan("app", "bar");
        store.set_backends(&[wp1.clone(), wp2.clone()]).await;
        store.update(&wp1, vec![entry("e1")], false).await;

        let agg = aggregate_all(&store).await;
        assert_eq!(agg["app"], vec![entry("e1")]);
    }
}
