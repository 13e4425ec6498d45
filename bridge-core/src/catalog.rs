//! The catalog interface the poller consumes from (§6): a blocking
//! long-poll health query. The catalog service itself is out of scope;
//! this module defines the trait the core calls through and one concrete
//! HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CatalogError;
use crate::model::{QueryMeta, ServiceEntry};

/// Parameters narrowing a health query beyond `service`/`tag`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub datacenter: String,
    pub wait_time: Duration,
    pub wait_index: u64,
}

/// The blocking long-poll health-query operation the core calls for every
/// configured watch. Long-poll semantics: the call returns promptly when
/// the catalog's index advances past `wait_index`, or at `wait_time`
/// regardless.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn health_service(
        &self,
        service: &str,
        tag: &str,
        only_passing: bool,
        opts: QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta), CatalogError>;

    /// A cheap reachability probe used once at supervisor startup (§4.H).
    async fn probe(&self) -> Result<(), CatalogError>;
}

/// Wait-time ceiling applied to every long-poll (§4.B).
pub const WAIT_TIME_CEILING: Duration = Duration::from_secs(60);

/// HTTP implementation against a Consul-shaped catalog API: `GET
/// /v1/health/service/{service}` with `index`, `wait`, `passing`, `tag`,
/// `dc` query parameters (`original_source/watch.go` calls the equivalent
/// through `consulapi.Client.Health().Service(...)`).
#[derive(Debug)]
pub struct HttpCatalogClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(address: &str) -> Self {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        Self {
            // The long-poll ceiling plus headroom so the HTTP client never
            // times out a call the catalog was asked to hold open.
            http: reqwest::Client::builder()
                .timeout(WAIT_TIME_CEILING + Duration::from_secs(5))
                .build()
                .expect("reqwest client builds with default TLS config"),
            base_url,
        }
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn health_service(
        &self,
        service: &str,
        tag: &str,
        only_passing: bool,
        opts: QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta), CatalogError> {
        let url = format!("{}/v1/health/service/{service}", self.base_url);
        let wait = humantime::format_duration(opts.wait_time).to_string();

        let mut req = self.http.get(&url).query(&[("wait", wait.as_str())]);
        if only_passing {
            req = req.query(&[("passing", "1")]);
        }
        if !tag.is_empty() {
            req = req.query(&[("tag", tag)]);
        }
        if !opts.datacenter.is_empty() {
            req = req.query(&[("dc", opts.datacenter.as_str())]);
        }
        if opts.wait_index != 0 {
            req = req.query(&[("index", opts.wait_index.to_string().as_str())]);
        }

        debug!(service, tag, wait_index = opts.wait_index, "polling catalog");

        let resp = req.send().await?.error_for_status()?;

        let last_index = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        let entries: Vec<ServiceEntry> = resp.json().await?;

        Ok((entries, QueryMeta { last_index }))
    }

    async fn probe(&self) -> Result<(), CatalogError> {
        let url = format!("{}/v1/agent/self", self.base_url);
        self.http.get(&url).send().await?.error_for_status()?;
        Ok(())
    }
}
