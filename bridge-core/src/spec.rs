//! Backend spec parser (component A).
//!
//! Grammar: `backend=[tag.]service[@datacenter][:port]`. `backend` and
//! `service` are mandatory; `port`, if present, must be a positive integer.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConfigError;

/// An immutable, parsed watch descriptor. Identifies what to poll and which
/// logical backend the results feed into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchPlan {
    /// The literal input this plan was parsed from, kept for diagnostics.
    pub spec: String,
    /// Logical backend name; keys the aggregation bucket.
    pub backend: String,
    /// Catalog service name.
    pub service: String,
    /// Optional tag filter; empty means "no filter".
    pub tag: String,
    /// Optional datacenter; empty means "local".
    pub datacenter: String,
    /// 0 means "not overridden".
    pub port_override: u16,
}

static SPEC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^
        (?P<backend>[^=]*) =
        (?: (?P<tag>[^.@:=]+) \. )?
        (?P<service>[^@:=]*)
        (?: @ (?P<dc>[^:=]*) )?
        (?: : (?P<port>[^:=]*) )?
        $
        ",
    )
    .expect("backend spec regex is valid")
});

impl WatchPlan {
    /// Parses a single backend spec string into a [`WatchPlan`].
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let caps = SPEC_RE
            .captures(spec)
            .ok_or_else(|| ConfigError::InvalidSpec {
                spec: spec.to_string(),
                reason: "does not match backend=[tag.]service[@dc][:port]".to_string(),
            })?;

        let backend = caps.name("backend").map_or("", |m| m.as_str());
        let service = caps.name("service").map_or("", |m| m.as_str());
        let tag = caps.name("tag").map_or("", |m| m.as_str());
        let dc = caps.name("dc").map_or("", |m| m.as_str());
        let port_raw = caps.name("port").map_or("", |m| m.as_str());

        if backend.is_empty() {
            return Err(ConfigError::InvalidSpec {
                spec: spec.to_string(),
                reason: "backend name is required".to_string(),
            });
        }
        if service.is_empty() {
            return Err(ConfigError::InvalidSpec {
                spec: spec.to_string(),
                reason: "service name is required".to_string(),
            });
        }

        let port_override = if port_raw.is_empty() {
            0
        } else {
            port_raw.parse::<u16>().map_err(|_| ConfigError::InvalidSpec {
                spec: spec.to_string(),
                reason: format!("port {port_raw:?} is not a positive integer"),
            })?
        };

        Ok(WatchPlan {
            spec: spec.to_string(),
            backend: backend.to_string(),
            service: service.to_string(),
            tag: tag.to_string(),
            datacenter: dc.to_string(),
            port_override,
        })
    }
}
