//! Renderer (component F): turns the aggregated entries for a backend into
//! a template-facing view and executes a template against it.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::model::ServiceEntry;

/// One backend server as handed to a template. `ip` is the parsed textual
/// address when it parses as an IP; otherwise the raw string is carried
/// through unchanged and formatting is left to the template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub service: String,
    pub tags: Vec<String>,
    pub port: u16,
    pub ip: String,
    pub node: String,
}

impl From<&ServiceEntry> for ServerRecord {
    fn from(entry: &ServiceEntry) -> Self {
        ServerRecord {
            id: entry.service.id.clone(),
            service: entry.service.name.clone(),
            tags: entry.service.tags.clone(),
            port: entry.service.port,
            ip: entry.node.address.clone(),
            node: entry.node.name.clone(),
        }
    }
}

impl fmt::Display for ServerRecord {
    /// The default textual form: `server {node}_{id} {ip}:{port}`, with
    /// IPv6 addresses bracketed per standard host:port conventions.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = match self.ip.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
            _ => self.ip.clone(),
        };
        write!(f, "server {}_{} {}:{}", self.node, self.id, host, self.port)
    }
}

/// The view handed to the template engine: backend name -> ordered
/// server records.
pub type TemplateView = HashMap<String, Vec<ServerRecord>>;

/// Builds the template-facing view from the aggregator's output.
pub fn build_view(aggregated: &HashMap<String, Vec<ServiceEntry>>) -> TemplateView {
    aggregated
        .iter()
        .map(|(backend, entries)| {
            let records = entries.iter().map(ServerRecord::from).collect();
            (backend.clone(), records)
        })
        .collect()
}

/// Loads, parses, and executes a single template file against `view`,
/// returning the rendered bytes. Parses the template fresh on every call:
/// the renderer runs once per refresh, not continuously, so there is no
/// benefit to caching the compiled template across refreshes.
pub fn render_template(template_path: &Path, view: &TemplateView) -> Result<Vec<u8>, RenderError> {
    let source =
        std::fs::read_to_string(template_path).map_err(|source| RenderError::ReadTemplate {
            path: template_path.to_path_buf(),
            source,
        })?;

    let mut hb = Handlebars::new();
    hb.set_strict_mode(false);
    hb.register_helper("server_line", Box::new(server_line_helper));

    hb.register_template_string("t", &source)
        .map_err(|source| RenderError::ParseTemplate {
            path: template_path.to_path_buf(),
            source: Box::new(source),
        })?;

    let rendered = hb
        .render("t", view)
        .map_err(|source| RenderError::ExecuteTemplate {
            path: template_path.to_path_buf(),
            source: Box::new(source),
        })?;

    Ok(rendered.into_bytes())
}

/// Handlebars helper exposing [`ServerRecord`]'s default `Display` form to
/// templates that don't want to hand-roll the IPv6 bracketing logic.
fn server_line_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let param = h
        .param(0)
        .and_then(|v| serde_json::from_value::<ServerRecord>(v.value().clone()).ok())
        .ok_or_else(|| {
            handlebars::RenderErrorReason::ParamTypeMismatchForName(
                "server_line",
                "0".to_string(),
                "ServerRecord".to_string(),
            )
        })?;
    out.write(&param.to_string())?;
    Ok(())
}
