use thiserror::Error;

/// Configuration-time failures: bad backend specs, missing required
/// options, mismatched template/output lengths, unreadable templates.
/// Always fatal, always detected before a watch run starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid backend spec {spec:?}: {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("{option} is required")]
    MissingOption { option: &'static str },

    #[error(
        "template/path count mismatch: {templates} templates, {paths} output paths"
    )]
    TemplatePathMismatch { templates: usize, paths: usize },

    #[error("template {path:?} is not readable: {source}")]
    UnreadableTemplate {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read config file {path:?}: {source}")]
    ReadFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    ParseFile {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Raised by a [`crate::catalog::CatalogClient`] when a single long-poll
/// call fails. Recovered locally by the poller via capped backoff; never
/// surfaced past [`crate::poller`].
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("catalog returned an unexpected response: {0}")]
    BadResponse(String),
}

/// Template parse/execute or output-file-write failures. Fatal to the
/// current watch run; the supervisor closes `finish` on this.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to read template {path:?}: {source}")]
    ReadTemplate {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template {path:?}: {source}")]
    ParseTemplate {
        path: std::path::PathBuf,
        #[source]
        source: Box<handlebars::TemplateError>,
    },

    #[error("failed to execute template {path:?}: {source}")]
    ExecuteTemplate {
        path: std::path::PathBuf,
        #[source]
        source: Box<handlebars::RenderError>,
    },

    #[error("failed to write output {path:?}: {source}")]
    WriteOutput {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
pub type RenderResult<T> = std::result::Result<T, RenderError>;
