//! Configuration loading (§6, SPEC_FULL §2): a JSON-file layer overlaid
//! with CLI-flag overrides, producing a validated [`Config`]. Argument
//! parsing and config-file discovery are the CLI crate's job; this module
//! owns the merge and the validation the core actually needs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::spec::WatchPlan;
use crate::write::OutputSpec;

/// The raw, JSON-deserializable shape of a config file. Every field is
/// optional here; CLI overrides and defaults are applied when building a
/// [`Config`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub address: Option<String>,
    pub template: Option<String>,
    pub templates: Option<Vec<String>>,
    pub path: Option<String>,
    pub paths: Option<Vec<String>>,
    pub reload_command: Option<String>,
    #[serde(default)]
    pub backends: Vec<String>,
    pub dry_run: Option<bool>,
    #[serde(default, with = "humantime_serde::option")]
    pub quiet: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub max_wait: Option<Duration>,
}

impl ConfigFile {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// CLI-flag overrides layered on top of a [`ConfigFile`]. `None`/empty
/// means "not provided on the command line, keep the file's value".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub address: Option<String>,
    pub templates: Vec<String>,
    pub paths: Vec<String>,
    pub reload_command: Option<String>,
    pub backends: Vec<String>,
    pub dry_run: bool,
    pub quiet: Option<Duration>,
    pub max_wait: Option<Duration>,
}

/// The fully validated, merged configuration the supervisor runs from.
#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub outputs: Vec<OutputSpec>,
    pub reload_command: Option<String>,
    pub watch_plans: Vec<WatchPlan>,
    pub dry_run: bool,
    pub quiet: Duration,
    pub max_wait: Duration,
}

impl Config {
    /// Merges a config file with CLI overrides and validates the result.
    /// Flag-supplied `backend` entries are appended to file-supplied
    /// `backends`, per §6.
    pub fn build(file: ConfigFile, cli: CliOverrides) -> Result<Self, ConfigError> {
        let address = cli
            .address
            .or(file.address)
            .unwrap_or_else(|| "127.0.0.1:8500".to_string());

        let mut templates = file.templates.unwrap_or_default();
        if let Some(t) = file.template {
            templates.push(t);
        }
        templates.extend(cli.templates);

        let mut paths = file.paths.unwrap_or_default();
        if let Some(p) = file.path {
            paths.push(p);
        }
        paths.extend(cli.paths);

        if templates.len() != paths.len() {
            return Err(ConfigError::TemplatePathMismatch {
                templates: templates.len(),
                paths: paths.len(),
            });
        }

        let outputs: Vec<OutputSpec> = templates
            .into_iter()
            .zip(paths)
            .map(|(t, p)| OutputSpec {
                template_path: PathBuf::from(t),
                output_path: PathBuf::from(p),
            })
            .collect();

        // §7: an unreadable template is a configuration error, detected
        // pre-start rather than surfacing as a render error on first refresh.
        for spec in &outputs {
            std::fs::metadata(&spec.template_path).map_err(|source| ConfigError::UnreadableTemplate {
                path: spec.template_path.clone(),
                source,
            })?;
        }

        let dry_run = cli.dry_run || file.dry_run.unwrap_or(false);

        let reload_command = cli.reload_command.or(file.reload_command);
        if reload_command.is_none() && !dry_run {
            return Err(ConfigError::MissingOption {
                option: "reload_command",
            });
        }

        let mut backend_specs = file.backends;
        backend_specs.extend(cli.backends);
        if backend_specs.is_empty() {
            return Err(ConfigError::MissingOption { option: "backends" });
        }

        let watch_plans = backend_specs
            .iter()
            .map(|s| WatchPlan::parse(s))
            .collect::<Result<Vec<_>, _>>()?;

        let quiet = cli.quiet.or(file.quiet).unwrap_or(Duration::ZERO);
        let max_wait = cli.max_wait.or(file.max_wait).unwrap_or(Duration::ZERO);

        Ok(Config {
            address,
            outputs,
            reload_command,
            watch_plans,
            dry_run,
            quiet,
            max_wait,
        })
    }
}
