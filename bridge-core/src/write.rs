//! Writer & reloader (component G): writes rendered template output
//! atomically to disk and invokes the reload command exactly once.

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::RenderError;

/// A (template, output) pair, positional and equal-length by construction
/// (mismatched lengths are a [`crate::error::ConfigError`] caught before
/// the watch starts).
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub template_path: PathBuf,
    pub output_path: PathBuf,
}

/// Writes `bytes` to `output_path` atomically: stage into a temp file in
/// the same directory, `chmod` 0660, then rename over the destination so
/// readers never observe a partially-written file.
pub fn write_output(output_path: &Path, bytes: &[u8]) -> Result<(), RenderError> {
    let dir = output_path.parent().filter(|p| !p.as_os_str().is_empty());

    let mut tmp = match dir {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new(),
    }
    .map_err(|source| RenderError::WriteOutput {
        path: output_path.to_path_buf(),
        source,
    })?;

    use std::io::Write;
    tmp.write_all(bytes).map_err(|source| RenderError::WriteOutput {
        path: output_path.to_path_buf(),
        source,
    })?;

    set_output_permissions(tmp.path()).map_err(|source| RenderError::WriteOutput {
        path: output_path.to_path_buf(),
        source,
    })?;

    tmp.persist(output_path)
        .map_err(|e| RenderError::WriteOutput {
            path: output_path.to_path_buf(),
            source: e.error,
        })?;

    debug!(path = %output_path.display(), bytes = bytes.len(), "wrote output");
    Ok(())
}

#[cfg(unix)]
fn set_output_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))
}

#[cfg(not(unix))]
fn set_output_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Invokes the reload command through a platform shell, inheriting
/// standard streams. A non-zero exit is logged but not treated as fatal —
/// the next refresh still runs (§4.G, §7).
pub async fn run_reload_command(command: &str) -> std::io::Result<()> {
    let status = if cfg!(target_os = "windows") {
        tokio::process::Command::new("cmd")
            .arg("/C")
            .arg(command)
            .status()
            .await?
    } else {
        tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .status()
            .await?
    };

    if !status.success() {
        warn!(%command, code = ?status.code(), "reload command exited non-zero");
    } else {
        debug!(%command, "reload command succeeded");
    }

    Ok(())
}
