//! Config directory scanning
//!
//! The supervisor starts one worker per tenant document found in its config
//! directory. Documents that fail to parse or validate are reported and
//! left out; they never get a worker.

use super::tenant::TenantConfig;
use super::validation::validate_tenant;
use crate::{Result, SyncFlowError};
use std::path::{Path, PathBuf};

/// File stem reserved for the shipped sample configuration
const EXAMPLE_STEM: &str = "sync-rules.example";

/// A tenant document found on disk
#[derive(Debug, Clone)]
pub struct TenantEntry {
    pub name: String,
    pub path: PathBuf,
    pub config: TenantConfig,
}

/// Result of scanning a config directory
#[derive(Debug, Default)]
pub struct LoadReport {
    pub tenants: Vec<TenantEntry>,
    /// Files that were rejected, with the reason
    pub rejected: Vec<(PathBuf, String)>,
}

/// Default config directory (~/.config/syncflow/tenants)
pub fn default_config_dir() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("syncflow");
    path.push("tenants");
    path
}

/// List candidate tenant documents in a directory, sorted by path
pub fn tenant_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(SyncFlowError::Config(format!(
            "Config directory does not exist: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for ext in ["json", "yaml", "yml"] {
        let pattern = dir.join(format!("*.{}", ext));
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern)
            .map_err(|e| SyncFlowError::Config(format!("Invalid glob pattern: {}", e)))?;
        for entry in paths.flatten() {
            let is_example = entry
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s == EXAMPLE_STEM)
                .unwrap_or(false);
            if entry.is_file() && !is_example {
                files.push(entry);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Load and validate every tenant document in a directory
///
/// Duplicate tenant names keep the first file (by path order) and reject
/// the rest.
pub fn load_tenants(dir: &Path) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    for path in tenant_files(dir)? {
        let config = match TenantConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Failed to load config file");
                report.rejected.push((path, e.to_string()));
                continue;
            }
        };

        if let Err(errors) = validate_tenant(&config) {
            let reason = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            tracing::error!(file = %path.display(), errors = %reason, "Config validation failed");
            report.rejected.push((path, reason));
            continue;
        }

        if report.tenants.iter().any(|t| t.name == config.name) {
            let reason = format!("Duplicate tenant name: {}", config.name);
            tracing::error!(file = %path.display(), "{}", reason);
            report.rejected.push((path, reason));
            continue;
        }

        report.tenants.push(TenantEntry {
            name: config.name.clone(),
            path,
            config,
        });
    }

    tracing::info!(
        count = report.tenants.len(),
        rejected = report.rejected.len(),
        dir = %dir.display(),
        "Loaded tenant configs from directory"
    );

    Ok(report)
}
