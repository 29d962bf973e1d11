//! Tenant configuration file handling
//!
//! One document per tenant (JSON or YAML, picked by file extension)
//! describes the tracker connection, the project pair, the rules and the
//! default behaviors. The loaded value is immutable and handed explicitly to
//! everything that needs it.

use super::rules::Rule;
use crate::model::ProjectRole;
use crate::{Result, SyncFlowError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How requests authenticate against the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// HTTP basic auth with account email and API token
    #[default]
    Basic,
    /// Bearer personal access token
    #[serde(alias = "pat", alias = "bearer")]
    Token,
}

/// Tracker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraConnection {
    /// Base URL, e.g. https://example.atlassian.net
    pub base_url: String,

    /// Account email (required for basic auth)
    #[serde(default)]
    pub email: Option<String>,

    /// API token or PAT; `$NAME` reads environment variable NAME
    pub api_token: String,

    #[serde(default)]
    pub auth_type: AuthMode,
}

impl JiraConnection {
    /// Base URL without trailing slashes
    pub fn normalized_base_url(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_string()
    }
}

/// What to do with status changes no rule matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackBehavior {
    #[default]
    Ignore,
    /// Log unmatched changes at info level
    Log,
}

/// Statuses passed over without rule evaluation, per project role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateStatuses {
    #[serde(default, alias = "user")]
    pub source: Vec<String>,
    #[serde(default = "default_target_intermediate", alias = "dev")]
    pub target: Vec<String>,
}

fn default_target_intermediate() -> Vec<String> {
    vec!["Done".to_string()]
}

impl Default for IntermediateStatuses {
    fn default() -> Self {
        Self {
            source: Vec::new(),
            target: default_target_intermediate(),
        }
    }
}

impl IntermediateStatuses {
    pub fn for_role(&self, role: ProjectRole) -> &[String] {
        match role {
            ProjectRole::Source => &self.source,
            ProjectRole::Target => &self.target,
        }
    }
}

/// Tenant-wide defaults applied when a rule does not say otherwise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultBehavior {
    #[serde(default = "default_true")]
    pub skip_intermediate_statuses: bool,

    #[serde(default)]
    pub intermediate_statuses: IntermediateStatuses,

    #[serde(default = "default_true", alias = "onlyOnChange")]
    pub only_on_status_change: bool,

    /// Copy new attachments onto already-linked target issues
    #[serde(default)]
    pub sync_attachments: bool,

    /// Treat every issue as new on the very first cycle
    #[serde(default)]
    pub initial_sync: bool,

    #[serde(default)]
    pub fallback_behavior: FallbackBehavior,
}

fn default_true() -> bool {
    true
}

impl Default for DefaultBehavior {
    fn default() -> Self {
        Self {
            skip_intermediate_statuses: true,
            intermediate_statuses: IntermediateStatuses::default(),
            only_on_status_change: true,
            sync_attachments: false,
            initial_sync: false,
            fallback_behavior: FallbackBehavior::Ignore,
        }
    }
}

impl DefaultBehavior {
    /// Whether `status` on `role` is skipped without rule evaluation
    pub fn is_intermediate(&self, role: ProjectRole, status: &str) -> bool {
        self.skip_intermediate_statuses
            && self
                .intermediate_statuses
                .for_role(role)
                .iter()
                .any(|s| s.trim() == status.trim())
    }
}

/// Complete configuration of one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    pub name: String,

    pub jira: JiraConnection,

    #[serde(alias = "userProjectKey")]
    pub source_project_key: String,

    #[serde(alias = "devProjectKey")]
    pub target_project_key: String,

    #[serde(default = "default_sync_interval_minutes")]
    pub sync_interval_minutes: u64,

    /// SQLite database path (default: per-tenant file in the data directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,

    /// Issue type used when creating linked issues
    #[serde(default = "default_issue_type")]
    pub issue_type: String,

    /// Custom field set when a source issue is resolved; empty disables it
    #[serde(default = "default_replied_field")]
    pub replied_field: String,

    #[serde(default)]
    pub default_behavior: DefaultBehavior,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_sync_interval_minutes() -> u64 {
    5
}

fn default_issue_type() -> String {
    "Bug".to_string()
}

fn default_replied_field() -> String {
    "replied".to_string()
}

impl TenantConfig {
    /// Create a minimal configuration for a project pair
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        source_project_key: impl Into<String>,
        target_project_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            jira: JiraConnection {
                base_url: base_url.into(),
                email: None,
                api_token: String::new(),
                auth_type: AuthMode::Basic,
            },
            source_project_key: source_project_key.into(),
            target_project_key: target_project_key.into(),
            sync_interval_minutes: default_sync_interval_minutes(),
            database: None,
            issue_type: default_issue_type(),
            replied_field: default_replied_field(),
            default_behavior: DefaultBehavior::default(),
            rules: Vec::new(),
        }
    }

    /// Set the tracker credentials
    pub fn with_credentials(
        mut self,
        email: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        self.jira.email = Some(email.into());
        self.jira.api_token = api_token.into();
        self
    }

    /// Set the rule list
    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    /// Set the default behaviors
    pub fn with_default_behavior(mut self, behavior: DefaultBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Set the database path
    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = Some(path.into());
        self
    }

    /// Load a tenant configuration from a JSON or YAML file
    ///
    /// `$NAME` credential references are resolved and the base URL is
    /// normalized. Validation is a separate step, see
    /// [`validate_tenant`](super::validation::validate_tenant).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SyncFlowError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::debug!(path = %path.display(), "Loading tenant configuration");

        let content = fs::read_to_string(path)?;
        let mut config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content).map_err(|e| {
                SyncFlowError::Config(format!("{}: invalid JSON: {}", path.display(), e))
            })?,
        };

        config.jira.base_url = config.jira.normalized_base_url();
        config.resolve_secrets()?;

        tracing::info!(
            path = %path.display(),
            tenant = %config.name,
            rules = config.rules.len(),
            "Tenant configuration loaded"
        );

        Ok(config)
    }

    /// Save configuration; format follows the file extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => serde_json::to_string_pretty(self)?,
        };
        fs::write(path, content)?;

        Ok(())
    }

    /// Replace `$NAME` credential references with environment values
    fn resolve_secrets(&mut self) -> Result<()> {
        self.jira.api_token = resolve_env_ref(&self.jira.api_token, "jira.apiToken")?;
        if let Some(email) = self.jira.email.take() {
            self.jira.email = Some(resolve_env_ref(&email, "jira.email")?);
        }
        Ok(())
    }

    /// Project key for a role
    pub fn project_key(&self, role: ProjectRole) -> &str {
        match role {
            ProjectRole::Source => &self.source_project_key,
            ProjectRole::Target => &self.target_project_key,
        }
    }

    /// Role of a project key, if it belongs to this tenant
    pub fn role_of_project(&self, project_key: &str) -> Option<ProjectRole> {
        if project_key == self.source_project_key {
            Some(ProjectRole::Source)
        } else if project_key == self.target_project_key {
            Some(ProjectRole::Target)
        } else {
            None
        }
    }

    /// Poll interval as a duration (never zero)
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes.max(1) * 60)
    }

    /// Database path, defaulting to `<data dir>/syncflow/<tenant>.db`
    pub fn database_path(&self) -> PathBuf {
        if let Some(ref path) = self.database {
            return path.clone();
        }
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("syncflow");
        path.push(format!("{}.db", sanitize_file_stem(&self.name)));
        path
    }

    /// Link to an issue in the tracker's web UI
    pub fn issue_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.jira.normalized_base_url(), key)
    }
}

fn resolve_env_ref(value: &str, field: &str) -> Result<String> {
    let trimmed = value.trim();
    match trimmed.strip_prefix('$') {
        Some(var) if !var.is_empty() => {
            let var = var.trim_start_matches('{').trim_end_matches('}');
            std::env::var(var).map(|v| v.trim().to_string()).map_err(|_| {
                SyncFlowError::Config(format!(
                    "{} references environment variable {} which is not set",
                    field, var
                ))
            })
        }
        _ => Ok(trimmed.to_string()),
    }
}

fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
