//! Core data types shared by the tracker gateway, the store and the sync engine
//!
//! A tenant pairs two projects. The *source* project is where requests
//! originate (the "user" project in older configurations) and the *target*
//! project is where the linked work items live (the "dev" project).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a tenant's project pair an issue belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    #[serde(alias = "user")]
    Source,
    #[serde(alias = "dev")]
    Target,
}

impl ProjectRole {
    /// The other side of the pair
    pub fn counterpart(self) -> ProjectRole {
        match self {
            ProjectRole::Source => ProjectRole::Target,
            ProjectRole::Target => ProjectRole::Source,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectRole::Source => "source",
            ProjectRole::Target => "target",
        }
    }

    /// Parse a role name, accepting the legacy user/dev spellings
    pub fn parse(s: &str) -> Option<ProjectRole> {
        match s.trim().to_lowercase().as_str() {
            "source" | "user" => Some(ProjectRole::Source),
            "target" | "dev" => Some(ProjectRole::Target),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File attached to an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub content_url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl Attachment {
    /// Two attachments are the same file when name and size agree
    pub fn same_file(&self, other: &Attachment) -> bool {
        self.filename == other.filename && self.size == other.size
    }
}

/// Normalized issue record returned by the tracker gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub key: String,
    pub role: ProjectRole,
    pub status: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    pub updated_at: DateTime<Utc>,
    /// Tracker-specific severity value, copied as-is onto created issues
    #[serde(default)]
    pub severity: Option<serde_json::Value>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Persisted 1:1 link between a source issue and its target counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub source_key: String,
    pub target_key: String,
    pub source_url: String,
    pub target_url: String,
    pub created_at: DateTime<Utc>,
}

impl Mapping {
    /// Issue key on the given side of the pair
    pub fn key_for(&self, role: ProjectRole) -> &str {
        match role {
            ProjectRole::Source => &self.source_key,
            ProjectRole::Target => &self.target_key,
        }
    }

    /// Issue URL on the given side of the pair
    pub fn url_for(&self, role: ProjectRole) -> &str {
        match role {
            ProjectRole::Source => &self.source_url,
            ProjectRole::Target => &self.target_url,
        }
    }
}

/// Last-observed status of one issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueStateSnapshot {
    pub issue_key: String,
    pub role: ProjectRole,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-tenant poll window and sync mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWatermark {
    pub tenant_name: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub initial_sync_completed: bool,
}

impl SyncWatermark {
    /// Watermark for a tenant that has never synced
    pub fn empty(tenant_name: impl Into<String>) -> Self {
        Self {
            tenant_name: tenant_name.into(),
            last_sync_at: None,
            initial_sync_completed: false,
        }
    }
}

/// A status transition observed between two polls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChangeEvent {
    pub issue_key: String,
    pub role: ProjectRole,
    /// `None` when the issue has never been observed before
    pub from_status: Option<String>,
    pub to_status: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusChangeEvent {
    pub fn is_first_observation(&self) -> bool {
        self.from_status.is_none()
    }

    /// True unless the recorded previous status equals the new one
    pub fn is_transition(&self) -> bool {
        self.from_status.as_deref() != Some(self.to_status.as_str())
    }
}

impl fmt::Display for StatusChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {} -> {}",
            self.role,
            self.issue_key,
            self.from_status.as_deref().unwrap_or("(new)"),
            self.to_status
        )
    }
}
