//! Issue-tracker gateway
//!
//! The sync engine talks to the remote tracker only through the
//! [`IssueTracker`] trait, so the orchestrator and executor can run against
//! Jira or the in-memory tracker alike.

pub mod description;
pub mod jira;
pub mod memory;

use crate::model::{Attachment, Issue, ProjectRole};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use jira::JiraClient;
pub use memory::{MemoryTracker, TrackerCall};

/// Fields requested by the sync cycle searches
pub const SYNC_FIELDS: &[&str] = &[
    "summary",
    "description",
    "status",
    "severity",
    "updated",
    "attachment",
];

/// Search request against one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Base JQL, optionally ending in an ORDER BY clause
    pub jql: String,
    /// Role attached to every returned issue
    pub role: ProjectRole,
    pub fields: Vec<String>,
    /// Lower bound on the `updated` field
    pub updated_since: Option<DateTime<Utc>>,
}

impl SearchQuery {
    /// All issues of a project, oldest update first
    pub fn project(project_key: &str, role: ProjectRole) -> Self {
        Self {
            jql: format!("project = {} ORDER BY updated ASC", project_key),
            role,
            fields: SYNC_FIELDS.iter().map(|f| f.to_string()).collect(),
            updated_since: None,
        }
    }

    /// Restrict to issues updated at or after `since`
    pub fn updated_since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.updated_since = since;
        self
    }

    /// Project key named by the query's `project = KEY` clause
    pub fn project_key(&self) -> Option<&str> {
        let rest = self.jql.trim().strip_prefix("project")?.trim_start();
        let rest = rest.strip_prefix('=')?.trim_start();
        rest.split_whitespace().next()
    }
}

/// Fields for a new issue
#[derive(Debug, Clone, PartialEq)]
pub struct NewIssue {
    pub project_key: String,
    pub issue_type: String,
    pub summary: String,
    pub description: String,
    pub severity: Option<serde_json::Value>,
}

/// Identity of a freshly created issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIssue {
    pub key: String,
    pub id: String,
    pub url: String,
}

/// Outcome of a transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was executed
    Applied,
    /// No transition leads to the requested status; nothing was changed
    Unavailable,
}

/// Authenticated account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub account_id: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// Project summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub key: String,
    pub name: String,
}

/// Jira status category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCategory {
    ToDo,
    InProgress,
    Done,
    Unknown,
}

impl StatusCategory {
    /// Map a Jira status category key ("new", "indeterminate", "done")
    pub fn from_key(key: &str) -> Self {
        match key.to_lowercase().as_str() {
            "new" => StatusCategory::ToDo,
            "indeterminate" => StatusCategory::InProgress,
            "done" => StatusCategory::Done,
            _ => StatusCategory::Unknown,
        }
    }
}

/// Status name to category for one project
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCategoryMap {
    categories: HashMap<String, StatusCategory>,
}

impl StatusCategoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, status: impl Into<String>, category: StatusCategory) {
        self.categories.insert(status.into().to_lowercase(), category);
    }

    /// Category of a status; lookups ignore case
    pub fn category(&self, status: &str) -> StatusCategory {
        self.categories
            .get(&status.trim().to_lowercase())
            .copied()
            .unwrap_or(StatusCategory::Unknown)
    }

    pub fn is_done(&self, status: &str) -> bool {
        self.category(status) == StatusCategory::Done
    }

    pub fn contains(&self, status: &str) -> bool {
        self.categories.contains_key(&status.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl FromIterator<(String, StatusCategory)> for StatusCategoryMap {
    fn from_iter<I: IntoIterator<Item = (String, StatusCategory)>>(iter: I) -> Self {
        let mut map = StatusCategoryMap::new();
        for (status, category) in iter {
            map.insert(status, category);
        }
        map
    }
}

/// Operations the sync engine needs from an issue tracker
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Search issues, following pagination to the end
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Issue>>;

    /// Fetch one issue
    async fn get_issue(&self, key: &str, role: ProjectRole) -> Result<Issue>;

    /// Create an issue
    async fn create_issue(&self, issue: &NewIssue) -> Result<CreatedIssue>;

    /// Update fields of an issue
    async fn update_issue(&self, key: &str, fields: serde_json::Value) -> Result<()>;

    /// Move an issue to the named status
    ///
    /// Returns [`TransitionOutcome::Unavailable`] with a warning logged when
    /// the workflow offers no matching transition.
    async fn transition(&self, key: &str, status: &str) -> Result<TransitionOutcome>;

    /// Post a comment
    async fn add_comment(&self, key: &str, body: &str) -> Result<()>;

    /// Download an attachment's content
    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>>;

    /// Upload a file to an issue
    async fn add_attachment(
        &self,
        key: &str,
        filename: &str,
        data: Vec<u8>,
        mime_type: Option<&str>,
    ) -> Result<()>;

    /// Account the credentials belong to
    async fn current_user(&self) -> Result<UserInfo>;

    /// Look up a project
    async fn project(&self, key: &str) -> Result<ProjectInfo>;

    /// Every status used by a project's workflows, with its category
    async fn project_statuses(&self, project_key: &str) -> Result<StatusCategoryMap>;

    /// Browser URL of an issue
    fn issue_url(&self, key: &str) -> String;
}
