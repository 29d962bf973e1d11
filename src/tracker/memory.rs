//! In-memory issue tracker
//!
//! Keeps issues, comments and attachments in process memory and records
//! every call, so sync behavior can be exercised and asserted without a
//! Jira instance.

use super::{
    CreatedIssue, IssueTracker, NewIssue, ProjectInfo, SearchQuery, StatusCategory,
    StatusCategoryMap, TransitionOutcome, UserInfo,
};
use crate::model::{Attachment, Issue, ProjectRole};
use crate::{Result, SyncFlowError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A recorded gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerCall {
    Search { project: String },
    GetIssue { key: String },
    Create { project: String, key: String },
    Update { key: String },
    Transition { key: String, status: String },
    Comment { key: String, body: String },
    Download { filename: String },
    Attach { key: String, filename: String },
}

impl TrackerCall {
    /// Whether the call changes tracker state
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            TrackerCall::Create { .. }
                | TrackerCall::Update { .. }
                | TrackerCall::Transition { .. }
                | TrackerCall::Comment { .. }
                | TrackerCall::Attach { .. }
        )
    }
}

#[derive(Debug, Default)]
struct State {
    issues: HashMap<String, Issue>,
    extra_fields: HashMap<String, serde_json::Map<String, serde_json::Value>>,
    comments: HashMap<String, Vec<String>>,
    blobs: HashMap<String, Vec<u8>>,
    statuses: HashMap<String, StatusCategoryMap>,
    unavailable: HashSet<String>,
    forbidden_fields: HashSet<String>,
    failing_downloads: HashSet<String>,
    failing_keys: HashSet<String>,
    next_id: u64,
    clock: Option<DateTime<Utc>>,
    calls: Vec<TrackerCall>,
}

/// Tracker backed by process memory
pub struct MemoryTracker {
    base_url: String,
    state: Mutex<State>,
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new("https://tracker.invalid")
    }
}

impl MemoryTracker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            state: Mutex::new(State {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(state: &mut State) -> DateTime<Utc> {
        let next = match state.clock {
            Some(t) => t + Duration::seconds(1),
            None => Utc::now(),
        };
        state.clock = Some(next);
        next
    }

    /// Add or replace an issue
    pub fn put_issue(&self, issue: Issue) {
        let mut state = self.lock();
        state.issues.insert(issue.key.clone(), issue);
    }

    /// Insert a new issue with the given status
    pub fn seed(&self, key: &str, role: ProjectRole, status: &str, summary: &str) -> Issue {
        let mut state = self.lock();
        let issue = Issue {
            key: key.to_string(),
            role,
            status: status.to_string(),
            summary: summary.to_string(),
            description: String::new(),
            updated_at: Self::now(&mut state),
            severity: None,
            attachments: Vec::new(),
        };
        state.issues.insert(key.to_string(), issue.clone());
        issue
    }

    /// Change an issue's status as a user would in the UI
    pub fn set_status(&self, key: &str, status: &str) {
        let mut state = self.lock();
        let now = Self::now(&mut state);
        if let Some(issue) = state.issues.get_mut(key) {
            issue.status = status.to_string();
            issue.updated_at = now;
        }
    }

    /// Attach a file with content to an existing issue
    pub fn seed_attachment(&self, key: &str, filename: &str, data: &[u8]) {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let url = format!("{}/attachment/{}", self.base_url, id);
        state.blobs.insert(url.clone(), data.to_vec());
        if let Some(issue) = state.issues.get_mut(key) {
            issue.attachments.push(Attachment {
                id: id.to_string(),
                filename: filename.to_string(),
                size: data.len() as u64,
                content_url: url,
                mime_type: None,
            });
        }
    }

    /// Register the status categories of a project
    pub fn set_statuses(&self, project_key: &str, statuses: &[(&str, StatusCategory)]) {
        let mut state = self.lock();
        let map = statuses
            .iter()
            .map(|(name, category)| (name.to_string(), *category))
            .collect();
        state.statuses.insert(project_key.to_string(), map);
    }

    /// Make transitions to a status unavailable
    pub fn block_transition(&self, status: &str) {
        let mut state = self.lock();
        state.unavailable.insert(status.to_lowercase());
    }

    /// Reject updates that touch this field
    pub fn forbid_field(&self, field: &str) {
        let mut state = self.lock();
        state.forbidden_fields.insert(field.to_string());
    }

    /// Fail downloads of attachments with this filename
    pub fn fail_download(&self, filename: &str) {
        let mut state = self.lock();
        state.failing_downloads.insert(filename.to_string());
    }

    /// Fail every write on this issue with a server error
    pub fn fail_writes_on(&self, key: &str) {
        let mut state = self.lock();
        state.failing_keys.insert(key.to_string());
    }

    pub fn issue(&self, key: &str) -> Option<Issue> {
        self.lock().issues.get(key).cloned()
    }

    pub fn comments(&self, key: &str) -> Vec<String> {
        self.lock().comments.get(key).cloned().unwrap_or_default()
    }

    /// Value of a field set through `update_issue`
    pub fn field(&self, key: &str, field: &str) -> Option<serde_json::Value> {
        self.lock()
            .extra_fields
            .get(key)
            .and_then(|f| f.get(field).cloned())
    }

    /// Issues of one role, in key order
    pub fn issues_in(&self, role: ProjectRole) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .lock()
            .issues
            .values()
            .filter(|i| i.role == role)
            .cloned()
            .collect();
        issues.sort_by(|a, b| a.key.cmp(&b.key));
        issues
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.lock().calls.clone()
    }

    pub fn write_calls(&self) -> Vec<TrackerCall> {
        self.calls().into_iter().filter(TrackerCall::is_write).collect()
    }

    pub fn clear_calls(&self) {
        let mut state = self.lock();
        state.calls.clear();
    }

    fn role_of(key: &str, state: &State) -> Option<ProjectRole> {
        state.issues.get(key).map(|i| i.role)
    }

    fn check_writable(state: &State, key: &str) -> Result<()> {
        if state.failing_keys.contains(key) {
            return Err(SyncFlowError::Tracker(format!(
                "Jira API error (write {}): HTTP 503 Service Unavailable: ",
                key
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for MemoryTracker {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Issue>> {
        let mut state = self.lock();
        let project = query.project_key().unwrap_or_default().to_string();
        state.calls.push(TrackerCall::Search {
            project: project.clone(),
        });

        let prefix = format!("{}-", project);
        let mut issues: Vec<Issue> = state
            .issues
            .values()
            .filter(|i| i.key.starts_with(&prefix))
            .filter(|i| query.updated_since.map_or(true, |since| i.updated_at >= since))
            .cloned()
            .map(|mut i| {
                i.role = query.role;
                i
            })
            .collect();
        issues.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.key.cmp(&b.key)));
        Ok(issues)
    }

    async fn get_issue(&self, key: &str, role: ProjectRole) -> Result<Issue> {
        let mut state = self.lock();
        state.calls.push(TrackerCall::GetIssue {
            key: key.to_string(),
        });
        state
            .issues
            .get(key)
            .cloned()
            .map(|mut i| {
                i.role = role;
                i
            })
            .ok_or_else(|| SyncFlowError::NotFound(format!("issue {}", key)))
    }

    async fn create_issue(&self, new: &NewIssue) -> Result<CreatedIssue> {
        let mut state = self.lock();
        let count = state
            .issues
            .keys()
            .filter(|k| k.starts_with(&format!("{}-", new.project_key)))
            .count();
        let key = format!("{}-{}", new.project_key, count + 1);
        let id = state.next_id;
        state.next_id += 1;

        let role = state
            .issues
            .values()
            .find(|i| i.key.starts_with(&format!("{}-", new.project_key)))
            .map(|i| i.role)
            .unwrap_or(ProjectRole::Target);
        let updated_at = Self::now(&mut state);

        state.issues.insert(
            key.clone(),
            Issue {
                key: key.clone(),
                role,
                status: "Open".to_string(),
                summary: new.summary.clone(),
                description: new.description.clone(),
                updated_at,
                severity: new.severity.clone(),
                attachments: Vec::new(),
            },
        );
        state.calls.push(TrackerCall::Create {
            project: new.project_key.clone(),
            key: key.clone(),
        });

        Ok(CreatedIssue {
            url: self.issue_url(&key),
            key,
            id: id.to_string(),
        })
    }

    async fn update_issue(&self, key: &str, fields: serde_json::Value) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(TrackerCall::Update {
            key: key.to_string(),
        });
        Self::check_writable(&state, key)?;

        let serde_json::Value::Object(fields) = fields else {
            return Err(SyncFlowError::Tracker(
                "update fields must be an object".to_string(),
            ));
        };
        if let Some(name) = fields.keys().find(|f| state.forbidden_fields.contains(*f)) {
            return Err(SyncFlowError::Tracker(format!(
                "Jira API error (update {}): HTTP 400 Bad Request: Field '{}' cannot be set",
                key, name
            )));
        }

        let now = Self::now(&mut state);
        let issue = state
            .issues
            .get_mut(key)
            .ok_or_else(|| SyncFlowError::NotFound(format!("issue {}", key)))?;
        issue.updated_at = now;

        let mut extra = serde_json::Map::new();
        for (name, value) in fields {
            match (name.as_str(), value.as_str()) {
                ("description", Some(text)) => issue.description = text.to_string(),
                ("summary", Some(text)) => issue.summary = text.to_string(),
                _ => {
                    extra.insert(name, value);
                }
            }
        }
        state
            .extra_fields
            .entry(key.to_string())
            .or_default()
            .extend(extra);
        Ok(())
    }

    async fn transition(&self, key: &str, status: &str) -> Result<TransitionOutcome> {
        let mut state = self.lock();
        state.calls.push(TrackerCall::Transition {
            key: key.to_string(),
            status: status.to_string(),
        });
        Self::check_writable(&state, key)?;

        if state.unavailable.contains(&status.to_lowercase()) {
            tracing::warn!(key = %key, transition = %status, "Transition not found, skipping");
            return Ok(TransitionOutcome::Unavailable);
        }

        let now = Self::now(&mut state);
        let issue = state
            .issues
            .get_mut(key)
            .ok_or_else(|| SyncFlowError::NotFound(format!("issue {}", key)))?;
        issue.status = status.to_string();
        issue.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    async fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(TrackerCall::Comment {
            key: key.to_string(),
            body: body.to_string(),
        });
        Self::check_writable(&state, key)?;
        if Self::role_of(key, &state).is_none() {
            return Err(SyncFlowError::NotFound(format!("issue {}", key)));
        }
        state
            .comments
            .entry(key.to_string())
            .or_default()
            .push(body.to_string());
        Ok(())
    }

    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        let mut state = self.lock();
        state.calls.push(TrackerCall::Download {
            filename: attachment.filename.clone(),
        });
        if state.failing_downloads.contains(&attachment.filename) {
            return Err(SyncFlowError::Network(format!(
                "connection reset while downloading {}",
                attachment.filename
            )));
        }
        state
            .blobs
            .get(&attachment.content_url)
            .cloned()
            .ok_or_else(|| SyncFlowError::NotFound(format!("attachment {}", attachment.id)))
    }

    async fn add_attachment(
        &self,
        key: &str,
        filename: &str,
        data: Vec<u8>,
        mime_type: Option<&str>,
    ) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(TrackerCall::Attach {
            key: key.to_string(),
            filename: filename.to_string(),
        });
        Self::check_writable(&state, key)?;

        let id = state.next_id;
        state.next_id += 1;
        let url = format!("{}/attachment/{}", self.base_url, id);
        let size = data.len() as u64;
        state.blobs.insert(url.clone(), data);

        let issue = state
            .issues
            .get_mut(key)
            .ok_or_else(|| SyncFlowError::NotFound(format!("issue {}", key)))?;
        issue.attachments.push(Attachment {
            id: id.to_string(),
            filename: filename.to_string(),
            size,
            content_url: url,
            mime_type: mime_type.map(str::to_string),
        });
        Ok(())
    }

    async fn current_user(&self) -> Result<UserInfo> {
        Ok(UserInfo {
            account_id: Some("memory".to_string()),
            display_name: Some("In-memory tracker".to_string()),
            email: None,
        })
    }

    async fn project(&self, key: &str) -> Result<ProjectInfo> {
        Ok(ProjectInfo {
            key: key.to_string(),
            name: key.to_string(),
        })
    }

    async fn project_statuses(&self, project_key: &str) -> Result<StatusCategoryMap> {
        Ok(self
            .lock()
            .statuses
            .get(project_key)
            .cloned()
            .unwrap_or_default())
    }

    fn issue_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_filters_by_project_and_time() {
        let tracker = MemoryTracker::default();
        let first = tracker.seed("USR-1", ProjectRole::Source, "Open", "one");
        tracker.seed("USR-2", ProjectRole::Source, "Open", "two");
        tracker.seed("DEV-1", ProjectRole::Target, "Open", "dev");

        let all = tracker
            .search(&SearchQuery::project("USR", ProjectRole::Source))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let later = tracker
            .search(
                &SearchQuery::project("USR", ProjectRole::Source)
                    .updated_since(Some(first.updated_at + Duration::milliseconds(1))),
            )
            .await
            .unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].key, "USR-2");
    }

    #[tokio::test]
    async fn test_writes_are_recorded() {
        let tracker = MemoryTracker::default();
        tracker.seed("DEV-1", ProjectRole::Target, "Open", "dev");

        tracker.transition("DEV-1", "In Progress").await.unwrap();
        tracker.add_comment("DEV-1", "hello").await.unwrap();
        tracker
            .update_issue("DEV-1", serde_json::json!({ "replied": true }))
            .await
            .unwrap();

        assert_eq!(tracker.issue("DEV-1").unwrap().status, "In Progress");
        assert_eq!(tracker.comments("DEV-1"), vec!["hello".to_string()]);
        assert_eq!(
            tracker.field("DEV-1", "replied"),
            Some(serde_json::Value::Bool(true))
        );
        assert_eq!(tracker.write_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_blocked_transition_and_forbidden_field() {
        let tracker = MemoryTracker::default();
        tracker.seed("USR-1", ProjectRole::Source, "Open", "x");
        tracker.block_transition("Resolved");
        tracker.forbid_field("replied");

        assert_eq!(
            tracker.transition("USR-1", "Resolved").await.unwrap(),
            TransitionOutcome::Unavailable
        );
        assert!(tracker
            .update_issue("USR-1", serde_json::json!({ "replied": true }))
            .await
            .is_err());
    }
}
