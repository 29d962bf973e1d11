//! Jira REST client
//!
//! Implements [`IssueTracker`] against the Jira REST API v2 with basic
//! (email + API token) or bearer (personal access token) authentication.

use super::{
    CreatedIssue, IssueTracker, NewIssue, ProjectInfo, SearchQuery, StatusCategory,
    StatusCategoryMap, TransitionOutcome, UserInfo,
};
use crate::config::{AuthMode, JiraConnection};
use crate::model::{Attachment, Issue, ProjectRole};
use crate::{Result, SyncFlowError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-request timeout for search/query operations (large result sets)
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for single issue fetches
const GET_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// Per-request timeout for attachment transfers
const ATTACHMENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Page size for search pagination
pub const PAGE_SIZE: u32 = 50;

/// Jira API client
pub struct JiraClient {
    client: Client,
    base_url: String,
    api_url: String,
    auth: AuthMode,
    email: Option<String>,
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraSearchResponse {
    #[serde(default)]
    total: Option<u32>,
    issues: Option<Vec<JiraIssue>>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraIssue {
    key: String,
    #[serde(default)]
    fields: JiraFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct JiraFields {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<JiraStatus>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    severity: Option<serde_json::Value>,
    #[serde(default)]
    attachment: Option<Vec<JiraAttachment>>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraStatus {
    name: String,
    #[serde(rename = "statusCategory", default)]
    status_category: Option<JiraStatusCategory>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraStatusCategory {
    key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraAttachment {
    id: String,
    filename: String,
    #[serde(default)]
    size: u64,
    content: String,
    #[serde(rename = "mimeType", default)]
    mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraTransition {
    id: String,
    name: String,
    #[serde(default)]
    to: Option<JiraStatus>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraTransitionsResponse {
    transitions: Vec<JiraTransition>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraCreatedIssue {
    id: String,
    key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraUser {
    #[serde(rename = "accountId", default)]
    account_id: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(rename = "emailAddress", default)]
    email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraProject {
    key: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraIssueTypeStatuses {
    #[serde(default)]
    statuses: Vec<JiraStatus>,
}

#[derive(Debug, Clone, Serialize)]
struct JiraTransitionRequest {
    transition: JiraTransitionId,
}

#[derive(Debug, Clone, Serialize)]
struct JiraTransitionId {
    id: String,
}

#[derive(Debug, Clone, Serialize)]
struct JiraCommentCreate<'a> {
    body: &'a str,
}

/// Format a timestamp for JQL date comparisons (`yyyy-MM-dd HH:mm`, UTC)
pub fn format_jql_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M").to_string()
}

/// Add an `updated >=` clause to a JQL query, ahead of any ORDER BY
pub fn compose_jql(jql: &str, updated_since: Option<DateTime<Utc>>) -> String {
    let Some(since) = updated_since else {
        return jql.to_string();
    };

    let clause = format!("updated >= \"{}\"", format_jql_date(since));
    match jql.to_ascii_lowercase().find("order by") {
        Some(idx) => format!("{} AND {} {}", jql[..idx].trim(), clause, &jql[idx..]),
        None => format!("{} AND {}", jql, clause),
    }
}

/// Parse a Jira timestamp such as `2024-03-01T10:15:30.000+0000`
pub fn parse_jira_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

impl JiraClient {
    /// Create a new Jira client
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(connection: &JiraConnection) -> Result<Self> {
        let client = Client::builder().timeout(SEARCH_TIMEOUT).build()?;
        let base_url = connection.normalized_base_url();
        let api_url = format!("{}/rest/api/2", base_url);

        Ok(Self {
            client,
            base_url,
            api_url,
            auth: connection.auth_type,
            email: connection.email.clone(),
            token: connection.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth {
            AuthMode::Basic => {
                request.basic_auth(self.email.as_deref().unwrap_or_default(), Some(&self.token))
            }
            AuthMode::Token => request.bearer_auth(&self.token),
        }
    }

    /// Map non-success responses to errors
    async fn check(response: Response, context: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncFlowError::Auth(format!(
                    "{}: HTTP {}: {}",
                    context, status, body
                )))
            }
            StatusCode::NOT_FOUND => Err(SyncFlowError::NotFound(context.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);
                Err(SyncFlowError::RateLimited(retry_after))
            }
            status => {
                let error_body = response.text().await.unwrap_or_default();
                Err(SyncFlowError::Tracker(format!(
                    "Jira API error ({}): HTTP {}: {}",
                    context, status, error_body
                )))
            }
        }
    }

    fn to_issue(&self, raw: JiraIssue, role: ProjectRole) -> Issue {
        let fields = raw.fields;
        let updated_at = fields
            .updated
            .as_deref()
            .and_then(parse_jira_date)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Issue {
            status: fields
                .status
                .map(|s| s.name)
                .unwrap_or_else(|| "Unknown".to_string()),
            summary: fields.summary.unwrap_or_else(|| raw.key.clone()),
            description: fields.description.unwrap_or_default(),
            updated_at,
            severity: fields.severity.filter(|v| !v.is_null()),
            attachments: fields
                .attachment
                .unwrap_or_default()
                .into_iter()
                .map(|a| Attachment {
                    id: a.id,
                    filename: a.filename,
                    size: a.size,
                    content_url: a.content,
                    mime_type: a.mime_type,
                })
                .collect(),
            key: raw.key,
            role,
        }
    }

    async fn transitions(&self, key: &str) -> Result<Vec<JiraTransition>> {
        let url = format!("{}/issue/{}/transitions", self.api_url, key);
        let request = self.authorize(self.client.get(&url));
        let response = request.timeout(GET_TIMEOUT).send().await?;
        let response = Self::check(response, &format!("transitions of {}", key)).await?;
        let result: JiraTransitionsResponse = response.json().await?;
        Ok(result.transitions)
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Issue>> {
        let url = format!("{}/search", self.api_url);
        let jql = compose_jql(&query.jql, query.updated_since);
        let fields = query.fields.join(",");

        let mut issues = Vec::new();
        let mut start_at: u32 = 0;

        loop {
            let params = [
                ("jql", jql.clone()),
                ("startAt", start_at.to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
                ("fields", fields.clone()),
            ];

            debug!(jql = %jql, start_at = start_at, "Searching Jira issues");

            let request = self.authorize(self.client.get(&url).query(&params));
            let response = request.timeout(SEARCH_TIMEOUT).send().await?;
            let response = Self::check(response, "search").await?;
            let page: JiraSearchResponse = response.json().await?;

            let page_issues = page.issues.ok_or_else(|| {
                SyncFlowError::Tracker("Unexpected Jira search response: no issues".to_string())
            })?;
            let page_len = page_issues.len() as u32;
            let total = page.total.unwrap_or(page_len);

            issues.extend(
                page_issues
                    .into_iter()
                    .map(|raw| self.to_issue(raw, query.role)),
            );

            if page_len == 0 || issues.len() as u32 >= total {
                break;
            }
            start_at += page_len;
        }

        info!(jql = %jql, count = issues.len(), "Fetched Jira issues");
        Ok(issues)
    }

    async fn get_issue(&self, key: &str, role: ProjectRole) -> Result<Issue> {
        let url = format!("{}/issue/{}", self.api_url, key);

        debug!(key = %key, "Fetching Jira issue");

        let request = self
            .authorize(self.client.get(&url))
            .query(&[("fields", super::SYNC_FIELDS.join(","))]);
        let response = request.timeout(GET_TIMEOUT).send().await?;
        let response = Self::check(response, &format!("issue {}", key)).await?;
        let raw: JiraIssue = response.json().await?;
        Ok(self.to_issue(raw, role))
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<CreatedIssue> {
        let url = format!("{}/issue", self.api_url);

        let mut fields = serde_json::json!({
            "project": { "key": issue.project_key },
            "summary": issue.summary,
            "description": issue.description,
            "issuetype": { "name": issue.issue_type },
        });
        if let Some(ref severity) = issue.severity {
            fields["severity"] = severity.clone();
        }

        let request = self
            .authorize(self.client.post(&url))
            .json(&serde_json::json!({ "fields": fields }));
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        let response = Self::check(response, "create issue").await?;
        let created: JiraCreatedIssue = response.json().await?;

        info!(key = %created.key, project = %issue.project_key, "Created Jira issue");

        Ok(CreatedIssue {
            url: self.issue_url(&created.key),
            key: created.key,
            id: created.id,
        })
    }

    async fn update_issue(&self, key: &str, fields: serde_json::Value) -> Result<()> {
        let url = format!("{}/issue/{}", self.api_url, key);

        let request = self
            .authorize(self.client.put(&url))
            .json(&serde_json::json!({ "fields": fields }));
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        Self::check(response, &format!("update {}", key)).await?;

        info!(key = %key, "Updated Jira issue");
        Ok(())
    }

    async fn transition(&self, key: &str, status: &str) -> Result<TransitionOutcome> {
        let wanted = status.trim().to_lowercase();
        let transitions = self.transitions(key).await?;

        let target = transitions.iter().find(|t| t.name.to_lowercase() == wanted).or_else(|| {
            transitions.iter().find(|t| {
                t.to
                    .as_ref()
                    .map(|to| to.name.to_lowercase() == wanted)
                    .unwrap_or(false)
            })
        });

        let Some(target) = target else {
            warn!(key = %key, transition = %status, "Transition not found, skipping");
            return Ok(TransitionOutcome::Unavailable);
        };

        let url = format!("{}/issue/{}/transitions", self.api_url, key);
        let body = JiraTransitionRequest {
            transition: JiraTransitionId {
                id: target.id.clone(),
            },
        };

        let request = self.authorize(self.client.post(&url)).json(&body);
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        Self::check(response, &format!("transition {}", key)).await?;

        info!(key = %key, transition = %target.name, "Transitioned issue");
        Ok(TransitionOutcome::Applied)
    }

    async fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        let url = format!("{}/issue/{}/comment", self.api_url, key);

        let request = self
            .authorize(self.client.post(&url))
            .json(&JiraCommentCreate { body });
        let response = request.timeout(WRITE_TIMEOUT).send().await?;
        Self::check(response, &format!("comment on {}", key)).await?;

        info!(key = %key, "Added comment");
        Ok(())
    }

    async fn download_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        debug!(filename = %attachment.filename, url = %attachment.content_url, "Downloading attachment");

        let request = self.authorize(self.client.get(&attachment.content_url));
        let response = request.timeout(ATTACHMENT_TIMEOUT).send().await?;
        let response =
            Self::check(response, &format!("attachment {}", attachment.filename)).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn add_attachment(
        &self,
        key: &str,
        filename: &str,
        data: Vec<u8>,
        mime_type: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/issue/{}/attachments", self.api_url, key);

        let mut part = reqwest::multipart::Part::bytes(data).file_name(filename.to_string());
        if let Some(mime) = mime_type {
            part = part.mime_str(mime)?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);

        let request = self
            .authorize(self.client.post(&url))
            .header("X-Atlassian-Token", "no-check")
            .multipart(form);
        let response = request.timeout(ATTACHMENT_TIMEOUT).send().await?;
        Self::check(response, &format!("attach to {}", key)).await?;

        info!(key = %key, filename = %filename, "Uploaded attachment");
        Ok(())
    }

    async fn current_user(&self) -> Result<UserInfo> {
        let url = format!("{}/myself", self.api_url);
        let request = self.authorize(self.client.get(&url));
        let response = request.timeout(GET_TIMEOUT).send().await?;
        let response = Self::check(response, "current user").await?;
        let user: JiraUser = response.json().await?;

        Ok(UserInfo {
            account_id: user.account_id.or(user.key).or(user.name),
            display_name: user.display_name,
            email: user.email,
        })
    }

    async fn project(&self, key: &str) -> Result<ProjectInfo> {
        let url = format!("{}/project/{}", self.api_url, key);
        let request = self.authorize(self.client.get(&url));
        let response = request.timeout(GET_TIMEOUT).send().await?;
        let response = Self::check(response, &format!("project {}", key)).await?;
        let project: JiraProject = response.json().await?;

        Ok(ProjectInfo {
            key: project.key,
            name: project.name,
        })
    }

    async fn project_statuses(&self, project_key: &str) -> Result<StatusCategoryMap> {
        let url = format!("{}/project/{}/statuses", self.api_url, project_key);
        let request = self.authorize(self.client.get(&url));
        let response = request.timeout(GET_TIMEOUT).send().await?;
        let response = Self::check(response, &format!("statuses of {}", project_key)).await?;
        let issue_types: Vec<JiraIssueTypeStatuses> = response.json().await?;

        Ok(issue_types
            .into_iter()
            .flat_map(|t| t.statuses)
            .map(|s| {
                let category = s
                    .status_category
                    .map(|c| StatusCategory::from_key(&c.key))
                    .unwrap_or(StatusCategory::Unknown);
                (s.name, category)
            })
            .collect())
    }

    fn issue_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.base_url, key)
    }
}
