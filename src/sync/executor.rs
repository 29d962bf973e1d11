//! Sync actions
//!
//! Carries out the actions a matched rule authorizes. The *originating*
//! issue is the one whose status changed; its *counterpart* lives in the
//! other project of the tenant. Every action is guarded so that running the
//! same rule twice for the same change does no additional writes.

use super::audit::{self, CycleReport};
use crate::config::{Rule, TenantConfig};
use crate::model::{Attachment, Issue, Mapping, ProjectRole, StatusChangeEvent};
use crate::store::SyncStore;
use crate::tracker::description::{append_link, has_link};
use crate::tracker::{IssueTracker, NewIssue, StatusCategoryMap, TransitionOutcome};
use crate::Result;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;

/// Writes performed by one rule execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Key of the issue created in the other project
    pub created_key: Option<String>,
    pub status_synced: bool,
    pub comments_posted: usize,
    pub links_added: usize,
    pub attachments_copied: usize,
    pub tolerated_failures: usize,
}

impl ActionOutcome {
    /// True when nothing was written to the tracker
    pub fn is_noop(&self) -> bool {
        self.created_key.is_none()
            && !self.status_synced
            && self.comments_posted == 0
            && self.links_added == 0
            && self.attachments_copied == 0
    }

    /// Add this outcome's counters to a cycle report
    pub fn record(&self, report: &mut CycleReport) {
        if self.created_key.is_some() {
            report.issues_created += 1;
        }
        if self.status_synced {
            report.statuses_synced += 1;
        }
        report.comments_posted += self.comments_posted;
        report.attachments_copied += self.attachments_copied;
        report.tolerated_failures += self.tolerated_failures;
    }
}

/// Replace `${sourceKey}` and `${targetKey}` in a template
pub fn render_template(template: &str, source_key: &str, target_key: &str) -> String {
    template
        .replace("${sourceKey}", source_key)
        .replace("${targetKey}", target_key)
}

/// Replace `${sourceKey}` in a status template
///
/// The counterpart key is not known yet when the status is picked, so
/// `${targetKey}` is left as written.
pub fn render_status_template(template: &str, source_key: &str) -> String {
    template.replace("${sourceKey}", source_key)
}

/// Status the counterpart issue should move to
///
/// `actions.targetStatus` wins, then the rule's `targetStatus`, then the
/// rule's own source status. A wildcard rule without an explicit target
/// mirrors the new status.
pub fn resolve_target_status(rule: &Rule, event: &StatusChangeEvent) -> String {
    if let Some(status) = rule.actions.target_status.as_deref() {
        return render_status_template(status, &event.issue_key)
            .trim()
            .to_string();
    }
    if let Some(status) = rule.target_status.as_deref() {
        return status.trim().to_string();
    }
    if rule.is_wildcard() {
        event.to_status.trim().to_string()
    } else {
        rule.source_status.trim().to_string()
    }
}

/// Executes rule actions for one tenant
///
/// Status categories are fetched once per project and kept for the
/// lifetime of the executor, which is one sync cycle.
pub struct Executor<'a> {
    config: &'a TenantConfig,
    tracker: &'a dyn IssueTracker,
    store: &'a dyn SyncStore,
    status_categories: HashMap<ProjectRole, StatusCategoryMap>,
}

impl<'a> Executor<'a> {
    pub fn new(
        config: &'a TenantConfig,
        tracker: &'a dyn IssueTracker,
        store: &'a dyn SyncStore,
    ) -> Self {
        Self {
            config,
            tracker,
            store,
            status_categories: HashMap::new(),
        }
    }

    /// Run the actions of `rule` for a status change of `issue`
    ///
    /// Issue creation only happens without a mapping; status sync and cross
    /// links only with one. A source issue sent to a done-category status
    /// gets the replied flag even when no transition was needed. Tracker
    /// failures propagate, except for the attachment copy and the replied
    /// flag which are logged and counted.
    pub async fn execute(
        &mut self,
        issue: &Issue,
        rule: &Rule,
        mapping: Option<&Mapping>,
        event: &StatusChangeEvent,
    ) -> Result<ActionOutcome> {
        let mut outcome = ActionOutcome::default();
        let actions = &rule.actions;

        match mapping {
            None if actions.create_issue => {
                self.create_linked_issue(issue, rule, &mut outcome).await?;
            }
            None => {
                tracing::debug!(
                    issue = %issue.key,
                    rule = %rule.id,
                    "No mapping, nothing to do"
                );
            }
            Some(mapping) => {
                if actions.create_issue {
                    tracing::debug!(
                        issue = %issue.key,
                        counterpart = mapping.key_for(issue.role.counterpart()),
                        "Already linked, not creating another issue"
                    );
                }
                if actions.sync_status {
                    self.sync_status(rule, mapping, event, &mut outcome).await?;
                }
                if actions.add_cross_link {
                    self.add_cross_link(mapping, issue.role, &mut outcome).await?;
                }
            }
        }

        Ok(outcome)
    }

    async fn create_linked_issue(
        &mut self,
        issue: &Issue,
        rule: &Rule,
        outcome: &mut ActionOutcome,
    ) -> Result<()> {
        let origin_role = issue.role;
        let destination = origin_role.counterpart();
        let origin_url = self.tracker.issue_url(&issue.key);

        let new_issue = NewIssue {
            project_key: self.config.project_key(destination).to_string(),
            issue_type: self.config.issue_type.clone(),
            summary: issue.summary.clone(),
            description: append_link(&issue.description, &origin_url),
            severity: issue.severity.clone(),
        };
        let created = self.tracker.create_issue(&new_issue).await?;
        audit::action_create_issue(&issue.key, &created.key, &rule.id);

        let mapping = match origin_role {
            ProjectRole::Source => Mapping {
                source_key: issue.key.clone(),
                target_key: created.key.clone(),
                source_url: origin_url,
                target_url: created.url.clone(),
                created_at: Utc::now(),
            },
            ProjectRole::Target => Mapping {
                source_key: created.key.clone(),
                target_key: issue.key.clone(),
                source_url: created.url.clone(),
                target_url: origin_url,
                created_at: Utc::now(),
            },
        };
        self.store.insert_mapping(&mapping)?;
        outcome.created_key = Some(created.key.clone());

        if rule.actions.add_cross_link && !has_link(&issue.description, &created.url) {
            let description = append_link(&issue.description, &created.url);
            self.tracker
                .update_issue(&issue.key, json!({ "description": description }))
                .await?;
            outcome.links_added += 1;
        }

        if rule.actions.sync_attachments || self.config.default_behavior.sync_attachments {
            self.copy_attachments(&issue.attachments, &[], &created.key, outcome)
                .await;
        }

        self.post_comment(rule, &issue.key, &created.key, &mapping, outcome)
            .await
    }

    async fn sync_status(
        &mut self,
        rule: &Rule,
        mapping: &Mapping,
        event: &StatusChangeEvent,
        outcome: &mut ActionOutcome,
    ) -> Result<()> {
        let destination = event.role.counterpart();
        let destination_key = mapping.key_for(destination);
        let status = resolve_target_status(rule, event);

        let current = self.tracker.get_issue(destination_key, destination).await?;
        let transitioned = if current.status.trim() == status {
            tracing::debug!(
                issue = %destination_key,
                status = %status,
                "Destination already in status, skipping transition"
            );
            false
        } else {
            match self.tracker.transition(destination_key, &status).await? {
                TransitionOutcome::Applied => true,
                TransitionOutcome::Unavailable => false,
            }
        };
        audit::action_sync_status(&event.issue_key, destination_key, &status, transitioned);
        outcome.status_synced = transitioned;

        if self.marks_replied(destination, &status).await? {
            let mut fields = serde_json::Map::new();
            fields.insert(self.config.replied_field.clone(), json!(true));
            // Some tracker schemes refuse the field; the transition stands.
            if let Err(e) = self
                .tracker
                .update_issue(destination_key, serde_json::Value::Object(fields))
                .await
            {
                audit::tolerated_failure(destination_key, "set replied field", &e);
                outcome.tolerated_failures += 1;
            }
        }

        self.post_comment(
            rule,
            &event.issue_key,
            mapping.key_for(event.role.counterpart()),
            mapping,
            outcome,
        )
        .await
    }

    async fn add_cross_link(
        &mut self,
        mapping: &Mapping,
        origin_role: ProjectRole,
        outcome: &mut ActionOutcome,
    ) -> Result<()> {
        let destination = origin_role.counterpart();
        let destination_key = mapping.key_for(destination);
        let link = mapping.url_for(origin_role);

        let current = self.tracker.get_issue(destination_key, destination).await?;
        if has_link(&current.description, link) {
            return Ok(());
        }

        let description = append_link(&current.description, link);
        self.tracker
            .update_issue(destination_key, json!({ "description": description }))
            .await?;
        outcome.links_added += 1;
        Ok(())
    }

    /// Copy attachments of a mapped source issue missing on its target
    pub async fn sync_new_attachments(
        &mut self,
        issue: &Issue,
        mapping: &Mapping,
    ) -> Result<ActionOutcome> {
        let mut outcome = ActionOutcome::default();
        if issue.attachments.is_empty() {
            return Ok(outcome);
        }

        let destination = issue.role.counterpart();
        let destination_key = mapping.key_for(destination);
        let target = self.tracker.get_issue(destination_key, destination).await?;

        self.copy_attachments(
            &issue.attachments,
            &target.attachments,
            destination_key,
            &mut outcome,
        )
        .await;
        Ok(outcome)
    }

    /// Best-effort copy; a failed file is logged and skipped
    async fn copy_attachments(
        &self,
        attachments: &[Attachment],
        existing: &[Attachment],
        destination_key: &str,
        outcome: &mut ActionOutcome,
    ) {
        for attachment in attachments
            .iter()
            .filter(|a| !existing.iter().any(|e| e.same_file(a)))
        {
            let copied = match self.tracker.download_attachment(attachment).await {
                Ok(data) => {
                    self.tracker
                        .add_attachment(
                            destination_key,
                            &attachment.filename,
                            data,
                            attachment.mime_type.as_deref(),
                        )
                        .await
                }
                Err(e) => Err(e),
            };

            match copied {
                Ok(()) => {
                    tracing::debug!(
                        issue = %destination_key,
                        filename = %attachment.filename,
                        "Attachment copied"
                    );
                    outcome.attachments_copied += 1;
                }
                Err(e) => {
                    audit::tolerated_failure(destination_key, "copy attachment", &e);
                    outcome.tolerated_failures += 1;
                }
            }
        }
    }

    /// Post the rule's comment on the source-project issue of the pair
    async fn post_comment(
        &self,
        rule: &Rule,
        origin_key: &str,
        counterpart_key: &str,
        mapping: &Mapping,
        outcome: &mut ActionOutcome,
    ) -> Result<()> {
        if !rule.actions.add_comment {
            return Ok(());
        }
        let Some(template) = rule
            .actions
            .comment_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
        else {
            return Ok(());
        };

        let body = render_template(template, origin_key, counterpart_key);
        self.tracker.add_comment(&mapping.source_key, &body).await?;
        outcome.comments_posted += 1;
        Ok(())
    }

    /// Whether moving an issue of `role` to `status` also sets the replied flag
    async fn marks_replied(&mut self, role: ProjectRole, status: &str) -> Result<bool> {
        if role != ProjectRole::Source || self.config.replied_field.trim().is_empty() {
            return Ok(false);
        }

        if !self.status_categories.contains_key(&role) {
            let categories = self
                .tracker
                .project_statuses(self.config.project_key(role))
                .await?;
            self.status_categories.insert(role, categories);
        }

        Ok(self
            .status_categories
            .get(&role)
            .is_some_and(|categories| categories.is_done(status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Direction, RuleActions, RuleConditions};
    use crate::store::SqliteStore;
    use crate::tracker::{MemoryTracker, StatusCategory, TrackerCall};

    fn config() -> TenantConfig {
        TenantConfig::new("acme", "https://jira.test", "USR", "DEV")
            .with_credentials("bot@acme.io", "token")
    }

    fn change(key: &str, role: ProjectRole, from: Option<&str>, to: &str) -> StatusChangeEvent {
        StatusChangeEvent {
            issue_key: key.to_string(),
            role,
            from_status: from.map(str::to_string),
            to_status: to.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn create_rule() -> Rule {
        Rule::new("user-will-do", "Will Do", Direction::SourceToTarget, ProjectRole::Target)
            .with_conditions(RuleConditions {
                require_mapping: Some(false),
                only_on_change: None,
            })
            .with_actions(RuleActions {
                create_issue: true,
                add_comment: true,
                comment_template: Some("Linked to ${targetKey}".to_string()),
                ..Default::default()
            })
    }

    fn resolve_rule() -> Rule {
        Rule::new("dev-closed", "Closed", Direction::TargetToSource, ProjectRole::Source)
            .with_actions(RuleActions {
                sync_status: true,
                add_comment: true,
                comment_template: Some("${sourceKey} was closed".to_string()),
                target_status: Some("Resolved".to_string()),
                ..Default::default()
            })
    }

    fn mapping(tracker: &MemoryTracker, source: &str, target: &str) -> Mapping {
        Mapping {
            source_key: source.to_string(),
            target_key: target.to_string(),
            source_url: tracker.issue_url(source),
            target_url: tracker.issue_url(target),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_status_template_keeps_target_placeholder() {
        assert_eq!(
            render_status_template("${sourceKey}/${targetKey}", "DEV-1"),
            "DEV-1/${targetKey}"
        );
    }

    #[test]
    fn test_render_template() {
        assert_eq!(
            render_template("${sourceKey} -> ${targetKey} (${sourceKey})", "USR-1", "DEV-9"),
            "USR-1 -> DEV-9 (USR-1)"
        );
    }

    #[test]
    fn test_resolve_target_status() {
        let event = change("DEV-1", ProjectRole::Target, Some("Open"), "Closed");

        let rule = resolve_rule();
        assert_eq!(resolve_target_status(&rule, &event), "Resolved");

        let mut rule = resolve_rule();
        rule.actions.target_status = None;
        assert_eq!(resolve_target_status(&rule, &event), "Closed");

        let rule = rule.with_target_status("Done");
        assert_eq!(resolve_target_status(&rule, &event), "Done");

        let wildcard = Rule::new("any", "*", Direction::Both, ProjectRole::Source);
        assert_eq!(resolve_target_status(&wildcard, &event), "Closed");

        let mut templated = resolve_rule();
        templated.actions.target_status = Some("Fixed in ${sourceKey}".to_string());
        assert_eq!(resolve_target_status(&templated, &event), "Fixed in DEV-1");

        templated.actions.target_status = Some("Fixed in ${targetKey}".to_string());
        assert_eq!(
            resolve_target_status(&templated, &event),
            "Fixed in ${targetKey}"
        );
    }

    #[tokio::test]
    async fn test_create_issue_persists_mapping_and_comments() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        let issue = tracker.seed("USR-1", ProjectRole::Source, "Will Do", "Login broken");
        tracker.seed("DEV-7", ProjectRole::Target, "Open", "existing");

        let mut executor = Executor::new(&config, &tracker, &store);
        let event = change("USR-1", ProjectRole::Source, Some("Open"), "Will Do");
        let outcome = executor
            .execute(&issue, &create_rule(), None, &event)
            .await
            .unwrap();

        assert_eq!(outcome.created_key.as_deref(), Some("DEV-2"));
        let created = tracker.issue("DEV-2").unwrap();
        assert_eq!(created.summary, "Login broken");
        assert!(created.description.contains("Link: https://jira.test/browse/USR-1"));

        let stored = store.mapping_by_source("USR-1").unwrap().unwrap();
        assert_eq!(stored.target_key, "DEV-2");
        assert_eq!(tracker.comments("USR-1"), vec!["Linked to DEV-2"]);
    }

    #[tokio::test]
    async fn test_create_issue_guarded_by_mapping() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        let issue = tracker.seed("USR-1", ProjectRole::Source, "Will Do", "Login broken");
        tracker.seed("DEV-1", ProjectRole::Target, "Open", "linked");
        let existing = mapping(&tracker, "USR-1", "DEV-1");
        store.insert_mapping(&existing).unwrap();
        tracker.clear_calls();

        let mut executor = Executor::new(&config, &tracker, &store);
        let event = change("USR-1", ProjectRole::Source, Some("Open"), "Will Do");
        for _ in 0..2 {
            let outcome = executor
                .execute(&issue, &create_rule(), Some(&existing), &event)
                .await
                .unwrap();
            assert!(outcome.is_noop());
        }

        assert!(tracker.write_calls().is_empty());
        assert_eq!(tracker.issues_in(ProjectRole::Target).len(), 1);
    }

    #[tokio::test]
    async fn test_cross_link_on_create() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        let issue = tracker.seed("USR-1", ProjectRole::Source, "Will Do", "Crash");

        let mut rule = create_rule();
        rule.actions.add_cross_link = true;

        let mut executor = Executor::new(&config, &tracker, &store);
        let event = change("USR-1", ProjectRole::Source, Some("Open"), "Will Do");
        let outcome = executor.execute(&issue, &rule, None, &event).await.unwrap();

        assert_eq!(outcome.links_added, 1);
        let origin = tracker.issue("USR-1").unwrap();
        assert!(origin.description.ends_with("Link: https://jira.test/browse/DEV-1"));
    }

    #[tokio::test]
    async fn test_sync_status_resolves_and_marks_replied() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        tracker.seed("USR-1", ProjectRole::Source, "Waiting", "Crash");
        let dev = tracker.seed("DEV-1", ProjectRole::Target, "Closed", "Crash");
        tracker.set_statuses(
            "USR",
            &[("Waiting", StatusCategory::InProgress), ("Resolved", StatusCategory::Done)],
        );
        let link = mapping(&tracker, "USR-1", "DEV-1");

        let mut executor = Executor::new(&config, &tracker, &store);
        let event = change("DEV-1", ProjectRole::Target, Some("In Progress"), "Closed");
        let outcome = executor
            .execute(&dev, &resolve_rule(), Some(&link), &event)
            .await
            .unwrap();

        assert!(outcome.status_synced);
        assert_eq!(tracker.issue("USR-1").unwrap().status, "Resolved");
        assert_eq!(tracker.field("USR-1", "replied"), Some(json!(true)));
        assert_eq!(tracker.comments("USR-1"), vec!["DEV-1 was closed"]);
    }

    #[tokio::test]
    async fn test_sync_status_noop_still_comments() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        tracker.seed("USR-1", ProjectRole::Source, "Resolved", "Crash");
        let dev = tracker.seed("DEV-1", ProjectRole::Target, "Closed", "Crash");
        let link = mapping(&tracker, "USR-1", "DEV-1");
        tracker.clear_calls();

        let mut executor = Executor::new(&config, &tracker, &store);
        let event = change("DEV-1", ProjectRole::Target, Some("In Progress"), "Closed");
        let outcome = executor
            .execute(&dev, &resolve_rule(), Some(&link), &event)
            .await
            .unwrap();

        assert!(!outcome.status_synced);
        assert_eq!(outcome.comments_posted, 1);
        let writes = tracker.write_calls();
        assert!(!writes
            .iter()
            .any(|c| matches!(c, TrackerCall::Transition { .. })));
        assert_eq!(writes.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_status_already_resolved_still_marks_replied() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        tracker.seed("USR-1", ProjectRole::Source, "Resolved", "Crash");
        let dev = tracker.seed("DEV-1", ProjectRole::Target, "Closed", "Crash");
        tracker.set_statuses("USR", &[("Resolved", StatusCategory::Done)]);
        let link = mapping(&tracker, "USR-1", "DEV-1");
        tracker.clear_calls();

        let mut executor = Executor::new(&config, &tracker, &store);
        let event = change("DEV-1", ProjectRole::Target, Some("In Progress"), "Closed");
        let outcome = executor
            .execute(&dev, &resolve_rule(), Some(&link), &event)
            .await
            .unwrap();

        assert!(!outcome.status_synced);
        assert_eq!(tracker.field("USR-1", "replied"), Some(json!(true)));
        assert!(!tracker
            .write_calls()
            .iter()
            .any(|c| matches!(c, TrackerCall::Transition { .. })));
        assert_eq!(tracker.comments("USR-1"), vec!["DEV-1 was closed"]);
    }

    #[tokio::test]
    async fn test_replied_field_failure_is_tolerated() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        tracker.seed("USR-1", ProjectRole::Source, "Waiting", "Crash");
        let dev = tracker.seed("DEV-1", ProjectRole::Target, "Closed", "Crash");
        tracker.set_statuses("USR", &[("Resolved", StatusCategory::Done)]);
        tracker.forbid_field("replied");
        let link = mapping(&tracker, "USR-1", "DEV-1");

        let mut executor = Executor::new(&config, &tracker, &store);
        let event = change("DEV-1", ProjectRole::Target, Some("In Progress"), "Closed");
        let outcome = executor
            .execute(&dev, &resolve_rule(), Some(&link), &event)
            .await
            .unwrap();

        assert!(outcome.status_synced);
        assert_eq!(outcome.tolerated_failures, 1);
        assert_eq!(tracker.issue("USR-1").unwrap().status, "Resolved");
    }

    #[tokio::test]
    async fn test_unavailable_transition_is_not_synced() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        tracker.seed("USR-1", ProjectRole::Source, "Waiting", "Crash");
        let dev = tracker.seed("DEV-1", ProjectRole::Target, "Closed", "Crash");
        tracker.block_transition("Resolved");
        let link = mapping(&tracker, "USR-1", "DEV-1");

        let mut executor = Executor::new(&config, &tracker, &store);
        let event = change("DEV-1", ProjectRole::Target, Some("In Progress"), "Closed");
        let outcome = executor
            .execute(&dev, &resolve_rule(), Some(&link), &event)
            .await
            .unwrap();

        assert!(!outcome.status_synced);
        assert_eq!(tracker.issue("USR-1").unwrap().status, "Waiting");
        assert!(tracker.field("USR-1", "replied").is_none());
    }

    #[tokio::test]
    async fn test_unavailable_transition_to_done_status_marks_replied() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        tracker.seed("USR-1", ProjectRole::Source, "Waiting", "Crash");
        let dev = tracker.seed("DEV-1", ProjectRole::Target, "Closed", "Crash");
        tracker.set_statuses("USR", &[("Resolved", StatusCategory::Done)]);
        tracker.block_transition("Resolved");
        let link = mapping(&tracker, "USR-1", "DEV-1");

        let mut executor = Executor::new(&config, &tracker, &store);
        let event = change("DEV-1", ProjectRole::Target, Some("In Progress"), "Closed");
        let outcome = executor
            .execute(&dev, &resolve_rule(), Some(&link), &event)
            .await
            .unwrap();

        assert!(!outcome.status_synced);
        assert_eq!(tracker.issue("USR-1").unwrap().status, "Waiting");
        assert_eq!(tracker.field("USR-1", "replied"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_gateway_failure_propagates() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        tracker.seed("USR-1", ProjectRole::Source, "Waiting", "Crash");
        let dev = tracker.seed("DEV-1", ProjectRole::Target, "Closed", "Crash");
        tracker.fail_writes_on("USR-1");
        let link = mapping(&tracker, "USR-1", "DEV-1");

        let mut executor = Executor::new(&config, &tracker, &store);
        let event = change("DEV-1", ProjectRole::Target, Some("In Progress"), "Closed");
        let err = executor
            .execute(&dev, &resolve_rule(), Some(&link), &event)
            .await
            .unwrap_err();
        assert!(!err.aborts_cycle());
    }

    #[tokio::test]
    async fn test_add_cross_link_is_idempotent() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        let source = tracker.seed("USR-1", ProjectRole::Source, "Blocked", "Crash");
        tracker.seed("DEV-1", ProjectRole::Target, "Open", "Crash");
        let link = mapping(&tracker, "USR-1", "DEV-1");

        let rule = Rule::new("link", "Blocked", Direction::SourceToTarget, ProjectRole::Target)
            .with_actions(RuleActions {
                add_cross_link: true,
                ..Default::default()
            });

        let mut executor = Executor::new(&config, &tracker, &store);
        let event = change("USR-1", ProjectRole::Source, Some("Open"), "Blocked");
        let first = executor.execute(&source, &rule, Some(&link), &event).await.unwrap();
        let second = executor.execute(&source, &rule, Some(&link), &event).await.unwrap();

        assert_eq!(first.links_added, 1);
        assert_eq!(second.links_added, 0);
        let dev = tracker.issue("DEV-1").unwrap();
        assert_eq!(dev.description.matches("browse/USR-1").count(), 1);
    }

    #[tokio::test]
    async fn test_sync_new_attachments_skips_existing_and_tolerates_failures() {
        let tracker = MemoryTracker::new("https://jira.test");
        let store = SqliteStore::in_memory().unwrap();
        let config = config();
        tracker.seed("USR-1", ProjectRole::Source, "Open", "Crash");
        tracker.seed("DEV-1", ProjectRole::Target, "Open", "Crash");
        tracker.seed_attachment("USR-1", "log.txt", b"trace");
        tracker.seed_attachment("USR-1", "shot.png", b"png");
        tracker.seed_attachment("USR-1", "dump.bin", b"core");
        tracker.seed_attachment("DEV-1", "log.txt", b"trace");
        tracker.fail_download("dump.bin");
        let link = mapping(&tracker, "USR-1", "DEV-1");
        let source = tracker.issue("USR-1").unwrap();

        let mut executor = Executor::new(&config, &tracker, &store);
        let outcome = executor.sync_new_attachments(&source, &link).await.unwrap();

        assert_eq!(outcome.attachments_copied, 1);
        assert_eq!(outcome.tolerated_failures, 1);
        let names: Vec<String> = tracker
            .issue("DEV-1")
            .unwrap()
            .attachments
            .into_iter()
            .map(|a| a.filename)
            .collect();
        assert_eq!(names, vec!["log.txt", "shot.png"]);
    }
}
