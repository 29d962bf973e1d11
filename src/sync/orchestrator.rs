//! Sync cycle
//!
//! One cycle fetches both projects of a tenant, runs every fetched issue
//! through detection, rule matching and the action executor, then advances
//! the tenant's watermark. Issues are processed one at a time, source
//! project first.

use super::audit::{self, CycleReport, SkipReason};
use super::detector::detect;
use super::executor::Executor;
use super::rules::{log_unmatched, match_rule};
use crate::config::TenantConfig;
use crate::model::{Issue, ProjectRole, StatusChangeEvent};
use crate::store::SyncStore;
use crate::tracker::description::links_issue_in_project;
use crate::tracker::{IssueTracker, SearchQuery};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

/// Runs sync cycles for one tenant
pub struct Orchestrator {
    config: Arc<TenantConfig>,
    tracker: Arc<dyn IssueTracker>,
    store: Arc<dyn SyncStore>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<TenantConfig>,
        tracker: Arc<dyn IssueTracker>,
        store: Arc<dyn SyncStore>,
    ) -> Self {
        Self {
            config,
            tracker,
            store,
        }
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    /// Run one cycle
    ///
    /// `force_full` fetches every issue and treats first observations as
    /// changes regardless of the tenant's initial-sync setting. Fetch and
    /// store failures abort the cycle and leave the watermark untouched;
    /// any other failure is counted against the issue and the cycle goes on.
    pub async fn run_cycle(&self, force_full: bool) -> Result<CycleReport> {
        let started = Instant::now();
        let cycle_start = Utc::now();
        let tenant = self.config.name.as_str();

        let watermark = self.store.watermark(tenant)?;
        let full_sync = force_full
            || (self.config.default_behavior.initial_sync
                && watermark.last_sync_at.is_none()
                && !watermark.initial_sync_completed);
        let since = if full_sync {
            None
        } else {
            watermark.last_sync_at
        };

        tracing::info!(
            tenant = %tenant,
            full_sync,
            since = ?since,
            "Starting sync cycle"
        );

        let mut report = CycleReport::new(tenant, full_sync);

        let source = self.fetch(ProjectRole::Source, since).await?;
        let target = self.fetch(ProjectRole::Target, since).await?;
        report.issues_fetched = source.len() + target.len();

        let mut executor = Executor::new(&self.config, self.tracker.as_ref(), self.store.as_ref());
        for issue in source.iter().chain(target.iter()) {
            audit::issue_fetched(&issue.key, issue.role, &issue.status);

            let processed = self
                .process_issue(&mut executor, issue, full_sync, &mut report)
                .await;
            self.settle(issue, processed, &mut report)?;

            if issue.role == ProjectRole::Source && self.config.default_behavior.sync_attachments {
                let copied = self
                    .copy_new_attachments(&mut executor, issue, &mut report)
                    .await;
                self.settle(issue, copied, &mut report)?;
            }
        }

        let mut next = watermark;
        next.last_sync_at = Some(cycle_start);
        if full_sync {
            next.initial_sync_completed = true;
        }
        self.store.save_watermark(&next)?;

        report.duration_ms = started.elapsed().as_millis() as u64;
        audit::cycle_completed(&report);
        Ok(report)
    }

    /// Abort on store failures, count anything else against the issue
    fn settle(&self, issue: &Issue, result: Result<()>, report: &mut CycleReport) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.aborts_cycle() => {
                tracing::error!(
                    tenant = %self.config.name,
                    issue = %issue.key,
                    error = %e,
                    "Store failure, aborting sync cycle"
                );
                Err(e)
            }
            Err(e) => {
                tracing::warn!(
                    tenant = %self.config.name,
                    issue = %issue.key,
                    role = %issue.role,
                    error = %e,
                    "Failed to process issue"
                );
                report.record_error(&format!("{}: {}", issue.key, e));
                Ok(())
            }
        }
    }

    async fn fetch(
        &self,
        role: ProjectRole,
        since: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<Issue>> {
        let query =
            SearchQuery::project(self.config.project_key(role), role).updated_since(since);
        let mut issues = self.tracker.search(&query).await.map_err(|e| {
            tracing::error!(
                tenant = %self.config.name,
                role = %role,
                error = %e,
                "Failed to fetch issues"
            );
            e
        })?;
        issues.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));

        tracing::debug!(role = %role, count = issues.len(), "Fetched issues");
        Ok(issues)
    }

    async fn process_issue(
        &self,
        executor: &mut Executor<'_>,
        issue: &Issue,
        full_sync: bool,
        report: &mut CycleReport,
    ) -> Result<()> {
        let role = issue.role;
        let behavior = &self.config.default_behavior;

        let Some(event) = detect(self.store.as_ref(), &issue.key, role, &issue.status)? else {
            return Ok(());
        };
        report.status_changes_detected += 1;

        if event.is_first_observation() && !full_sync {
            return skip(&event, SkipReason::FirstObservation, None, report);
        }

        if behavior.is_intermediate(role, &event.to_status) {
            return skip(&event, SkipReason::IntermediateStatus, None, report);
        }

        let Some(rule) = match_rule(&event, &self.config.rules) else {
            log_unmatched(&event, behavior.fallback_behavior);
            return skip(&event, SkipReason::NoRule, None, report);
        };
        report.rules_matched += 1;
        let rule_id = Some(rule.id.as_str());

        let mapping = self.store.mapping_for(role, &issue.key)?;
        if rule.conditions.requires_mapping() && mapping.is_none() {
            return skip(&event, SkipReason::RequireMapping, rule_id, report);
        }

        let only_on_change = rule
            .conditions
            .only_on_change
            .unwrap_or(behavior.only_on_status_change);
        if only_on_change && !event.is_transition() {
            return skip(&event, SkipReason::OnlyOnChange, rule_id, report);
        }

        if rule.actions.create_issue {
            let counterpart_key = self.config.project_key(role.counterpart());
            let already_linked = match &mapping {
                Some(_) => !rule.actions.sync_status && !rule.actions.add_cross_link,
                None => links_issue_in_project(&issue.description, counterpart_key),
            };
            if already_linked {
                return skip(&event, SkipReason::DuplicateCreate, rule_id, report);
            }
        }

        let outcome = executor
            .execute(issue, rule, mapping.as_ref(), &event)
            .await?;
        outcome.record(report);
        audit::issue_processed(&issue.key, role, &rule.id);

        Ok(())
    }

    /// Copy attachments added to an already linked source issue
    async fn copy_new_attachments(
        &self,
        executor: &mut Executor<'_>,
        issue: &Issue,
        report: &mut CycleReport,
    ) -> Result<()> {
        let Some(mapping) = self.store.mapping_by_source(&issue.key)? else {
            return Ok(());
        };
        executor
            .sync_new_attachments(issue, &mapping)
            .await?
            .record(report);
        Ok(())
    }
}

fn skip(
    event: &StatusChangeEvent,
    reason: SkipReason,
    rule_id: Option<&str>,
    report: &mut CycleReport,
) -> Result<()> {
    audit::action_skipped(&event.issue_key, event.role, reason, rule_id);
    report.issues_skipped += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefaultBehavior, Direction, Rule, RuleActions, RuleConditions};
    use crate::store::SqliteStore;
    use crate::tracker::MemoryTracker;
    use crate::SyncFlowError;

    struct Harness {
        tracker: Arc<MemoryTracker>,
        store: Arc<SqliteStore>,
        orchestrator: Orchestrator,
    }

    fn harness(config: TenantConfig) -> Harness {
        let tracker = Arc::new(MemoryTracker::new("https://jira.test"));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let orchestrator = Orchestrator::new(Arc::new(config), tracker.clone(), store.clone());
        Harness {
            tracker,
            store,
            orchestrator,
        }
    }

    fn config(rules: Vec<Rule>) -> TenantConfig {
        TenantConfig::new("acme", "https://jira.test", "USR", "DEV")
            .with_credentials("bot@acme.io", "token")
            .with_rules(rules)
    }

    fn create_on_will_do() -> Rule {
        Rule::new("user-will-do", "Will Do", Direction::SourceToTarget, ProjectRole::Target)
            .with_conditions(RuleConditions {
                require_mapping: Some(false),
                only_on_change: None,
            })
            .with_actions(RuleActions {
                create_issue: true,
                ..Default::default()
            })
    }

    #[tokio::test]
    async fn test_first_observation_is_skipped_outside_full_sync() {
        let h = harness(config(vec![create_on_will_do()]));
        h.tracker.seed("USR-1", ProjectRole::Source, "Will Do", "Crash");

        let report = h.orchestrator.run_cycle(false).await.unwrap();

        assert!(!report.full_sync);
        assert_eq!(report.status_changes_detected, 1);
        assert_eq!(report.issues_skipped, 1);
        assert_eq!(report.issues_created, 0);
    }

    #[tokio::test]
    async fn test_initial_sync_processes_existing_issues_once() {
        let behavior = DefaultBehavior {
            initial_sync: true,
            only_on_status_change: false,
            ..Default::default()
        };
        let h = harness(config(vec![create_on_will_do()]).with_default_behavior(behavior));
        h.tracker.seed("USR-1", ProjectRole::Source, "Will Do", "Crash");

        let report = h.orchestrator.run_cycle(false).await.unwrap();
        assert!(report.full_sync);
        assert_eq!(report.issues_created, 1);

        let watermark = h.store.watermark("acme").unwrap();
        assert!(watermark.initial_sync_completed);
        assert!(watermark.last_sync_at.is_some());

        let report = h.orchestrator.run_cycle(false).await.unwrap();
        assert!(!report.full_sync);
        assert_eq!(report.issues_created, 0);
    }

    #[tokio::test]
    async fn test_intermediate_status_is_skipped() {
        let rule = Rule::new("dev-done", "Done", Direction::TargetToSource, ProjectRole::Source)
            .with_actions(RuleActions {
                sync_status: true,
                ..Default::default()
            });
        let h = harness(config(vec![rule]));
        h.tracker.seed("DEV-1", ProjectRole::Target, "In Progress", "Crash");
        h.orchestrator.run_cycle(false).await.unwrap();

        h.tracker.set_status("DEV-1", "Done");
        let report = h.orchestrator.run_cycle(false).await.unwrap();

        assert_eq!(report.status_changes_detected, 1);
        assert_eq!(report.rules_matched, 0);
        assert_eq!(report.issues_skipped, 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_when_description_links_counterpart() {
        let h = harness(config(vec![create_on_will_do()]));
        h.tracker.seed("USR-1", ProjectRole::Source, "Open", "Crash");
        h.orchestrator.run_cycle(false).await.unwrap();

        let mut issue = h.tracker.issue("USR-1").unwrap();
        issue.description = "Link: https://jira.test/browse/DEV-12".to_string();
        issue.status = "Will Do".to_string();
        issue.updated_at = Utc::now();
        h.tracker.put_issue(issue);

        let report = h.orchestrator.run_cycle(false).await.unwrap();
        assert_eq!(report.rules_matched, 1);
        assert_eq!(report.issues_created, 0);
        assert_eq!(report.issues_skipped, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_watermark() {
        struct Failing;

        #[async_trait::async_trait]
        impl IssueTracker for Failing {
            async fn search(&self, _: &SearchQuery) -> Result<Vec<Issue>> {
                Err(SyncFlowError::Network("connection refused".to_string()))
            }
            async fn get_issue(&self, key: &str, _: ProjectRole) -> Result<Issue> {
                Err(SyncFlowError::NotFound(key.to_string()))
            }
            async fn create_issue(
                &self,
                _: &crate::tracker::NewIssue,
            ) -> Result<crate::tracker::CreatedIssue> {
                unreachable!()
            }
            async fn update_issue(&self, _: &str, _: serde_json::Value) -> Result<()> {
                unreachable!()
            }
            async fn transition(
                &self,
                _: &str,
                _: &str,
            ) -> Result<crate::tracker::TransitionOutcome> {
                unreachable!()
            }
            async fn add_comment(&self, _: &str, _: &str) -> Result<()> {
                unreachable!()
            }
            async fn download_attachment(
                &self,
                _: &crate::model::Attachment,
            ) -> Result<Vec<u8>> {
                unreachable!()
            }
            async fn add_attachment(
                &self,
                _: &str,
                _: &str,
                _: Vec<u8>,
                _: Option<&str>,
            ) -> Result<()> {
                unreachable!()
            }
            async fn current_user(&self) -> Result<crate::tracker::UserInfo> {
                unreachable!()
            }
            async fn project(&self, _: &str) -> Result<crate::tracker::ProjectInfo> {
                unreachable!()
            }
            async fn project_statuses(
                &self,
                _: &str,
            ) -> Result<crate::tracker::StatusCategoryMap> {
                unreachable!()
            }
            fn issue_url(&self, key: &str) -> String {
                key.to_string()
            }
        }

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let orchestrator = Orchestrator::new(
            Arc::new(config(Vec::new())),
            Arc::new(Failing),
            store.clone(),
        );

        assert!(orchestrator.run_cycle(false).await.is_err());
        assert!(store.watermark("acme").unwrap().last_sync_at.is_none());
    }

    /// SQLite store that refuses to record the snapshot of one issue
    struct BrokenSnapshots {
        inner: SqliteStore,
        broken_key: std::sync::Mutex<Option<String>>,
    }

    impl BrokenSnapshots {
        fn break_key(&self, key: &str) {
            *self.broken_key.lock().unwrap() = Some(key.to_string());
        }
    }

    impl SyncStore for BrokenSnapshots {
        fn mapping_by_source(&self, key: &str) -> Result<Option<crate::model::Mapping>> {
            self.inner.mapping_by_source(key)
        }
        fn mapping_by_target(&self, key: &str) -> Result<Option<crate::model::Mapping>> {
            self.inner.mapping_by_target(key)
        }
        fn insert_mapping(&self, mapping: &crate::model::Mapping) -> Result<()> {
            self.inner.insert_mapping(mapping)
        }
        fn snapshot(
            &self,
            key: &str,
            role: ProjectRole,
        ) -> Result<Option<crate::model::IssueStateSnapshot>> {
            self.inner.snapshot(key, role)
        }
        fn save_snapshot(&self, snapshot: &crate::model::IssueStateSnapshot) -> Result<()> {
            if self.broken_key.lock().unwrap().as_deref() == Some(snapshot.issue_key.as_str()) {
                return Err(SyncFlowError::Storage("disk I/O error".to_string()));
            }
            self.inner.save_snapshot(snapshot)
        }
        fn watermark(&self, tenant: &str) -> Result<crate::model::SyncWatermark> {
            self.inner.watermark(tenant)
        }
        fn save_watermark(&self, watermark: &crate::model::SyncWatermark) -> Result<()> {
            self.inner.save_watermark(watermark)
        }
    }

    #[tokio::test]
    async fn test_store_failure_aborts_cycle_and_keeps_watermark() {
        let tracker = Arc::new(MemoryTracker::new("https://jira.test"));
        let store = Arc::new(BrokenSnapshots {
            inner: SqliteStore::in_memory().unwrap(),
            broken_key: std::sync::Mutex::new(None),
        });
        let orchestrator = Orchestrator::new(
            Arc::new(config(vec![create_on_will_do()])),
            tracker.clone(),
            store.clone(),
        );
        tracker.seed("USR-1", ProjectRole::Source, "Open", "one");
        tracker.seed("USR-2", ProjectRole::Source, "Open", "two");
        tracker.seed("DEV-1", ProjectRole::Target, "Open", "three");
        orchestrator.run_cycle(false).await.unwrap();
        let before = store.watermark("acme").unwrap();

        store.break_key("USR-1");
        tracker.set_status("USR-1", "Will Do");
        tracker.set_status("USR-2", "Will Do");
        tracker.set_status("DEV-1", "Closed");
        tracker.clear_calls();

        let err = orchestrator.run_cycle(true).await.unwrap_err();
        assert!(err.aborts_cycle());

        // Nothing after the failing issue was looked at.
        let status = |key: &str, role| store.snapshot(key, role).unwrap().unwrap().status;
        assert_eq!(status("USR-2", ProjectRole::Source), "Open");
        assert_eq!(status("DEV-1", ProjectRole::Target), "Open");
        assert!(tracker.write_calls().is_empty());
        assert_eq!(tracker.issues_in(ProjectRole::Target).len(), 1);

        let after = store.watermark("acme").unwrap();
        assert_eq!(after.last_sync_at, before.last_sync_at);
        assert_eq!(after.initial_sync_completed, before.initial_sync_completed);
    }

    #[tokio::test]
    async fn test_issue_failure_does_not_stop_cycle() {
        let rule = Rule::new("dev-closed", "Closed", Direction::TargetToSource, ProjectRole::Source)
            .with_actions(RuleActions {
                sync_status: true,
                target_status: Some("Resolved".to_string()),
                ..Default::default()
            });
        let h = harness(config(vec![rule]));
        h.tracker.seed("USR-1", ProjectRole::Source, "Open", "one");
        h.tracker.seed("USR-2", ProjectRole::Source, "Open", "two");
        h.tracker.seed("DEV-1", ProjectRole::Target, "Open", "one");
        h.tracker.seed("DEV-2", ProjectRole::Target, "Open", "two");
        for (source, target) in [("USR-1", "DEV-1"), ("USR-2", "DEV-2")] {
            h.store
                .insert_mapping(&crate::model::Mapping {
                    source_key: source.to_string(),
                    target_key: target.to_string(),
                    source_url: h.tracker.issue_url(source),
                    target_url: h.tracker.issue_url(target),
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        h.orchestrator.run_cycle(false).await.unwrap();

        h.tracker.fail_writes_on("USR-1");
        h.tracker.set_status("DEV-1", "Closed");
        h.tracker.set_status("DEV-2", "Closed");
        let report = h.orchestrator.run_cycle(false).await.unwrap();

        assert_eq!(report.errors, 1);
        assert!(report.first_error.as_deref().unwrap().starts_with("DEV-1"));
        assert_eq!(report.statuses_synced, 1);
        assert_eq!(h.tracker.issue("USR-2").unwrap().status, "Resolved");
        assert!(h.store.watermark("acme").unwrap().last_sync_at.is_some());
    }
}
