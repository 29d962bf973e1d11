//! Per-issue audit trail and cycle report
//!
//! Every decision the cycle takes about an issue is logged under the
//! `syncflow::audit` target with the issue key and role as fields, so a
//! JSON log stream can be filtered down to the history of one issue.

use crate::model::{ProjectRole, StatusChangeEvent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tracing target of audit events
pub const AUDIT_TARGET: &str = "syncflow::audit";

/// Tracing target of best-effort failures that did not stop an action
pub const TOLERATED_TARGET: &str = "syncflow::tolerated";

/// Why a detected change did not lead to an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// No enabled rule matched the status and direction
    NoRule,
    /// The rule requires a mapping and none exists
    RequireMapping,
    /// The rule only fires on a real transition
    OnlyOnChange,
    /// The originating issue is already linked to the other project
    DuplicateCreate,
    /// The status is configured as intermediate for this role
    IntermediateStatus,
    /// First time the issue is seen outside of a full sync
    FirstObservation,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NoRule => "noRule",
            SkipReason::RequireMapping => "requireMapping",
            SkipReason::OnlyOnChange => "onlyOnChange",
            SkipReason::DuplicateCreate => "duplicateCreate",
            SkipReason::IntermediateStatus => "intermediateStatus",
            SkipReason::FirstObservation => "firstObservation",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub tenant: String,
    pub full_sync: bool,
    pub issues_fetched: usize,
    pub status_changes_detected: usize,
    pub rules_matched: usize,
    pub issues_created: usize,
    pub statuses_synced: usize,
    pub comments_posted: usize,
    pub attachments_copied: usize,
    pub issues_skipped: usize,
    pub errors: usize,
    pub tolerated_failures: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
    pub duration_ms: u64,
}

const MAX_ERROR_LEN: usize = 200;

impl CycleReport {
    pub fn new(tenant: impl Into<String>, full_sync: bool) -> Self {
        Self {
            tenant: tenant.into(),
            full_sync,
            ..Default::default()
        }
    }

    /// Count a per-issue failure, keeping the first message
    pub fn record_error(&mut self, message: &str) {
        self.errors += 1;
        if self.first_error.is_none() {
            let truncated: String = message.chars().take(MAX_ERROR_LEN).collect();
            self.first_error = Some(truncated);
        }
    }

    /// Total number of writes made against the tracker
    pub fn actions_taken(&self) -> usize {
        self.issues_created + self.statuses_synced + self.comments_posted + self.attachments_copied
    }

    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

pub fn issue_fetched(key: &str, role: ProjectRole, status: &str) {
    tracing::debug!(
        target: AUDIT_TARGET,
        event = "issue.fetched",
        issue = %key,
        role = %role,
        status = %status,
        "Issue fetched"
    );
}

pub fn status_changed(event: &StatusChangeEvent) {
    tracing::info!(
        target: AUDIT_TARGET,
        event = "status.changed",
        issue = %event.issue_key,
        role = %event.role,
        from = event.from_status.as_deref().unwrap_or(""),
        to = %event.to_status,
        is_new_issue = event.is_first_observation(),
        "Status change detected"
    );
}

pub fn status_unchanged(key: &str, role: ProjectRole, status: &str) {
    tracing::debug!(
        target: AUDIT_TARGET,
        event = "status.unchanged",
        issue = %key,
        role = %role,
        status = %status,
        "Status unchanged"
    );
}

pub fn issue_processed(key: &str, role: ProjectRole, rule_id: &str) {
    tracing::info!(
        target: AUDIT_TARGET,
        event = "issue.processed",
        issue = %key,
        role = %role,
        rule = %rule_id,
        "Issue processed"
    );
}

pub fn action_skipped(key: &str, role: ProjectRole, reason: SkipReason, rule_id: Option<&str>) {
    tracing::info!(
        target: AUDIT_TARGET,
        event = "action.skipped",
        issue = %key,
        role = %role,
        reason = %reason,
        rule = rule_id.unwrap_or(""),
        "Action skipped"
    );
}

pub fn action_create_issue(origin_key: &str, created_key: &str, rule_id: &str) {
    tracing::info!(
        target: AUDIT_TARGET,
        event = "action.createIssue",
        issue = %origin_key,
        created = %created_key,
        rule = %rule_id,
        "Linked issue created"
    );
}

pub fn action_sync_status(origin_key: &str, destination_key: &str, status: &str, transitioned: bool) {
    tracing::info!(
        target: AUDIT_TARGET,
        event = "action.syncStatus",
        issue = %origin_key,
        destination = %destination_key,
        status = %status,
        transitioned,
        "Status synced"
    );
}

/// Log a best-effort failure that the action carried on past
pub fn tolerated_failure(key: &str, operation: &str, error: &crate::SyncFlowError) {
    tracing::warn!(
        target: TOLERATED_TARGET,
        issue = %key,
        operation,
        error = %error,
        "Tolerated failure"
    );
}

pub fn cycle_completed(report: &CycleReport) {
    tracing::info!(
        target: AUDIT_TARGET,
        event = "sync.cycle.completed",
        tenant = %report.tenant,
        full_sync = report.full_sync,
        fetched = report.issues_fetched,
        changes = report.status_changes_detected,
        matched = report.rules_matched,
        created = report.issues_created,
        synced = report.statuses_synced,
        skipped = report.issues_skipped,
        errors = report.errors,
        tolerated = report.tolerated_failures,
        duration_ms = report.duration_ms,
        "Sync cycle completed"
    );
}
