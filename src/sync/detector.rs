//! State change detection
//!
//! Compares the freshly fetched status of an issue with the last recorded
//! snapshot and always records the new one.

use super::audit;
use crate::model::{IssueStateSnapshot, ProjectRole, StatusChangeEvent};
use crate::store::SyncStore;
use crate::Result;
use chrono::Utc;

/// Record `new_status` and report whether it differs from the last snapshot
///
/// Returns an event with `from_status: None` the first time an issue is
/// observed, an event with the previous status when it changed, and `None`
/// when the status is unchanged. Store failures propagate.
pub fn detect(
    store: &dyn SyncStore,
    issue_key: &str,
    role: ProjectRole,
    new_status: &str,
) -> Result<Option<StatusChangeEvent>> {
    let previous = store.snapshot(issue_key, role)?.map(|s| s.status);
    let now = Utc::now();

    store.save_snapshot(&IssueStateSnapshot {
        issue_key: issue_key.to_string(),
        role,
        status: new_status.to_string(),
        updated_at: now,
    })?;

    if previous.as_deref() == Some(new_status) {
        audit::status_unchanged(issue_key, role, new_status);
        return Ok(None);
    }

    let event = StatusChangeEvent {
        issue_key: issue_key.to_string(),
        role,
        from_status: previous,
        to_status: new_status.to_string(),
        timestamp: now,
    };
    audit::status_changed(&event);

    Ok(Some(event))
}
