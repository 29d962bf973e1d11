//! Mapping & state store
//!
//! Persists the cross-project issue mappings, the per-issue status
//! snapshots and the per-tenant sync watermark. All writes are idempotent
//! upserts keyed by issue key (plus role) or tenant name.

mod sqlite;

pub use sqlite::{SqliteStore, StoreConfig};

use crate::model::{IssueStateSnapshot, Mapping, ProjectRole, SyncWatermark};
use crate::Result;

/// Storage operations used by the sync engine
///
/// Implementations must tolerate several worker processes using the same
/// database at once.
pub trait SyncStore: Send + Sync {
    /// Mapping whose source side is `source_key`
    fn mapping_by_source(&self, source_key: &str) -> Result<Option<Mapping>>;

    /// Mapping whose target side is `target_key`
    fn mapping_by_target(&self, target_key: &str) -> Result<Option<Mapping>>;

    /// Persist a mapping
    ///
    /// Inserting an identical mapping again is a no-op. A mapping that would
    /// link either key to a different counterpart is rejected.
    fn insert_mapping(&self, mapping: &Mapping) -> Result<()>;

    /// Last recorded status of an issue
    fn snapshot(&self, issue_key: &str, role: ProjectRole) -> Result<Option<IssueStateSnapshot>>;

    /// Create or overwrite the status snapshot of an issue
    fn save_snapshot(&self, snapshot: &IssueStateSnapshot) -> Result<()>;

    /// Watermark of a tenant; empty if the tenant never synced
    fn watermark(&self, tenant_name: &str) -> Result<SyncWatermark>;

    /// Create or overwrite the watermark of a tenant
    fn save_watermark(&self, watermark: &SyncWatermark) -> Result<()>;

    /// Mapping involving an issue of the given role
    fn mapping_for(&self, role: ProjectRole, key: &str) -> Result<Option<Mapping>> {
        match role {
            ProjectRole::Source => self.mapping_by_source(key),
            ProjectRole::Target => self.mapping_by_target(key),
        }
    }
}
