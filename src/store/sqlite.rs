//! SQLite store implementation

use super::SyncStore;
use crate::model::{IssueStateSnapshot, Mapping, ProjectRole, SyncWatermark};
use crate::{Result, SyncFlowError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to SQLite database file
    pub path: PathBuf,

    /// Enable WAL mode for better concurrency
    pub wal_mode: bool,

    /// How long a writer waits for a lock held by another process
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            wal_mode: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite-backed [`SyncStore`]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create a store database
    pub fn open(config: StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %config.path.display(), "Opening store database");

        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(config.busy_timeout)?;

        if config.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(config.path),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a private in-memory store
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Path of the database file (`None` for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SyncFlowError::Storage(format!("Connection lock poisoned: {}", e)))
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS mappings (
                source_key TEXT NOT NULL UNIQUE,
                target_key TEXT NOT NULL UNIQUE,
                source_url TEXT NOT NULL,
                target_url TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS issue_state (
                issue_key TEXT NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (issue_key, role)
            );

            CREATE TABLE IF NOT EXISTS sync_state (
                tenant_name TEXT PRIMARY KEY,
                last_sync_at TEXT,
                initial_sync_completed INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;

        Ok(())
    }

    fn mapping_where(&self, column: &str, key: &str) -> Result<Option<Mapping>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT source_key, target_key, source_url, target_url, created_at \
             FROM mappings WHERE {} = ?",
            column
        );
        let row = conn
            .query_row(&sql, [key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .optional()?;

        row.map(
            |(source_key, target_key, source_url, target_url, created_at)| {
                Ok(Mapping {
                    source_key,
                    target_key,
                    source_url,
                    target_url,
                    created_at: parse_timestamp(&created_at)?,
                })
            },
        )
        .transpose()
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| SyncFlowError::Storage(format!("Invalid timestamp '{}': {}", value, e)))
}

fn role_to_str(role: ProjectRole) -> &'static str {
    role.as_str()
}

impl SyncStore for SqliteStore {
    fn mapping_by_source(&self, source_key: &str) -> Result<Option<Mapping>> {
        self.mapping_where("source_key", source_key)
    }

    fn mapping_by_target(&self, target_key: &str) -> Result<Option<Mapping>> {
        self.mapping_where("target_key", target_key)
    }

    fn insert_mapping(&self, mapping: &Mapping) -> Result<()> {
        let inserted = self.conn()?.execute(
            r#"
            INSERT OR IGNORE INTO mappings (source_key, target_key, source_url, target_url, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                &mapping.source_key,
                &mapping.target_key,
                &mapping.source_url,
                &mapping.target_url,
                mapping.created_at.to_rfc3339(),
            ],
        )?;

        if inserted == 0 {
            let existing = self.mapping_by_source(&mapping.source_key)?;
            let same_pair = existing
                .as_ref()
                .map(|m| m.target_key == mapping.target_key)
                .unwrap_or(false);
            if !same_pair {
                return Err(SyncFlowError::Storage(format!(
                    "Mapping {} <-> {} conflicts with an existing mapping",
                    mapping.source_key, mapping.target_key
                )));
            }
            tracing::debug!(
                source_key = %mapping.source_key,
                target_key = %mapping.target_key,
                "Mapping already recorded"
            );
        } else {
            tracing::info!(
                source_key = %mapping.source_key,
                target_key = %mapping.target_key,
                "Mapping recorded"
            );
        }

        Ok(())
    }

    fn snapshot(&self, issue_key: &str, role: ProjectRole) -> Result<Option<IssueStateSnapshot>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT status, updated_at FROM issue_state WHERE issue_key = ? AND role = ?",
                params![issue_key, role_to_str(role)],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(status, updated_at)| {
            Ok(IssueStateSnapshot {
                issue_key: issue_key.to_string(),
                role,
                status,
                updated_at: parse_timestamp(&updated_at)?,
            })
        })
        .transpose()
    }

    fn save_snapshot(&self, snapshot: &IssueStateSnapshot) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO issue_state (issue_key, role, status, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(issue_key, role) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
            params![
                &snapshot.issue_key,
                role_to_str(snapshot.role),
                &snapshot.status,
                snapshot.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn watermark(&self, tenant_name: &str) -> Result<SyncWatermark> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT last_sync_at, initial_sync_completed FROM sync_state WHERE tenant_name = ?",
                [tenant_name],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(SyncWatermark::empty(tenant_name)),
            Some((last_sync_at, initial_sync_completed)) => Ok(SyncWatermark {
                tenant_name: tenant_name.to_string(),
                last_sync_at: last_sync_at.as_deref().map(parse_timestamp).transpose()?,
                initial_sync_completed,
            }),
        }
    }

    fn save_watermark(&self, watermark: &SyncWatermark) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO sync_state (tenant_name, last_sync_at, initial_sync_completed)
            VALUES (?, ?, ?)
            ON CONFLICT(tenant_name) DO UPDATE SET
                last_sync_at = excluded.last_sync_at,
                initial_sync_completed = excluded.initial_sync_completed
            "#,
            params![
                &watermark.tenant_name,
                watermark.last_sync_at.map(|t| t.to_rfc3339()),
                watermark.initial_sync_completed,
            ],
        )?;
        Ok(())
    }
}
