//! SyncFlow - Rule-driven status sync between paired Jira projects
//!
//! Each tenant pairs a customer-facing "source" project with an internal
//! "target" project. A worker per tenant polls both projects, detects
//! status changes and applies the tenant's rules: create a linked issue,
//! mirror the status, comment, copy attachments. A supervisor keeps one
//! worker process per tenant alive.
//!
//! # Architecture
//!
//! - **config**: Tenant documents, rules and validation
//! - **model**: Issues, mappings, snapshots and status-change events
//! - **tracker**: Issue-tracker gateway (Jira REST client, in-memory tracker)
//! - **store**: Mapping and state store (SQLite)
//! - **sync**: Change detection, rule matching, actions and the sync cycle
//! - **worker**: One tenant's polling process
//! - **supervisor**: Worker lifecycle, health endpoint and metrics

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;
pub mod supervisor;
pub mod sync;
pub mod tracker;
pub mod worker;

// Re-exports
pub use error::{Result, SyncFlowError};
