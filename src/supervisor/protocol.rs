//! Worker to supervisor protocol
//!
//! A worker writes one JSON object per line to its stdout. Logs go to
//! stderr, so anything on stdout that does not parse is ignored.

use crate::sync::CycleReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code of a worker that stopped on request
pub const EXIT_OK: i32 = 0;

/// Exit code of a worker with an unusable configuration (EX_CONFIG)
///
/// The supervisor never restarts a worker that exits with this code.
pub const EXIT_CONFIG: i32 = 78;

/// Message sent by a worker on its stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// Liveness signal
    Heartbeat { tenant: String, at: DateTime<Utc> },

    /// A sync cycle finished
    Cycle { tenant: String, report: CycleReport },
}

impl WorkerMessage {
    pub fn heartbeat(tenant: impl Into<String>) -> Self {
        WorkerMessage::Heartbeat {
            tenant: tenant.into(),
            at: Utc::now(),
        }
    }

    pub fn cycle(report: &CycleReport) -> Self {
        WorkerMessage::Cycle {
            tenant: report.tenant.clone(),
            report: report.clone(),
        }
    }

    pub fn tenant(&self) -> &str {
        match self {
            WorkerMessage::Heartbeat { tenant, .. } | WorkerMessage::Cycle { tenant, .. } => tenant,
        }
    }

    /// Encode as a single line without the trailing newline
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a line; `None` for blank or foreign output
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_line_format() {
        let line = WorkerMessage::heartbeat("acme").to_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["tenant"], "acme");
        assert!(value["at"].is_string());
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_parse_line() {
        let parsed = WorkerMessage::parse_line(
            r#"{"type":"heartbeat","tenant":"acme","at":"2026-01-05T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(parsed.tenant(), "acme");

        assert!(WorkerMessage::parse_line("").is_none());
        assert!(WorkerMessage::parse_line("starting up").is_none());
        assert!(WorkerMessage::parse_line(r#"{"type":"unknown"}"#).is_none());
    }

    #[test]
    fn test_cycle_message_carries_report() {
        let mut report = CycleReport::new("acme", false);
        report.issues_created = 2;

        let line = WorkerMessage::cycle(&report).to_line().unwrap();
        match WorkerMessage::parse_line(&line) {
            Some(WorkerMessage::Cycle { tenant, report }) => {
                assert_eq!(tenant, "acme");
                assert_eq!(report.issues_created, 2);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
