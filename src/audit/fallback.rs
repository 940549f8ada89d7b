//! Append Failure Log
//!
//! Best-effort side channel that records failed `log_event` calls as JSON
//! lines, so a gap in the audit trail leaves its own trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, warn};

use crate::audit::event::NewAuditEvent;
use crate::error::{AuditError, AuditResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendFailure {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub event_type: String,
    pub severity: String,
    pub resource: String,
    pub action: String,
    pub error_kind: String,
    pub error: String,
}

#[derive(Clone, Default)]
pub struct FailureLog {
    log_path: Option<PathBuf>,
}

impl FailureLog {
    pub fn new(log_path: Option<PathBuf>) -> Self {
        Self { log_path }
    }

    /// Record a failed append. Never fails; problems writing the side-log
    /// are only reported through tracing.
    pub fn record(&self, operation: &str, draft: &NewAuditEvent, err: &AuditError) {
        error!(
            operation,
            event_type = %draft.event_type,
            resource = %draft.resource,
            action = %draft.action,
            error_kind = err.kind(),
            "Audit append failed: {}",
            err
        );

        let failure = AppendFailure {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            event_type: draft.event_type.to_string(),
            severity: draft.severity.to_string(),
            resource: draft.resource.clone(),
            action: draft.action.clone(),
            error_kind: err.kind().to_string(),
            error: err.to_string(),
        };

        if let Err(e) = self.log_to_file(&failure) {
            warn!("Could not write audit failure log: {}", e);
        }
    }

    fn log_to_file(&self, failure: &AppendFailure) -> AuditResult<()> {
        let Some(path) = &self.log_path else {
            return Ok(());
        };

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(failure)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::{EventType, Severity};
    use tempfile::tempdir;

    #[test]
    fn test_record_writes_json_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failures.log");
        let log = FailureLog::new(Some(path.clone()));

        let draft = NewAuditEvent::new(EventType::ConfigChange, Severity::Medium, "cfg", "set", "ok");
        log.record("log_event", &draft, &AuditError::StorageError("disk full".to_string()));
        log.record("log_event", &draft, &AuditError::lock_timeout(10));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AppendFailure = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.error_kind, "storage");
        assert_eq!(first.event_type, "config-change");
        assert!(first.error.contains("disk full"));
    }

    #[test]
    fn test_unwritable_path_does_not_panic() {
        let dir = tempdir().unwrap();
        let log = FailureLog::new(Some(dir.path().join("missing").join("failures.log")));
        let draft = NewAuditEvent::new(EventType::Error, Severity::High, "x", "y", "z");
        log.record("log_event", &draft, &AuditError::StorageError("boom".to_string()));
    }
}
