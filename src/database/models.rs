use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// One row of `audit_events` exactly as persisted: clear-text indexable
/// fields, encrypted details, and the chain hashes.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub seq: i64,
    pub event_id: String,
    pub timestamp: String,
    pub event_type: String,
    pub severity: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub resource: String,
    pub action: String,
    pub outcome: String,
    pub details_ciphertext: Vec<u8>,
    pub risk_score: Option<f64>,
    pub previous_hash: String,
    pub integrity_hash: String,
}

impl StoredEvent {
    pub fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            seq: row.try_get("seq")?,
            event_id: row.try_get("event_id")?,
            timestamp: row.try_get("timestamp")?,
            event_type: row.try_get("event_type")?,
            severity: row.try_get("severity")?,
            user_id: row.try_get("user_id")?,
            session_id: row.try_get("session_id")?,
            source_ip: row.try_get("source_ip")?,
            user_agent: row.try_get("user_agent")?,
            resource: row.try_get("resource")?,
            action: row.try_get("action")?,
            outcome: row.try_get("outcome")?,
            details_ciphertext: row.try_get("details_ciphertext")?,
            risk_score: row.try_get("risk_score")?,
            previous_hash: row.try_get("previous_hash")?,
            integrity_hash: row.try_get("integrity_hash")?,
        })
    }
}

/// Aggregate counts over the whole log.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AuditStatistics {
    pub total_events: u64,
    pub by_event_type: std::collections::BTreeMap<String, u64>,
    pub by_severity: std::collections::BTreeMap<String, u64>,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
    pub head_hash: String,
}
