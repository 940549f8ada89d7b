//! Audit Log Verification
//!
//! Replays the chain in append order. Each row is decrypted and its hash
//! recomputed (content check), and its `previous_hash` is compared with the
//! stored hash of the row before it (link check). Findings are returned as
//! a report; detecting tampering is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::chain::{check_content, GENESIS_HASH};
use crate::crypto::PayloadCipher;
use crate::database::{Database, Queries};
use crate::error::{AuditError, AuditResult};

/// Where verification starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationScope {
    EntireLog,
    FromEvent(String),
}

/// A row whose `previous_hash` does not match its stored predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub event_id: String,
    pub sequence: i64,
    pub expected_previous_hash: String,
    pub actual_previous_hash: String,
}

/// A row timestamped earlier than the row appended before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRegression {
    pub event_id: String,
    pub previous_timestamp: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verified: bool,
    pub total_events: u64,
    pub corrupted_events: Vec<String>,
    pub chain_breaks: Vec<ChainBreak>,
    /// Informational; does not affect `verified`.
    pub timestamp_regressions: Vec<TimestampRegression>,
    pub start_event_id: Option<String>,
    pub head_hash: String,
    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.verified {
            format!("Audit log is intact ({} events)", self.total_events)
        } else {
            format!(
                "Audit log integrity FAILED ({} events): {} corrupted, {} chain breaks",
                self.total_events,
                self.corrupted_events.len(),
                self.chain_breaks.len()
            )
        }
    }

    /// Get detailed status
    pub fn detailed_status(&self) -> String {
        let mut lines = vec![
            format!("Events checked: {}", self.total_events),
            format!(
                "Scope: {}",
                self.start_event_id
                    .as_deref()
                    .map(|id| format!("from {}", id))
                    .unwrap_or_else(|| "entire log".to_string())
            ),
            format!("Head hash: {}", self.head_hash),
        ];
        for event_id in &self.corrupted_events {
            lines.push(format!("Corrupted: {}", event_id));
        }
        for brk in &self.chain_breaks {
            lines.push(format!(
                "Chain break at {} (seq {}): expected previous {}, found {}",
                brk.event_id, brk.sequence, brk.expected_previous_hash, brk.actual_previous_hash
            ));
        }
        for regression in &self.timestamp_regressions {
            lines.push(format!(
                "Timestamp regression at {}: {} < {}",
                regression.event_id, regression.timestamp, regression.previous_timestamp
            ));
        }
        lines.join("\n")
    }
}

/// Verify the chain over the rows committed when verification starts.
pub async fn verify_chain(
    database: &Database,
    cipher: &PayloadCipher,
    scope: &VerificationScope,
    batch_size: u32,
) -> AuditResult<VerificationReport> {
    let pool = database.pool();

    let (mut after, mut expected_previous, mut previous_timestamp, start_event_id) = match scope {
        VerificationScope::EntireLog => (0, GENESIS_HASH.to_string(), None, None),
        VerificationScope::FromEvent(event_id) => {
            let start = Queries::get_event_by_id(pool, event_id)
                .await?
                .ok_or_else(|| {
                    AuditError::ValidationError(format!("Unknown event id: {}", event_id))
                })?;
            let predecessor = Queries::get_predecessor(pool, start.seq).await?;
            let expected = predecessor
                .as_ref()
                .map(|p| p.integrity_hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string());
            let timestamp = predecessor.map(|p| p.timestamp);
            (start.seq - 1, expected, timestamp, Some(event_id.clone()))
        }
    };

    let upto = Queries::get_max_seq(pool).await?;
    info!(scope = ?scope, upto, "Verifying audit chain");

    let mut total_events = 0u64;
    let mut corrupted_events = Vec::new();
    let mut chain_breaks = Vec::new();
    let mut timestamp_regressions = Vec::new();

    loop {
        let batch = Queries::get_chain_batch(pool, after, upto, batch_size).await?;
        if batch.is_empty() {
            break;
        }
        debug!(from = after, rows = batch.len(), "Verifying batch");

        for stored in &batch {
            total_events += 1;

            if stored.previous_hash != expected_previous {
                warn!(event_id = %stored.event_id, seq = stored.seq, "Chain break detected");
                chain_breaks.push(ChainBreak {
                    event_id: stored.event_id.clone(),
                    sequence: stored.seq,
                    expected_previous_hash: expected_previous.clone(),
                    actual_previous_hash: stored.previous_hash.clone(),
                });
            }

            if let Err(reason) = check_content(stored, cipher) {
                warn!(event_id = %stored.event_id, seq = stored.seq, "Corrupted event: {}", reason);
                corrupted_events.push(stored.event_id.clone());
            }

            if let Some(previous) = &previous_timestamp {
                if stored.timestamp < *previous {
                    timestamp_regressions.push(TimestampRegression {
                        event_id: stored.event_id.clone(),
                        previous_timestamp: previous.clone(),
                        timestamp: stored.timestamp.clone(),
                    });
                }
            }

            expected_previous = stored.integrity_hash.clone();
            previous_timestamp = Some(stored.timestamp.clone());
            after = stored.seq;
        }
    }

    let verified = corrupted_events.is_empty() && chain_breaks.is_empty();
    let report = VerificationReport {
        verified,
        total_events,
        corrupted_events,
        chain_breaks,
        timestamp_regressions,
        start_event_id,
        head_hash: expected_previous,
        verified_at: Utc::now(),
    };

    if report.verified {
        info!("{}", report.summary());
    } else {
        warn!("{}", report.summary());
    }
    Ok(report)
}
