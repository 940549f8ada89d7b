//! Hash Chain Engine
//!
//! Binds each event to its predecessor: the integrity hash is a SHA-256
//! digest of the event's canonical form (plaintext details included), and
//! the canonical form includes `previous_hash`. Details are encrypted only
//! after hashing.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::audit::event::{
    format_timestamp, now_micros, parse_timestamp, AuditEvent, EventDetails, NewAuditEvent,
};
use crate::crypto::PayloadCipher;
use crate::database::models::StoredEvent;
use crate::error::{AuditError, AuditResult};

/// `previous_hash` of the first event in a log.
pub const GENESIS_HASH: &str = "";

pub const HASH_PREFIX: &str = "sha256:";

/// The most recently committed link. Sequence 0 means the log is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainTail {
    pub sequence: i64,
    pub head_hash: String,
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl ChainTail {
    pub fn genesis() -> Self {
        Self {
            sequence: 0,
            head_hash: GENESIS_HASH.to_string(),
            last_timestamp: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sequence == 0
    }

    pub fn next_sequence(&self) -> i64 {
        self.sequence + 1
    }

    /// Tail after `stored` has been committed.
    pub fn advanced_to(stored: &StoredEvent) -> AuditResult<Self> {
        Ok(Self {
            sequence: stored.seq,
            head_hash: stored.integrity_hash.clone(),
            last_timestamp: Some(parse_timestamp(&stored.timestamp)?),
        })
    }
}

/// `sha256:<hex>` over the event's canonical bytes.
pub fn compute_integrity_hash(event: &AuditEvent) -> AuditResult<String> {
    let canonical = event.canonical_bytes()?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{}{}", HASH_PREFIX, hex::encode(hasher.finalize())))
}

/// Materialize `draft` as the successor of `tail`: assign identity and
/// time, link, hash over plaintext, then encrypt details for storage.
///
/// Must be called while holding the append lock that guards `tail`.
pub fn seal_event(
    draft: &NewAuditEvent,
    tail: &ChainTail,
    cipher: &PayloadCipher,
) -> AuditResult<(AuditEvent, StoredEvent)> {
    draft.validate()?;

    let now = now_micros();
    let timestamp = match tail.last_timestamp {
        Some(last) if last > now => last,
        _ => now,
    };

    let mut event = AuditEvent {
        event_id: Uuid::new_v4(),
        timestamp,
        event_type: draft.event_type,
        severity: draft.severity,
        user_id: draft.actor.user_id.clone(),
        session_id: draft.actor.session_id.clone(),
        source_ip: draft.actor.source_ip.clone(),
        user_agent: draft.actor.user_agent.clone(),
        resource: draft.resource.clone(),
        action: draft.action.clone(),
        outcome: draft.outcome.clone(),
        details: draft.details.clone(),
        risk_score: draft.risk_score,
        previous_hash: tail.head_hash.clone(),
        integrity_hash: String::new(),
    };
    event.integrity_hash = compute_integrity_hash(&event)?;

    let details_ciphertext = cipher.encrypt(&event.details.to_blob()?)?;

    let stored = StoredEvent {
        seq: tail.next_sequence(),
        event_id: event.event_id.hyphenated().to_string(),
        timestamp: format_timestamp(&event.timestamp),
        event_type: event.event_type.as_str().to_string(),
        severity: event.severity.as_str().to_string(),
        user_id: event.user_id.clone(),
        session_id: event.session_id.clone(),
        source_ip: event.source_ip.clone(),
        user_agent: event.user_agent.clone(),
        resource: event.resource.clone(),
        action: event.action.clone(),
        outcome: event.outcome.clone(),
        details_ciphertext,
        risk_score: event.risk_score,
        previous_hash: event.previous_hash.clone(),
        integrity_hash: event.integrity_hash.clone(),
    };

    Ok((event, stored))
}

/// Decode and decrypt a stored row back into an event.
pub fn open_event(stored: &StoredEvent, cipher: &PayloadCipher) -> AuditResult<AuditEvent> {
    let event_id = Uuid::parse_str(&stored.event_id)
        .map_err(|e| AuditError::ValidationError(format!("Invalid event id: {}", e)))?;
    let plaintext = cipher.decrypt(&stored.details_ciphertext)?;
    let details = EventDetails::from_blob(&plaintext)?;

    Ok(AuditEvent {
        event_id,
        timestamp: parse_timestamp(&stored.timestamp)?,
        event_type: stored.event_type.parse()?,
        severity: stored.severity.parse()?,
        user_id: stored.user_id.clone(),
        session_id: stored.session_id.clone(),
        source_ip: stored.source_ip.clone(),
        user_agent: stored.user_agent.clone(),
        resource: stored.resource.clone(),
        action: stored.action.clone(),
        outcome: stored.outcome.clone(),
        details,
        risk_score: stored.risk_score,
        previous_hash: stored.previous_hash.clone(),
        integrity_hash: stored.integrity_hash.clone(),
    })
}

/// Recompute the content hash of a stored row and compare it to the stored
/// `integrity_hash`. `Err` carries the reason the row is considered corrupt.
pub fn check_content(stored: &StoredEvent, cipher: &PayloadCipher) -> Result<(), String> {
    let event = open_event(stored, cipher).map_err(|e| e.to_string())?;
    let recomputed = compute_integrity_hash(&event).map_err(|e| e.to_string())?;
    if recomputed != stored.integrity_hash {
        return Err(format!(
            "integrity hash mismatch: stored {}, recomputed {}",
            stored.integrity_hash, recomputed
        ));
    }
    Ok(())
}
