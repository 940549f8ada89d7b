//! Audit Event Model
//!
//! Defines the immutable audit event, its closed type/severity taxonomy,
//! the structured details payload and the canonical byte form that both
//! the writer and the verifier hash.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AuditError, AuditResult};

/// Version tag of the plaintext details blob.
pub const DETAILS_FORMAT_VERSION: u32 = 1;

/// Version tag mixed into the canonical form.
pub const CANONICAL_FORMAT_VERSION: u32 = 1;

/// Closed set of audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    ConfigChange,
    PolicyEvaluation,
    ComplianceAssessment,
    UserAction,
    SystemEvent,
    SecurityEvent,
    AccessGranted,
    AccessDenied,
    Error,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::ConfigChange,
        EventType::PolicyEvaluation,
        EventType::ComplianceAssessment,
        EventType::UserAction,
        EventType::SystemEvent,
        EventType::SecurityEvent,
        EventType::AccessGranted,
        EventType::AccessDenied,
        EventType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ConfigChange => "config-change",
            EventType::PolicyEvaluation => "policy-evaluation",
            EventType::ComplianceAssessment => "compliance-assessment",
            EventType::UserAction => "user-action",
            EventType::SystemEvent => "system-event",
            EventType::SecurityEvent => "security-event",
            EventType::AccessGranted => "access-granted",
            EventType::AccessDenied => "access-denied",
            EventType::Error => "error",
        }
    }
}

impl FromStr for EventType {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| AuditError::ValidationError(format!("Unknown event type: {}", s)))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of severities, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl FromStr for Severity {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .iter()
            .find(|sev| sev.as_str() == s)
            .copied()
            .ok_or_else(|| AuditError::ValidationError(format!("Unknown severity: {}", s)))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who triggered the event. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ActorContext {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_source_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Structured event payload: string keys to JSON primitive values.
///
/// Keys are kept sorted so the serialized form is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventDetails(BTreeMap<String, Value>);

#[derive(Serialize, Deserialize)]
struct DetailsBlob {
    version: u32,
    fields: BTreeMap<String, Value>,
}

impl EventDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    /// Build from an arbitrary JSON value; only objects are accepted.
    pub fn from_json(value: Value) -> AuditResult<Self> {
        match value {
            Value::Object(map) => {
                let details = Self(map.into_iter().collect());
                details.validate()?;
                Ok(details)
            }
            Value::Null => Ok(Self::default()),
            other => Err(AuditError::ValidationError(format!(
                "Details must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Reject non-primitive values, empty keys and non-finite numbers.
    pub fn validate(&self) -> AuditResult<()> {
        for (key, value) in &self.0 {
            if key.trim().is_empty() {
                return Err(AuditError::ValidationError(
                    "Details keys must not be empty".to_string(),
                ));
            }
            match value {
                Value::Null | Value::Bool(_) | Value::String(_) => {}
                Value::Number(n) => {
                    if n.as_f64().map_or(false, |f| !f.is_finite()) {
                        return Err(AuditError::ValidationError(format!(
                            "Details value for '{}' is not a finite number",
                            key
                        )));
                    }
                }
                Value::Array(_) | Value::Object(_) => {
                    return Err(AuditError::ValidationError(format!(
                        "Details value for '{}' must be a JSON primitive",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    /// Versioned plaintext blob that gets encrypted for storage.
    pub fn to_blob(&self) -> AuditResult<Vec<u8>> {
        let blob = DetailsBlob {
            version: DETAILS_FORMAT_VERSION,
            fields: self.0.clone(),
        };
        Ok(serde_json::to_vec(&blob)?)
    }

    pub fn from_blob(bytes: &[u8]) -> AuditResult<Self> {
        let blob: DetailsBlob = serde_json::from_slice(bytes)?;
        if blob.version != DETAILS_FORMAT_VERSION {
            return Err(AuditError::ValidationError(format!(
                "Unsupported details format version {}",
                blob.version
            )));
        }
        let details = Self(blob.fields);
        details.validate()?;
        Ok(details)
    }
}

/// Input to `AuditLogger::log_event`. Identity, time and hashes are
/// assigned when the event is appended.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub event_type: EventType,
    pub severity: Severity,
    pub resource: String,
    pub action: String,
    pub outcome: String,
    pub details: EventDetails,
    pub actor: ActorContext,
    pub risk_score: Option<f64>,
}

impl NewAuditEvent {
    pub fn new(
        event_type: EventType,
        severity: Severity,
        resource: impl Into<String>,
        action: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            severity,
            resource: resource.into(),
            action: action.into(),
            outcome: outcome.into(),
            details: EventDetails::default(),
            actor: ActorContext::default(),
            risk_score: None,
        }
    }

    pub fn with_details(mut self, details: EventDetails) -> Self {
        self.details = details;
        self
    }

    pub fn with_actor(mut self, actor: ActorContext) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_risk_score(mut self, risk_score: f64) -> Self {
        self.risk_score = Some(risk_score);
        self
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.resource.trim().is_empty() {
            return Err(AuditError::missing_field("resource"));
        }
        if self.action.trim().is_empty() {
            return Err(AuditError::missing_field("action"));
        }
        if self.outcome.trim().is_empty() {
            return Err(AuditError::missing_field("outcome"));
        }
        if let Some(score) = self.risk_score {
            if !score.is_finite() {
                return Err(AuditError::ValidationError(
                    "risk_score must be a finite number".to_string(),
                ));
            }
        }
        self.details.validate()
    }
}

/// A committed audit event with plaintext details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: Severity,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub resource: String,
    pub action: String,
    pub outcome: String,
    pub details: EventDetails,
    pub risk_score: Option<f64>,
    pub previous_hash: String,
    pub integrity_hash: String,
}

/// Field order here is the canonical order. Do not reorder.
#[derive(Serialize)]
struct CanonicalEvent<'a> {
    canonical_version: u32,
    event_id: String,
    timestamp: String,
    event_type: &'static str,
    severity: &'static str,
    user_id: Option<&'a str>,
    session_id: Option<&'a str>,
    source_ip: Option<&'a str>,
    user_agent: Option<&'a str>,
    resource: &'a str,
    action: &'a str,
    outcome: &'a str,
    details: &'a BTreeMap<String, Value>,
    risk_score: Option<f64>,
    previous_hash: &'a str,
}

impl AuditEvent {
    /// Deterministic byte form of every field except `integrity_hash`,
    /// over the plaintext details.
    pub fn canonical_bytes(&self) -> AuditResult<Vec<u8>> {
        let canonical = CanonicalEvent {
            canonical_version: CANONICAL_FORMAT_VERSION,
            event_id: self.event_id.hyphenated().to_string(),
            timestamp: format_timestamp(&self.timestamp),
            event_type: self.event_type.as_str(),
            severity: self.severity.as_str(),
            user_id: self.user_id.as_deref(),
            session_id: self.session_id.as_deref(),
            source_ip: self.source_ip.as_deref(),
            user_agent: self.user_agent.as_deref(),
            resource: &self.resource,
            action: &self.action,
            outcome: &self.outcome,
            details: self.details.as_map(),
            risk_score: self.risk_score,
            previous_hash: &self.previous_hash,
        };
        Ok(serde_json::to_vec(&canonical)?)
    }

    pub fn actor(&self) -> ActorContext {
        ActorContext {
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            source_ip: self.source_ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} [{}] {} {} -> {} ({})",
            self.event_type, self.severity, self.action, self.resource, self.outcome, self.event_id
        )
    }
}

/// Fixed-width RFC 3339, microsecond precision, `Z` suffix.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> AuditResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AuditError::ValidationError(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Current time truncated to the precision that is persisted.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
