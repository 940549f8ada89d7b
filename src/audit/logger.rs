//! Audit Logger
//!
//! Public facade over the event store: tamper-evident appends, filtered
//! queries, chain verification and exports, plus the convenience calls
//! collaborators use for configuration, policy, security and access events.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::audit::chain::seal_event;
use crate::audit::event::{ActorContext, EventDetails, EventType, NewAuditEvent, Severity};
use crate::audit::export::{build_export, render, ExportFormat};
use crate::audit::fallback::FailureLog;
use crate::audit::query::{run_query, run_query_all, AuditFilter, QueryResult};
use crate::audit::verify::{verify_chain, VerificationReport, VerificationScope};
use crate::config::AuditConfig;
use crate::crypto::{KeyManager, PayloadCipher};
use crate::database::{AuditStatistics, Database, EventStore, Queries};
use crate::error::{AuditError, AuditResult};

/// Threat level reported by detection heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn severity(&self) -> Severity {
        match self {
            ThreatLevel::Low => Severity::Low,
            ThreatLevel::Medium => Severity::Medium,
            ThreatLevel::High => Severity::High,
            ThreatLevel::Critical => Severity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.severity().as_str()
    }
}

impl FromStr for ThreatLevel {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(ThreatLevel::Low),
            "medium" => Ok(ThreatLevel::Medium),
            "high" => Ok(ThreatLevel::High),
            "critical" => Ok(ThreatLevel::Critical),
            other => Err(AuditError::ValidationError(format!(
                "Unknown threat level: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a policy evaluation by number of violations.
pub fn policy_severity(violation_count: usize) -> Severity {
    match violation_count {
        0 => Severity::Info,
        1..=2 => Severity::Medium,
        3..=4 => Severity::High,
        _ => Severity::Critical,
    }
}

/// Tamper-evident audit logger
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<EventStore>,
    cipher: Arc<PayloadCipher>,
    failure_log: FailureLog,
    verify_batch_size: u32,
    default_query_limit: u32,
    max_query_limit: u32,
}

impl AuditLogger {
    /// Open the database (running migrations) and load the key. A key is
    /// only generated for an empty log; a log that already holds events
    /// without its key is an `EncryptionError`.
    pub async fn open(config: &AuditConfig) -> AuditResult<Self> {
        config.validate()?;

        let database = Database::new(&config.database_url).await?;
        database.run_migrations().await?;

        let manager = KeyManager::new(&config.key_path);
        let has_events = Queries::get_last_event(database.pool()).await?.is_some();
        let cipher = if has_events {
            if !manager.key_exists() {
                database.close().await;
                return Err(AuditError::EncryptionError(format!(
                    "Audit log holds events but key file {} is missing",
                    manager.key_path().display()
                )));
            }
            manager.load_key()?
        } else {
            manager.load_or_generate()?
        };

        Self::new(database, Arc::new(cipher), config).await
    }

    /// Build a logger over an already migrated database and a loaded key.
    pub async fn new(
        database: Database,
        cipher: Arc<PayloadCipher>,
        config: &AuditConfig,
    ) -> AuditResult<Self> {
        let store = EventStore::open(database, config.append_lock_timeout()).await?;

        info!(
            key_fingerprint = %cipher.fingerprint(),
            "Audit logger ready"
        );

        Ok(Self {
            store: Arc::new(store),
            cipher,
            failure_log: FailureLog::new(config.failure_log_path.clone()),
            verify_batch_size: config.verify_batch_size,
            default_query_limit: config.default_query_limit,
            max_query_limit: config.max_query_limit,
        })
    }

    pub fn database(&self) -> &Database {
        self.store.database()
    }

    /// Append an event to the chain and return its id.
    ///
    /// Failures are returned to the caller and also recorded in the
    /// failure side-log.
    pub async fn log_event(&self, draft: NewAuditEvent) -> AuditResult<Uuid> {
        // The append runs on its own task so a dropped caller cannot stop it
        // between commit and tail advance.
        let store = Arc::clone(&self.store);
        let cipher = Arc::clone(&self.cipher);
        let task_draft = draft.clone();
        let append = tokio::spawn(async move {
            store
                .append(|tail| {
                    let (event, stored) = seal_event(&task_draft, tail, &cipher)?;
                    Ok((event.event_id, stored))
                })
                .await
        });

        let result = match append.await {
            Ok(result) => result,
            Err(e) => Err(AuditError::StorageError(format!(
                "Append task did not complete: {}",
                e
            ))),
        };

        match result {
            Ok(event_id) => {
                info!(
                    event_id = %event_id,
                    event_type = %draft.event_type,
                    severity = %draft.severity,
                    "Audit event logged"
                );
                Ok(event_id)
            }
            Err(e) => {
                self.failure_log.record("log_event", &draft, &e);
                Err(e)
            }
        }
    }

    pub async fn query_events(&self, filter: &AuditFilter) -> AuditResult<QueryResult> {
        let limit = filter.effective_limit(self.default_query_limit, self.max_query_limit);
        run_query(self.database(), &self.cipher, filter, limit).await
    }

    /// Verify the whole log, or the suffix starting at `from_event_id`.
    pub async fn verify_integrity(
        &self,
        from_event_id: Option<&str>,
    ) -> AuditResult<VerificationReport> {
        let scope = match from_event_id {
            Some(event_id) => VerificationScope::FromEvent(event_id.to_string()),
            None => VerificationScope::EntireLog,
        };
        verify_chain(self.database(), &self.cipher, &scope, self.verify_batch_size).await
    }

    pub async fn export_audit_trail(
        &self,
        filter: &AuditFilter,
        format: ExportFormat,
        include_sensitive: bool,
    ) -> AuditResult<String> {
        // Without an explicit limit the export covers every matching row.
        let result = match filter.limit {
            Some(_) => self.query_events(filter).await?,
            None => {
                run_query_all(self.database(), &self.cipher, filter, self.max_query_limit).await?
            }
        };
        let export = build_export(result, include_sensitive);

        info!(
            format = %format,
            events = export.metadata.total_events,
            skipped = export.metadata.skipped_records.len(),
            include_sensitive,
            "Exporting audit trail"
        );
        render(&export, format)
    }

    pub async fn statistics(&self) -> AuditResult<AuditStatistics> {
        Ok(Queries::get_statistics(self.database().pool()).await?)
    }

    /// Integrity hash of the last committed event.
    pub async fn head_hash(&self) -> AuditResult<String> {
        Ok(self.store.tail().await?.head_hash)
    }

    pub async fn log_config_change(
        &self,
        actor: ActorContext,
        resource: &str,
        setting: &str,
        old_value: impl Into<Value>,
        new_value: impl Into<Value>,
    ) -> AuditResult<Uuid> {
        let details = EventDetails::new()
            .with("setting", setting)
            .with("old_value", old_value)
            .with("new_value", new_value);

        self.log_event(
            NewAuditEvent::new(
                EventType::ConfigChange,
                Severity::Medium,
                resource,
                "update",
                "applied",
            )
            .with_details(details)
            .with_actor(actor),
        )
        .await
    }

    pub async fn log_policy_evaluation(
        &self,
        actor: ActorContext,
        policy_id: &str,
        resource: &str,
        violations: &[String],
        risk_score: Option<f64>,
    ) -> AuditResult<Uuid> {
        let outcome = if violations.is_empty() {
            "compliant"
        } else {
            "non_compliant"
        };

        let details = EventDetails::new()
            .with("policy_id", policy_id)
            .with("violation_count", violations.len() as u64)
            .with("violations", violations.join("; "));

        let mut draft = NewAuditEvent::new(
            EventType::PolicyEvaluation,
            policy_severity(violations.len()),
            resource,
            "evaluate",
            outcome,
        )
        .with_details(details)
        .with_actor(actor);
        draft.risk_score = risk_score;

        self.log_event(draft).await
    }

    pub async fn log_security_detection(
        &self,
        actor: ActorContext,
        resource: &str,
        detection: &str,
        threat_level: ThreatLevel,
        risk_score: f64,
        details: EventDetails,
    ) -> AuditResult<Uuid> {
        let details = details
            .with("detection", detection)
            .with("threat_level", threat_level.as_str());

        self.log_event(
            NewAuditEvent::new(
                EventType::SecurityEvent,
                threat_level.severity(),
                resource,
                "detect",
                "flagged",
            )
            .with_details(details)
            .with_actor(actor)
            .with_risk_score(risk_score),
        )
        .await
    }

    pub async fn log_access_decision(
        &self,
        actor: ActorContext,
        resource: &str,
        action: &str,
        granted: bool,
        reason: Option<&str>,
    ) -> AuditResult<Uuid> {
        let (event_type, severity, outcome) = if granted {
            (EventType::AccessGranted, Severity::Info, "granted")
        } else {
            (EventType::AccessDenied, Severity::Medium, "denied")
        };

        let mut details = EventDetails::new();
        if let Some(reason) = reason {
            details.insert("reason", reason);
        }

        self.log_event(
            NewAuditEvent::new(event_type, severity, resource, action, outcome)
                .with_details(details)
                .with_actor(actor),
        )
        .await
    }
}
