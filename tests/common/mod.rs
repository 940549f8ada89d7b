#![allow(dead_code)]

use std::path::Path;
use tempfile::TempDir;

use governance_audit::audit::{
    ActorContext, AuditLogger, EventDetails, EventType, NewAuditEvent, Severity,
};
use governance_audit::config::AuditConfig;

/// Logger over an in-memory database with its key in a fresh temp dir.
pub async fn setup_test_logger() -> (AuditLogger, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = AuditConfig::in_memory(dir.path());
    let logger = AuditLogger::open(&config)
        .await
        .expect("Failed to open audit logger");
    (logger, dir)
}

/// Configuration for a file-backed log under `dir`.
pub fn file_config(dir: &Path) -> AuditConfig {
    AuditConfig {
        database_url: format!("sqlite://{}", dir.join("audit.db").display()),
        key_path: dir.join("audit.key"),
        failure_log_path: Some(dir.join("failures.log")),
        ..AuditConfig::default()
    }
}

pub async fn setup_file_logger(dir: &Path) -> AuditLogger {
    AuditLogger::open(&file_config(dir))
        .await
        .expect("Failed to open file-backed audit logger")
}

/// A user action with a distinct resource and sensitive actor fields.
pub fn user_action(i: usize) -> NewAuditEvent {
    NewAuditEvent::new(
        EventType::UserAction,
        Severity::Low,
        format!("document/{}", i),
        "read",
        "success",
    )
    .with_actor(
        ActorContext::user(format!("user{}", i))
            .with_session(format!("session-{}", i))
            .with_source_ip(format!("10.1.0.{}", i))
            .with_user_agent("audit-test/1.0"),
    )
    .with_details(EventDetails::new().with("index", i as u64))
}

/// Append `count` user actions and return their ids in append order.
pub async fn log_user_actions(logger: &AuditLogger, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = logger
            .log_event(user_action(i))
            .await
            .expect("Failed to log event");
        ids.push(id.to_string());
    }
    ids
}

/// Run a raw statement against the store, bypassing the logger.
pub async fn tamper(logger: &AuditLogger, sql: &str, event_id: &str) {
    let affected = sqlx::query(sql)
        .bind(event_id)
        .execute(logger.database().pool())
        .await
        .expect("Tampering statement failed")
        .rows_affected();
    assert_eq!(affected, 1, "Tampering statement touched no row");
}
