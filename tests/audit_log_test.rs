//! End-to-end tests for the audit log: chain verification, tamper
//! detection, queries, redaction and restarts.

mod common;

use common::*;
use serde_json::Value;

use governance_audit::audit::merkle::merkle_root;
use governance_audit::audit::{
    ActorContext, AuditFilter, AuditLogger, EventDetails, EventType, ExportFormat, NewAuditEvent,
    Severity, REDACTION_MARKER,
};
use governance_audit::config::AuditConfig;
use governance_audit::crypto::KeyManager;
use governance_audit::AuditError;

#[tokio::test]
async fn test_untouched_log_verifies() {
    let (logger, _dir) = setup_test_logger().await;
    log_user_actions(&logger, 12).await;

    let report = logger.verify_integrity(None).await.unwrap();
    assert!(report.verified, "{}", report.detailed_status());
    assert_eq!(report.total_events, 12);
    assert!(report.corrupted_events.is_empty());
    assert!(report.chain_breaks.is_empty());
    assert_eq!(report.head_hash, logger.head_hash().await.unwrap());
}

#[tokio::test]
async fn test_altered_action_is_reported_as_corruption() {
    let (logger, _dir) = setup_test_logger().await;
    let ids = log_user_actions(&logger, 5).await;

    tamper(
        &logger,
        "UPDATE audit_events SET action = 'delete' WHERE event_id = ?",
        &ids[2],
    )
    .await;

    let report = logger.verify_integrity(None).await.unwrap();
    assert!(!report.verified);
    assert_eq!(report.corrupted_events, vec![ids[2].clone()]);
    assert!(report.chain_breaks.is_empty());
}

#[tokio::test]
async fn test_altered_outcome_is_reported_as_corruption() {
    let (logger, _dir) = setup_test_logger().await;
    let ids = log_user_actions(&logger, 4).await;

    tamper(
        &logger,
        "UPDATE audit_events SET outcome = 'failure' WHERE event_id = ?",
        &ids[0],
    )
    .await;

    let report = logger.verify_integrity(None).await.unwrap();
    assert_eq!(report.corrupted_events, vec![ids[0].clone()]);
    assert!(report.chain_breaks.is_empty());
}

#[tokio::test]
async fn test_swapped_details_are_reported_as_corruption() {
    let (logger, _dir) = setup_test_logger().await;
    let ids = log_user_actions(&logger, 5).await;

    // Valid ciphertext from another row decrypts fine but hashes differently.
    tamper(
        &logger,
        "UPDATE audit_events SET details_ciphertext = \
         (SELECT details_ciphertext FROM audit_events WHERE seq = 1) WHERE event_id = ?",
        &ids[3],
    )
    .await;

    let report = logger.verify_integrity(None).await.unwrap();
    assert!(!report.verified);
    assert_eq!(report.corrupted_events, vec![ids[3].clone()]);
    assert!(report.chain_breaks.is_empty());
}

#[tokio::test]
async fn test_deleted_event_breaks_chain_at_successor() {
    let (logger, _dir) = setup_test_logger().await;
    let ids = log_user_actions(&logger, 6).await;

    tamper(&logger, "DELETE FROM audit_events WHERE event_id = ?", &ids[3]).await;

    let report = logger.verify_integrity(None).await.unwrap();
    assert!(!report.verified);
    assert_eq!(report.total_events, 5);
    assert!(report.corrupted_events.is_empty());
    assert_eq!(report.chain_breaks.len(), 1);
    assert_eq!(report.chain_breaks[0].event_id, ids[4]);
}

#[tokio::test]
async fn test_deleting_last_event_is_not_detectable_by_linkage() {
    let (logger, _dir) = setup_test_logger().await;
    let ids = log_user_actions(&logger, 3).await;
    let head_before = logger.head_hash().await.unwrap();

    tamper(&logger, "DELETE FROM audit_events WHERE event_id = ?", &ids[2]).await;

    // Truncation leaves a consistent prefix; only the head hash tells.
    let report = logger.verify_integrity(None).await.unwrap();
    assert!(report.verified);
    assert_ne!(report.head_hash, head_before);
}

#[tokio::test]
async fn test_verify_from_event_only_checks_suffix() {
    let (logger, _dir) = setup_test_logger().await;
    let ids = log_user_actions(&logger, 6).await;

    tamper(
        &logger,
        "UPDATE audit_events SET outcome = 'failure' WHERE event_id = ?",
        &ids[1],
    )
    .await;

    let suffix = logger.verify_integrity(Some(&ids[3])).await.unwrap();
    assert!(suffix.verified, "{}", suffix.detailed_status());
    assert_eq!(suffix.total_events, 3);

    let whole = logger.verify_integrity(None).await.unwrap();
    assert!(!whole.verified);

    let unknown = logger.verify_integrity(Some("not-an-event")).await;
    assert!(matches!(unknown, Err(AuditError::ValidationError(_))));
}

#[tokio::test]
async fn test_query_round_trip_by_severity_and_type() {
    let (logger, _dir) = setup_test_logger().await;
    log_user_actions(&logger, 3).await;

    let security_id = logger
        .log_event(
            NewAuditEvent::new(
                EventType::SecurityEvent,
                Severity::High,
                "auth/login",
                "brute-force",
                "blocked",
            )
            .with_details(EventDetails::new().with("attempts", 40))
            .with_risk_score(88.0),
        )
        .await
        .unwrap();

    let matching = logger
        .query_events(
            &AuditFilter::new()
                .severity(Severity::High)
                .event_type(EventType::SecurityEvent),
        )
        .await
        .unwrap();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching.events[0].event_id, security_id);
    assert_eq!(matching.events[0].risk_score, Some(88.0));

    let excluded = logger
        .query_events(&AuditFilter::new().severity(Severity::Low))
        .await
        .unwrap();
    assert_eq!(excluded.len(), 3);
    assert!(excluded.events.iter().all(|e| e.event_id != security_id));

    let other_type = logger
        .query_events(&AuditFilter::new().event_type(EventType::ConfigChange))
        .await
        .unwrap();
    assert!(other_type.is_empty());
}

#[tokio::test]
async fn test_query_ordering_and_pagination() {
    let (logger, _dir) = setup_test_logger().await;
    log_user_actions(&logger, 5).await;

    let newest_first = logger.query_events(&AuditFilter::new()).await.unwrap();
    let resources: Vec<&str> = newest_first.events.iter().map(|e| e.resource.as_str()).collect();
    assert_eq!(
        resources,
        vec!["document/4", "document/3", "document/2", "document/1", "document/0"]
    );

    let page = logger
        .query_events(&AuditFilter::new().ascending().limit(2).offset(2))
        .await
        .unwrap();
    let resources: Vec<&str> = page.events.iter().map(|e| e.resource.as_str()).collect();
    assert_eq!(resources, vec!["document/2", "document/3"]);

    let by_user = logger
        .query_events(&AuditFilter::new().user("user1").user("user4"))
        .await
        .unwrap();
    assert_eq!(by_user.len(), 2);
}

#[tokio::test]
async fn test_time_range_filter() {
    let (logger, _dir) = setup_test_logger().await;
    log_user_actions(&logger, 2).await;

    let all = logger.query_events(&AuditFilter::new()).await.unwrap();
    let oldest = all.events[1].timestamp;
    let newest = all.events[0].timestamp;

    let inclusive = logger
        .query_events(&AuditFilter::new().since(oldest).until(newest))
        .await
        .unwrap();
    assert_eq!(inclusive.len(), 2);

    let future = logger
        .query_events(&AuditFilter::new().since(newest + chrono::Duration::hours(1)))
        .await
        .unwrap();
    assert!(future.is_empty());
}

#[tokio::test]
async fn test_unreadable_row_does_not_abort_query() {
    let (logger, _dir) = setup_test_logger().await;
    let ids = log_user_actions(&logger, 4).await;

    tamper(
        &logger,
        "UPDATE audit_events SET details_ciphertext = X'00' WHERE event_id = ?",
        &ids[1],
    )
    .await;

    let result = logger.query_events(&AuditFilter::new()).await.unwrap();
    assert_eq!(result.len(), 3);
    assert!(!result.is_complete());
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].event_id, ids[1]);

    let export = logger
        .export_audit_trail(&AuditFilter::new(), ExportFormat::Json, false)
        .await
        .unwrap();
    let parsed: Value = serde_json::from_str(&export).unwrap();
    assert_eq!(parsed["metadata"]["skipped_records"][0]["event_id"], Value::from(ids[1].clone()));

    let csv = logger
        .export_audit_trail(&AuditFilter::new(), ExportFormat::Csv, false)
        .await
        .unwrap();
    let rows: Vec<&str> = csv.lines().skip(1).collect();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows.iter().filter(|r| r.ends_with(",ok")).count(), 3);
    let unreadable: Vec<&&str> = rows.iter().filter(|r| r.ends_with(",unreadable")).collect();
    assert_eq!(unreadable.len(), 1);
    assert!(unreadable[0].starts_with(&ids[1]));

    let report = logger.verify_integrity(None).await.unwrap();
    assert_eq!(report.corrupted_events, vec![ids[1].clone()]);
}

#[tokio::test]
async fn test_redacted_exports_hide_sensitive_fields() {
    let (logger, _dir) = setup_test_logger().await;
    logger
        .log_event(
            NewAuditEvent::new(EventType::AccessDenied, Severity::Medium, "vault", "read", "denied")
                .with_actor(
                    ActorContext::user("mallory")
                        .with_session("sess-7f3a")
                        .with_source_ip("203.0.113.99")
                        .with_user_agent("curl/8.4.0"),
                ),
        )
        .await
        .unwrap();

    for format in [ExportFormat::Json, ExportFormat::Csv, ExportFormat::Yaml] {
        let output = logger
            .export_audit_trail(&AuditFilter::new(), format, false)
            .await
            .unwrap();
        assert!(!output.contains("sess-7f3a"), "{} leaked session", format);
        assert!(!output.contains("203.0.113.99"), "{} leaked source ip", format);
        assert!(!output.contains("curl/8.4.0"), "{} leaked user agent", format);
        assert!(output.contains(REDACTION_MARKER));
        assert!(output.contains("mallory"));
    }

    let full = logger
        .export_audit_trail(&AuditFilter::new(), ExportFormat::Json, true)
        .await
        .unwrap();
    assert!(full.contains("203.0.113.99"));

    // Exporting never touches what is stored.
    assert!(logger.verify_integrity(None).await.unwrap().verified);
    let stored = logger.query_events(&AuditFilter::new()).await.unwrap();
    assert_eq!(stored.events[0].source_ip.as_deref(), Some("203.0.113.99"));
}

#[tokio::test]
async fn test_export_carries_merkle_root() {
    let (logger, _dir) = setup_test_logger().await;
    log_user_actions(&logger, 5).await;

    let filter = AuditFilter::new().ascending();
    let events = logger.query_events(&filter).await.unwrap().events;
    let hashes: Vec<String> = events.iter().map(|e| e.integrity_hash.clone()).collect();

    let json = logger
        .export_audit_trail(&filter, ExportFormat::Json, false)
        .await
        .unwrap();
    let parsed: Value = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed["metadata"]["total_events"], Value::from(5));
    assert_eq!(
        parsed["metadata"]["merkle_root"],
        Value::from(merkle_root(&hashes).unwrap())
    );
}

#[tokio::test]
async fn test_unbounded_export_covers_whole_log() {
    let (logger, _dir) = setup_test_logger().await;
    log_user_actions(&logger, 130).await;

    // The default query limit is 100; an export without a limit ignores it.
    let json = logger
        .export_audit_trail(&AuditFilter::new().ascending(), ExportFormat::Json, false)
        .await
        .unwrap();
    let parsed: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["metadata"]["total_events"], Value::from(130));
    assert_eq!(parsed["events"].as_array().unwrap().len(), 130);

    let limited = logger
        .export_audit_trail(&AuditFilter::new().limit(7), ExportFormat::Json, false)
        .await
        .unwrap();
    let parsed: Value = serde_json::from_str(&limited).unwrap();
    assert_eq!(parsed["metadata"]["total_events"], Value::from(7));
}

#[tokio::test]
async fn test_export_pages_past_max_query_limit() {
    let dir = tempfile::tempdir().unwrap();
    let config = AuditConfig {
        default_query_limit: 20,
        max_query_limit: 40,
        ..AuditConfig::in_memory(dir.path())
    };
    let logger = AuditLogger::open(&config).await.unwrap();
    log_user_actions(&logger, 150).await;

    assert_eq!(logger.query_events(&AuditFilter::new()).await.unwrap().len(), 20);

    let filter = AuditFilter::new().ascending();
    let json = logger
        .export_audit_trail(&filter, ExportFormat::Json, false)
        .await
        .unwrap();
    let parsed: Value = serde_json::from_str(&json).unwrap();
    let events = parsed["events"].as_array().unwrap();
    assert_eq!(events.len(), 150);

    // Pages are stitched in order without gaps or repeats.
    let hashes: Vec<String> = events
        .iter()
        .map(|e| e["integrity_hash"].as_str().unwrap().to_string())
        .collect();
    for pair in events.windows(2) {
        assert_eq!(pair[1]["previous_hash"], pair[0]["integrity_hash"]);
    }
    assert_eq!(
        parsed["metadata"]["merkle_root"],
        Value::from(merkle_root(&hashes).unwrap())
    );

    let users = logger
        .export_audit_trail(&AuditFilter::new().user("user3"), ExportFormat::Json, false)
        .await
        .unwrap();
    let parsed: Value = serde_json::from_str(&users).unwrap();
    assert_eq!(parsed["metadata"]["total_events"], Value::from(1));
}

#[tokio::test]
async fn test_config_security_access_scenario() {
    let (logger, _dir) = setup_test_logger().await;

    logger
        .log_event(NewAuditEvent::new(
            EventType::ConfigChange,
            Severity::Medium,
            "config/retention",
            "update",
            "applied",
        ))
        .await
        .unwrap();
    let b = logger
        .log_event(NewAuditEvent::new(
            EventType::SecurityEvent,
            Severity::Critical,
            "node/7",
            "quarantine",
            "contained",
        ))
        .await
        .unwrap()
        .to_string();
    logger
        .log_event(NewAuditEvent::new(
            EventType::AccessDenied,
            Severity::Medium,
            "vault",
            "read",
            "denied",
        ))
        .await
        .unwrap();

    let report = logger.verify_integrity(None).await.unwrap();
    assert!(report.verified);
    assert_eq!(report.total_events, 3);

    tamper(
        &logger,
        "UPDATE audit_events SET action = 'ignore' WHERE event_id = ?",
        &b,
    )
    .await;

    let report = logger.verify_integrity(None).await.unwrap();
    assert!(!report.verified);
    assert_eq!(report.corrupted_events, vec![b]);
    assert!(report.chain_breaks.is_empty());
}

#[tokio::test]
async fn test_chain_continues_after_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let first = setup_file_logger(dir.path()).await;
    log_user_actions(&first, 3).await;
    let head = first.head_hash().await.unwrap();
    first.database().close().await;

    let second = setup_file_logger(dir.path()).await;
    assert_eq!(second.head_hash().await.unwrap(), head);
    log_user_actions(&second, 2).await;

    let report = second.verify_integrity(None).await.unwrap();
    assert!(report.verified, "{}", report.detailed_status());
    assert_eq!(report.total_events, 5);

    let stats = second.statistics().await.unwrap();
    assert_eq!(stats.total_events, 5);
    assert_eq!(stats.by_event_type.get("user-action"), Some(&5));
    assert_eq!(stats.head_hash, report.head_hash);
}

#[tokio::test]
async fn test_missing_key_over_existing_log_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("audit.key");

    let logger = setup_file_logger(dir.path()).await;
    log_user_actions(&logger, 2).await;
    logger.database().close().await;

    std::fs::remove_file(&key_path).unwrap();
    let reopened = AuditLogger::open(&file_config(dir.path())).await;
    assert!(matches!(reopened, Err(AuditError::EncryptionError(_))));
    assert!(!key_path.exists(), "a replacement key must not be generated");
}

#[tokio::test]
async fn test_wrong_key_leaves_only_linkage_checkable() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("audit.key");

    let logger = setup_file_logger(dir.path()).await;
    let ids = log_user_actions(&logger, 3).await;
    logger.database().close().await;

    std::fs::remove_file(&key_path).unwrap();
    KeyManager::new(&key_path).generate_key().unwrap();
    let reopened = setup_file_logger(dir.path()).await;

    let report = reopened.verify_integrity(None).await.unwrap();
    assert!(!report.verified);
    assert_eq!(report.corrupted_events, ids);
    assert!(report.chain_breaks.is_empty());
}

#[tokio::test]
async fn test_rejected_event_is_recorded_in_failure_log() {
    let dir = tempfile::tempdir().unwrap();
    let logger = setup_file_logger(dir.path()).await;

    let result = logger
        .log_event(NewAuditEvent::new(
            EventType::UserAction,
            Severity::Info,
            "document/1",
            "",
            "success",
        ))
        .await;
    assert!(matches!(result, Err(AuditError::ValidationError(_))));

    let failures = std::fs::read_to_string(dir.path().join("failures.log")).unwrap();
    let line: Value = serde_json::from_str(failures.lines().next().unwrap()).unwrap();
    assert_eq!(line["error_kind"], Value::from("validation"));
    assert_eq!(line["resource"], Value::from("document/1"));

    assert_eq!(logger.statistics().await.unwrap().total_events, 0);
}
