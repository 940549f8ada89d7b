//! Audit Log System
//!
//! Tamper-evident, encrypted audit trail: every event commits to its
//! predecessor through a SHA-256 hash chain, details are sealed with
//! AES-256-GCM, and verification replays the chain from storage.

pub mod chain;
pub mod event;
pub mod export;
pub mod fallback;
pub mod logger;
pub mod merkle;
pub mod query;
pub mod verify;

pub use event::{ActorContext, AuditEvent, EventDetails, EventType, NewAuditEvent, Severity};
pub use export::{ExportFormat, REDACTION_MARKER};
pub use logger::{AuditLogger, ThreatLevel};
pub use merkle::{build_merkle_tree, merkle_root, verify_merkle_root};
pub use query::{AuditFilter, QueryResult, RecordFailure, SortOrder};
pub use verify::{ChainBreak, VerificationReport, VerificationScope};
