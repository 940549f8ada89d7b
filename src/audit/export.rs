//! Audit Trail Export
//!
//! Serializes a decrypted, filtered result set for compliance handoff.
//! Sensitive actor fields can be masked; masking only touches the export
//! view, never the stored rows or their hashes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::audit::event::{format_timestamp, AuditEvent};
use crate::audit::merkle::merkle_root;
use crate::audit::query::{QueryResult, RecordFailure};
use crate::error::{AuditError, AuditResult};

/// Replaces `source_ip`, `user_agent` and `session_id` in redacted exports.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// `status` column value for rows that could not be read.
pub const CSV_UNREADABLE: &str = "unreadable";

const CSV_HEADER: [&str; 16] = [
    "event_id",
    "timestamp",
    "event_type",
    "severity",
    "user_id",
    "session_id",
    "source_ip",
    "user_agent",
    "resource",
    "action",
    "outcome",
    "risk_score",
    "details",
    "previous_hash",
    "integrity_hash",
    "status",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Yaml,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Yaml => "yaml",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            other => Err(AuditError::ValidationError(format!(
                "Unknown export format: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub exported_at: DateTime<Utc>,
    pub total_events: usize,
    pub include_sensitive: bool,
    pub redaction_marker: Option<String>,
    /// Root over the exported events' integrity hashes, in export order.
    pub merkle_root: Option<String>,
    pub skipped_records: Vec<RecordFailure>,
    pub export_tool_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditExport {
    pub metadata: ExportMetadata,
    pub events: Vec<AuditEvent>,
}

/// Mask sensitive actor fields that are present.
pub fn redact(event: &mut AuditEvent) {
    for field in [
        &mut event.source_ip,
        &mut event.user_agent,
        &mut event.session_id,
    ] {
        if field.is_some() {
            *field = Some(REDACTION_MARKER.to_string());
        }
    }
}

pub fn build_export(result: QueryResult, include_sensitive: bool) -> AuditExport {
    let hashes: Vec<String> = result
        .events
        .iter()
        .map(|e| e.integrity_hash.clone())
        .collect();

    let mut events = result.events;
    if !include_sensitive {
        events.iter_mut().for_each(redact);
    }

    AuditExport {
        metadata: ExportMetadata {
            exported_at: Utc::now(),
            total_events: events.len(),
            include_sensitive,
            redaction_marker: (!include_sensitive).then(|| REDACTION_MARKER.to_string()),
            merkle_root: merkle_root(&hashes),
            skipped_records: result.failures,
            export_tool_version: env!("CARGO_PKG_VERSION").to_string(),
        },
        events,
    }
}

pub fn render(export: &AuditExport, format: ExportFormat) -> AuditResult<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(export)?),
        ExportFormat::Yaml => serde_yaml::to_string(export).map_err(|e| {
            AuditError::ValidationError(format!("Failed to serialize export: {}", e))
        }),
        ExportFormat::Csv => render_csv(export),
    }
}

/// One row per event with `status` "ok", then one row per skipped record
/// carrying its event id, `status` "unreadable" and the reason in `details`.
fn render_csv(export: &AuditExport) -> AuditResult<String> {
    let mut out = String::new();
    out.push_str(&CSV_HEADER.join(","));
    out.push_str("\r\n");

    for event in &export.events {
        let details = serde_json::to_string(&event.details)?;
        let row = [
            event.event_id.to_string(),
            format_timestamp(&event.timestamp),
            event.event_type.to_string(),
            event.severity.to_string(),
            event.user_id.clone().unwrap_or_default(),
            event.session_id.clone().unwrap_or_default(),
            event.source_ip.clone().unwrap_or_default(),
            event.user_agent.clone().unwrap_or_default(),
            event.resource.clone(),
            event.action.clone(),
            event.outcome.clone(),
            event.risk_score.map(|s| s.to_string()).unwrap_or_default(),
            details,
            event.previous_hash.clone(),
            event.integrity_hash.clone(),
            "ok".to_string(),
        ];
        push_csv_row(&mut out, &row);
    }

    for skipped in &export.metadata.skipped_records {
        let mut row: [String; 16] = Default::default();
        row[0] = skipped.event_id.clone();
        row[12] = skipped.reason.clone();
        row[15] = CSV_UNREADABLE.to_string();
        push_csv_row(&mut out, &row);
    }

    Ok(out)
}

fn push_csv_row(out: &mut String, row: &[String]) {
    let cells: Vec<String> = row.iter().map(|cell| csv_field(cell)).collect();
    out.push_str(&cells.join(","));
    out.push_str("\r\n");
}

/// RFC 4180 quoting.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
