//! Audit Query Engine
//!
//! Filtered, paginated reads over committed events. Filtering happens in
//! SQL on clear-text columns; details are decrypted only for the rows that
//! are returned, and a row that fails to decrypt is reported on its own
//! without aborting the query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audit::chain::open_event;
use crate::audit::event::{AuditEvent, EventType, Severity};
use crate::crypto::PayloadCipher;
use crate::database::{Database, Queries};
use crate::error::AuditResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Descending,
    Ascending,
}

/// Query filter. Empty sets mean "no constraint"; time bounds are inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFilter {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub event_types: Vec<EventType>,
    pub severities: Vec<Severity>,
    pub user_ids: Vec<String>,
    pub resources: Vec<String>,
    pub actions: Vec<String>,
    pub outcomes: Vec<String>,
    pub limit: Option<u32>,
    pub offset: u32,
    pub order: SortOrder,
    /// Ignore rows appended after this sequence number.
    #[serde(skip)]
    pub max_sequence: Option<i64>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_types.push(event_type);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severities.push(severity);
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_ids.push(user_id.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcomes.push(outcome.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn up_to_sequence(mut self, seq: i64) -> Self {
        self.max_sequence = Some(seq);
        self
    }

    pub fn ascending(mut self) -> Self {
        self.order = SortOrder::Ascending;
        self
    }

    /// Requested limit, defaulted and capped.
    pub fn effective_limit(&self, default_limit: u32, max_limit: u32) -> u32 {
        self.limit.unwrap_or(default_limit).min(max_limit)
    }
}

/// A returned row whose details could not be decrypted or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub event_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub events: Vec<AuditEvent>,
    pub failures: Vec<RecordFailure>,
}

impl QueryResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Run `filter` against the store, decrypting each returned row.
pub async fn run_query(
    database: &Database,
    cipher: &PayloadCipher,
    filter: &AuditFilter,
    limit: u32,
) -> AuditResult<QueryResult> {
    let rows = Queries::get_filtered_events(database.pool(), filter, limit).await?;
    let mut result = QueryResult::default();

    for row in &rows {
        match open_event(row, cipher) {
            Ok(event) => result.events.push(event),
            Err(e) => {
                warn!(event_id = %row.event_id, "Could not open audit event: {}", e);
                result.failures.push(RecordFailure {
                    event_id: row.event_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    debug!(
        returned = result.events.len(),
        failed = result.failures.len(),
        "Audit query completed"
    );
    Ok(result)
}

/// Every row matching `filter`, read in pages of `page_size` over the rows
/// committed when the read starts. `filter.limit` and `filter.offset` are
/// ignored.
pub async fn run_query_all(
    database: &Database,
    cipher: &PayloadCipher,
    filter: &AuditFilter,
    page_size: u32,
) -> AuditResult<QueryResult> {
    let page_size = page_size.max(1);
    let upto = Queries::get_max_seq(database.pool()).await?;
    let mut page_filter = filter.clone().up_to_sequence(upto).offset(0);
    page_filter.limit = None;

    let mut result = QueryResult::default();
    loop {
        let page = run_query(database, cipher, &page_filter, page_size).await?;
        let rows = page.events.len() + page.failures.len();
        result.events.extend(page.events);
        result.failures.extend(page.failures);

        if rows < page_size as usize {
            break;
        }
        page_filter.offset = page_filter.offset.saturating_add(page_size);
    }
    Ok(result)
}
