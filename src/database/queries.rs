use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;

use crate::audit::event::format_timestamp;
use crate::audit::query::{AuditFilter, SortOrder};
use crate::database::models::*;

const EVENT_COLUMNS: &str = "seq, event_id, timestamp, event_type, severity, user_id, session_id, \
     source_ip, user_agent, resource, action, outcome, details_ciphertext, risk_score, \
     previous_hash, integrity_hash";

pub struct Queries;

impl Queries {
    /// Append one row inside its own transaction.
    pub async fn insert_event(pool: &SqlitePool, event: &StoredEvent) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO audit_events
            (seq, event_id, timestamp, event_type, severity, user_id, session_id, source_ip,
             user_agent, resource, action, outcome, details_ciphertext, risk_score,
             previous_hash, integrity_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.seq)
        .bind(&event.event_id)
        .bind(&event.timestamp)
        .bind(&event.event_type)
        .bind(&event.severity)
        .bind(&event.user_id)
        .bind(&event.session_id)
        .bind(&event.source_ip)
        .bind(&event.user_agent)
        .bind(&event.resource)
        .bind(&event.action)
        .bind(&event.outcome)
        .bind(&event.details_ciphertext)
        .bind(event.risk_score)
        .bind(&event.previous_hash)
        .bind(&event.integrity_hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_last_event(pool: &SqlitePool) -> Result<Option<StoredEvent>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM audit_events ORDER BY seq DESC LIMIT 1",
            EVENT_COLUMNS
        ))
        .fetch_optional(pool)
        .await?;

        row.as_ref().map(StoredEvent::from_row).transpose()
    }

    pub async fn get_event_by_id(
        pool: &SqlitePool,
        event_id: &str,
    ) -> Result<Option<StoredEvent>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM audit_events WHERE event_id = ?",
            EVENT_COLUMNS
        ))
        .bind(event_id)
        .fetch_optional(pool)
        .await?;

        row.as_ref().map(StoredEvent::from_row).transpose()
    }

    /// The stored row appended immediately before `seq`, if any.
    pub async fn get_predecessor(
        pool: &SqlitePool,
        seq: i64,
    ) -> Result<Option<StoredEvent>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM audit_events WHERE seq < ? ORDER BY seq DESC LIMIT 1",
            EVENT_COLUMNS
        ))
        .bind(seq)
        .fetch_optional(pool)
        .await?;

        row.as_ref().map(StoredEvent::from_row).transpose()
    }

    pub async fn get_max_seq(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(seq), 0) FROM audit_events")
            .fetch_one(pool)
            .await
    }

    /// Rows in append order with `after < seq <= upto`, at most `limit`.
    pub async fn get_chain_batch(
        pool: &SqlitePool,
        after: i64,
        upto: i64,
        limit: u32,
    ) -> Result<Vec<StoredEvent>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM audit_events WHERE seq > ? AND seq <= ? ORDER BY seq ASC LIMIT ?",
            EVENT_COLUMNS
        ))
        .bind(after)
        .bind(upto)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;

        rows.iter().map(StoredEvent::from_row).collect()
    }

    /// Filtered, ordered, paginated rows. Only clear-text columns are
    /// filtered; details stay encrypted.
    pub async fn get_filtered_events(
        pool: &SqlitePool,
        filter: &AuditFilter,
        limit: u32,
    ) -> Result<Vec<StoredEvent>, sqlx::Error> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM audit_events WHERE 1 = 1",
            EVENT_COLUMNS
        ));

        if let Some(start) = &filter.start_time {
            builder.push(" AND timestamp >= ").push_bind(format_timestamp(start));
        }
        if let Some(end) = &filter.end_time {
            builder.push(" AND timestamp <= ").push_bind(format_timestamp(end));
        }
        if let Some(max_seq) = filter.max_sequence {
            builder.push(" AND seq <= ").push_bind(max_seq);
        }

        push_in(
            &mut builder,
            "event_type",
            filter.event_types.iter().map(|t| t.as_str().to_string()).collect(),
        );
        push_in(
            &mut builder,
            "severity",
            filter.severities.iter().map(|s| s.as_str().to_string()).collect(),
        );
        push_in(&mut builder, "user_id", filter.user_ids.clone());
        push_in(&mut builder, "resource", filter.resources.clone());
        push_in(&mut builder, "action", filter.actions.clone());
        push_in(&mut builder, "outcome", filter.outcomes.clone());

        match filter.order {
            SortOrder::Descending => builder.push(" ORDER BY timestamp DESC, seq DESC"),
            SortOrder::Ascending => builder.push(" ORDER BY timestamp ASC, seq ASC"),
        };

        builder
            .push(" LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.offset));

        let rows = builder.build().fetch_all(pool).await?;
        rows.iter().map(StoredEvent::from_row).collect()
    }

    pub async fn get_statistics(pool: &SqlitePool) -> Result<AuditStatistics, sqlx::Error> {
        let totals = sqlx::query(
            "SELECT COUNT(*) AS total, MIN(timestamp) AS first_ts, MAX(timestamp) AS last_ts FROM audit_events",
        )
        .fetch_one(pool)
        .await?;

        let by_event_type = Self::count_grouped(pool, "event_type").await?;
        let by_severity = Self::count_grouped(pool, "severity").await?;
        let head_hash = Self::get_last_event(pool)
            .await?
            .map(|e| e.integrity_hash)
            .unwrap_or_default();

        Ok(AuditStatistics {
            total_events: totals.try_get::<i64, _>("total")? as u64,
            by_event_type,
            by_severity,
            first_timestamp: totals.try_get("first_ts")?,
            last_timestamp: totals.try_get("last_ts")?,
            head_hash,
        })
    }

    async fn count_grouped(
        pool: &SqlitePool,
        column: &'static str,
    ) -> Result<BTreeMap<String, u64>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {col} AS name, COUNT(*) AS n FROM audit_events GROUP BY {col}",
            col = column
        ))
        .fetch_all(pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            counts.insert(row.try_get::<String, _>("name")?, row.try_get::<i64, _>("n")? as u64);
        }
        Ok(counts)
    }
}

fn push_in(builder: &mut QueryBuilder<Sqlite>, column: &str, values: Vec<String>) {
    if values.is_empty() {
        return;
    }

    builder.push(" AND ").push(column).push(" IN (");
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}
