//! Append-only event store.
//!
//! Owns the chain tail. The tail lives behind the append lock and is only
//! advanced after the row has been committed; readers go straight to the
//! pool and never touch the lock.

use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::chain::ChainTail;
use crate::database::models::StoredEvent;
use crate::database::{Database, Queries};
use crate::error::{AuditError, AuditResult};

pub struct EventStore {
    database: Database,
    tail: Mutex<ChainTail>,
    lock_timeout: Duration,
}

impl EventStore {
    /// Open the store and recover the chain tail from the last committed row.
    pub async fn open(database: Database, lock_timeout: Duration) -> AuditResult<Self> {
        let tail = Self::load_tail(&database).await?;
        info!(
            sequence = tail.sequence,
            head_hash = %tail.head_hash,
            "Recovered audit chain tail"
        );

        Ok(Self {
            database,
            tail: Mutex::new(tail),
            lock_timeout,
        })
    }

    async fn load_tail(database: &Database) -> AuditResult<ChainTail> {
        match Queries::get_last_event(database.pool()).await? {
            Some(last) => ChainTail::advanced_to(&last),
            None => Ok(ChainTail::genesis()),
        }
    }

    /// Serialized append: lock, build the row from the current tail, commit,
    /// advance the tail, unlock. The tail is untouched if anything fails.
    pub async fn append<T, F>(&self, build: F) -> AuditResult<T>
    where
        F: FnOnce(&ChainTail) -> AuditResult<(T, StoredEvent)>,
    {
        let mut tail = tokio::time::timeout(self.lock_timeout, self.tail.lock())
            .await
            .map_err(|_| AuditError::lock_timeout(self.lock_timeout.as_millis() as u64))?;

        let (value, stored) = build(&tail)?;

        if let Err(e) = Queries::insert_event(self.database.pool(), &stored).await {
            self.resync(&mut tail).await;
            return Err(AuditError::StorageError(format!(
                "Failed to append audit event {}: {}",
                stored.event_id, e
            )));
        }

        *tail = ChainTail::advanced_to(&stored)?;
        debug!(seq = stored.seq, event_id = %stored.event_id, "Committed audit event");
        Ok(value)
    }

    /// Re-read the tail after a failed insert. Covers rows committed by an
    /// append whose caller went away, or by another process.
    async fn resync(&self, tail: &mut ChainTail) {
        match Self::load_tail(&self.database).await {
            Ok(stored_tail) if stored_tail != *tail => {
                warn!(
                    cached_sequence = tail.sequence,
                    stored_sequence = stored_tail.sequence,
                    "Chain tail out of date, resynchronised from storage"
                );
                *tail = stored_tail;
            }
            Ok(_) => {}
            Err(e) => warn!("Could not re-read chain tail: {}", e),
        }
    }

    /// Snapshot of the current tail.
    pub async fn tail(&self) -> AuditResult<ChainTail> {
        let tail = tokio::time::timeout(self.lock_timeout, self.tail.lock())
            .await
            .map_err(|_| AuditError::lock_timeout(self.lock_timeout.as_millis() as u64))?;
        Ok(tail.clone())
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}
