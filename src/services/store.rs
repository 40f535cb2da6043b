use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::queries;
use crate::models::job::{JobRecord, Supersession};

/// Whether a `put` changed the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Applied,
    /// The stored record is already at a later stage (or terminal); the write
    /// was ignored.
    Stale,
}

/// Keyed lookup from job id to the job's current record.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Write `record` unless the stored one is terminal or further along.
    async fn put(&self, record: &JobRecord) -> Result<PutOutcome, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed result store.
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn put(&self, record: &JobRecord) -> Result<PutOutcome, StoreError> {
        if queries::upsert_job(&self.pool, record).await? == 1 {
            return Ok(PutOutcome::Applied);
        }

        // Nothing written: tell a stale write apart from an id collision.
        match queries::get_job(&self.pool, record.id).await? {
            Some(existing) if existing.input_reference != record.input_reference => {
                Err(StoreError::Conflict(record.id))
            }
            _ => Ok(PutOutcome::Stale),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(queries::get_job(&self.pool, id).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-process result store.
#[derive(Default)]
pub struct MemoryResultStore {
    records: RwLock<HashMap<Uuid, JobRecord>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, record: &JobRecord) -> Result<PutOutcome, StoreError> {
        let mut records = self.records.write().await;
        let existing = match records.entry(record.id) {
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                return Ok(PutOutcome::Applied);
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        match record.supersedes(existing) {
            Supersession::Replace => {
                let created_at = existing.created_at;
                let started_at = record.started_at.or(existing.started_at);
                *existing = JobRecord {
                    created_at,
                    started_at,
                    ..record.clone()
                };
                Ok(PutOutcome::Applied)
            }
            Supersession::Stale => Ok(PutOutcome::Stale),
            Supersession::Conflict => Err(StoreError::Conflict(record.id)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job {0} already exists for a different input")]
    Conflict(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobFailure, JobState, Stage};

    #[tokio::test]
    async fn test_get_unknown_is_none() {
        let store = MemoryResultStore::new();
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_records_are_visible() {
        let store = MemoryResultStore::new();
        let pending = JobRecord::pending(Uuid::new_v4(), "a.png");
        store.put(&pending).await.unwrap();
        assert_eq!(store.get(pending.id).await.unwrap().unwrap().state(), JobState::Pending);

        store.put(&pending.started()).await.unwrap();
        let running = store.get(pending.id).await.unwrap().unwrap();
        assert_eq!(running.state(), JobState::Running);
        assert!(running.result().is_none());
        assert_eq!(running.created_at, pending.created_at);
    }

    #[tokio::test]
    async fn test_terminal_record_is_immutable() {
        let store = MemoryResultStore::new();
        let running = JobRecord::pending(Uuid::new_v4(), "a.png").started();
        let done = running.finished(Ok("hello".to_string()));

        assert_eq!(store.put(&running).await.unwrap(), PutOutcome::Applied);
        assert_eq!(store.put(&done).await.unwrap(), PutOutcome::Applied);

        // A stale duplicate delivery restarting or failing the job is ignored.
        assert_eq!(store.put(&running.started()).await.unwrap(), PutOutcome::Stale);
        let late_failure = running.finished(Err(JobFailure::new(Stage::Recognize, "boom")));
        assert_eq!(store.put(&late_failure).await.unwrap(), PutOutcome::Stale);

        let first = store.get(done.id).await.unwrap().unwrap();
        let second = store.get(done.id).await.unwrap().unwrap();
        assert_eq!(first, done);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_conflicting_input_is_rejected() {
        let store = MemoryResultStore::new();
        let job = JobRecord::pending(Uuid::new_v4(), "a.png");
        store.put(&job).await.unwrap();

        let impostor = JobRecord::pending(job.id, "b.png");
        assert!(matches!(
            store.put(&impostor).await,
            Err(StoreError::Conflict(id)) if id == job.id
        ));
        assert_eq!(store.get(job.id).await.unwrap().unwrap().input_reference, "a.png");
    }
}
