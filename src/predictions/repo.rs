use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::predictions::repo_types::{PredictionRecord, PredictionRow};

/// Append-only prediction history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: &PredictionRecord) -> anyhow::Result<()>;

    /// One page of the user's records, newest first, plus the user's total count.
    /// `page` is 1-indexed; both arguments must be positive.
    async fn list_by_user(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> anyhow::Result<(Vec<PredictionRecord>, u64)>;
}

fn offset(page: u32, page_size: u32) -> u64 {
    (page.saturating_sub(1) as u64) * page_size as u64
}

#[derive(Clone)]
pub struct PgHistoryStore {
    db: PgPool,
}

impl PgHistoryStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn append(&self, record: &PredictionRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO predictions (id, user_id, predictions, image_key, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(Json(&record.predictions))
        .bind(&record.image_key)
        .bind(record.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> anyhow::Result<(Vec<PredictionRecord>, u64)> {
        let rows = sqlx::query_as::<_, PredictionRow>(
            r#"
            SELECT id, user_id, predictions, image_key, created_at
            FROM predictions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page_size as i64)
        .bind(offset(page, page_size) as i64)
        .fetch_all(&self.db)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM predictions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;

        Ok((rows.into_iter().map(Into::into).collect(), total as u64))
    }
}

/// Process-local history, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Vec<PredictionRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: &PredictionRecord) -> anyhow::Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> anyhow::Result<(Vec<PredictionRecord>, u64)> {
        let records = self.records.read();
        let mut mine: Vec<&PredictionRecord> =
            records.iter().filter(|r| r.user_id == user_id).collect();
        // same order as the Pg query: created_at DESC, id DESC
        mine.sort_unstable_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        let total = mine.len() as u64;
        let page = mine
            .into_iter()
            .skip(offset(page, page_size) as usize)
            .take(page_size as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }
}
