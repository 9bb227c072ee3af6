use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::otp::{OtpChallenge, Purpose};

/// Persistence for OTP challenges, keyed by (phone, purpose).
///
/// Implementations must make `issue` and `mark_consumed` atomic: `issue`
/// supersedes every active challenge for the key in the same step that inserts
/// the new one, and `mark_consumed` is a compare-and-set that only one caller
/// can win.
#[async_trait]
pub trait OtpStore: Send + Sync {
    async fn issue(&self, challenge: OtpChallenge) -> anyhow::Result<()>;

    /// Most recently issued challenge for the key, whatever its state.
    async fn latest(&self, phone: &str, purpose: Purpose) -> anyhow::Result<Option<OtpChallenge>>;

    /// Superseded challenges for the key that had not yet expired at `now`.
    async fn superseded_live(
        &self,
        phone: &str,
        purpose: Purpose,
        now: OffsetDateTime,
    ) -> anyhow::Result<Vec<OtpChallenge>>;

    /// Marks the challenge consumed if it is still unconsumed, unsuperseded,
    /// unexpired and below `max_attempts` failures. Returns `true` only for
    /// the caller that made the change.
    async fn mark_consumed(
        &self,
        challenge: &OtpChallenge,
        now: OffsetDateTime,
        max_attempts: i32,
    ) -> anyhow::Result<bool>;

    /// Increments the failed-attempt counter of a still active challenge that
    /// is below `max_attempts` and returns the new value. `None` when the
    /// challenge had already left the active state.
    async fn record_failure(
        &self,
        challenge: &OtpChallenge,
        max_attempts: i32,
    ) -> anyhow::Result<Option<i32>>;

    /// Deletes challenges that expired before `before`. Returns how many went.
    async fn purge_expired(&self, before: OffsetDateTime) -> anyhow::Result<u64>;
}

#[derive(Debug, FromRow)]
struct OtpChallengeRow {
    id: Uuid,
    phone: String,
    purpose: String,
    code_hash: String,
    issued_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    consumed_at: Option<OffsetDateTime>,
    superseded_at: Option<OffsetDateTime>,
    failed_attempts: i32,
}

impl TryFrom<OtpChallengeRow> for OtpChallenge {
    type Error = anyhow::Error;

    fn try_from(r: OtpChallengeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            phone: r.phone,
            purpose: r.purpose.parse()?,
            code_hash: r.code_hash,
            issued_at: r.issued_at,
            expires_at: r.expires_at,
            consumed_at: r.consumed_at,
            superseded_at: r.superseded_at,
            failed_attempts: r.failed_attempts,
        })
    }
}

#[derive(Clone)]
pub struct PgOtpStore {
    db: PgPool,
}

impl PgOtpStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OtpStore for PgOtpStore {
    async fn issue(&self, c: OtpChallenge) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await?;
        // serialize issuers of the same key until commit
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || ':' || $2))")
            .bind(&c.phone)
            .bind(c.purpose.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE otp_challenges
               SET superseded_at = $3
             WHERE phone = $1 AND purpose = $2
               AND consumed_at IS NULL AND superseded_at IS NULL
            "#,
        )
        .bind(&c.phone)
        .bind(c.purpose.as_str())
        .bind(c.issued_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO otp_challenges
                (id, phone, purpose, code_hash, issued_at, expires_at, failed_attempts)
            VALUES ($1, $2, $3, $4, $5, $6, 0)
            "#,
        )
        .bind(c.id)
        .bind(&c.phone)
        .bind(c.purpose.as_str())
        .bind(&c.code_hash)
        .bind(c.issued_at)
        .bind(c.expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn latest(&self, phone: &str, purpose: Purpose) -> anyhow::Result<Option<OtpChallenge>> {
        let row = sqlx::query_as::<_, OtpChallengeRow>(
            r#"
            SELECT id, phone, purpose, code_hash, issued_at, expires_at,
                   consumed_at, superseded_at, failed_attempts
              FROM otp_challenges
             WHERE phone = $1 AND purpose = $2
             ORDER BY issued_at DESC
             LIMIT 1
            "#,
        )
        .bind(phone)
        .bind(purpose.as_str())
        .fetch_optional(&self.db)
        .await?;
        row.map(OtpChallenge::try_from).transpose()
    }

    async fn superseded_live(
        &self,
        phone: &str,
        purpose: Purpose,
        now: OffsetDateTime,
    ) -> anyhow::Result<Vec<OtpChallenge>> {
        let rows = sqlx::query_as::<_, OtpChallengeRow>(
            r#"
            SELECT id, phone, purpose, code_hash, issued_at, expires_at,
                   consumed_at, superseded_at, failed_attempts
              FROM otp_challenges
             WHERE phone = $1 AND purpose = $2
               AND superseded_at IS NOT NULL AND expires_at > $3
             ORDER BY issued_at DESC
            "#,
        )
        .bind(phone)
        .bind(purpose.as_str())
        .bind(now)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(OtpChallenge::try_from).collect()
    }

    async fn mark_consumed(
        &self,
        c: &OtpChallenge,
        now: OffsetDateTime,
        max_attempts: i32,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE otp_challenges
               SET consumed_at = $2
             WHERE id = $1
               AND consumed_at IS NULL AND superseded_at IS NULL
               AND expires_at > $2
               AND failed_attempts < $3
            "#,
        )
        .bind(c.id)
        .bind(now)
        .bind(max_attempts)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(
        &self,
        c: &OtpChallenge,
        max_attempts: i32,
    ) -> anyhow::Result<Option<i32>> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE otp_challenges
               SET failed_attempts = failed_attempts + 1
             WHERE id = $1
               AND consumed_at IS NULL AND superseded_at IS NULL
               AND failed_attempts < $2
            RETURNING failed_attempts
            "#,
        )
        .bind(c.id)
        .bind(max_attempts)
        .fetch_optional(&self.db)
        .await?;
        Ok(attempts)
    }

    async fn purge_expired(&self, before: OffsetDateTime) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM otp_challenges WHERE expires_at < $1")
            .bind(before)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Process-local challenge store. Each (phone, purpose) shard holds the
/// challenge history in issue order; the dashmap shard lock makes `issue` and
/// `mark_consumed` atomic per key.
#[derive(Default)]
pub struct MemoryOtpStore {
    challenges: DashMap<(String, Purpose), Vec<OtpChallenge>>,
}

impl MemoryOtpStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl OtpStore for MemoryOtpStore {
    async fn issue(&self, challenge: OtpChallenge) -> anyhow::Result<()> {
        let key = (challenge.phone.clone(), challenge.purpose);
        let mut history = self.challenges.entry(key).or_default();
        for old in history.iter_mut() {
            if old.consumed_at.is_none() && old.superseded_at.is_none() {
                old.superseded_at = Some(challenge.issued_at);
            }
        }
        history.push(challenge);
        Ok(())
    }

    async fn latest(&self, phone: &str, purpose: Purpose) -> anyhow::Result<Option<OtpChallenge>> {
        Ok(self
            .challenges
            .get(&(phone.to_string(), purpose))
            .and_then(|history| history.last().cloned()))
    }

    async fn superseded_live(
        &self,
        phone: &str,
        purpose: Purpose,
        now: OffsetDateTime,
    ) -> anyhow::Result<Vec<OtpChallenge>> {
        Ok(self
            .challenges
            .get(&(phone.to_string(), purpose))
            .map(|history| {
                history
                    .iter()
                    .rev()
                    .filter(|c| c.superseded_at.is_some() && c.expires_at > now)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mark_consumed(
        &self,
        c: &OtpChallenge,
        now: OffsetDateTime,
        max_attempts: i32,
    ) -> anyhow::Result<bool> {
        let Some(mut history) = self.challenges.get_mut(&(c.phone.clone(), c.purpose)) else {
            return Ok(false);
        };
        let Some(stored) = history.iter_mut().find(|s| s.id == c.id) else {
            return Ok(false);
        };
        if stored.consumed_at.is_some()
            || stored.superseded_at.is_some()
            || stored.expires_at <= now
            || stored.failed_attempts >= max_attempts
        {
            return Ok(false);
        }
        stored.consumed_at = Some(now);
        Ok(true)
    }

    async fn record_failure(
        &self,
        c: &OtpChallenge,
        max_attempts: i32,
    ) -> anyhow::Result<Option<i32>> {
        let Some(mut history) = self.challenges.get_mut(&(c.phone.clone(), c.purpose)) else {
            return Ok(None);
        };
        let Some(stored) = history.iter_mut().find(|s| s.id == c.id) else {
            return Ok(None);
        };
        if stored.consumed_at.is_some()
            || stored.superseded_at.is_some()
            || stored.failed_attempts >= max_attempts
        {
            return Ok(None);
        }
        stored.failed_attempts += 1;
        Ok(Some(stored.failed_attempts))
    }

    async fn purge_expired(&self, before: OffsetDateTime) -> anyhow::Result<u64> {
        let mut removed = 0u64;
        self.challenges.retain(|_, history| {
            let len = history.len();
            history.retain(|c| c.expires_at >= before);
            removed += (len - history.len()) as u64;
            !history.is_empty()
        });
        Ok(removed)
    }
}
