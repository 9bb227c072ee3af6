use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

/// Durable user records keyed by phone number.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    /// Creates the user, or returns the already registered one for that phone.
    async fn create_if_absent(&self, new: NewUser, now: OffsetDateTime) -> anyhow::Result<User>;
    /// Updates the mutable profile fields; `None` leaves a field unchanged.
    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<String>,
        language: Option<String>,
    ) -> anyhow::Result<Option<User>>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, phone, language, created_at
            FROM users
            WHERE phone = $1
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, phone, language, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create_if_absent(&self, new: NewUser, now: OffsetDateTime) -> anyhow::Result<User> {
        // the no-op update makes RETURNING yield the existing row on conflict
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, name, phone, language, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (phone) DO UPDATE SET phone = EXCLUDED.phone
            RETURNING id, name, phone, language, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.phone)
        .bind(&new.language)
        .bind(now)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<String>,
        language: Option<String>,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET name = COALESCE($2, name),
                   language = COALESCE($3, language)
             WHERE id = $1
            RETURNING id, name, phone, language, created_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(language)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }
}

/// Process-local identity store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<Uuid, User>,
    by_phone: DashMap<String, Uuid>,
}

impl MemoryUserStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<User>> {
        let Some(id) = self.by_phone.get(phone).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn create_if_absent(&self, new: NewUser, now: OffsetDateTime) -> anyhow::Result<User> {
        match self.by_phone.entry(new.phone.clone()) {
            Entry::Occupied(existing) => self
                .users
                .get(existing.get())
                .map(|u| u.clone())
                .ok_or_else(|| anyhow::anyhow!("phone index points at a missing user")),
            Entry::Vacant(slot) => {
                let user = User {
                    id: Uuid::new_v4(),
                    name: new.name,
                    phone: new.phone,
                    language: new.language,
                    created_at: now,
                };
                self.users.insert(user.id, user.clone());
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: Option<String>,
        language: Option<String>,
    ) -> anyhow::Result<Option<User>> {
        let Some(mut user) = self.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = name {
            user.name = name;
        }
        if let Some(language) = language {
            user.language = language;
        }
        Ok(Some(user.clone()))
    }
}
