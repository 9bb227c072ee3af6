use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the identity store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                   // unique user ID
    pub name: String,               // display name, mutable
    pub phone: String,              // normalized phone, unique and immutable
    pub language: String,           // preferred UI language code
    pub created_at: OffsetDateTime, // creation timestamp
}

/// Data needed to register a user on first signup verification.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub phone: String,
    pub language: String,
}

pub const DEFAULT_LANGUAGE: &str = "en";
