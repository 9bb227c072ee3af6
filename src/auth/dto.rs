use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;

/// Request body for `/auth/{purpose}/request-otp`.
#[derive(Debug, Deserialize)]
pub struct RequestOtpBody {
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Response after a code was issued.
#[derive(Debug, Serialize, Deserialize)]
pub struct OtpRequestedResponse {
    pub message: String,
    pub expires_in_seconds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

/// Request body for `/auth/{purpose}/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyOtpBody {
    pub phone: String,
    pub otp: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Response returned after a successful verification.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user: PublicUser,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub language: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            phone: u.phone,
            language: u.language,
            created_at: u.created_at,
        }
    }
}
