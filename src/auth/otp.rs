//! One-time phone codes.
//!
//! A challenge moves `Issued → Consumed | Expired | Superseded | Exhausted`
//! and never leaves a terminal state. Only the argon2 hash of a code is
//! stored; the plaintext exists only in the value returned by
//! [`OtpAuthenticator::request`].

use std::{fmt, str::FromStr, sync::Arc, time::Duration as StdDuration};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::codes;
use crate::auth::otp_repo::OtpStore;
use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Signup,
    Signin,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Signup => "signup",
            Purpose::Signin => "signin",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup" => Ok(Purpose::Signup),
            "signin" => Ok(Purpose::Signin),
            other => anyhow::bail!("unknown otp purpose `{}`", other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("Phone number is malformed")]
    InvalidPhone,
    #[error("Code must be {} digits", codes::CODE_LENGTH)]
    InvalidCode,
    #[error("No code was requested for this phone number")]
    NotFound,
    #[error("Code has expired, request a new one")]
    Expired,
    #[error("Code has already been used")]
    AlreadyUsed,
    #[error("Code was replaced by a newer one")]
    Superseded,
    #[error("Code does not match")]
    Mismatch,
    #[error("Too many wrong attempts, request a new code")]
    TooManyAttempts,
    #[error("otp store failure: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Issued,
    Consumed,
    Expired,
    Superseded,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct OtpChallenge {
    pub id: Uuid,
    pub phone: String,
    pub purpose: Purpose,
    pub code_hash: String,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub consumed_at: Option<OffsetDateTime>,
    pub superseded_at: Option<OffsetDateTime>,
    pub failed_attempts: i32,
}

impl OtpChallenge {
    pub fn state(&self, now: OffsetDateTime, max_attempts: i32) -> ChallengeState {
        if self.consumed_at.is_some() {
            ChallengeState::Consumed
        } else if self.superseded_at.is_some() {
            ChallengeState::Superseded
        } else if self.failed_attempts >= max_attempts {
            ChallengeState::Exhausted
        } else if now >= self.expires_at {
            ChallengeState::Expired
        } else {
            ChallengeState::Issued
        }
    }
}

/// Result of a successful `request`. `code` must go out of band or, in
/// development only, back to the caller; it is never stored.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub code: String,
    pub expires_in: Duration,
    pub expires_at: OffsetDateTime,
}

/// Proof that the caller controls `phone`, handed to the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPhone {
    pub phone: String,
    pub purpose: Purpose,
}

lazy_static! {
    static ref PHONE_RE: Regex = Regex::new(r"^\+?[1-9][0-9]{9,14}$").unwrap();
}

/// Strips common separators and checks the result looks like a phone number.
pub fn normalize_phone(raw: &str) -> Result<String, OtpError> {
    let phone: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if PHONE_RE.is_match(&phone) {
        Ok(phone)
    } else {
        Err(OtpError::InvalidPhone)
    }
}

/// Keeps the last four digits, for logs.
pub fn mask_phone(phone: &str) -> String {
    let keep = phone.len().saturating_sub(4);
    format!("{}{}", "*".repeat(keep), &phone[keep..])
}

pub struct OtpAuthenticator {
    store: Arc<dyn OtpStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_attempts: i32,
}

impl OtpAuthenticator {
    pub fn new(
        store: Arc<dyn OtpStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        max_attempts: i32,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            max_attempts,
        }
    }

    pub async fn request(&self, phone: &str, purpose: Purpose) -> Result<IssuedChallenge, OtpError> {
        let phone = normalize_phone(phone)?;
        let code = codes::generate_code();
        let code_hash = codes::hash_code_blocking(code.clone()).await?;

        let now = self.clock.now();
        let challenge = OtpChallenge {
            id: Uuid::new_v4(),
            phone,
            purpose,
            code_hash,
            issued_at: now,
            expires_at: now + self.ttl,
            consumed_at: None,
            superseded_at: None,
            failed_attempts: 0,
        };
        let expires_at = challenge.expires_at;
        debug!(challenge_id = %challenge.id, phone = %mask_phone(&challenge.phone), %purpose, "otp challenge issued");
        self.store.issue(challenge).await?;

        Ok(IssuedChallenge {
            code,
            expires_in: self.ttl,
            expires_at,
        })
    }

    pub async fn verify(
        &self,
        phone: &str,
        purpose: Purpose,
        code: &str,
    ) -> Result<VerifiedPhone, OtpError> {
        let phone = normalize_phone(phone)?;
        let code = code.trim();
        if !codes::is_well_formed(code) {
            return Err(OtpError::InvalidCode);
        }

        let challenge = self
            .store
            .latest(&phone, purpose)
            .await?
            .ok_or(OtpError::NotFound)?;

        let now = self.clock.now();
        match challenge.state(now, self.max_attempts) {
            ChallengeState::Issued => {}
            ChallengeState::Consumed => return Err(OtpError::AlreadyUsed),
            ChallengeState::Superseded => return Err(OtpError::Superseded),
            ChallengeState::Exhausted => return Err(OtpError::TooManyAttempts),
            ChallengeState::Expired => return Err(OtpError::Expired),
        }

        let matches =
            codes::verify_code_blocking(code.to_string(), challenge.code_hash.clone()).await?;
        if !matches {
            return Err(self.classify_mismatch(&challenge, code, now).await?);
        }

        if !self
            .store
            .mark_consumed(&challenge, now, self.max_attempts)
            .await?
        {
            return Err(self.settled_error(&challenge, now).await?);
        }

        info!(challenge_id = %challenge.id, phone = %mask_phone(&phone), %purpose, "otp verified");
        Ok(VerifiedPhone { phone, purpose })
    }

    // A code from a replaced challenge is reported as such and does not count
    // against the current one.
    async fn classify_mismatch(
        &self,
        current: &OtpChallenge,
        code: &str,
        now: OffsetDateTime,
    ) -> Result<OtpError, OtpError> {
        let older = self
            .store
            .superseded_live(&current.phone, current.purpose, now)
            .await?;
        for old in older {
            if codes::verify_code_blocking(code.to_string(), old.code_hash).await? {
                return Ok(OtpError::Superseded);
            }
        }

        let Some(attempts) = self.store.record_failure(current, self.max_attempts).await? else {
            return self.settled_error(current, now).await;
        };
        warn!(
            challenge_id = %current.id,
            phone = %mask_phone(&current.phone),
            attempts,
            max_attempts = self.max_attempts,
            "otp mismatch"
        );
        Ok(OtpError::Mismatch)
    }

    // The store refused a challenge that was active when it was read: another
    // request consumed, exhausted or replaced it in between.
    async fn settled_error(
        &self,
        challenge: &OtpChallenge,
        now: OffsetDateTime,
    ) -> Result<OtpError, OtpError> {
        let latest = self
            .store
            .latest(&challenge.phone, challenge.purpose)
            .await?;
        Ok(match latest {
            None => OtpError::Expired,
            Some(latest) if latest.id != challenge.id => OtpError::Superseded,
            Some(latest) => match latest.state(now, self.max_attempts) {
                ChallengeState::Exhausted => OtpError::TooManyAttempts,
                ChallengeState::Superseded => OtpError::Superseded,
                ChallengeState::Expired => OtpError::Expired,
                ChallengeState::Consumed | ChallengeState::Issued => OtpError::AlreadyUsed,
            },
        })
    }
}

/// Periodically removes challenges that expired more than one TTL ago.
/// The returned handle owns the task; abort it on shutdown.
pub fn spawn_purge_task(
    store: Arc<dyn OtpStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    every: StdDuration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            match store.purge_expired(clock.now() - ttl).await {
                Ok(0) => {}
                Ok(n) => info!(removed = n, "purged expired otp challenges"),
                Err(e) => warn!(error = %e, "otp purge failed"),
            }
        }
    })
}
