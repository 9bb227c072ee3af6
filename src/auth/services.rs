use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::otp::{mask_phone, normalize_phone, OtpAuthenticator, OtpError, Purpose};
use crate::auth::repo::UserStore;
use crate::auth::repo_types::{NewUser, User, DEFAULT_LANGUAGE};
use crate::auth::session::{SessionError, SessionIssuer, SessionToken};
use crate::clock::Clock;

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Otp(#[from] OtpError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Name is required to sign up")]
    NameRequired,
    #[error("Name must be at most {} characters", MAX_NAME_LEN)]
    InvalidName,
    #[error("Language must be a language code such as `en` or `hi-IN`")]
    InvalidLanguage,
    #[error("User not found, please sign up first")]
    UnknownUser,
    #[error("identity store failure: {0}")]
    Store(#[source] anyhow::Error),
}

lazy_static! {
    static ref LANGUAGE_RE: Regex = Regex::new(r"^[a-z]{2,3}(-[A-Z]{2})?$").unwrap();
}

pub(crate) fn validate_name(name: Option<&str>) -> Result<String, AuthError> {
    let name = name.map(str::trim).filter(|n| !n.is_empty());
    let Some(name) = name else {
        return Err(AuthError::NameRequired);
    };
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AuthError::InvalidName);
    }
    Ok(name.to_string())
}

pub(crate) fn validate_language(language: &str) -> Result<String, AuthError> {
    let language = language.trim();
    if LANGUAGE_RE.is_match(language) {
        Ok(language.to_string())
    } else {
        Err(AuthError::InvalidLanguage)
    }
}

#[derive(Debug, Clone)]
pub struct OtpRequested {
    pub expires_in_seconds: i64,
    /// Present only when code echo is switched on.
    pub code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SignedIn {
    pub token: SessionToken,
    pub user: User,
}

/// Passwordless signup/signin on top of the OTP and session components.
pub struct AuthService {
    otp: OtpAuthenticator,
    sessions: Arc<SessionIssuer>,
    users: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
    expose_code: bool,
}

impl AuthService {
    pub fn new(
        otp: OtpAuthenticator,
        sessions: Arc<SessionIssuer>,
        users: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
        expose_code: bool,
    ) -> Self {
        if expose_code {
            warn!("SECURITY WARNING: OTP_EXPOSE_CODE is on, one-time codes are returned in API responses");
        }
        Self {
            otp,
            sessions,
            users,
            clock,
            expose_code,
        }
    }

    pub async fn request_otp(
        &self,
        phone: &str,
        purpose: Purpose,
        name: Option<&str>,
    ) -> Result<OtpRequested, AuthError> {
        let phone = normalize_phone(phone)?;
        match purpose {
            Purpose::Signup => {
                validate_name(name)?;
            }
            Purpose::Signin => {
                if self.find_by_phone(&phone).await?.is_none() {
                    info!(phone = %mask_phone(&phone), "signin otp requested for unknown phone");
                    return Err(AuthError::UnknownUser);
                }
            }
        }

        let issued = self.otp.request(&phone, purpose).await?;
        info!(
            phone = %mask_phone(&phone),
            %purpose,
            expires_at = %issued.expires_at,
            "otp sent"
        );
        Ok(OtpRequested {
            expires_in_seconds: issued.expires_in.whole_seconds(),
            code: self.expose_code.then_some(issued.code),
        })
    }

    pub async fn verify_otp(
        &self,
        phone: &str,
        purpose: Purpose,
        code: &str,
        name: Option<&str>,
    ) -> Result<SignedIn, AuthError> {
        // checked before the code is consumed so a bad name does not burn it
        let name = match purpose {
            Purpose::Signup => Some(validate_name(name)?),
            Purpose::Signin => None,
        };

        let verified = self.otp.verify(phone, purpose, code).await?;

        let user = match name {
            Some(name) => self
                .users
                .create_if_absent(
                    NewUser {
                        name,
                        phone: verified.phone.clone(),
                        language: DEFAULT_LANGUAGE.to_string(),
                    },
                    self.clock.now(),
                )
                .await
                .map_err(AuthError::Store)?,
            None => self
                .find_by_phone(&verified.phone)
                .await?
                .ok_or(AuthError::UnknownUser)?,
        };

        let token = self.sessions.issue(user.id)?;
        info!(user_id = %user.id, purpose = %verified.purpose, "user signed in");
        Ok(SignedIn { token, user })
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.users
            .find_by_id(user_id)
            .await
            .map_err(AuthError::Store)?
            .ok_or(AuthError::UnknownUser)
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        name: Option<&str>,
        language: Option<&str>,
    ) -> Result<User, AuthError> {
        let name = name.map(|n| validate_name(Some(n))).transpose()?;
        let language = language.map(validate_language).transpose()?;
        let user = self
            .users
            .update_profile(user_id, name, language)
            .await
            .map_err(AuthError::Store)?
            .ok_or(AuthError::UnknownUser)?;
        info!(user_id = %user.id, "profile updated");
        Ok(user)
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, AuthError> {
        self.users.find_by_phone(phone).await.map_err(AuthError::Store)
    }
}
