use std::sync::Arc;

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::Claims;
use crate::clock::Clock;
use crate::config::JwtConfig;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session token is malformed")]
    Malformed,
    #[error("Session token signature is invalid")]
    InvalidSignature,
    #[error("Session token has expired")]
    Expired,
    #[error("failed to sign session token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// Mints and checks stateless HS256 session tokens.
///
/// Expiry is checked against the injected clock rather than the system time
/// `jsonwebtoken` would use, with no leeway.
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionIssuer {
    pub fn new(cfg: &JwtConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::days(cfg.ttl_days),
            clock,
        }
    }

    pub fn issue(&self, user_id: Uuid) -> Result<SessionToken, SessionError> {
        let now = self.clock.now();
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SessionError::Signing(e.to_string()))?;
        debug!(user_id = %user_id, "session token signed");
        Ok(SessionToken { token, expires_at })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidIssuer
                | ErrorKind::InvalidAudience => SessionError::InvalidSignature,
                ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Malformed,
            }
        })?;

        if self.clock.now().unix_timestamp() >= data.claims.exp {
            return Err(SessionError::Expired);
        }
        debug!(user_id = %data.claims.sub, "session token verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn jwt_config(secret: &str, issuer: &str) -> JwtConfig {
        JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: "test-aud".into(),
            ttl_days: 30,
        }
    }

    fn issuer_with_clock(secret: &str) -> (SessionIssuer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (
            SessionIssuer::new(&jwt_config(secret, "test-issuer"), clock.clone()),
            clock,
        )
    }

    #[test]
    fn issue_and_verify() {
        let (issuer, _) = issuer_with_clock("dev-secret");
        let user_id = Uuid::new_v4();
        let token = issuer.issue(user_id).expect("sign");
        let claims = issuer.verify(&token.token).expect("verify");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 30 * 24 * 3600);
    }

    #[test]
    fn valid_at_29_days_expired_at_31() {
        let (issuer, clock) = issuer_with_clock("dev-secret");
        let token = issuer.issue(Uuid::new_v4()).unwrap().token;

        clock.advance(Duration::days(29));
        assert!(issuer.verify(&token).is_ok());

        clock.advance(Duration::days(2));
        assert!(matches!(issuer.verify(&token), Err(SessionError::Expired)));
    }

    #[test]
    fn verification_is_repeatable() {
        let (issuer, _) = issuer_with_clock("dev-secret");
        let token = issuer.issue(Uuid::new_v4()).unwrap().token;
        for _ in 0..10 {
            assert!(issuer.verify(&token).is_ok());
        }
    }

    #[test]
    fn wrong_secret_is_invalid_signature() {
        let (good, _) = issuer_with_clock("secret-a");
        let (bad, _) = issuer_with_clock("secret-b");
        let token = good.issue(Uuid::new_v4()).unwrap().token;
        assert!(matches!(bad.verify(&token), Err(SessionError::InvalidSignature)));
    }

    #[test]
    fn tampered_payload_is_invalid_signature() {
        let (issuer, _) = issuer_with_clock("dev-secret");
        let token = issuer.issue(Uuid::new_v4()).unwrap().token;
        let other = issuer.issue(Uuid::new_v4()).unwrap().token;

        // splice the payload of one token onto the signature of another
        let a: Vec<&str> = token.split('.').collect();
        let b: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", a[0], b[1], a[2]);
        assert!(matches!(
            issuer.verify(&forged),
            Err(SessionError::InvalidSignature)
        ));
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let ours = SessionIssuer::new(&jwt_config("same", "plantdoc"), clock.clone());
        let theirs = SessionIssuer::new(&jwt_config("same", "someone-else"), clock);
        let token = theirs.issue(Uuid::new_v4()).unwrap().token;
        assert!(matches!(ours.verify(&token), Err(SessionError::InvalidSignature)));
    }

    #[test]
    fn garbage_is_malformed() {
        let (issuer, _) = issuer_with_clock("dev-secret");
        assert!(matches!(issuer.verify("not-a-token"), Err(SessionError::Malformed)));
        assert!(matches!(issuer.verify(""), Err(SessionError::Malformed)));
    }
}
