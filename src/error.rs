//! HTTP-facing error type.
//!
//! Every handler returns `ApiResult<T>`. Validation and auth failures carry a
//! stable machine-readable `reason` and are shown to the caller verbatim;
//! inference, persistence and internal failures are logged in full here and
//! answered with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::otp::OtpError;
use crate::auth::services::AuthError;
use crate::auth::session::SessionError;
use crate::inference::InferenceError;
use crate::predictions::services::PredictionError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed ({reason}): {message}")]
    Validation {
        reason: &'static str,
        message: String,
    },

    #[error("authentication failed ({reason}): {message}")]
    Auth {
        reason: &'static str,
        message: String,
    },

    #[error("inference failed ({reason}): {detail}")]
    Inference {
        reason: &'static str,
        detail: String,
    },

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub reason: String,
    pub message: String,
}

impl ApiError {
    pub fn validation(reason: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            reason,
            message: message.into(),
        }
    }

    pub fn auth(reason: &'static str, message: impl Into<String>) -> Self {
        ApiError::Auth {
            reason,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Auth { reason, .. } if *reason == "unknown_user" => StatusCode::NOT_FOUND,
            ApiError::Auth { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Inference { reason, .. } if *reason == "inference_timeout" => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ApiError::Inference { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, reason, message) = match self {
            ApiError::Validation { reason, message } => ("validation_error", reason, message),
            ApiError::Auth { reason, message } => ("auth_error", reason, message),
            ApiError::Inference { reason, detail } => {
                tracing::error!(%reason, %detail, "inference error");
                (
                    "inference_error",
                    reason,
                    "Prediction failed, please try again later".to_string(),
                )
            }
            ApiError::Persistence(detail) => {
                tracing::error!(%detail, "persistence error");
                (
                    "persistence_error",
                    "store_unavailable",
                    "Storage is temporarily unavailable".to_string(),
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!(%detail, "internal error");
                (
                    "internal_error",
                    "internal",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            reason: reason.to_string(),
            message,
        });
        (status, body).into_response()
    }
}

impl From<OtpError> for ApiError {
    fn from(err: OtpError) -> Self {
        let message = err.to_string();
        match err {
            OtpError::InvalidPhone => ApiError::validation("invalid_phone", message),
            OtpError::InvalidCode => ApiError::validation("invalid_code", message),
            OtpError::NotFound => ApiError::auth("otp_not_found", message),
            OtpError::Expired => ApiError::auth("otp_expired", message),
            OtpError::AlreadyUsed => ApiError::auth("otp_already_used", message),
            OtpError::Superseded => ApiError::auth("otp_superseded", message),
            OtpError::Mismatch => ApiError::auth("otp_mismatch", message),
            OtpError::TooManyAttempts => ApiError::auth("otp_attempts_exceeded", message),
            OtpError::Store(e) => ApiError::Persistence(format!("{:#}", e)),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::Malformed => ApiError::auth("token_malformed", message),
            SessionError::InvalidSignature => ApiError::auth("token_invalid_signature", message),
            SessionError::Expired => ApiError::auth("token_expired", message),
            SessionError::Signing(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::Otp(e) => e.into(),
            AuthError::Session(e) => e.into(),
            AuthError::NameRequired => ApiError::validation("name_required", message),
            AuthError::InvalidName => ApiError::validation("invalid_name", message),
            AuthError::InvalidLanguage => ApiError::validation("invalid_language", message),
            AuthError::UnknownUser => ApiError::auth("unknown_user", message),
            AuthError::Store(e) => ApiError::Persistence(format!("{:#}", e)),
        }
    }
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        let reason = match err {
            InferenceError::Timeout(_) => "inference_timeout",
            InferenceError::Unavailable(_) => "inference_unavailable",
            _ => "inference_malformed_output",
        };
        ApiError::Inference {
            reason,
            detail: err.to_string(),
        }
    }
}

impl From<PredictionError> for ApiError {
    fn from(err: PredictionError) -> Self {
        let message = err.to_string();
        match err {
            PredictionError::EmptyFile => ApiError::validation("empty_file", message),
            PredictionError::FileTooLarge { .. } => ApiError::validation("file_too_large", message),
            PredictionError::UnsupportedContentType(_) => {
                ApiError::validation("unsupported_content_type", message)
            }
            PredictionError::ContentMismatch => ApiError::validation("content_mismatch", message),
            PredictionError::InvalidImage(_) => ApiError::validation("invalid_image", message),
            PredictionError::InvalidPagination => {
                ApiError::validation("invalid_pagination", message)
            }
            PredictionError::Inference(e) => e.into(),
            PredictionError::Persistence(e) => ApiError::Persistence(format!("{:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_auth_map_to_client_statuses() {
        assert_eq!(
            ApiError::validation("invalid_phone", "bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::auth("otp_expired", "late").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::auth("unknown_user", "sign up first").status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn otp_errors_keep_distinct_reasons() {
        match ApiError::from(OtpError::AlreadyUsed) {
            ApiError::Auth { reason, .. } => assert_eq!(reason, "otp_already_used"),
            other => panic!("unexpected {:?}", other),
        }
        match ApiError::from(OtpError::InvalidPhone) {
            ApiError::Validation { reason, .. } => assert_eq!(reason, "invalid_phone"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn persistence_details_are_not_leaked() {
        let err = ApiError::Persistence("connection refused to 10.0.0.5:5432".into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, "persistence_error");
        assert!(!parsed.message.contains("10.0.0.5"));
    }

    #[test]
    fn inference_timeout_is_gateway_timeout() {
        let err: ApiError = InferenceError::Timeout(std::time::Duration::from_secs(1)).into();
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
