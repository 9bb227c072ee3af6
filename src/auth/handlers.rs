use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, OtpRequestedResponse, PublicUser, RequestOtpBody, UpdateProfileBody,
            VerifyOtpBody,
        },
        extractors::AuthUser,
        otp::Purpose,
    },
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/:purpose/request-otp", post(request_otp))
        .route("/auth/:purpose/verify", post(verify_otp))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me).patch(update_me))
}

fn parse_purpose(raw: &str) -> ApiResult<Purpose> {
    raw.parse()
        .map_err(|_| ApiError::validation("invalid_purpose", "Purpose must be signup or signin"))
}

#[instrument(skip(state, payload))]
pub async fn request_otp(
    State(state): State<AppState>,
    Path(purpose): Path<String>,
    Json(payload): Json<RequestOtpBody>,
) -> ApiResult<Json<OtpRequestedResponse>> {
    let purpose = parse_purpose(&purpose)?;
    let requested = state
        .auth
        .request_otp(&payload.phone, purpose, payload.name.as_deref())
        .await?;

    Ok(Json(OtpRequestedResponse {
        message: "OTP sent successfully".into(),
        expires_in_seconds: requested.expires_in_seconds,
        otp: requested.code,
    }))
}

#[instrument(skip(state, payload))]
pub async fn verify_otp(
    State(state): State<AppState>,
    Path(purpose): Path<String>,
    Json(payload): Json<VerifyOtpBody>,
) -> ApiResult<Json<AuthResponse>> {
    let purpose = parse_purpose(&purpose)?;
    let signed_in = state
        .auth
        .verify_otp(&payload.phone, purpose, &payload.otp, payload.name.as_deref())
        .await?;

    Ok(Json(AuthResponse {
        access_token: signed_in.token.token,
        token_type: "bearer".into(),
        expires_at: signed_in.token.expires_at,
        user: signed_in.user.into(),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<PublicUser>> {
    let user = state.auth.current_user(user_id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateProfileBody>,
) -> ApiResult<Json<PublicUser>> {
    let user = state
        .auth
        .update_profile(user_id, payload.name.as_deref(), payload.language.as_deref())
        .await?;
    Ok(Json(user.into()))
}

#[cfg(test)]
mod me_tests {
    use super::*;
    use time::OffsetDateTime;

    #[test]
    fn test_me_response_serialization() {
        let response = PublicUser {
            id: uuid::Uuid::new_v4(),
            name: "Asha".into(),
            phone: "9876543210".into(),
            language: "en".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("9876543210"));
        assert!(json.contains("\"created_at\":\"1970-01-01T00:00:00Z\""));
    }

    #[test]
    fn otp_is_omitted_when_absent() {
        let response = OtpRequestedResponse {
            message: "OTP sent successfully".into(),
            expires_in_seconds: 300,
            otp: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("otp\""));
    }

    #[test]
    fn purpose_path_is_validated() {
        assert_eq!(parse_purpose("signin").unwrap(), Purpose::Signin);
        assert!(matches!(
            parse_purpose("register"),
            Err(ApiError::Validation { reason: "invalid_purpose", .. })
        ));
    }
}
