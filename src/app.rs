use std::net::SocketAddr;

use axum::{routing::get, Json, Router};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{auth, predictions};

pub fn build_app(state: AppState) -> Router {
    let max_upload_bytes = state.config.prediction.max_upload_bytes;
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(predictions::router(max_upload_bytes))
                .route("/health", get(|| async { Json(json!({ "status": "ok" })) })),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::predictions::services::testing::{jpeg_header, leaf_jpeg, SpyEngine};

    const PHONE: &str = "+919876543210";
    const BOUNDARY: &str = "plantdoc-test-boundary";

    fn app() -> (Router, Arc<SpyEngine>) {
        let spy = Arc::new(SpyEngine::returning(vec![0.2, 0.7, 0.1]));
        (build_app(AppState::fake(spy.clone())), spy)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload(token: &str, content_type: &str, image: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"leaf.jpg\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(image);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/api/prediction/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn sign_up(app: &Router) -> String {
        let (status, body) = send(
            app,
            post_json(
                "/api/auth/signup/request-otp",
                json!({ "phone": PHONE, "name": "Asha" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expires_in_seconds"], 300);
        let otp = body["otp"].as_str().unwrap().to_string();

        let (status, body) = send(
            app,
            post_json(
                "/api/auth/signup/verify",
                json!({ "phone": PHONE, "otp": otp, "name": "Asha" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");
        assert_eq!(body["user"]["name"], "Asha");
        body["access_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn signup_predict_and_history() {
        let (app, spy) = app();
        let token = sign_up(&app).await;

        let (status, me) = send(&app, get("/api/auth/me", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["language"], "en");

        let (status, predicted) = send(&app, upload(&token, "image/jpeg", &leaf_jpeg())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(spy.calls(), 1);
        assert_eq!(predicted["top_prediction"]["class"], "Apple_healthy");
        assert_eq!(predicted["predictions"][0]["rank"], 1);
        assert_eq!(predicted["model_info"]["total_classes"], 3);

        let (status, history) = send(&app, get("/api/prediction/history", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history["total"], 1);
        assert_eq!(history["total_pages"], 1);
        assert_eq!(history["page"], 1);
        assert_eq!(history["page_size"], 10);
        assert_eq!(history["predictions"][0]["id"], predicted["id"]);
        assert_eq!(history["predictions"][0]["disease_name"], "Apple_healthy");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_over_http() {
        let (app, spy) = app();
        let token = sign_up(&app).await;

        let (status, body) = send(
            &app,
            upload(&token, "image/jpeg", &jpeg_header(12 * 1024 * 1024)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "file_too_large");
        assert_eq!(spy.calls(), 0);
    }

    #[tokio::test]
    async fn signature_only_upload_is_invalid_image() {
        let (app, spy) = app();
        let token = sign_up(&app).await;

        let (status, body) = send(&app, upload(&token, "image/jpeg", &jpeg_header(4))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["reason"], "invalid_image");
        assert_eq!(spy.calls(), 0);
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        let (app, _) = app();

        let req = Request::get("/api/prediction/history")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["reason"], "missing_token");

        let (status, body) = send(&app, get("/api/auth/me", "not-a-token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["reason"], "token_malformed");
    }

    #[tokio::test]
    async fn signin_for_unknown_phone_is_not_found() {
        let (app, _) = app();
        let (status, body) = send(
            &app,
            post_json("/api/auth/signin/request-otp", json!({ "phone": PHONE })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["reason"], "unknown_user");
    }

    #[tokio::test]
    async fn unknown_purpose_and_bad_pagination() {
        let (app, _) = app();
        let (status, body) = send(
            &app,
            post_json("/api/auth/register/request-otp", json!({ "phone": PHONE })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "invalid_purpose");

        let token = sign_up(&app).await;
        let (status, body) = send(
            &app,
            get("/api/prediction/history?page=0&page_size=10", &token),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "invalid_pagination");

        let (status, body) = send(&app, get("/api/prediction/history?page=-1", &token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "invalid_pagination");
    }

    #[tokio::test]
    async fn health_endpoints() {
        let (app, _) = app();
        let req = Request::get("/api/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let req = Request::get("/api/prediction/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["engine"], "spy");
        assert_eq!(body["total_classes"], 3);
    }
}
