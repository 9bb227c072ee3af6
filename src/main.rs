mod app;
mod auth;
mod clock;
mod config;
mod db;
mod error;
mod images;
mod inference;
mod predictions;
mod state;
mod storage;

use std::time::Duration as StdDuration;

use crate::config::AppConfig;
use crate::state::AppState;

const OTP_PURGE_EVERY: StdDuration = StdDuration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "plantdoc=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let app_state = AppState::init(config).await?;

    let purge = auth::otp::spawn_purge_task(
        app_state.otp_store.clone(),
        app_state.clock.clone(),
        time::Duration::seconds(app_state.config.otp.ttl_seconds),
        OTP_PURGE_EVERY,
    );

    let app = app::build_app(app_state);
    let served = app::serve(app).await;

    purge.abort();
    served
}
