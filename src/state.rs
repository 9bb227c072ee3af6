use std::sync::Arc;

use sqlx::PgPool;
use time::Duration;
use tracing::{info, warn};

use crate::auth::otp::OtpAuthenticator;
use crate::auth::otp_repo::{MemoryOtpStore, OtpStore, PgOtpStore};
use crate::auth::repo::{MemoryUserStore, PgUserStore, UserStore};
use crate::auth::services::AuthService;
use crate::auth::session::SessionIssuer;
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::inference::{http::HttpInferenceEngine, ClassManifest, InferenceEngine};
use crate::predictions::repo::{HistoryStore, MemoryHistoryStore, PgHistoryStore};
use crate::predictions::services::PredictionService;
use crate::storage::{self, StorageClient};

/// Backing stores, either all Postgres or all in-process.
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub otps: Arc<dyn OtpStore>,
    pub history: Arc<dyn HistoryStore>,
}

impl Stores {
    pub fn postgres(db: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserStore::new(db.clone())),
            otps: Arc::new(PgOtpStore::new(db.clone())),
            history: Arc::new(PgHistoryStore::new(db)),
        }
    }

    pub fn memory() -> Self {
        Self {
            users: MemoryUserStore::new(),
            otps: MemoryOtpStore::new(),
            history: MemoryHistoryStore::new(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub clock: Arc<dyn Clock>,
    pub sessions: Arc<SessionIssuer>,
    pub auth: Arc<AuthService>,
    pub predictions: Arc<PredictionService>,
    pub otp_store: Arc<dyn OtpStore>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let stores = match &config.database_url {
            Some(url) => Stores::postgres(crate::db::connect(&config, url).await?),
            None => {
                warn!("DATABASE_URL is not set, using in-memory stores; nothing survives a restart");
                Stores::memory()
            }
        };

        let storage = storage::connect(&config.storage).await?;

        let manifest = Arc::new(ClassManifest::load(&config.inference.metadata_path)?);
        info!(
            classes = manifest.len(),
            path = %config.inference.metadata_path,
            "class manifest loaded"
        );

        let engine = Arc::new(HttpInferenceEngine::new(
            &config.inference.url,
            config.inference.health_url.clone(),
        )?) as Arc<dyn InferenceEngine>;

        Ok(Self::from_parts(
            config,
            Arc::new(SystemClock),
            stores,
            engine,
            manifest,
            storage,
        ))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        clock: Arc<dyn Clock>,
        stores: Stores,
        engine: Arc<dyn InferenceEngine>,
        manifest: Arc<ClassManifest>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        let sessions = Arc::new(SessionIssuer::new(&config.jwt, clock.clone()));
        let otp = OtpAuthenticator::new(
            stores.otps.clone(),
            clock.clone(),
            Duration::seconds(config.otp.ttl_seconds),
            config.otp.max_attempts,
        );
        let auth = Arc::new(AuthService::new(
            otp,
            sessions.clone(),
            stores.users,
            clock.clone(),
            config.otp.expose_code,
        ));
        let predictions = Arc::new(PredictionService::new(
            engine,
            manifest,
            stores.history,
            storage,
            clock.clone(),
            &config.prediction,
            &config.inference,
        ));

        Self {
            config,
            clock,
            sessions,
            auth,
            predictions,
            otp_store: stores.otps,
        }
    }

    /// In-memory state around the given engine, for router tests.
    #[cfg(test)]
    pub fn fake(engine: Arc<dyn InferenceEngine>) -> Self {
        use crate::predictions::services::testing;
        use crate::storage::fake::FakeStorage;

        Self::from_parts(
            Arc::new(AppConfig::for_tests()),
            Arc::new(SystemClock),
            Stores::memory(),
            engine,
            testing::manifest(),
            Arc::new(FakeStorage::default()),
        )
    }
}
