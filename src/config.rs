use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => anyhow::bail!("unknown APP_ENV `{}`", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    pub ttl_seconds: i64,
    pub max_attempts: i32,
    /// Echo the raw code in request-otp responses. Audited switch, refused in production.
    pub expose_code: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionConfig {
    pub max_upload_bytes: usize,
    pub allowed_content_types: Vec<String>,
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    pub url: String,
    /// Readiness probe; when unset the engine is assumed ready.
    pub health_url: Option<String>,
    pub timeout_ms: u64,
    pub retries: u32,
    pub max_concurrency: usize,
    pub metadata_path: String,
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub enum StorageConfig {
    S3 {
        endpoint: String,
        bucket: String,
        access_key: String,
        secret_key: String,
    },
    Local {
        dir: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub env: AppEnv,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub prediction: PredictionConfig,
    pub inference: InferenceConfig,
    pub storage: StorageConfig,
}

/// Unset means `default`; a set but malformed value is a startup error.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    parse_or(key, std::env::var(key).ok().as_deref(), default)
}

fn parse_or<T>(key: &str, raw: Option<&str>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value `{}`", key, raw)),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let env = match std::env::var("APP_ENV") {
            Ok(raw) => AppEnv::parse(&raw)?,
            Err(_) => AppEnv::Development,
        };

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "plantdoc".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "plantdoc-users".into()),
            ttl_days: env_or("JWT_TTL_DAYS", 30)?,
        };

        let otp = OtpConfig {
            ttl_seconds: env_or("OTP_TTL_SECONDS", 300)?,
            max_attempts: env_or("OTP_MAX_ATTEMPTS", 5)?,
            expose_code: env_or("OTP_EXPOSE_CODE", false)?,
        };

        let allowed_content_types = std::env::var("ALLOWED_CONTENT_TYPES")
            .unwrap_or_else(|_| "image/jpeg,image/jpg,image/png".into())
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let prediction = PredictionConfig {
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            allowed_content_types,
            top_k: env_or("PREDICTION_TOP_K", 5)?,
        };

        let inference = InferenceConfig {
            url: std::env::var("INFERENCE_URL").context("INFERENCE_URL must be set")?,
            health_url: std::env::var("INFERENCE_HEALTH_URL").ok(),
            timeout_ms: env_or("INFERENCE_TIMEOUT_MS", 10_000)?,
            retries: env_or("INFERENCE_RETRIES", 1)?,
            max_concurrency: env_or("INFERENCE_MAX_CONCURRENCY", 4)?,
            metadata_path: std::env::var("MODEL_METADATA_PATH")
                .unwrap_or_else(|_| "models/deployment_metadata.json".into()),
        };

        let storage = match std::env::var("MINIO_ENDPOINT") {
            Ok(endpoint) => StorageConfig::S3 {
                endpoint,
                bucket: std::env::var("MINIO_BUCKET").context("MINIO_BUCKET must be set")?,
                access_key: std::env::var("MINIO_ACCESS_KEY")
                    .context("MINIO_ACCESS_KEY must be set")?,
                secret_key: std::env::var("MINIO_SECRET_KEY")
                    .context("MINIO_SECRET_KEY must be set")?,
            },
            Err(_) => StorageConfig::Local {
                dir: std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".into()),
            },
        };

        let config = Self {
            env,
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
            jwt,
            otp,
            prediction,
            inference,
            storage,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.otp.expose_code && self.env == AppEnv::Production {
            anyhow::bail!("OTP_EXPOSE_CODE must not be enabled when APP_ENV=production");
        }
        anyhow::ensure!(self.otp.ttl_seconds > 0, "OTP_TTL_SECONDS must be positive");
        anyhow::ensure!(self.otp.max_attempts > 0, "OTP_MAX_ATTEMPTS must be positive");
        anyhow::ensure!(self.jwt.ttl_days > 0, "JWT_TTL_DAYS must be positive");
        anyhow::ensure!(self.prediction.top_k > 0, "PREDICTION_TOP_K must be positive");
        anyhow::ensure!(
            !self.prediction.allowed_content_types.is_empty(),
            "ALLOWED_CONTENT_TYPES must not be empty"
        );
        anyhow::ensure!(
            self.inference.max_concurrency > 0,
            "INFERENCE_MAX_CONCURRENCY must be positive"
        );
        Ok(())
    }

    /// Configuration used by unit tests: in-memory stores, short-lived local everything.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            env: AppEnv::Development,
            database_url: None,
            database_max_connections: 1,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_days: 30,
            },
            otp: OtpConfig {
                ttl_seconds: 300,
                max_attempts: 5,
                expose_code: true,
            },
            prediction: PredictionConfig {
                max_upload_bytes: 10 * 1024 * 1024,
                allowed_content_types: vec![
                    "image/jpeg".into(),
                    "image/jpg".into(),
                    "image/png".into(),
                ],
                top_k: 5,
            },
            inference: InferenceConfig {
                url: "http://inference.invalid/classify".into(),
                health_url: None,
                timeout_ms: 500,
                retries: 1,
                max_concurrency: 2,
                metadata_path: "unused.json".into(),
            },
            storage: StorageConfig::Local {
                dir: "unused".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_env_parses_aliases() {
        assert_eq!(AppEnv::parse("prod").unwrap(), AppEnv::Production);
        assert_eq!(AppEnv::parse(" Development ").unwrap(), AppEnv::Development);
        assert!(AppEnv::parse("staging").is_err());
    }

    #[test]
    fn exposing_codes_in_production_is_refused() {
        let mut config = AppConfig::for_tests();
        config.env = AppEnv::Production;
        config.otp.expose_code = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("OTP_EXPOSE_CODE"));

        config.otp.expose_code = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_numbers_and_flags_fail_instead_of_defaulting() {
        assert!(!parse_or("OTP_EXPOSE_CODE", None, false).unwrap());
        assert!(parse_or("OTP_EXPOSE_CODE", Some("true"), false).unwrap());
        assert_eq!(parse_or("OTP_MAX_ATTEMPTS", Some(" 3 "), 5).unwrap(), 3);

        let err = parse_or("OTP_EXPOSE_CODE", Some("TRUE"), false).unwrap_err();
        assert!(err.to_string().contains("OTP_EXPOSE_CODE"));
        assert!(parse_or::<i64>("OTP_TTL_SECONDS", Some("5m"), 300).is_err());
        assert!(parse_or::<usize>("MAX_UPLOAD_BYTES", Some(""), 1).is_err());
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let mut config = AppConfig::for_tests();
        config.prediction.top_k = 0;
        assert!(config.validate().is_err());
    }
}
