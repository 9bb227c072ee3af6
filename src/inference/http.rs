use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{InferenceEngine, InferenceError, NormalizedImage};

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    probabilities: Vec<f64>,
}

/// Model server reached over HTTP.
///
/// The image is POSTed as the raw request body with its content type; the
/// server answers `{"probabilities": [..]}`. Deadlines are enforced by the
/// caller, so the client itself carries none.
pub struct HttpInferenceEngine {
    client: reqwest::Client,
    url: String,
    health_url: Option<String>,
}

impl HttpInferenceEngine {
    pub fn new(url: impl Into<String>, health_url: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("plantdoc/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build inference http client")?;
        Ok(Self {
            client,
            url: url.into(),
            health_url,
        })
    }
}

#[async_trait]
impl InferenceEngine for HttpInferenceEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn classify(&self, image: &NormalizedImage) -> Result<Vec<f64>, InferenceError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, image.format.mime())
            .body(image.bytes.clone())
            .send()
            .await
            .map_err(|e| InferenceError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Unavailable(format!(
                "model server answered {}",
                status
            )));
        }

        let body: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Malformed(e.to_string()))?;
        debug!(classes = body.probabilities.len(), "model server answered");
        Ok(body.probabilities)
    }

    async fn ready(&self) -> bool {
        let Some(url) = &self.health_url else {
            return true;
        };
        match self.client.get(url).send().await {
            Ok(res) if res.status().is_success() => true,
            Ok(res) => {
                warn!(status = %res.status(), "inference readiness probe failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "inference readiness probe unreachable");
                false
            }
        }
    }
}
