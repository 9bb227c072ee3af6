use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{InferenceConfig, PredictionConfig};
use crate::images::services::{decode_check, sniff_format, store_source_image};
use crate::inference::{ClassManifest, ImageFormat, InferenceEngine, InferenceError, NormalizedImage};
use crate::predictions::ranking::rank;
use crate::predictions::repo::HistoryStore;
use crate::predictions::repo_types::PredictionRecord;
use crate::storage::StorageClient;

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum PredictionError {
    #[error("Uploaded file is empty")]
    EmptyFile,
    #[error("File is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge { size: usize, limit: usize },
    #[error("Content type `{0}` is not allowed, upload a JPEG or PNG image")]
    UnsupportedContentType(String),
    #[error("File content does not match its declared content type")]
    ContentMismatch,
    #[error("File is not a readable image: {0}")]
    InvalidImage(String),
    #[error("page must be at least 1 and page_size between 1 and {}", MAX_PAGE_SIZE)]
    InvalidPagination,
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("history store failure: {0}")]
    Persistence(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub engine: String,
    pub total_classes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelHealth {
    pub ready: bool,
    #[serde(flatten)]
    pub info: ModelInfo,
}

#[derive(Debug, Clone)]
pub struct PredictionOutcome {
    pub record: PredictionRecord,
    pub model_info: ModelInfo,
}

#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub records: Vec<PredictionRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

/// Validate, classify, rank and record one upload.
pub struct PredictionService {
    engine: Arc<dyn InferenceEngine>,
    manifest: Arc<ClassManifest>,
    history: Arc<dyn HistoryStore>,
    storage: Arc<dyn StorageClient>,
    clock: Arc<dyn Clock>,
    permits: Semaphore,
    limits: PredictionConfig,
    timeout: Duration,
    retries: u32,
}

impl PredictionService {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        manifest: Arc<ClassManifest>,
        history: Arc<dyn HistoryStore>,
        storage: Arc<dyn StorageClient>,
        clock: Arc<dyn Clock>,
        limits: &PredictionConfig,
        inference: &InferenceConfig,
    ) -> Self {
        Self {
            engine,
            manifest,
            history,
            storage,
            clock,
            permits: Semaphore::new(inference.max_concurrency),
            limits: limits.clone(),
            timeout: inference.timeout(),
            retries: inference.retries,
        }
    }

    /// Checks an upload before it reaches the engine. The cheap header checks
    /// run first; a full decode on the blocking pool runs last.
    pub async fn validate(
        &self,
        body: Bytes,
        declared: &str,
    ) -> Result<NormalizedImage, PredictionError> {
        let content_type = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !self
            .limits
            .allowed_content_types
            .iter()
            .any(|allowed| *allowed == content_type)
        {
            return Err(PredictionError::UnsupportedContentType(content_type));
        }
        let format = ImageFormat::from_mime(&content_type)
            .ok_or_else(|| PredictionError::UnsupportedContentType(content_type.clone()))?;

        if body.is_empty() {
            return Err(PredictionError::EmptyFile);
        }
        if body.len() > self.limits.max_upload_bytes {
            return Err(PredictionError::FileTooLarge {
                size: body.len(),
                limit: self.limits.max_upload_bytes,
            });
        }
        if sniff_format(&body) != Some(format) {
            return Err(PredictionError::ContentMismatch);
        }

        let image = NormalizedImage {
            bytes: body,
            format,
        };
        decode_check(&image)
            .await
            .map_err(|e| PredictionError::InvalidImage(format!("{:#}", e)))?;
        Ok(image)
    }

    /// Runs the engine under the concurrency limit and deadline. A timed-out
    /// attempt is retried up to `retries` more times; other failures are not.
    async fn classify(&self, image: &NormalizedImage) -> Result<Vec<f64>, InferenceError> {
        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(self.timeout, async {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| InferenceError::Unavailable("inference pool closed".into()))?;
                self.engine.classify(image).await
            })
            .await;

            match outcome {
                Ok(result) => return result,
                Err(_) if attempt < self.retries => {
                    attempt += 1;
                    warn!(attempt, timeout = ?self.timeout, "inference timed out, retrying");
                }
                Err(_) => return Err(InferenceError::Timeout(self.timeout)),
            }
        }
    }

    pub async fn submit(
        &self,
        user_id: Uuid,
        body: Bytes,
        declared_content_type: &str,
    ) -> Result<PredictionOutcome, PredictionError> {
        let image = self.validate(body, declared_content_type).await?;
        let probabilities = self.classify(&image).await?;
        let predictions = rank(&self.manifest, &probabilities, self.limits.top_k)?;

        let id = Uuid::new_v4();
        let image_key = store_source_image(self.storage.as_ref(), user_id, id, &image)
            .await
            .map_err(PredictionError::Persistence)?;

        let record = PredictionRecord {
            id,
            user_id,
            predictions,
            image_key: Some(image_key.clone()),
            created_at: self.clock.now(),
        };

        if let Err(e) = self.history.append(&record).await {
            if let Err(cleanup) = self.storage.delete_object(&image_key).await {
                warn!(error = %cleanup, key = %image_key, "failed to remove orphaned source image");
            }
            return Err(PredictionError::Persistence(e));
        }

        if let Some(top) = record.top_prediction() {
            info!(
                %user_id,
                prediction_id = %record.id,
                class = %top.class,
                confidence = top.confidence,
                "prediction recorded"
            );
        }

        Ok(PredictionOutcome {
            record,
            model_info: self.model_info(),
        })
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage, PredictionError> {
        if page == 0 || page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(PredictionError::InvalidPagination);
        }
        let (records, total) = self
            .history
            .list_by_user(user_id, page, page_size)
            .await
            .map_err(PredictionError::Persistence)?;
        Ok(HistoryPage {
            records,
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size as u64),
        })
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            engine: self.engine.name().to_string(),
            total_classes: self.manifest.len(),
        }
    }

    pub async fn health(&self) -> ModelHealth {
        ModelHealth {
            ready: !self.manifest.is_empty() && self.engine.ready().await,
            info: self.model_info(),
        }
    }
}
