use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::predictions::repo_types::{PredictionRecord, RankedPrediction};
use crate::predictions::services::{HistoryPage, ModelHealth, ModelInfo, PredictionOutcome};

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub id: Uuid,
    pub predictions: Vec<RankedPrediction>,
    pub top_prediction: Option<RankedPrediction>,
    pub model_info: ModelInfo,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<PredictionOutcome> for PredictResponse {
    fn from(o: PredictionOutcome) -> Self {
        Self {
            id: o.record.id,
            top_prediction: o.record.top_prediction().cloned(),
            predictions: o.record.predictions,
            model_info: o.model_info,
            created_at: o.record.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    10
}

#[derive(Debug, Serialize)]
pub struct HistoryItem {
    pub id: Uuid,
    pub disease_name: Option<String>,
    pub confidence: Option<f64>,
    pub top_predictions: Vec<RankedPrediction>,
    pub image_key: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<PredictionRecord> for HistoryItem {
    fn from(r: PredictionRecord) -> Self {
        let top = r.top_prediction();
        Self {
            id: r.id,
            disease_name: top.map(|p| p.class.clone()),
            confidence: top.map(|p| p.confidence),
            image_key: r.image_key.clone(),
            top_predictions: r.predictions,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub predictions: Vec<HistoryItem>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl From<HistoryPage> for HistoryResponse {
    fn from(p: HistoryPage) -> Self {
        Self {
            predictions: p.records.into_iter().map(Into::into).collect(),
            total: p.total,
            page: p.page,
            page_size: p.page_size,
            total_pages: p.total_pages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PredictionHealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub model: ModelHealth,
}

impl From<ModelHealth> for PredictionHealthResponse {
    fn from(model: ModelHealth) -> Self {
        Self {
            status: if model.ready { "healthy" } else { "degraded" },
            model,
        }
    }
}
