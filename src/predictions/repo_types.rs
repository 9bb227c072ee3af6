use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

/// One entry of a ranked result. `rank` starts at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPrediction {
    pub rank: u32,
    pub class: String,
    pub confidence: f64,
    pub confidence_percent: f64,
}

/// A stored prediction. Immutable once appended.
#[derive(Debug, Clone)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub predictions: Vec<RankedPrediction>, // top-K, best first
    pub image_key: Option<String>,
    pub created_at: OffsetDateTime,
}

impl PredictionRecord {
    pub fn top_prediction(&self) -> Option<&RankedPrediction> {
        self.predictions.first()
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PredictionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub predictions: Json<Vec<RankedPrediction>>,
    pub image_key: Option<String>,
    pub created_at: OffsetDateTime,
}

impl From<PredictionRow> for PredictionRecord {
    fn from(r: PredictionRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            predictions: r.predictions.0,
            image_key: r.image_key,
            created_at: r.created_at,
        }
    }
}
