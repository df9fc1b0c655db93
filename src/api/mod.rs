use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, warn};

use crate::error::PredictError;
use crate::lifecycle::{ModelManager, ModelPolicy, ModelState};
use crate::mapping::{LookupTable, MappingSummary};
use crate::model::{FeatureRow, PredictionResult};

#[derive(Clone)]
pub struct AppState {
    pub table: Arc<LookupTable>,
    pub models: Arc<ModelManager>,
}

/// Body of `POST /predict`.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchInput {
    pub team1: String,
    pub team2: String,
    pub league: String,
    pub odd1: f64,
    pub oddx: f64,
    pub odd2: f64,
}

/// Reply of `POST /predict`.  Failures are reported in the payload, never
/// through the HTTP status.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PredictResponse {
    Ok {
        prediction: String,
        probabilities: IndexMap<String, f64>,
    },
    Error {
        message: String,
    },
}

impl From<PredictionResult> for PredictResponse {
    fn from(r: PredictionResult) -> Self {
        PredictResponse::Ok {
            prediction: r.best,
            probabilities: r.probabilities,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    policy: ModelPolicy,
    model_state: ModelState,
    mapping: MappingSummary,
}

/// Build the Axum router for the prediction API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/predict", post(predict_handler))
        .route("/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// GET /
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "✅ Betsmart Prediction API is running!" }))
}

/// GET /status
async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        policy: state.models.policy(),
        model_state: state.models.state(),
        mapping: state.table.summary(),
    })
}

/// POST /predict
async fn predict_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<MatchInput>, JsonRejection>,
) -> Result<Json<PredictResponse>, PredictError> {
    let Json(input) = body.map_err(|e| PredictError::BadRequest(e.body_text()))?;
    let result = predict_match(&state, &input).await?;
    Ok(Json(result.into()))
}

/// Resolve names, run the model and pick the best outcome.
pub async fn predict_match(
    state: &AppState,
    input: &MatchInput,
) -> Result<PredictionResult, PredictError> {
    let ids = state.table.resolve(&input.league, &input.team1, &input.team2)?;
    let row = FeatureRow::new(ids, input.odd1, input.oddx, input.odd2);
    debug!("Feature row for {} vs {}: {:?}", input.team1, input.team2, row);

    let (labels, probs) = state.models.predict(&row).await?;
    PredictionResult::from_output(labels, probs)
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        match &self {
            PredictError::UnresolvedKey(k) => {
                warn!("Unresolved mapping key(s): {}", k.missing_fields().join(", "))
            }
            PredictError::BadRequest(msg) => warn!("Rejected prediction request: {}", msg),
            PredictError::Fetch(e) => error!("Model fetch failed: {}", e),
            PredictError::Deserialize(e) => error!("Model load failed: {}", e),
            PredictError::Inference(msg) => error!("Inference failed: {}", msg),
        }
        Json(PredictResponse::Error {
            message: self.to_string(),
        })
        .into_response()
    }
}
