//! API route definitions.

use super::error::ApiError;
use super::state::AppState;
use crate::detect::{Label, ScoredBatch};
use crate::features::{FeatureSchema, IncidentRecord};
use crate::storage::dataset;
use crate::storage::ArtifactSummary;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/anomaly", get(list_anomalies))
        .route("/anomaly/score", post(score_records))
        .route("/model", get(model_info))
}

pub async fn home() -> Json<Value> {
    Json(json!({ "message": "ML Anomaly Detection API is running" }))
}

#[derive(Debug, Deserialize)]
pub struct SchemaQuery {
    pub schema: Option<FeatureSchema>,
}

/// One row of the anomaly listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnomalyEntry {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "type")]
    pub incident_type: Option<String>,
    pub timestamp: Option<String>,
    pub validation: Label,
}

/// Score the configured incidents file with the loaded model.
///
/// Records rejected by the encoder are left out of the listing.
async fn list_anomalies(
    State(state): State<AppState>,
    query: Result<Query<SchemaQuery>, QueryRejection>,
) -> Result<Json<Vec<AnomalyEntry>>, ApiError> {
    let Query(query) = query?;
    let schema = query.schema.unwrap_or(state.default_schema);
    let scorer = state.scorer.clone();
    let path = state.incidents_path.clone();
    let policy = state.invalid_records;

    let entries = tokio::task::spawn_blocking(move || -> Result<Vec<AnomalyEntry>, ApiError> {
        let incidents = dataset::load_incidents(&path)?;
        let scored = scorer.score_records(schema, &incidents, policy)?;

        // Results keep input order with rejected records removed.
        let mut results = scored.results.into_iter().peekable();
        let mut entries = Vec::with_capacity(incidents.len());
        for (index, incident) in incidents.into_iter().enumerate() {
            let Some(result) = results.next_if(|r| r.index == index) else {
                continue;
            };
            entries.push(AnomalyEntry {
                id: incident.id,
                lat: incident.lat,
                lng: incident.lng,
                incident_type: incident.incident_type,
                timestamp: incident.timestamp,
                validation: result.label,
            });
        }
        Ok(entries)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub schema: FeatureSchema,
    pub records: Vec<IncidentRecord>,
}

async fn score_records(
    State(state): State<AppState>,
    request: Result<Json<ScoreRequest>, JsonRejection>,
) -> Result<Json<ScoredBatch>, ApiError> {
    let Json(request) = request?;
    let scored = state
        .scorer
        .score_records(request.schema, &request.records, state.invalid_records)?;
    Ok(Json(scored))
}

async fn model_info(State(state): State<AppState>) -> Json<ArtifactSummary> {
    Json(state.scorer.artifact().summary())
}
