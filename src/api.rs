//! Local HTTP surface for the dashboard: pipeline + history + actions.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::error::{FailureCategory, InsightError, NetworkError};
use crate::history::{HistoryRecord, HistoryStore};
use crate::insights::{self, GuestInsight, DEFAULT_TABLE_COUNT, MAX_TABLE_COUNT};
use crate::model::{
    DemoScenario, GuestPrediction, ReservationInput, RiskFilter, TagAnalysis, TagAnalysisRequest,
};
use crate::rules::{derive_actions, ActionRecommendation};
use crate::service::DynPredictionService;

#[derive(Clone)]
pub struct AppState {
    pub service: DynPredictionService,
    pub history: Arc<HistoryStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/tables", post(tables))
        .route("/actions", post(actions))
        .route("/scenarios", get(scenarios))
        .route("/analyze-tags", post(analyze_tags))
        .route("/history", get(list_history).delete(clear_history))
        .route("/history/{id}", delete(remove_record))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// JSON error body: `{ "error": ..., "category": ... }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    category: FailureCategory,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    category: FailureCategory,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            category: FailureCategory::Validation,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
            category: self.category,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<InsightError> for ApiError {
    fn from(e: InsightError) -> Self {
        let status = match &e {
            InsightError::Validation(_) => StatusCode::BAD_REQUEST,
            InsightError::Network(_) => StatusCode::BAD_GATEWAY,
            InsightError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            category: e.category(),
            message: e.to_string(),
        }
    }
}

impl From<NetworkError> for ApiError {
    fn from(e: NetworkError) -> Self {
        InsightError::from(e).into()
    }
}

#[derive(Serialize)]
struct HealthOut {
    status: &'static str,
    upstream: UpstreamHealth,
}

#[derive(Serialize)]
struct UpstreamHealth {
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_loaded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Always 200 while this process is up; `status` degrades when the
/// prediction service is unreachable or reports no model.
async fn health(State(state): State<AppState>) -> Json<HealthOut> {
    let upstream = match state.service.health().await {
        Ok(v) => UpstreamHealth {
            reachable: true,
            model_loaded: v.get("model_loaded").and_then(|m| m.as_bool()),
            error: None,
        },
        Err(e) => {
            warn!(error = %e, "prediction service health check failed");
            UpstreamHealth {
                reachable: false,
                model_loaded: None,
                error: Some(e.to_string()),
            }
        }
    };
    let status = if upstream.reachable && upstream.model_loaded != Some(false) {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthOut { status, upstream })
}

async fn analyze(
    State(state): State<AppState>,
    Json(input): Json<ReservationInput>,
) -> Result<Json<GuestInsight>, ApiError> {
    let insight =
        insights::analyze_reservation(state.service.as_ref(), &state.history, input).await?;
    Ok(Json(insight))
}

#[derive(Deserialize)]
struct TablesQuery {
    count: Option<u32>,
}

#[derive(Serialize)]
struct TablesOut {
    insights: Vec<GuestInsight>,
    count: usize,
}

async fn tables(
    State(state): State<AppState>,
    Query(q): Query<TablesQuery>,
) -> Result<Json<TablesOut>, ApiError> {
    let count = q.count.unwrap_or(DEFAULT_TABLE_COUNT);
    if count == 0 || count > MAX_TABLE_COUNT {
        return Err(ApiError::bad_request(format!(
            "count must be between 1 and {MAX_TABLE_COUNT}"
        )));
    }
    let insights = insights::analyze_tables(state.service.as_ref(), &state.history, count).await?;
    Ok(Json(TablesOut {
        count: insights.len(),
        insights,
    }))
}

async fn actions(Json(prediction): Json<GuestPrediction>) -> Json<Vec<ActionRecommendation>> {
    Json(derive_actions(&prediction))
}

async fn scenarios(State(state): State<AppState>) -> Result<Json<Vec<DemoScenario>>, ApiError> {
    Ok(Json(state.service.demo_scenarios().await?))
}

/// CRM tag extraction from free text, proxied to the service.
async fn analyze_tags(
    State(state): State<AppState>,
    Json(req): Json<TagAnalysisRequest>,
) -> Result<Json<TagAnalysis>, ApiError> {
    if req.special_request_text.trim().is_empty() && req.dietary_preferences.trim().is_empty() {
        return Err(ApiError::bad_request(
            "special_request_text or dietary_preferences is required",
        ));
    }
    Ok(Json(state.service.analyze_tags(&req).await?))
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    risk: Option<String>,
}

async fn list_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    let filter = q
        .risk
        .as_deref()
        .unwrap_or("all")
        .parse::<RiskFilter>()
        .map_err(ApiError::bad_request)?;
    Ok(Json(state.history.list_filtered(filter)))
}

async fn clear_history(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .history
        .clear()
        .map_err(InsightError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .history
        .remove(&id)
        .map_err(InsightError::from)?;
    Ok(StatusCode::NO_CONTENT)
}
