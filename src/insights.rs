//! Insight pipeline: remote prediction → staff actions → history.
//!
//! Two entry points mirror the dashboard's two flows:
//! - `analyze_reservation` for a single submitted form (`source = analyze`)
//! - `analyze_tables` for tonight's simulated table list (`source = tables`)

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{InsightError, NetworkError, StorageError};
use crate::history::{AnalysisSource, HistoryRecord, HistoryStore};
use crate::logging::anon_hash;
use crate::model::{GuestPrediction, ReservationInput};
use crate::rules::{derive_actions, ActionRecommendation};
use crate::service::PredictionService;

pub const DEFAULT_TABLE_COUNT: u32 = 20;
pub const MAX_TABLE_COUNT: u32 = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuestInsight {
    /// Id of the persisted history record, if it was persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub input: ReservationInput,
    pub prediction: GuestPrediction,
    pub actions: Vec<ActionRecommendation>,
}

/// Pure join of a prediction with its derived actions.
pub fn insight_for(input: ReservationInput, prediction: GuestPrediction) -> GuestInsight {
    let actions = derive_actions(&prediction);
    GuestInsight {
        record_id: None,
        input,
        prediction,
        actions,
    }
}

/// Validate, predict, derive actions and persist.
pub async fn analyze_reservation(
    service: &dyn PredictionService,
    history: &Arc<HistoryStore>,
    input: ReservationInput,
) -> Result<GuestInsight, InsightError> {
    input.validate()?;
    let prediction = service.predict(&input).await?;

    let mut insight = insight_for(input, prediction);
    let mut records = persist(
        history,
        vec![(insight.input.clone(), insight.prediction.clone())],
        AnalysisSource::Analyze,
    )
    .await?;
    insight.record_id = records.pop().map(|r| r.id);

    info!(
        guest = %anon_hash(&insight.input.guest_name),
        risk = insight.prediction.risk_label.as_str(),
        actions = insight.actions.len(),
        "reservation analyzed"
    );
    Ok(insight)
}

/// Simulate tonight's reservations, batch-predict and persist the whole table
/// list at once, in table order. Insights come back in the same order. If the
/// history write fails nothing from this call is recorded.
pub async fn analyze_tables(
    service: &dyn PredictionService,
    history: &Arc<HistoryStore>,
    count: u32,
) -> Result<Vec<GuestInsight>, InsightError> {
    let count = count.clamp(1, MAX_TABLE_COUNT);
    let inputs: Vec<ReservationInput> = service
        .simulate_reservations(count)
        .await?
        .into_iter()
        .map(|s| s.input)
        .collect();
    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    let predictions = service.predict_batch(&inputs).await?;
    if predictions.len() != inputs.len() {
        return Err(NetworkError::BatchMismatch {
            expected: inputs.len(),
            got: predictions.len(),
        }
        .into());
    }

    let mut out: Vec<GuestInsight> = inputs
        .into_iter()
        .zip(predictions)
        .map(|(input, prediction)| insight_for(input, prediction))
        .collect();
    let rows = out
        .iter()
        .map(|i| (i.input.clone(), i.prediction.clone()))
        .collect();

    let records = persist(history, rows, AnalysisSource::Tables)
        .await
        .inspect_err(|e| warn!(error = %e, tables = out.len(), "table list not persisted"))?;
    for (insight, record) in out.iter_mut().zip(records) {
        insight.record_id = Some(record.id);
    }

    info!(tables = out.len(), "table list analyzed");
    Ok(out)
}

/// History writes are blocking file I/O; keep them off the async workers.
async fn persist(
    history: &Arc<HistoryStore>,
    rows: Vec<(ReservationInput, GuestPrediction)>,
    source: AnalysisSource,
) -> Result<Vec<HistoryRecord>, StorageError> {
    let history = Arc::clone(history);
    tokio::task::spawn_blocking(move || history.append_many(rows, source))
        .await
        .map_err(|e| StorageError::Worker(e.to_string()))?
}
