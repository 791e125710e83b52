// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod insights;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod rules;
pub mod scheduler;
pub mod service;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::error::{FailureCategory, InsightError, NetworkError, StorageError, ValidationError};
pub use crate::history::{AnalysisSource, HistoryRecord, HistoryStore};
pub use crate::model::{GuestPrediction, ReservationInput, ReservationPatch, SmartTag, TagCategory};
pub use crate::rules::{derive_actions, ActionRecommendation, RuleEngine};
pub use crate::scheduler::{Delivery, RequestScheduler, StreamStatus};
pub use crate::service::{HttpPredictionService, PredictionService};

use std::sync::Arc;

use crate::config::AppConfig;
use crate::history::FileBackend;

/// Wire the production state (HTTP service + file-backed history) from config.
pub fn build_state(cfg: &AppConfig) -> anyhow::Result<api::AppState> {
    let service = HttpPredictionService::new(&cfg.service, cfg.risk)?;
    let history = HistoryStore::new(FileBackend::new(&cfg.history.path), cfg.history.capacity);
    tracing::info!(
        base_url = %cfg.service.base_url,
        tenant = %service.tenant_id(),
        history = %cfg.history.path,
        capacity = history.capacity(),
        "guest-insights state built"
    );
    Ok(api::AppState {
        service: Arc::new(service),
        history: Arc::new(history),
    })
}
