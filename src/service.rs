//! Remote prediction service: trait seam + reqwest implementation.
//!
//! The scheduler and the insight pipeline only ever see `Arc<dyn PredictionService>`,
//! so tests swap in in-process stubs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::error::NetworkError;
use crate::model::{
    DemoScenario, GuestPrediction, ReservationInput, RiskBands, SimulatedReservation,
    TagAnalysis, TagAnalysisRequest,
};

pub const TENANT_HEADER: &str = "X-Tenant-ID";
pub const DEFAULT_TENANT: &str = "default";

/// Interface of the prediction/tag-analysis/simulation service.
#[async_trait]
pub trait PredictionService: Send + Sync {
    async fn predict(&self, input: &ReservationInput) -> Result<GuestPrediction, NetworkError>;

    /// Predictions come back positionally aligned with `inputs`.
    async fn predict_batch(
        &self,
        inputs: &[ReservationInput],
    ) -> Result<Vec<GuestPrediction>, NetworkError>;

    async fn analyze_tags(&self, req: &TagAnalysisRequest) -> Result<TagAnalysis, NetworkError>;

    async fn demo_scenarios(&self) -> Result<Vec<DemoScenario>, NetworkError>;

    async fn simulate_reservations(
        &self,
        count: u32,
    ) -> Result<Vec<SimulatedReservation>, NetworkError>;

    async fn health(&self) -> Result<serde_json::Value, NetworkError>;
}

pub type DynPredictionService = Arc<dyn PredictionService>;

#[derive(Serialize)]
struct BatchReq<'a> {
    reservations: &'a [ReservationInput],
}

#[derive(Deserialize)]
struct BatchResp {
    predictions: Vec<GuestPrediction>,
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Deserialize)]
struct ScenariosResp {
    scenarios: Vec<DemoScenario>,
}

#[derive(Deserialize)]
struct SimulateResp {
    reservations: Vec<SimulatedReservation>,
}

/// HTTP client for the FastAPI prediction backend.
pub struct HttpPredictionService {
    http: reqwest::Client,
    base_url: String,
    tenant_id: String,
    bands: RiskBands,
}

impl HttpPredictionService {
    pub fn new(cfg: &ServiceConfig, bands: RiskBands) -> Result<Self, NetworkError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("guest-insights/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs));
        if let Some(secs) = cfg.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder
            .build()
            .map_err(|e| NetworkError::Transport(e.to_string()))?;

        let tenant_id = if cfg.tenant_id.trim().is_empty() {
            DEFAULT_TENANT.to_string()
        } else {
            cfg.tenant_id.trim().to_string()
        };

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            tenant_id,
            bands,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, NetworkError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NetworkError::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| NetworkError::Decode(e.to_string()))
    }

    /// The service mounts health next to the versioned API (`/api/health`
    /// beside `/api/v1/...`), so a trailing `/v1` is dropped.
    fn health_url(&self) -> String {
        let root = self
            .base_url
            .strip_suffix("/v1")
            .unwrap_or(&self.base_url);
        format!("{root}/health")
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, NetworkError> {
        self.get_url(self.url(path)).await
    }

    async fn get_url<T: DeserializeOwned>(&self, url: String) -> Result<T, NetworkError> {
        let resp = self
            .http
            .get(url)
            .header(TENANT_HEADER, &self.tenant_id)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NetworkError> {
        let resp = self
            .http
            .post(self.url(path))
            .header(TENANT_HEADER, &self.tenant_id)
            .json(body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    fn check_bands(&self, p: &GuestPrediction) {
        if !p.risk_consistent(&self.bands) {
            warn!(
                risk = p.no_show_risk,
                label = p.risk_label.as_str(),
                medium = self.bands.medium,
                high = self.bands.high,
                "risk label disagrees with configured bands"
            );
        }
    }
}

#[async_trait]
impl PredictionService for HttpPredictionService {
    async fn predict(&self, input: &ReservationInput) -> Result<GuestPrediction, NetworkError> {
        let p: GuestPrediction = self.post_json("predict-guest-behavior", input).await?;
        self.check_bands(&p);
        Ok(p)
    }

    async fn predict_batch(
        &self,
        inputs: &[ReservationInput],
    ) -> Result<Vec<GuestPrediction>, NetworkError> {
        let resp: BatchResp = self
            .post_json("predict-batch", &BatchReq {
                reservations: inputs,
            })
            .await?;
        if resp.predictions.len() != inputs.len() {
            return Err(NetworkError::BatchMismatch {
                expected: inputs.len(),
                got: resp.predictions.len(),
            });
        }
        if let Some(count) = resp.count.filter(|c| *c != inputs.len()) {
            debug!(count, len = inputs.len(), "batch count field disagrees with array");
        }
        for p in &resp.predictions {
            self.check_bands(p);
        }
        Ok(resp.predictions)
    }

    async fn analyze_tags(&self, req: &TagAnalysisRequest) -> Result<TagAnalysis, NetworkError> {
        self.post_json("reservations/analyze-tags", req).await
    }

    async fn demo_scenarios(&self) -> Result<Vec<DemoScenario>, NetworkError> {
        let resp: ScenariosResp = self.get_json("demo-scenarios").await?;
        Ok(resp.scenarios)
    }

    async fn simulate_reservations(
        &self,
        count: u32,
    ) -> Result<Vec<SimulatedReservation>, NetworkError> {
        let resp: SimulateResp = self
            .get_json(&format!("simulate-reservations?count={count}"))
            .await?;
        Ok(resp.reservations)
    }

    async fn health(&self) -> Result<serde_json::Value, NetworkError> {
        self.get_url(self.health_url()).await
    }
}

/// Pull `detail` out of a FastAPI error body, else a trimmed prefix of the text.
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct Detail {
        detail: serde_json::Value,
    }
    if let Ok(d) = serde_json::from_str::<Detail>(body) {
        return match d.detail {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty body".to_string();
    }
    trimmed.chars().take(200).collect()
}
