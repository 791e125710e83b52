// tests/common/mod.rs
//
// In-process prediction services for integration tests.
// - ControlledService: every predict() parks until the test answers it,
//   so arrival order and abandonment are under test control.
// - StubService: fixed answers for the pipeline and router tests.
#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;

use guest_insights::model::{
    AiTag, DemoScenario, GuestPrediction, ReservationInput, RiskLabel, Sentiment,
    SentimentLabel, SimulatedReservation, SmartTag, SpendTier, TagAnalysis, TagAnalysisRequest,
    TagResult,
};
use guest_insights::service::PredictionService;
use guest_insights::NetworkError;

pub type Reply = Result<GuestPrediction, NetworkError>;

pub fn prediction(risk: RiskLabel, tags: Vec<SmartTag>) -> GuestPrediction {
    let no_show_risk = match risk {
        RiskLabel::Low => 0.15,
        RiskLabel::Medium => 0.5,
        RiskLabel::High => 0.82,
    };
    GuestPrediction {
        reliability_score: 1.0 - no_show_risk,
        no_show_risk,
        risk_label: risk,
        ai_tag: if risk == RiskLabel::High {
            AiTag::LikelyNoShow
        } else {
            AiTag::LowRisk
        },
        spend_tier: SpendTier::Standard,
        sentiment: Sentiment {
            label: SentimentLabel::Neutral,
            score: 0.5,
            emoji: "\u{1F7E1}".into(),
        },
        confidence: 0.6,
        smart_tags: tags,
        explanation: None,
        tenant_id: "default".into(),
        created_at: Utc::now(),
    }
}

/// Prediction that records which draft it answers.
pub fn prediction_for(input: &ReservationInput) -> GuestPrediction {
    let mut p = prediction(RiskLabel::Low, vec![]);
    p.explanation = Some(format!("lead={}", input.booking_advance_days));
    p
}

/// Let spawned tasks run (and auto-advance paused time by a tick).
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

struct Parked {
    input: ReservationInput,
    reply: Option<oneshot::Sender<Reply>>,
}

#[derive(Default)]
pub struct ControlledService {
    calls: Mutex<Vec<Parked>>,
}

impl ControlledService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_input(&self, i: usize) -> ReservationInput {
        self.calls.lock().unwrap()[i].input.clone()
    }

    /// The issuing task went away (aborted) before an answer was sent.
    pub fn is_abandoned(&self, i: usize) -> bool {
        self.calls.lock().unwrap()[i]
            .reply
            .as_ref()
            .map(|tx| tx.is_closed())
            .unwrap_or(false)
    }

    fn answer(&self, i: usize, reply: Reply) {
        let tx = self.calls.lock().unwrap()[i]
            .reply
            .take()
            .expect("call already answered");
        let _ = tx.send(reply);
    }

    pub fn respond_ok(&self, i: usize) {
        let input = self.call_input(i);
        self.answer(i, Ok(prediction_for(&input)));
    }

    pub fn respond_err(&self, i: usize, status: u16) {
        self.answer(
            i,
            Err(NetworkError::Status {
                status,
                detail: "model not loaded".into(),
            }),
        );
    }
}

fn unused() -> NetworkError {
    NetworkError::Transport("not used by this test".into())
}

#[async_trait]
impl PredictionService for ControlledService {
    async fn predict(&self, input: &ReservationInput) -> Result<GuestPrediction, NetworkError> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().unwrap().push(Parked {
            input: input.clone(),
            reply: Some(tx),
        });
        rx.await
            .unwrap_or_else(|_| Err(NetworkError::Transport("reply dropped".into())))
    }

    async fn predict_batch(
        &self,
        _inputs: &[ReservationInput],
    ) -> Result<Vec<GuestPrediction>, NetworkError> {
        Err(unused())
    }

    async fn analyze_tags(&self, _req: &TagAnalysisRequest) -> Result<TagAnalysis, NetworkError> {
        Err(unused())
    }

    async fn demo_scenarios(&self) -> Result<Vec<DemoScenario>, NetworkError> {
        Err(unused())
    }

    async fn simulate_reservations(
        &self,
        _count: u32,
    ) -> Result<Vec<SimulatedReservation>, NetworkError> {
        Err(unused())
    }

    async fn health(&self) -> Result<serde_json::Value, NetworkError> {
        Err(unused())
    }
}

/// Canned service. `fail` turns every call into a 503.
pub struct StubService {
    pub risk: RiskLabel,
    pub tags: Vec<SmartTag>,
    /// Drop this many predictions from batch answers.
    pub batch_short_by: usize,
    pub fail: bool,
}

impl Default for StubService {
    fn default() -> Self {
        Self {
            risk: RiskLabel::Low,
            tags: vec![],
            batch_short_by: 0,
            fail: false,
        }
    }
}

impl StubService {
    fn check(&self) -> Result<(), NetworkError> {
        if self.fail {
            return Err(NetworkError::Status {
                status: 503,
                detail: "model not loaded".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PredictionService for StubService {
    async fn predict(&self, _input: &ReservationInput) -> Result<GuestPrediction, NetworkError> {
        self.check()?;
        Ok(prediction(self.risk, self.tags.clone()))
    }

    async fn predict_batch(
        &self,
        inputs: &[ReservationInput],
    ) -> Result<Vec<GuestPrediction>, NetworkError> {
        self.check()?;
        let n = inputs.len().saturating_sub(self.batch_short_by);
        Ok(inputs
            .iter()
            .take(n)
            .enumerate()
            .map(|(i, _)| {
                // Alternate so table order is visible in the output.
                let risk = if i % 2 == 0 { RiskLabel::High } else { RiskLabel::Low };
                prediction(risk, self.tags.clone())
            })
            .collect())
    }

    async fn analyze_tags(&self, req: &TagAnalysisRequest) -> Result<TagAnalysis, NetworkError> {
        self.check()?;
        let text = format!("{} {}", req.special_request_text, req.dietary_preferences).to_lowercase();
        let tags: Vec<TagResult> = [("birthday", "Birthday", "occasion"), ("allerg", "Allergy", "dietary")]
            .into_iter()
            .filter(|(needle, _, _)| text.contains(needle))
            .map(|(_, tag, category)| TagResult {
                tag: tag.into(),
                category: category.into(),
                color: "#f59e0b".into(),
            })
            .collect();
        Ok(TagAnalysis {
            customer_name: req.customer_name.clone(),
            confidence: if tags.is_empty() { 0.55 } else { 0.85 },
            tags,
            sentiment: prediction(self.risk, vec![]).sentiment,
            engine: "stub".into(),
        })
    }

    async fn demo_scenarios(&self) -> Result<Vec<DemoScenario>, NetworkError> {
        self.check()?;
        Ok(vec![DemoScenario {
            name: "Anniversary regulars".into(),
            reservation: ReservationInput::named("Tom Becker"),
        }])
    }

    async fn simulate_reservations(
        &self,
        count: u32,
    ) -> Result<Vec<SimulatedReservation>, NetworkError> {
        self.check()?;
        Ok((1..=count)
            .map(|i| SimulatedReservation {
                reservation_id: format!("RES-{i:04}"),
                tenant_id: "default".into(),
                adults: 2,
                input: ReservationInput {
                    table_number: Some(i),
                    ..ReservationInput::named(format!("Guest {i}"))
                },
            })
            .collect())
    }

    async fn health(&self) -> Result<serde_json::Value, NetworkError> {
        self.check()?;
        Ok(serde_json::json!({ "status": "healthy", "model_loaded": true }))
    }
}
