use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe our series.
    /// Later calls reuse the installed recorder.
    pub fn init() -> anyhow::Result<Self> {
        let handle = HANDLE.get_or_try_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
            describe();
            Ok::<_, anyhow::Error>(handle)
        })?;
        Ok(Self {
            handle: handle.clone(),
        })
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!(
        "scheduler_requests_issued_total",
        "Prediction requests actually sent after debounce."
    );
    describe_counter!(
        "scheduler_superseded_total",
        "Pending or in-flight requests superseded by a newer schedule."
    );
    describe_counter!(
        "scheduler_stale_discarded_total",
        "Responses that arrived for a superseded generation and were dropped."
    );
    describe_counter!("history_appends_total", "Analysis records appended.");
    describe_gauge!("history_records", "Records currently in the history log.");
}
