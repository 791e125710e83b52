//! Replays a burst of lead-time slider changes through the scheduler against the
//! configured prediction service. Only the last change should produce a request.

use std::sync::Arc;
use std::time::Duration;

use guest_insights::{
    config::AppConfig, derive_actions, model::ReservationPatch, service::HttpPredictionService,
    Delivery, GuestPrediction, NetworkError, RequestScheduler, ReservationInput,
};
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = AppConfig::load_default()?;
    let service = Arc::new(HttpPredictionService::new(&cfg.service, cfg.risk)?);
    let scheduler = RequestScheduler::new(service, &cfg.scheduler);

    let (tx, rx) = oneshot::channel::<Result<GuestPrediction, NetworkError>>();
    let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

    let mut draft = ReservationInput::named("Maria Garcia");
    draft.party_size = 4;
    draft.notes = "Birthday dinner, window seat please".into();

    for days in [1u32, 3, 7, 14, 21] {
        ReservationPatch {
            booking_advance_days: Some(days),
            ..Default::default()
        }
        .apply(&mut draft);

        let ok_tx = Arc::clone(&tx);
        let err_tx = Arc::clone(&tx);
        let delivery = Delivery::new(
            move |p| {
                if let Some(tx) = ok_tx.lock().ok().and_then(|mut g| g.take()) {
                    let _ = tx.send(Ok(p));
                }
            },
            move |e| {
                if let Some(tx) = err_tx.lock().ok().and_then(|mut g| g.take()) {
                    let _ = tx.send(Err(e));
                }
            },
        );
        let gen = scheduler.schedule("demo", draft.clone(), delivery);
        println!("lead={days:>2}d scheduled gen={gen:?}");
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    match rx.await {
        Ok(Ok(prediction)) => {
            println!(
                "{} | risk {:.2} | {} | {:?}",
                prediction.risk_label.as_str(),
                prediction.no_show_risk,
                prediction.sentiment.emoji,
                prediction.spend_tier
            );
            for action in derive_actions(&prediction) {
                println!("  [{}] {}", action.icon, action.label);
            }
        }
        Ok(Err(e)) => println!("prediction failed ({}): {e}", e.category().as_str()),
        Err(_) => println!("no delivery"),
    }

    scheduler.shutdown();
    println!("simulator-demo done");
    Ok(())
}
