// tests/scheduler.rs
//
// RequestScheduler behaviour, mostly under paused tokio time.
// The ControlledService parks each request until the test answers it, so
// late and out-of-order responses are deterministic. Teardown racing a
// delivery runs on a multi-thread runtime.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use common::{settle, ControlledService, StubService};
use guest_insights::config::SchedulerConfig;
use guest_insights::{
    Delivery, GuestPrediction, NetworkError, RequestScheduler, ReservationInput, StreamStatus,
    ValidationError,
};

type Outcome = Result<GuestPrediction, NetworkError>;

const DEBOUNCE: Duration = Duration::from_millis(600);

fn scheduler(svc: &Arc<ControlledService>, abort_superseded: bool) -> RequestScheduler {
    let cfg = SchedulerConfig {
        debounce_ms: DEBOUNCE.as_millis() as u64,
        abort_superseded,
    };
    RequestScheduler::new(svc.clone(), &cfg)
}

fn draft(lead_days: u32) -> ReservationInput {
    ReservationInput {
        booking_advance_days: lead_days,
        ..ReservationInput::named("Maria Garcia")
    }
}

fn delivery(tx: &mpsc::UnboundedSender<Outcome>) -> Delivery {
    let ok = tx.clone();
    let err = tx.clone();
    Delivery::new(
        move |p| {
            let _ = ok.send(Ok(p));
        },
        move |e| {
            let _ = err.send(Err(e));
        },
    )
}

fn lead_of(outcome: Outcome) -> String {
    outcome
        .expect("expected a prediction")
        .explanation
        .expect("stub sets explanation")
}

#[tokio::test(start_paused = true)]
async fn debounce_collapses_burst_into_last_draft() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, true);
    let (tx, mut rx) = mpsc::unbounded_channel();

    assert!(sched.schedule("form", draft(5), delivery(&tx)).is_some());
    sleep(Duration::from_millis(100)).await;
    assert!(sched.schedule("form", draft(10), delivery(&tx)).is_some());

    // Not yet: the window restarted at t=100ms.
    sleep(Duration::from_millis(550)).await;
    assert_eq!(svc.call_count(), 0);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(svc.call_count(), 1, "exactly one request for the burst");
    assert_eq!(svc.call_input(0).booking_advance_days, 10);

    svc.respond_ok(0);
    settle().await;
    assert_eq!(lead_of(rx.try_recv().unwrap()), "lead=10");
    assert!(rx.try_recv().is_err(), "delivered once");
}

#[tokio::test(start_paused = true)]
async fn stale_response_after_fresh_one_is_dropped() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, false);
    let (tx, mut rx) = mpsc::unbounded_channel();

    sched.submit_now("form", draft(1), delivery(&tx)).unwrap();
    settle().await;
    sched.submit_now("form", draft(2), delivery(&tx)).unwrap();
    settle().await;
    assert_eq!(svc.call_count(), 2);

    // Newer answers first, older one straggles in.
    svc.respond_ok(1);
    settle().await;
    svc.respond_ok(0);
    settle().await;

    assert_eq!(lead_of(rx.try_recv().unwrap()), "lead=2");
    assert!(rx.try_recv().is_err(), "stale response must not be delivered");
}

#[tokio::test(start_paused = true)]
async fn stale_response_before_fresh_one_is_dropped() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, false);
    let (tx, mut rx) = mpsc::unbounded_channel();

    sched.submit_now("form", draft(1), delivery(&tx)).unwrap();
    settle().await;
    sched.submit_now("form", draft(2), delivery(&tx)).unwrap();
    settle().await;

    svc.respond_ok(0);
    settle().await;
    assert!(rx.try_recv().is_err(), "superseded response arrived first");
    assert_eq!(sched.status("form"), StreamStatus::InFlight);

    svc.respond_ok(1);
    settle().await;
    assert_eq!(lead_of(rx.try_recv().unwrap()), "lead=2");
    assert_eq!(sched.status("form"), StreamStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn superseded_request_is_aborted_when_enabled() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, true);
    let (tx, mut rx) = mpsc::unbounded_channel();

    sched.submit_now("form", draft(1), delivery(&tx)).unwrap();
    settle().await;
    sched.submit_now("form", draft(2), delivery(&tx)).unwrap();
    settle().await;

    assert!(svc.is_abandoned(0), "older request future dropped");
    assert!(!svc.is_abandoned(1));

    svc.respond_ok(1);
    settle().await;
    assert_eq!(lead_of(rx.try_recv().unwrap()), "lead=2");
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn submit_now_supersedes_pending_debounce() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, true);
    let (tx, mut rx) = mpsc::unbounded_channel();

    sched.schedule("form", draft(5), delivery(&tx));
    sleep(Duration::from_millis(100)).await;
    let gen = sched.submit_now("form", draft(9), delivery(&tx)).unwrap();
    assert_eq!(gen, Some(2));
    settle().await;
    assert_eq!(svc.call_count(), 1, "immediate request issued without waiting");

    sleep(DEBOUNCE * 2).await;
    assert_eq!(svc.call_count(), 1, "pending debounced request never fires");
    assert_eq!(svc.call_input(0).booking_advance_days, 9);

    svc.respond_ok(0);
    settle().await;
    assert_eq!(lead_of(rx.try_recv().unwrap()), "lead=9");
}

#[tokio::test(start_paused = true)]
async fn error_is_delivered_once_and_clears_loading() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, true);
    let (tx, mut rx) = mpsc::unbounded_channel();

    sched.submit_now("form", draft(3), delivery(&tx)).unwrap();
    settle().await;
    assert_eq!(sched.status("form"), StreamStatus::InFlight);

    svc.respond_err(0, 503);
    settle().await;

    match rx.try_recv().unwrap() {
        Err(NetworkError::Status { status, .. }) => assert_eq!(status, 503),
        other => panic!("expected a 503, got {other:?}"),
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(sched.status("form"), StreamStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn blank_name_is_dropped_on_schedule_and_rejected_on_submit() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, true);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let blank = ReservationInput::named("   ");
    assert_eq!(sched.schedule("form", blank.clone(), delivery(&tx)), None);
    assert_eq!(sched.generation("form"), 0, "stream untouched");

    assert_eq!(
        sched.submit_now("form", blank, delivery(&tx)),
        Err(ValidationError::MissingGuestName)
    );

    sleep(DEBOUNCE * 2).await;
    assert_eq!(svc.call_count(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn blank_draft_does_not_cancel_pending_request() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, true);
    let (tx, _rx) = mpsc::unbounded_channel();

    sched.schedule("form", draft(4), delivery(&tx));
    sched.schedule("form", ReservationInput::named(""), delivery(&tx));
    sleep(DEBOUNCE + Duration::from_millis(10)).await;

    assert_eq!(svc.call_count(), 1);
    assert_eq!(svc.call_input(0).booking_advance_days, 4);
}

#[tokio::test(start_paused = true)]
async fn drop_tears_down_pending_and_in_flight() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, false);
    let (tx, mut rx) = mpsc::unbounded_channel();

    sched.submit_now("a", draft(1), delivery(&tx)).unwrap();
    sched.schedule("b", draft(2), delivery(&tx));
    settle().await;
    assert_eq!(svc.call_count(), 1);

    drop(sched);
    settle().await;
    assert!(svc.is_abandoned(0), "in-flight request aborted on teardown");

    sleep(DEBOUNCE * 2).await;
    assert_eq!(svc.call_count(), 1, "pending debounce never fires");
    assert!(rx.try_recv().is_err(), "nothing delivered after teardown");
}

#[tokio::test(start_paused = true)]
async fn cancel_stream_discards_late_response() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, true);
    let (tx, mut rx) = mpsc::unbounded_channel();

    sched.submit_now("form", draft(1), delivery(&tx)).unwrap();
    settle().await;
    sched.cancel("form");
    settle().await;

    assert_eq!(sched.status("form"), StreamStatus::Idle);
    assert!(svc.is_abandoned(0));
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn shutdown_refuses_new_work() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, true);
    let (tx, _rx) = mpsc::unbounded_channel();

    sched.shutdown();
    sched.shutdown();
    assert!(sched.is_shut_down());

    assert_eq!(sched.schedule("form", draft(1), delivery(&tx)), None);
    assert_eq!(sched.submit_now("form", draft(1), delivery(&tx)), Ok(None));
    sleep(DEBOUNCE * 2).await;
    assert_eq!(svc.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn status_walks_debouncing_in_flight_idle() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, true);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let status = sched.subscribe("form");
    assert_eq!(*status.borrow(), StreamStatus::Idle);

    sched.schedule("form", draft(6), delivery(&tx));
    assert_eq!(*status.borrow(), StreamStatus::Debouncing);

    sleep(DEBOUNCE + Duration::from_millis(10)).await;
    assert_eq!(*status.borrow(), StreamStatus::InFlight);

    svc.respond_ok(0);
    settle().await;
    assert_eq!(*status.borrow(), StreamStatus::Idle);
    assert!(rx.try_recv().is_ok());
}

#[tokio::test(start_paused = true)]
async fn streams_are_independent() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, true);
    let (tx, mut rx) = mpsc::unbounded_channel();

    sched.schedule("table-4", draft(1), delivery(&tx));
    sched.schedule("table-7", draft(2), delivery(&tx));
    sleep(DEBOUNCE + Duration::from_millis(10)).await;
    assert_eq!(svc.call_count(), 2);

    svc.respond_ok(0);
    svc.respond_ok(1);
    settle().await;

    let mut leads = vec![lead_of(rx.try_recv().unwrap()), lead_of(rx.try_recv().unwrap())];
    leads.sort();
    assert_eq!(leads, vec!["lead=1", "lead=2"]);
}

#[tokio::test(start_paused = true)]
async fn idle_unwatched_streams_are_dropped() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, true);
    let (tx, _rx) = mpsc::unbounded_channel();

    for table in 0..10 {
        sched
            .submit_now(&format!("table-{table}"), draft(table), delivery(&tx))
            .unwrap();
    }
    settle().await;
    assert_eq!(sched.stream_count(), 10);

    for i in 0..5 {
        svc.respond_ok(i);
    }
    settle().await;
    // Cancelling an already-dropped stream is a no-op.
    for table in 0..10 {
        sched.cancel(&format!("table-{table}"));
    }
    assert_eq!(sched.stream_count(), 0);
    assert_eq!(sched.generation("table-3"), 0);

    // A watched stream stays tracked after going idle.
    let status = sched.subscribe("bar");
    sched.submit_now("bar", draft(1), delivery(&tx)).unwrap();
    settle().await;
    svc.respond_ok(10);
    settle().await;
    assert_eq!(*status.borrow(), StreamStatus::Idle);
    assert_eq!(sched.stream_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn recreated_stream_ignores_stale_response() {
    let svc = Arc::new(ControlledService::new());
    let sched = scheduler(&svc, false);
    let (tx, mut rx) = mpsc::unbounded_channel();

    // First request goes stale, its stream entry is dropped, then the
    // same key is used again.
    let first = sched.submit_now("form", draft(1), delivery(&tx)).unwrap();
    settle().await;
    sched.submit_now("form", draft(2), delivery(&tx)).unwrap();
    settle().await;
    svc.respond_ok(1);
    settle().await;
    assert_eq!(sched.stream_count(), 0);
    assert_eq!(lead_of(rx.try_recv().unwrap()), "lead=2");

    let third = sched.submit_now("form", draft(3), delivery(&tx)).unwrap();
    assert_ne!(first, third);
    settle().await;
    svc.respond_ok(0);
    settle().await;
    assert!(rx.try_recv().is_err(), "stale response from before the reset");

    svc.respond_ok(2);
    settle().await;
    assert_eq!(lead_of(rx.try_recv().unwrap()), "lead=3");
}

// Teardown racing a delivery on another worker: `cancel` must not return
// while the callback is still running.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_waits_for_callback_in_progress() {
    let sched = Arc::new(RequestScheduler::new(
        Arc::new(StubService::default()),
        &SchedulerConfig::default(),
    ));
    let (entered_tx, entered_rx) = std_mpsc::channel::<()>();
    let (release_tx, release_rx) = std_mpsc::channel::<()>();
    let finished = Arc::new(AtomicBool::new(false));

    let done = Arc::clone(&finished);
    let delivery = Delivery::new(
        move |_| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            done.store(true, Ordering::SeqCst);
        },
        |_| {},
    );
    sched
        .submit_now("form", draft(1), delivery)
        .unwrap()
        .expect("scheduler open");

    tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("callback started");

    let canceller = Arc::clone(&sched);
    let seen = Arc::clone(&finished);
    let cancel = std::thread::spawn(move || {
        canceller.cancel("form");
        seen.load(Ordering::SeqCst)
    });

    std::thread::sleep(Duration::from_millis(50));
    assert!(!cancel.is_finished(), "cancel returned mid-callback");
    release_tx.send(()).unwrap();

    assert!(cancel.join().unwrap(), "callback finished before cancel returned");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callback_may_tear_down_its_own_stream() {
    let sched = Arc::new(RequestScheduler::new(
        Arc::new(StubService::default()),
        &SchedulerConfig::default(),
    ));
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let inner = Arc::clone(&sched);
    let delivery = Delivery::new(
        move |_| {
            inner.cancel("form");
            inner.shutdown();
            let _ = tx.send(());
        },
        |_| {},
    );
    sched.submit_now("form", draft(1), delivery).unwrap();

    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("callback deadlocked")
        .unwrap();
    assert!(sched.is_shut_down());
}
