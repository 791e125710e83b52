//! # Request scheduler
//! Debounces "intent to predict" events per input stream and guarantees that only
//! the freshest request's outcome is ever delivered.
//!
//! Each stream records the generation of its latest request. Scheduling issues a
//! fresh one; a request captures its generation when spawned and re-checks it
//! right before delivering. A mismatch means it was superseded and the outcome
//! is dropped. The check and the callback run inside the stream's delivery gate,
//! which teardown also passes through, so `cancel`/`shutdown` never return while
//! a callback for that stream is still running. Aborting the superseded tokio
//! task (which drops the HTTP future) only saves bandwidth; the generation check
//! is what keeps late, out-of-order responses away from the caller.
//!
//! Must be used from inside a tokio runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::error::{FailureCategory, NetworkError, ValidationError};
use crate::logging::anon_hash;
use crate::model::{GuestPrediction, ReservationInput};
use crate::service::DynPredictionService;

/// Loading state of one stream, for spinners and disabled buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Idle,
    Debouncing,
    InFlight,
}

type ResultFn = Box<dyn FnOnce(GuestPrediction) + Send>;
type ErrorFn = Box<dyn FnOnce(NetworkError) + Send>;
type Outcome = Result<GuestPrediction, NetworkError>;

/// Caller's result/error callbacks. At most one of them runs, at most once;
/// a superseded or cancelled request drops both unfired.
pub struct Delivery {
    on_result: ResultFn,
    on_error: ErrorFn,
}

impl Delivery {
    pub fn new<R, E>(on_result: R, on_error: E) -> Self
    where
        R: FnOnce(GuestPrediction) + Send + 'static,
        E: FnOnce(NetworkError) + Send + 'static,
    {
        Self {
            on_result: Box::new(on_result),
            on_error: Box::new(on_error),
        }
    }

    fn deliver(self, outcome: Outcome) {
        match outcome {
            Ok(p) => (self.on_result)(p),
            Err(e) => (self.on_error)(e),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Delivery")
    }
}

/// Serialises "check generation, then run callback" against teardown.
/// `cancel`/`shutdown` pass through it after bumping the generation, so once
/// they return no callback for that stream is still running or can start.
#[derive(Default)]
struct DeliveryGate {
    running: Mutex<()>,
    // Thread currently inside a callback; lets that callback tear down its
    // own stream without waiting on itself.
    thread: Mutex<Option<ThreadId>>,
}

struct Delivering<'a> {
    gate: &'a DeliveryGate,
    _running: MutexGuard<'a, ()>,
}

impl DeliveryGate {
    fn enter(&self) -> Delivering<'_> {
        let running = lock(&self.running);
        *lock(&self.thread) = Some(thread::current().id());
        Delivering {
            gate: self,
            _running: running,
        }
    }

    /// Block until any in-progress delivery has finished.
    fn wait(&self) {
        if *lock(&self.thread) == Some(thread::current().id()) {
            return;
        }
        drop(lock(&self.running));
    }
}

impl Drop for Delivering<'_> {
    fn drop(&mut self) {
        *lock(&self.gate.thread) = None;
    }
}

struct StreamState {
    generation: u64,
    task: Option<JoinHandle<()>>,
    status: watch::Sender<StreamStatus>,
    gate: Arc<DeliveryGate>,
}

impl StreamState {
    fn new() -> Self {
        let (status, _) = watch::channel(StreamStatus::Idle);
        Self {
            generation: 0,
            task: None,
            status,
            gate: Arc::default(),
        }
    }

    /// Invalidate whatever is pending or in flight and go idle.
    fn cancel(&mut self, generation: u64) {
        self.generation = generation;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.status.send_replace(StreamStatus::Idle);
    }

    /// Nothing pending and nobody watching: the entry can go.
    fn is_disposable(&self) -> bool {
        self.task.is_none() && self.status.receiver_count() == 0
    }
}

struct Shared {
    service: DynPredictionService,
    streams: Mutex<HashMap<String, StreamState>>,
    // Generations are unique across streams, so a pruned and re-created
    // stream can never reissue a number a stale task still holds.
    next_gen: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn streams(&self) -> MutexGuard<'_, HashMap<String, StreamState>> {
        lock(&self.streams)
    }

    fn next_gen(&self) -> u64 {
        self.next_gen.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Debounce window elapsed: still current? Then mark in flight.
    fn begin(&self, key: &str, gen: u64) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let streams = self.streams();
        match streams.get(key) {
            Some(st) if st.generation == gen => {
                st.status.send_replace(StreamStatus::InFlight);
                true
            }
            _ => false,
        }
    }

    /// Returns true only for the current generation, which is then retired
    /// (status idle, task handle released).
    fn settle(&self, key: &str, gen: u64) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut streams = self.streams();
        match streams.get_mut(key) {
            Some(st) if st.generation == gen => {
                st.task = None;
                st.status.send_replace(StreamStatus::Idle);
                true
            }
            _ => false,
        }
    }

    /// Delivery boundary: generation check and callback run inside the
    /// stream's gate. Returns false when the outcome was stale.
    fn finish(&self, key: &str, gen: u64, delivery: Delivery, outcome: Outcome) -> bool {
        let Some(gate) = self.streams().get(key).map(|st| Arc::clone(&st.gate)) else {
            return false;
        };
        let _delivering = gate.enter();
        if !self.settle(key, gen) {
            return false;
        }
        delivery.deliver(outcome);
        self.prune(key);
        true
    }

    fn prune(&self, key: &str) {
        let mut streams = self.streams();
        if streams.get(key).is_some_and(StreamState::is_disposable) {
            streams.remove(key);
        }
    }

    async fn run(
        self: Arc<Self>,
        key: String,
        gen: u64,
        input: ReservationInput,
        delivery: Delivery,
        delay: Option<Duration>,
    ) {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            if !self.begin(&key, gen) {
                return;
            }
        }

        counter!("scheduler_requests_issued_total").increment(1);
        debug!(stream = %key, gen, guest = %anon_hash(&input.guest_name), "issuing prediction request");

        let outcome = self.service.predict(&input).await;
        if let Err(e) = &outcome {
            warn!(stream = %key, gen, error = %e, "prediction request failed");
        }

        if !self.finish(&key, gen, delivery, outcome) {
            counter!("scheduler_stale_discarded_total").increment(1);
            debug!(
                stream = %key,
                gen,
                category = FailureCategory::Aborted.as_str(),
                "discarding stale prediction response"
            );
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// At most one live request per stream; last writer wins.
pub struct RequestScheduler {
    shared: Arc<Shared>,
    debounce: Duration,
    abort_superseded: bool,
}

impl RequestScheduler {
    pub fn new(service: DynPredictionService, cfg: &SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                service,
                streams: Mutex::new(HashMap::new()),
                next_gen: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
            debounce: Duration::from_millis(cfg.debounce_ms),
            abort_superseded: cfg.abort_superseded,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Debounced request. Resets the stream's timer and supersedes anything
    /// pending or in flight on it.
    ///
    /// An incomplete draft (see [`ReservationInput::validate`]) is dropped
    /// silently and leaves the stream untouched; so is anything scheduled
    /// after [`shutdown`](Self::shutdown). Returns the generation issued.
    pub fn schedule(
        &self,
        stream: &str,
        input: ReservationInput,
        delivery: Delivery,
    ) -> Option<u64> {
        if let Err(e) = input.validate() {
            debug!(stream, reason = %e, "draft not schedulable; dropped");
            return None;
        }
        self.enqueue(stream, input, delivery, Some(self.debounce))
    }

    /// Explicit submit: no debounce, validation errors are returned.
    /// Any pending debounced request on the stream is superseded.
    /// `Ok(None)` means the scheduler has been shut down.
    pub fn submit_now(
        &self,
        stream: &str,
        input: ReservationInput,
        delivery: Delivery,
    ) -> Result<Option<u64>, ValidationError> {
        input.validate()?;
        Ok(self.enqueue(stream, input, delivery, None))
    }

    fn enqueue(
        &self,
        stream: &str,
        input: ReservationInput,
        delivery: Delivery,
        delay: Option<Duration>,
    ) -> Option<u64> {
        if self.shared.closed.load(Ordering::Acquire) {
            warn!(stream, "scheduler shut down; request dropped");
            return None;
        }

        let mut streams = self.shared.streams();
        let st = streams
            .entry(stream.to_string())
            .or_insert_with(StreamState::new);

        let gen = self.shared.next_gen();
        st.generation = gen;

        if let Some(prev) = st.task.take() {
            if !prev.is_finished() {
                counter!("scheduler_superseded_total").increment(1);
                debug!(stream, gen, "superseding previous request");
            }
            if self.abort_superseded {
                prev.abort();
            }
        }

        st.status.send_replace(if delay.is_some() {
            StreamStatus::Debouncing
        } else {
            StreamStatus::InFlight
        });

        let shared = Arc::clone(&self.shared);
        let key = stream.to_string();
        st.task = Some(tokio::spawn(shared.run(key, gen, input, delivery, delay)));
        Some(gen)
    }

    /// Tear down one stream: pending timer and in-flight request are
    /// cancelled, and a callback already running is waited for. Once this
    /// returns nothing more is delivered for requests issued before it.
    pub fn cancel(&self, stream: &str) {
        let gate = {
            let mut streams = self.shared.streams();
            let Some(st) = streams.get_mut(stream) else {
                return;
            };
            st.cancel(self.shared.next_gen());
            let gate = Arc::clone(&st.gate);
            if st.is_disposable() {
                streams.remove(stream);
            }
            gate
        };
        gate.wait();
        debug!(stream, "stream cancelled");
    }

    /// Tear down every stream and refuse further work. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let gates: Vec<Arc<DeliveryGate>> = {
            let mut streams = self.shared.streams();
            let mut gates = Vec::with_capacity(streams.len());
            for st in streams.values_mut() {
                st.cancel(self.shared.next_gen());
                gates.push(Arc::clone(&st.gate));
            }
            streams.retain(|_, st| !st.is_disposable());
            gates
        };
        for gate in &gates {
            gate.wait();
        }
        debug!(streams = gates.len(), "scheduler shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Watch a stream's loading state. Creates the stream if needed.
    pub fn subscribe(&self, stream: &str) -> watch::Receiver<StreamStatus> {
        self.shared
            .streams()
            .entry(stream.to_string())
            .or_insert_with(StreamState::new)
            .status
            .subscribe()
    }

    pub fn status(&self, stream: &str) -> StreamStatus {
        self.shared
            .streams()
            .get(stream)
            .map(|st| *st.status.borrow())
            .unwrap_or(StreamStatus::Idle)
    }

    /// Number of streams currently tracked. Idle streams nobody watches
    /// are dropped after delivery or cancel.
    pub fn stream_count(&self) -> usize {
        self.shared.streams().len()
    }

    /// Latest generation issued on a stream (0 if the stream is not tracked).
    /// Generations increase across all streams of one scheduler.
    pub fn generation(&self, stream: &str) -> u64 {
        self.shared
            .streams()
            .get(stream)
            .map(|st| st.generation)
            .unwrap_or(0)
    }
}

impl Drop for RequestScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
