//! Per-subscription throttling.
//!
//! [`Throttle`] is the pacing state machine, kept free of clocks and
//! channels so it can be driven with explicit instants. The pipeline thread
//! feeds it from the bus and turns its output into batches.

use crate::bus::Inbound;
use crate::types::{Batch, Event, KeyFilter, RegistrationToken, Value};
use crossbeam_channel::{at, bounded, never, select, Receiver, SendTimeoutError, Sender};
use std::collections::BTreeMap;
use std::mem;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How often a blocked batch send rechecks for cancellation.
const SEND_POLL: Duration = Duration::from_millis(100);

/// Pacing state for one throttled subscription.
///
/// Idle: an event at or after the time barrier is emitted at once and moves
/// the barrier one delay ahead. Otherwise the event is parked in `pending`
/// (latest value per key) and a deadline is armed at the barrier. Later
/// events only overwrite `pending`. When the deadline fires, `pending` is
/// flushed as one batch and the barrier moves one delay past the flush.
///
/// `pending` is non-empty only while a deadline is armed.
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    barrier: Instant,
    pending: BTreeMap<String, Value>,
    deadline: Option<Instant>,
}

impl Throttle {
    pub fn new(delay: Duration, now: Instant) -> Self {
        Self {
            delay,
            barrier: now,
            pending: BTreeMap::new(),
            deadline: None,
        }
    }

    /// Feed one matching event observed at `now`.
    ///
    /// Returns a single-event batch when it may be emitted immediately.
    pub fn on_event(&mut self, event: Event, now: Instant) -> Option<Batch> {
        if self.deadline.is_none() && now >= self.barrier {
            self.barrier = now + self.delay;
            return Some(vec![event]);
        }

        self.pending.insert(event.key, event.value);
        if self.deadline.is_none() {
            self.deadline = Some(self.barrier);
        }
        None
    }

    /// Fire the armed deadline at `now`, flushing everything pending.
    ///
    /// Returns `None` if no deadline was armed.
    pub fn on_deadline(&mut self, now: Instant) -> Option<Batch> {
        self.deadline.take()?;
        self.barrier = now + self.delay;

        if self.pending.is_empty() {
            return None;
        }
        let batch = mem::take(&mut self.pending)
            .into_iter()
            .map(|(key, value)| Event { key, value })
            .collect();
        Some(batch)
    }

    /// When the armed timer fires, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Earliest time the next event may be emitted immediately.
    pub fn barrier(&self) -> Instant {
        self.barrier
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

enum Step {
    Event(Event),
    Deadline,
    Closed,
}

/// Start the pipeline thread for one registration.
///
/// The thread owns the batch sender, so the returned receiver disconnects on
/// every exit path: cancellation, bus overflow, or the consumer going away.
pub(crate) fn spawn_pipeline(
    inbound: Inbound<Event>,
    filter: KeyFilter,
    delay: Duration,
    output_capacity: usize,
) -> std::io::Result<Receiver<Batch>> {
    let (out, receiver) = bounded(output_capacity);
    let name = format!("throttle-{}", inbound.token().short());

    thread::Builder::new()
        .name(name)
        .spawn(move || run_pipeline(inbound, filter, delay, out))?;

    Ok(receiver)
}

fn run_pipeline(inbound: Inbound<Event>, filter: KeyFilter, delay: Duration, out: Sender<Batch>) {
    let token = inbound.token();
    let mut throttle = Throttle::new(delay, Instant::now());
    debug!(token = ?token, delay_ms = delay.as_millis() as u64, "Throttle pipeline started");

    loop {
        let timer = match throttle.deadline() {
            Some(deadline) => at(deadline),
            None => never(),
        };

        let step = select! {
            recv(inbound.receiver()) -> msg => match msg {
                Ok(event) if inbound.is_open() => Step::Event(event),
                _ => Step::Closed,
            },
            recv(timer) -> _ => Step::Deadline,
        };

        let batch = match step {
            Step::Event(event) if filter.matches(&event.key) => {
                throttle.on_event(event, Instant::now())
            }
            Step::Event(_) => None,
            Step::Deadline => throttle.on_deadline(Instant::now()),
            Step::Closed => break,
        };

        if let Some(batch) = batch {
            trace!(token = ?token, events = batch.len(), "Flushing batch");
            if !deliver(&out, batch, &inbound, token) {
                break;
            }
        }
    }

    debug!(
        token = ?token,
        discarded = throttle.pending_len(),
        "Throttle pipeline stopped"
    );
}

/// Hand a batch to the consumer. Returns false once the consumer is gone or
/// the registration was cancelled while waiting.
fn deliver(
    out: &Sender<Batch>,
    batch: Batch,
    inbound: &Inbound<Event>,
    token: RegistrationToken,
) -> bool {
    let mut batch = batch;
    loop {
        if !inbound.is_open() {
            return false;
        }
        match out.send_timeout(batch, SEND_POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                trace!(token = ?token, "Consumer slow, batch waiting");
                batch = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                debug!(token = ?token, "Batch consumer dropped");
                return false;
            }
        }
    }
}
