//! Subscription handles returned by the store.

use crate::bus::Inbound;
use crate::types::{Batch, Event, KeyFilter, RegistrationToken};
use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Unthrottled subscription: every matching event, in publish order.
///
/// Filtering happens on the receiving side; non-matching events are skipped.
pub struct Subscription {
    inbound: Inbound<Event>,
    filter: KeyFilter,
}

impl Subscription {
    pub(crate) fn new(inbound: Inbound<Event>, filter: KeyFilter) -> Self {
        Self { inbound, filter }
    }

    pub fn token(&self) -> RegistrationToken {
        self.inbound.token()
    }

    pub fn filter(&self) -> &KeyFilter {
        &self.filter
    }

    /// Receive the next matching event (blocking).
    ///
    /// Returns `None` once the subscription is cancelled or disconnected.
    pub fn recv(&self) -> Option<Event> {
        loop {
            let event = self.inbound.recv().ok()?;
            if self.filter.matches(&event.key) {
                return Some(event);
            }
        }
    }

    /// Receive the next matching event, waiting at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Event, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = self.inbound.recv_timeout(remaining)?;
            if self.filter.matches(&event.key) {
                return Ok(event);
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&self) -> Result<Option<Event>, RecvError> {
        loop {
            match self.inbound.recv_timeout(Duration::ZERO) {
                Ok(event) if self.filter.matches(&event.key) => return Ok(Some(event)),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(RecvError),
            }
        }
    }
}

/// Throttled subscription: coalesced batches, at most one per delay window.
///
/// The batch channel disconnects when the pipeline stops, so iteration ends
/// deterministically after cancellation. Batches still queued when the
/// registration is cancelled are never handed out.
pub struct ThrottledSubscription {
    token: RegistrationToken,
    delay: Duration,
    receiver: Receiver<Batch>,
    open: Arc<AtomicBool>,
}

impl ThrottledSubscription {
    pub(crate) fn new(
        token: RegistrationToken,
        delay: Duration,
        receiver: Receiver<Batch>,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            token,
            delay,
            receiver,
            open,
        }
    }

    pub fn token(&self) -> RegistrationToken {
        self.token
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// False once the registration is cancelled or dropped by the bus.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Receive the next batch (blocking).
    pub fn recv(&self) -> Result<Batch, RecvError> {
        if !self.is_open() {
            return Err(RecvError);
        }
        let batch = self.receiver.recv()?;
        if self.is_open() {
            Ok(batch)
        } else {
            Err(RecvError)
        }
    }

    /// Try to receive a batch (non-blocking).
    pub fn try_recv(&self) -> Result<Batch, TryRecvError> {
        if !self.is_open() {
            return Err(TryRecvError::Disconnected);
        }
        let batch = self.receiver.try_recv()?;
        if self.is_open() {
            Ok(batch)
        } else {
            Err(TryRecvError::Disconnected)
        }
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Batch, RecvTimeoutError> {
        if !self.is_open() {
            return Err(RecvTimeoutError::Disconnected);
        }
        let batch = self.receiver.recv_timeout(timeout)?;
        if self.is_open() {
            Ok(batch)
        } else {
            Err(RecvTimeoutError::Disconnected)
        }
    }

    /// Raw batch receiver, for use in `select!`. Check
    /// [`is_open`](Self::is_open) after every receive.
    pub fn receiver(&self) -> &Receiver<Batch> {
        &self.receiver
    }
}
