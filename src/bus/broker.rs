//! Generic multi-subscriber broadcaster.

use crate::config::OverflowPolicy;
use crate::error::Result;
use crate::types::RegistrationToken;
use crossbeam_channel::{
    bounded, Receiver, RecvError, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Eviction attempts for `DropOldest` before the subscriber is treated as stuck.
const MAX_EVICTIONS: usize = 4;

/// Outcome of one delivery attempt.
enum Delivery {
    Sent,
    Overflow,
}

/// Bus-side state for one registered subscriber.
struct Client<T> {
    sender: Sender<T>,
    /// Clone of the subscriber's receiver, used to evict the oldest item.
    oldest: Receiver<T>,
    open: Arc<AtomicBool>,
}

impl<T> Client<T> {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn deliver(&self, policy: OverflowPolicy, msg: T) -> Delivery {
        match policy {
            OverflowPolicy::Disconnect => match self.sender.try_send(msg) {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Overflow,
            },
            OverflowPolicy::DropOldest => {
                let mut msg = msg;
                for _ in 0..MAX_EVICTIONS {
                    match self.sender.try_send(msg) {
                        Ok(()) => return Delivery::Sent,
                        Err(TrySendError::Full(back)) => {
                            let _ = self.oldest.try_recv();
                            msg = back;
                        }
                        Err(TrySendError::Disconnected(_)) => return Delivery::Overflow,
                    }
                }
                Delivery::Overflow
            }
            OverflowPolicy::Block { timeout_ms } => {
                match self
                    .sender
                    .send_timeout(msg, Duration::from_millis(timeout_ms))
                {
                    Ok(()) => Delivery::Sent,
                    Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Disconnected(_)) => {
                        Delivery::Overflow
                    }
                }
            }
        }
    }
}

/// Fans each published message out to every registered subscriber.
///
/// Per-subscriber delivery preserves publish order. The client table is only
/// touched under one lock, so a cancelled subscriber can never be sent to.
/// With [`OverflowPolicy::Block`] a full subscriber holds that lock for up to
/// the configured timeout.
pub struct Broker<T> {
    clients: Mutex<HashMap<RegistrationToken, Client<T>>>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T: Clone + Send> Broker<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            capacity,
            policy,
        }
    }

    /// Register a new subscriber with a fresh token and bounded channel.
    ///
    /// Fails only if the token cannot be generated, in which case nothing
    /// is added to the table.
    pub fn register(&self) -> Result<Inbound<T>> {
        let token = RegistrationToken::generate()?;
        let (sender, receiver) = bounded(self.capacity);
        let open = Arc::new(AtomicBool::new(true));

        let client = Client {
            sender,
            oldest: receiver.clone(),
            open: Arc::clone(&open),
        };
        self.clients.lock().insert(token, client);

        debug!(token = ?token, "Subscriber registered");
        Ok(Inbound {
            token,
            receiver,
            open,
        })
    }

    /// Send `msg` to every open subscriber. Returns how many received it.
    ///
    /// Subscribers that overflowed under the configured policy, or whose
    /// inbound side was dropped, are removed.
    pub fn broadcast(&self, msg: &T) -> usize {
        let policy = self.policy;
        let mut delivered = 0;

        let mut clients = self.clients.lock();
        clients.retain(|token, client| {
            if !client.is_open() {
                debug!(token = ?token, "Removing closed subscriber");
                return false;
            }
            match client.deliver(policy, msg.clone()) {
                Delivery::Sent => {
                    delivered += 1;
                    true
                }
                Delivery::Overflow => {
                    warn!(token = ?token, policy = ?policy, "Subscriber buffer overflow, disconnecting");
                    client.close();
                    false
                }
            }
        });

        delivered
    }

    /// Remove a subscriber and close its channel under one lock hold.
    ///
    /// Returns false for unknown or already-cancelled tokens.
    pub fn cancel(&self, token: &RegistrationToken) -> bool {
        let mut clients = self.clients.lock();
        let Some(client) = clients.remove(token) else {
            return false;
        };
        client.close();
        drop(client);
        drop(clients);

        debug!(token = ?token, "Subscriber cancelled");
        true
    }

    /// Get subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

/// The subscriber side of one registration.
///
/// Once the registration is cancelled (or dropped by the bus for overflow),
/// every receive reports closure even if items are still buffered.
pub struct Inbound<T> {
    token: RegistrationToken,
    receiver: Receiver<T>,
    open: Arc<AtomicBool>,
}

impl<T> Inbound<T> {
    pub fn token(&self) -> RegistrationToken {
        self.token
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Shared flag cleared when the registration is cancelled or dropped.
    pub(crate) fn open_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.open)
    }

    /// Raw receiver, for use in `select!`. Check [`is_open`](Self::is_open)
    /// after every receive.
    pub fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }

    /// Receive the next message (blocking).
    pub fn recv(&self) -> std::result::Result<T, RecvError> {
        if !self.is_open() {
            return Err(RecvError);
        }
        let msg = self.receiver.recv()?;
        if self.is_open() {
            Ok(msg)
        } else {
            Err(RecvError)
        }
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<T, RecvTimeoutError> {
        if !self.is_open() {
            return Err(RecvTimeoutError::Disconnected);
        }
        let msg = self.receiver.recv_timeout(timeout)?;
        if self.is_open() {
            Ok(msg)
        } else {
            Err(RecvTimeoutError::Disconnected)
        }
    }
}

impl<T> Drop for Inbound<T> {
    fn drop(&mut self) {
        // The bus removes the entry on its next broadcast.
        self.open.store(false, Ordering::Release);
    }
}
