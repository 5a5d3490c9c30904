//! The broadcast-on-write value store.

use crate::bus::{Broker, Inbound};
use crate::config::StoreConfig;
use crate::error::{MonitorError, Result};
use crate::subscriptions::{spawn_pipeline, Subscription, ThrottledSubscription};
use crate::types::{Batch, Event, KeyFilter, RegistrationToken, Value};
use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex, RwLock, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

type Values = BTreeMap<String, Value>;

/// Current value per key, with one event broadcast per mutation.
///
/// Mutations (`set`, `reduce`, `reset`) are exclusive under the value lock;
/// `get` and `entries` share it and always hand out copies.
///
/// Events are captured while the value lock is held and broadcast after it
/// is released. Each mutation draws a ticket under the value lock and
/// broadcasts only when its turn comes, so subscribers see events in the
/// order mutations were applied. Readers never wait on a subscriber; a
/// stalled subscriber only delays the publication of later mutations, for
/// as long as the bus overflow policy allows.
pub struct Store {
    config: StoreConfig,

    /// Snapshot taken at construction; `reset` restores a copy.
    defaults: Values,

    values: RwLock<Values>,

    /// Next ticket to hand out; drawn under the value lock.
    issued: AtomicU64,

    /// Ticket whose turn it is to broadcast.
    published: Mutex<u64>,
    turn: Condvar,

    broker: Broker<Event>,
}

impl Store {
    /// Create a store with default configuration.
    pub fn new(defaults: BTreeMap<String, Value>) -> Self {
        Self::build(defaults, StoreConfig::default())
    }

    /// Create a store with explicit configuration.
    pub fn with_config(defaults: BTreeMap<String, Value>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(defaults, config))
    }

    fn build(defaults: Values, config: StoreConfig) -> Self {
        let broker = Broker::new(config.channel_capacity, config.overflow);
        Self {
            config,
            values: RwLock::new(defaults.clone()),
            defaults,
            issued: AtomicU64::new(0),
            published: Mutex::new(0),
            turn: Condvar::new(),
            broker,
        }
    }

    // --- Mutation ---

    /// Replace the value of `key` and broadcast the change.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let event = Event::new(key, value);
        let mut values = self.values.write();
        values.insert(event.key.clone(), event.value.clone());
        self.publish(values, vec![event]);
    }

    /// Atomically read-modify-write `key`.
    ///
    /// `f` receives the current value, or `None` if the key is unset. If it
    /// fails, the stored value is untouched, nothing is broadcast, and the
    /// error is returned as is. Returns the new value.
    ///
    /// `f` runs under the value lock and must not call back into the store.
    pub fn reduce<F>(&self, key: &str, f: F) -> Result<Value>
    where
        F: FnOnce(Option<&Value>) -> Result<Value>,
    {
        let mut values = self.values.write();
        let value = match f(values.get(key)) {
            Ok(value) => value,
            Err(e) => {
                debug!(key, error = %e, "Reducer rejected update");
                return Err(e);
            }
        };

        values.insert(key.to_string(), value.clone());
        self.publish(values, vec![Event::new(key, value.clone())]);
        Ok(value)
    }

    /// Add `delta` to an integer counter, treating unset or null as zero.
    pub fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let value = self.reduce(key, |current| {
            let current = match current {
                None | Some(Value::Null) => 0,
                Some(v) => v.as_int()?,
            };
            current
                .checked_add(delta)
                .map(Value::Int)
                .ok_or_else(|| {
                    MonitorError::Overflow(format!("{} + {} on {}", current, delta, key))
                })
        })?;
        value.as_int()
    }

    /// Restore a fresh copy of the defaults and broadcast every key.
    pub fn reset(&self) {
        let mut values = self.values.write();
        *values = self.defaults.clone();

        let events: Vec<Event> = values
            .iter()
            .map(|(key, value)| Event::new(key.clone(), value.clone()))
            .collect();
        debug!(keys = events.len(), "Store reset");

        self.publish(values, events);
    }

    /// Release the value lock and broadcast, keeping mutation order.
    fn publish(&self, values: RwLockWriteGuard<'_, Values>, events: Vec<Event>) {
        let ticket = self.issued.fetch_add(1, Ordering::SeqCst);
        drop(values);

        let mut published = self.published.lock();
        while *published != ticket {
            self.turn.wait(&mut published);
        }
        for event in &events {
            self.broker.broadcast(event);
        }
        *published += 1;
        self.turn.notify_all();
    }

    // --- Reads ---

    /// Current value of `key`, or `None` if not present.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Point-in-time copy of every entry.
    pub fn entries(&self) -> BTreeMap<String, Value> {
        self.values.read().clone()
    }

    /// The defaults captured at construction.
    pub fn defaults(&self) -> &BTreeMap<String, Value> {
        &self.defaults
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // --- Subscriptions ---

    /// Subscribe to every event whose key passes `filter`.
    pub fn register(&self, filter: KeyFilter) -> Result<Subscription> {
        let inbound = self.broker.register()?;
        debug!(token = ?inbound.token(), filter = ?filter, "Registered subscription");
        Ok(Subscription::new(inbound, filter))
    }

    /// Subscribe to batches paced to at most one per `delay`.
    ///
    /// If the pipeline cannot be started the registration is withdrawn
    /// before the error is returned.
    pub fn register_throttled(
        &self,
        filter: KeyFilter,
        delay: Duration,
    ) -> Result<ThrottledSubscription> {
        self.register_throttled_with(filter, delay, spawn_pipeline)
    }

    fn register_throttled_with<S>(
        &self,
        filter: KeyFilter,
        delay: Duration,
        spawn: S,
    ) -> Result<ThrottledSubscription>
    where
        S: FnOnce(Inbound<Event>, KeyFilter, Duration, usize) -> io::Result<Receiver<Batch>>,
    {
        let inbound = self.broker.register()?;
        let token = inbound.token();
        let open = inbound.open_flag();
        debug!(
            token = ?token,
            filter = ?filter,
            delay_ms = delay.as_millis() as u64,
            "Registered throttled subscription"
        );

        match spawn(inbound, filter, delay, self.config.output_capacity) {
            Ok(receiver) => Ok(ThrottledSubscription::new(token, delay, receiver, open)),
            Err(e) => {
                self.broker.cancel(&token);
                Err(e.into())
            }
        }
    }

    /// Cancel a subscription. Unknown or repeated tokens are a no-op.
    pub fn cancel(&self, token: &RegistrationToken) {
        self.broker.cancel(token);
    }

    /// Get subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.broker.subscriber_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;

    fn test_store() -> Store {
        Store::new(keys::defaults())
    }

    #[test]
    fn test_set_get() {
        let store = test_store();
        store.set("custom", "hello");

        assert_eq!(store.get("custom"), Some(Value::from("hello")));
        assert_eq!(store.get(keys::REQUEST_COUNT), Some(Value::Int(0)));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_entries_is_a_copy() {
        let store = test_store();
        let mut snapshot = store.entries();
        snapshot.insert("injected".to_string(), Value::Bool(true));

        store.set(keys::SESSION_COUNT, 3);

        assert_eq!(store.get("injected"), None);
        assert_eq!(snapshot.get(keys::SESSION_COUNT), Some(&Value::Int(0)));
    }

    #[test]
    fn test_reduce_increments() {
        let store = test_store();
        for _ in 0..3 {
            store
                .reduce(keys::REQUEST_COUNT, |v| {
                    let n = v.map(Value::as_int).transpose()?.unwrap_or(0);
                    Ok(Value::Int(n + 1))
                })
                .unwrap();
        }
        assert_eq!(store.get(keys::REQUEST_COUNT), Some(Value::Int(3)));
    }

    #[test]
    fn test_reduce_sees_absent() {
        let store = test_store();
        let seen = store
            .reduce("fresh", |v| {
                assert!(v.is_none());
                Ok(Value::Int(1))
            })
            .unwrap();
        assert_eq!(seen, Value::Int(1));
    }

    #[test]
    fn test_reduce_failure_leaves_value() {
        let store = test_store();
        store.set("label", "idle");

        let result = store.reduce("label", |v| {
            let n = v.map(Value::as_int).transpose()?.unwrap_or(0);
            Ok(Value::Int(n + 1))
        });

        assert!(matches!(result, Err(MonitorError::TypeMismatch { .. })));
        assert_eq!(store.get("label"), Some(Value::from("idle")));
    }

    #[test]
    fn test_add() {
        let store = test_store();
        assert_eq!(store.add(keys::BYTES_READ, 100).unwrap(), 100);
        assert_eq!(store.add(keys::BYTES_READ, 28).unwrap(), 128);
        assert_eq!(store.add("unset", 5).unwrap(), 5);
    }

    #[test]
    fn test_add_overflow() {
        let store = test_store();
        store.set("big", i64::MAX);

        let result = store.add("big", 1);
        assert!(matches!(result, Err(MonitorError::Overflow(_))));
        assert_eq!(store.get("big"), Some(Value::Int(i64::MAX)));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let store = test_store();
        store.set(keys::SESSION_COUNT, 9);
        store.set("extra", 1);

        store.reset();

        assert_eq!(store.entries(), keys::defaults());
        assert_eq!(store.get("extra"), None);

        // Defaults are not aliased by the live map
        store.set(keys::SESSION_COUNT, 2);
        assert_eq!(store.defaults().get(keys::SESSION_COUNT), Some(&Value::Int(0)));
    }

    #[test]
    fn test_with_config_validates() {
        let config = StoreConfig {
            channel_capacity: 0,
            ..Default::default()
        };
        let result = Store::with_config(keys::defaults(), config);
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_failed_pipeline_start_withdraws_registration() {
        let store = test_store();
        let _plain = store.register(KeyFilter::all()).unwrap();
        assert_eq!(store.subscriber_count(), 1);

        let result = store.register_throttled_with(
            KeyFilter::all(),
            Duration::from_millis(10),
            |_, _, _, _| Err(io::Error::new(io::ErrorKind::Other, "no threads left")),
        );

        assert!(matches!(result, Err(MonitorError::Io(_))));
        assert_eq!(store.subscriber_count(), 1);

        // Broadcasts still reach the surviving subscriber only
        store.set("a", 1);
        assert_eq!(store.subscriber_count(), 1);
    }

    #[test]
    fn test_throttled_queue_is_unreachable_after_cancel() {
        let store = test_store();
        let sub = store
            .register_throttled(KeyFilter::all(), Duration::ZERO)
            .unwrap();

        // Let the pipeline queue batches nobody consumes
        for i in 0..3 {
            store.set("a", i);
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while sub.receiver().len() < 3 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sub.receiver().len(), 3);

        store.cancel(&sub.token());

        assert!(!sub.is_open());
        assert!(sub.try_recv().is_err());
        assert!(matches!(
            sub.recv_timeout(Duration::from_millis(50)),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected)
        ));
        assert!(sub.recv().is_err());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let store = test_store();
        let sub = store.register(KeyFilter::all()).unwrap();
        assert_eq!(store.subscriber_count(), 1);

        store.cancel(&sub.token());
        store.cancel(&sub.token());
        assert_eq!(store.subscriber_count(), 0);
        assert!(sub.recv().is_none());
    }
}
