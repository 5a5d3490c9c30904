//! Timing behavior of throttled subscriptions against a real clock.

use crossbeam_channel::RecvTimeoutError;
use loadmon::{keys, Event, KeyFilter, Store};
use std::thread;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_store() -> Store {
    init_tracing();
    Store::new(keys::defaults())
}

#[test]
fn test_immediate_then_delayed() {
    let store = test_store();
    let delay = Duration::from_millis(200);
    let sub = store.register_throttled(KeyFilter::all(), delay).unwrap();

    let t0 = Instant::now();
    store.set("a", 1);
    let first = sub.recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(first, vec![Event::new("a", 1)]);

    thread::sleep(delay / 2);
    store.set("a", 2);

    // Still inside the window: nothing yet
    assert!(matches!(
        sub.recv_timeout(Duration::from_millis(20)),
        Err(RecvTimeoutError::Timeout)
    ));

    let second = sub.recv_timeout(Duration::from_millis(500)).unwrap();
    assert_eq!(second, vec![Event::new("a", 2)]);
    assert!(t0.elapsed() >= delay);

    store.cancel(&sub.token());
}

#[test]
fn test_coalescing_within_window() {
    let store = test_store();
    let sub = store
        .register_throttled(KeyFilter::all(), Duration::from_millis(300))
        .unwrap();

    store.set("a", 1);
    assert_eq!(
        sub.recv_timeout(Duration::from_millis(100)).unwrap(),
        vec![Event::new("a", 1)]
    );

    thread::sleep(Duration::from_millis(30));
    store.set("a", 2);
    thread::sleep(Duration::from_millis(30));
    store.set("a", 3);

    let flushed = sub.recv_timeout(Duration::from_millis(600)).unwrap();
    assert_eq!(flushed, vec![Event::new("a", 3)]);

    // Nothing else was queued for that window
    assert!(sub.recv_timeout(Duration::from_millis(50)).is_err());
    store.cancel(&sub.token());
}

#[test]
fn test_distinct_keys_share_one_batch() {
    let store = test_store();
    let sub = store
        .register_throttled(KeyFilter::prefix("bytes."), Duration::from_millis(200))
        .unwrap();

    store.set(keys::BYTES_READ, 1);
    sub.recv_timeout(Duration::from_millis(100)).unwrap();

    store.set(keys::BYTES_READ, 10);
    store.set(keys::SESSION_COUNT, 4);
    store.set(keys::BYTES_WRITE, 20);

    let batch = sub.recv_timeout(Duration::from_millis(500)).unwrap();
    assert_eq!(
        batch,
        vec![Event::new(keys::BYTES_READ, 10), Event::new(keys::BYTES_WRITE, 20)]
    );
    store.cancel(&sub.token());
}

#[test]
fn test_zero_delay_passthrough() {
    let store = test_store();
    let sub = store
        .register_throttled(KeyFilter::all(), Duration::ZERO)
        .unwrap();

    for i in 0..3 {
        store.set("a", i);
        let batch = sub.recv_timeout(Duration::from_millis(200)).unwrap();
        assert_eq!(batch, vec![Event::new("a", i)]);
    }
    store.cancel(&sub.token());
}

#[test]
fn test_cancel_closes_batch_channel() {
    let store = test_store();
    let sub = store
        .register_throttled(KeyFilter::all(), Duration::from_millis(50))
        .unwrap();

    store.cancel(&sub.token());
    for i in 0..100 {
        store.set("a", i);
    }

    assert!(matches!(
        sub.recv_timeout(Duration::from_secs(1)),
        Err(RecvTimeoutError::Disconnected)
    ));
    assert_eq!(store.subscriber_count(), 0);

    // Cancelling again is harmless
    store.cancel(&sub.token());
}

#[test]
fn test_pending_is_discarded_on_cancel() {
    let store = test_store();
    let sub = store
        .register_throttled(KeyFilter::all(), Duration::from_millis(300))
        .unwrap();

    store.set("a", 1);
    sub.recv_timeout(Duration::from_millis(100)).unwrap();
    store.set("a", 2);
    thread::sleep(Duration::from_millis(20));

    store.cancel(&sub.token());

    assert!(matches!(
        sub.recv_timeout(Duration::from_secs(1)),
        Err(RecvTimeoutError::Disconnected)
    ));
}

#[test]
fn test_dropped_consumer_stops_pipeline() {
    let store = test_store();
    let sub = store
        .register_throttled(KeyFilter::all(), Duration::ZERO)
        .unwrap();
    drop(sub);

    // The pipeline notices on its next send and its inbound side is pruned
    let deadline = Instant::now() + Duration::from_secs(1);
    while store.subscriber_count() > 0 && Instant::now() < deadline {
        store.set("a", 1);
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(store.subscriber_count(), 0);
}
