//! Text event-stream rendering of throttled subscriptions.
//!
//! Each delivered event becomes one frame:
//!
//! ```text
//! event: store.event
//! data: <base64 of {"key":..,"value":..,"time":..}>
//!
//! ```
//!
//! A stream starts with the full `entries()` snapshot, then forwards batches.
//! When nothing was sent for the keepalive interval a `ping` frame is
//! synthesized. Any emission, real or synthetic, restarts the interval.

use crate::config::StreamConfig;
use crate::error::Result;
use crate::store::Store;
use crate::subscriptions::ThrottledSubscription;
use crate::types::{KeyFilter, RegistrationToken, Timestamp, Value};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::debug;

/// Payload of one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub key: String,
    pub value: Value,
    pub time: Timestamp,
}

impl StreamMessage {
    pub fn now(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            time: Timestamp::now(),
        }
    }
}

/// Render one named frame.
pub fn encode_frame(name: &str, message: &StreamMessage) -> Result<String> {
    let payload = serde_json::to_vec(message)?;
    Ok(format!(
        "event: {}\ndata: {}\n\n",
        name,
        BASE64_STANDARD.encode(payload)
    ))
}

/// Cancels a registration when dropped.
pub struct SubscriptionGuard<'a> {
    store: &'a Store,
    token: RegistrationToken,
}

impl<'a> SubscriptionGuard<'a> {
    pub fn new(store: &'a Store, token: RegistrationToken) -> Self {
        Self { store, token }
    }
}

impl Drop for SubscriptionGuard<'_> {
    fn drop(&mut self) {
        self.store.cancel(&self.token);
    }
}

/// Writes a store's live state to one client.
pub struct EventStream<W> {
    writer: W,
    config: StreamConfig,
    frames: u64,
}

impl<W: Write> EventStream<W> {
    pub fn new(writer: W, config: StreamConfig) -> Self {
        Self {
            writer,
            config,
            frames: 0,
        }
    }

    /// Send the snapshot, then forward `subscription` until it ends.
    ///
    /// Returns `Ok(())` at end-of-stream and the I/O error if the client
    /// goes away. Cancelling the subscription is the caller's job.
    pub fn serve(&mut self, store: &Store, subscription: &ThrottledSubscription) -> Result<()> {
        for (key, value) in store.entries() {
            self.write_message(&StreamMessage::now(key, value))?;
        }
        self.writer.flush()?;

        let keepalive = self.config.keepalive();
        loop {
            match subscription.recv_timeout(keepalive) {
                Ok(batch) => {
                    for event in batch {
                        self.write_message(&StreamMessage::now(event.key, event.value))?;
                    }
                    self.writer.flush()?;
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.write_keepalive()?;
                    self.writer.flush()?;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!(token = ?subscription.token(), frames = self.frames, "Event stream ended");
                    return Ok(());
                }
            }
        }
    }

    fn write_message(&mut self, message: &StreamMessage) -> Result<()> {
        let frame = encode_frame(&self.config.event_name, message)?;
        self.writer.write_all(frame.as_bytes())?;
        self.frames += 1;
        Ok(())
    }

    fn write_keepalive(&mut self) -> Result<()> {
        let now = Timestamp::now();
        let message = StreamMessage {
            key: self.config.keepalive_name.clone(),
            value: Value::Int(now.0),
            time: now,
        };
        let frame = encode_frame(&self.config.keepalive_name, &message)?;
        self.writer.write_all(frame.as_bytes())?;
        self.frames += 1;
        Ok(())
    }

    /// Frames written so far, keepalives included.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Register a throttled subscription for `filter` and stream it to `writer`
/// until the subscription ends or the client fails. The registration is
/// cancelled on every exit path.
pub fn stream_store<W: Write>(
    store: &Store,
    filter: KeyFilter,
    writer: W,
    config: StreamConfig,
) -> Result<W> {
    let subscription = store.register_throttled(filter, config.throttle())?;
    let _guard = SubscriptionGuard::new(store, subscription.token());

    let mut stream = EventStream::new(writer, config);
    stream.serve(store, &subscription)?;
    Ok(stream.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use std::io;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn decode(frames: &str) -> Vec<(String, StreamMessage)> {
        frames
            .split("\n\n")
            .filter(|f| !f.is_empty())
            .map(|frame| {
                let mut lines = frame.lines();
                let name = lines.next().unwrap().strip_prefix("event: ").unwrap();
                let data = lines.next().unwrap().strip_prefix("data: ").unwrap();
                let json = BASE64_STANDARD.decode(data).unwrap();
                (name.to_string(), serde_json::from_slice(&json).unwrap())
            })
            .collect()
    }

    fn fast_config() -> StreamConfig {
        StreamConfig {
            throttle_ms: 20,
            keepalive_ms: 30,
            ..Default::default()
        }
    }

    #[test]
    fn test_encode_frame() {
        let message = StreamMessage {
            key: "request.count".to_string(),
            value: Value::Int(4),
            time: Timestamp(1_700_000_000_000_000),
        };
        let frame = encode_frame("store.event", &message).unwrap();

        assert!(frame.starts_with("event: store.event\ndata: "));
        assert!(frame.ends_with("\n\n"));
        assert_eq!(decode(&frame), vec![("store.event".to_string(), message)]);
    }

    #[test]
    fn test_snapshot_updates_and_keepalive() {
        let store = Arc::new(Store::new(keys::defaults()));
        let subscription = store
            .register_throttled(KeyFilter::all(), Duration::from_millis(20))
            .unwrap();
        let token = subscription.token();

        let server_store = Arc::clone(&store);
        let server = thread::spawn(move || {
            let mut stream = EventStream::new(Vec::new(), fast_config());
            stream.serve(&server_store, &subscription).unwrap();
            stream.into_inner()
        });

        thread::sleep(Duration::from_millis(20));
        store.set(keys::REQUEST_COUNT, 1);
        thread::sleep(Duration::from_millis(120));
        store.cancel(&token);

        let output = String::from_utf8(server.join().unwrap()).unwrap();
        let frames = decode(&output);

        // Snapshot first, one frame per default key
        let snapshot: Vec<&str> = frames[..4].iter().map(|(_, m)| m.key.as_str()).collect();
        assert_eq!(
            snapshot,
            vec![keys::BYTES_READ, keys::BYTES_WRITE, keys::REQUEST_COUNT, keys::SESSION_COUNT]
        );

        assert!(frames.iter().any(|(name, m)| name == "store.event"
            && m.key == keys::REQUEST_COUNT
            && m.value == Value::Int(1)));
        assert!(frames.iter().any(|(name, m)| name == "ping" && m.key == "ping"));
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "client gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_client_failure_cancels_registration() {
        let store = Store::new(keys::defaults());

        let result = stream_store(&store, KeyFilter::all(), BrokenPipe, fast_config());

        assert!(result.is_err());
        assert_eq!(store.subscriber_count(), 0);
    }
}
