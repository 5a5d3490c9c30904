//! # Load Monitor
//!
//! In-process live telemetry: a handful of named counters are mutated by
//! instrumented collaborators and pushed to dashboards without polling.
//!
//! ## Core Concepts
//!
//! - **Store**: current value per key; every mutation broadcasts one event
//! - **Bus**: fans events out to every subscriber, with an explicit policy
//!   for subscribers that fall behind
//! - **Throttled subscriptions**: per-subscriber pipelines that coalesce the
//!   event firehose into at most one batch per delay window
//!
//! Around the core sit the collaborators of a typical deployment: byte
//! counting on a monitored listener, sessions, access-key authentication,
//! and text event-stream rendering.
//!
//! ## Example
//!
//! ```ignore
//! use loadmon::{keys, KeyFilter, Store};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = Arc::new(Store::new(keys::defaults()));
//!
//! let sub = store.register_throttled(KeyFilter::prefix("bytes."), Duration::from_millis(250))?;
//!
//! store.add(keys::BYTES_READ, 512)?;
//!
//! let batch = sub.recv()?;
//! assert_eq!(batch[0].key, keys::BYTES_READ);
//!
//! store.cancel(&sub.token());
//! ```

pub mod auth;
pub mod bus;
pub mod config;
pub mod counting;
pub mod error;
pub mod keys;
pub mod session;
pub mod store;
pub mod stream;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use auth::KeyAuthenticator;
pub use bus::{Broker, Inbound};
pub use config::{MonitorConfig, OverflowPolicy, StoreConfig, StreamConfig};
pub use counting::{ByteCounter, ByteCounters, CountingListener, CountingStream};
pub use error::{MonitorError, Result};
pub use session::{Session, SessionStore};
pub use store::Store;
pub use stream::{encode_frame, stream_store, EventStream, StreamMessage, SubscriptionGuard};
pub use subscriptions::{Subscription, Throttle, ThrottledSubscription};
pub use types::*;
