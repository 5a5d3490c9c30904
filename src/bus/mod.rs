//! Multi-subscriber publish/subscribe bus.
//!
//! The bus knows nothing about keys or filters: it delivers every published
//! message to every registered subscriber, unchanged and in publish order.
//! Full subscriber buffers are handled by the configured
//! [`OverflowPolicy`](crate::config::OverflowPolicy).

mod broker;

pub use broker::{Broker, Inbound};
