//! Subscriptions to live store updates.
//!
//! Two flavors are handed out by [`Store`](crate::Store):
//! - [`Subscription`]: every matching event, as published
//! - [`ThrottledSubscription`]: batches paced to one per delay window, with
//!   multiple updates to a key inside a window coalesced to the latest value
//!
//! Each throttled subscription runs its own pipeline thread. Cancelling the
//! registration stops the thread and disconnects the batch channel.
//!
//! # Example
//!
//! ```ignore
//! let sub = store.register_throttled(KeyFilter::prefix("bytes."), Duration::from_millis(250))?;
//!
//! while let Ok(batch) = sub.recv() {
//!     for event in batch {
//!         println!("{} = {}", event.key, event.value);
//!     }
//! }
//! ```

mod throttle;
mod types;

pub(crate) use throttle::spawn_pipeline;
pub use throttle::Throttle;
pub use types::{Subscription, ThrottledSubscription};
