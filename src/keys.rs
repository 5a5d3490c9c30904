//! Well-known counter keys.

use crate::types::Value;
use std::collections::BTreeMap;

/// Bytes read on the monitored listener.
pub const BYTES_READ: &str = "bytes.read.count";

/// Bytes written on the monitored listener.
pub const BYTES_WRITE: &str = "bytes.write.count";

/// Live sessions on the monitored endpoint.
pub const SESSION_COUNT: &str = "session.count";

/// Requests served by the monitored endpoint.
pub const REQUEST_COUNT: &str = "request.count";

/// Default values for the monitor's counters, all zero.
pub fn defaults() -> BTreeMap<String, Value> {
    [SESSION_COUNT, BYTES_READ, BYTES_WRITE, REQUEST_COUNT]
        .into_iter()
        .map(|key| (key.to_string(), Value::Int(0)))
        .collect()
}
