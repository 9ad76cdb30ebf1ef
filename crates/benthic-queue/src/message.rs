//! # Queued messages and modem data requests
//!
//! A [`QueuedMessage`] is one encoded DCCL frame plus the scheduling metadata
//! the queues act on: destination, TTL, priority parameters, and whether the
//! sender wants a per-frame acknowledgement. Priority and TTL default from
//! the owning queue's configuration but can be overridden per message.

use bytes::Bytes;
use std::time::Duration;

use benthic_dccl::QUERY_DESTINATION_ID;

/// One message waiting for (or in) transmission.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Encoded frame bytes (header + body).
    pub data: Bytes,
    /// Destination modem id; 0 broadcasts, −1 defers to the data request.
    pub dest: i32,
    /// Source modem id, carried through to ack/expire events.
    pub src: u8,
    /// Park on the ack map after transmission instead of completing.
    pub ack_requested: bool,
    /// Lifetime from push; expired entries are never selected.
    pub ttl: Duration,
    /// `P0` in the priority growth `P0 · (t − ts) / τ`.
    pub base_priority: f64,
    /// `τ` in the priority growth.
    pub time_constant: Duration,
    /// Transmission attempts so far (incremented each time it is selected).
    pub send_attempts: u32,
}

impl QueuedMessage {
    /// Whether this message can ride a frame addressed to `request_dest`.
    pub fn matches_dest(&self, request_dest: i32) -> bool {
        request_dest == QUERY_DESTINATION_ID
            || self.dest == request_dest
            || self.dest == QUERY_DESTINATION_ID
    }
}

/// A modem driver's request for one frame of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRequest {
    /// Frame number the modem will transmit; the key for ack/nack routing.
    pub frame: u32,
    /// Requested destination, or [`QUERY_DESTINATION_ID`] for "whatever is
    /// most urgent".
    pub dest: i32,
    /// Frame capacity in bytes.
    pub max_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(dest: i32) -> QueuedMessage {
        QueuedMessage {
            data: Bytes::from_static(b"x"),
            dest,
            src: 1,
            ack_requested: false,
            ttl: Duration::from_secs(60),
            base_priority: 1.0,
            time_constant: Duration::from_secs(10),
            send_attempts: 0,
        }
    }

    #[test]
    fn query_request_matches_everything() {
        assert!(msg(5).matches_dest(QUERY_DESTINATION_ID));
        assert!(msg(0).matches_dest(QUERY_DESTINATION_ID));
    }

    #[test]
    fn directed_request_matches_same_dest_only() {
        assert!(msg(5).matches_dest(5));
        assert!(!msg(5).matches_dest(6));
    }

    #[test]
    fn deferred_dest_matches_any_request() {
        assert!(msg(QUERY_DESTINATION_ID).matches_dest(7));
    }
}
