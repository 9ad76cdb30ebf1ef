//! # Queue statistics
//!
//! Serializable counters and per-queue snapshots for status reporting.

use serde::Serialize;

/// Aggregate counters across every queue the manager owns.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueManagerStats {
    /// Messages accepted by `push`.
    pub pushed: u64,
    /// Messages displaced by capacity eviction.
    pub evicted: u64,
    /// Messages handed to the modem (including retransmissions).
    pub sent: u64,
    /// Frames assembled.
    pub frames: u64,
    /// Messages confirmed by ack.
    pub acked: u64,
    /// Messages returned to their queue by nack.
    pub nacked: u64,
    /// Messages that outlived their TTL.
    pub expired: u64,
    /// Frames received and dispatched to inbox handlers.
    pub received: u64,
}

impl QueueManagerStats {
    /// Fraction of sent messages confirmed so far.
    pub fn ack_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.acked as f64 / self.sent as f64
        }
    }
}

/// Point-in-time view of one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub stream_id: u32,
    pub name: String,
    /// Entries waiting to be selected.
    pub queued: usize,
    /// Entries in flight awaiting ack.
    pub pending_ack: usize,
    /// Seconds since this queue last gave data, if it ever has.
    pub last_send_age_s: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_rate_handles_zero_sends() {
        let stats = QueueManagerStats::default();
        assert_eq!(stats.ack_rate(), 0.0);
    }

    #[test]
    fn ack_rate_fraction() {
        let stats = QueueManagerStats {
            sent: 10,
            acked: 4,
            ..Default::default()
        };
        assert!((stats.ack_rate() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn snapshot_serializes() {
        let snap = QueueSnapshot {
            stream_id: 3,
            name: "status".into(),
            queued: 2,
            pending_ack: 1,
            last_send_age_s: Some(4.5),
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"stream_id\":3"));
        assert!(json.contains("\"pending_ack\":1"));
    }
}
