//! Error types for the queue subsystem.

use thiserror::Error;

/// Errors surfaced by queues and the queue manager.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Push with the queue at capacity and every entry pending ack.
    #[error("queue {stream_id} is full and no entry is evictable")]
    Full { stream_id: u32 },

    /// Operation addressed a stream id with no queue.
    #[error("no queue for stream {0}")]
    UnknownStream(u32),

    /// A queue already exists for this stream id.
    #[error("queue for stream {0} already exists")]
    DuplicateStream(u32),

    /// The one-queue-per-frame invariant was breached: a frame number was
    /// reissued while another queue still had entries pending on it. The
    /// manager repairs the breach (the stale entries go back to their queue)
    /// and surfaces this through the event drain rather than panicking.
    #[error("frame {frame} reissued while pending in another queue")]
    FrameOwnershipViolation { frame: u32 },
}
