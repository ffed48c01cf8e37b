use crate::buffer::FrameId;

pub mod lru;

/// Victim selector over unpinned frames. Every operation is atomic under the
/// implementation's internal lock; none of them block on I/O.
pub trait Replacer {
    /// Make `frame_id` a candidate for eviction. Duplicate or over-capacity
    /// calls are no-ops.
    fn unpin(&self, frame_id: FrameId);

    /// Remove `frame_id` from the candidate set, if present.
    fn pin(&self, frame_id: FrameId);

    /// Pop the least recently unpinned frame, if any.
    fn victim(&self) -> Option<FrameId>;

    fn size(&self) -> usize;
}
