//! The segment array: `N` descriptors claimed left-to-right under one
//! lock, the direct analogue of the teacher's
//! `picker::partial_piece::BlockState` claimed under `Picker`'s lock —
//! specialized here to whole-file segments claimed by dedicated worker
//! sockets instead of in-flight blocks on an already-open peer session.

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Undownloaded,
    Downloading,
    Downloaded,
}

#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub init_offset: u64,
    pub length: u32,
    pub status: SegmentStatus,
}

struct Inner {
    segments: Vec<Segment>,
    received: usize,
}

/// Shared, lock-guarded segment state for one download.
pub struct SegmentTable {
    total: usize,
    inner: Mutex<Inner>,
}

impl SegmentTable {
    /// Splits `size` bytes into `piece_len`-sized segments, the last one
    /// short if `size` doesn't divide evenly (spec §4.7).
    pub fn new(size: u64, piece_len: u32) -> Self {
        let piece_len = piece_len as u64;
        let n = if size == 0 { 0 } else { size.div_ceil(piece_len) as usize };

        let mut segments = Vec::with_capacity(n);
        for i in 0..n {
            let init_offset = i as u64 * piece_len;
            let length = if i + 1 == n {
                (size - init_offset) as u32
            } else {
                piece_len as u32
            };
            segments.push(Segment {
                init_offset,
                length,
                status: SegmentStatus::Undownloaded,
            });
        }

        Self {
            total: n,
            inner: Mutex::new(Inner { segments, received: 0 }),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Finds the leftmost `Undownloaded` segment, atomically marks it
    /// `Downloading`, and returns its index/offset/length.
    pub async fn claim_next(&self) -> Option<(usize, u64, u32)> {
        let mut guard = self.inner.lock().await;
        let idx = guard
            .segments
            .iter()
            .position(|s| s.status == SegmentStatus::Undownloaded)?;
        guard.segments[idx].status = SegmentStatus::Downloading;
        let s = guard.segments[idx];
        Some((idx, s.init_offset, s.length))
    }

    /// Marks segment `idx` `Downloaded` and increments the received
    /// count. Returns `true` if every segment is now downloaded.
    pub async fn mark_downloaded(&self, idx: usize) -> bool {
        let mut guard = self.inner.lock().await;
        guard.segments[idx].status = SegmentStatus::Downloaded;
        guard.received += 1;
        guard.received == guard.segments.len()
    }

    /// Reverts a failed claim back to `Undownloaded` so another worker can
    /// retry it.
    pub async fn revert(&self, idx: usize) {
        let mut guard = self.inner.lock().await;
        guard.segments[idx].status = SegmentStatus::Undownloaded;
    }

    pub async fn is_complete(&self) -> bool {
        let guard = self.inner.lock().await;
        guard.received == guard.segments.len()
    }
}

/// One segment body received from a peer, queued for the writer task.
pub struct FileSequence {
    pub init_offset: u64,
    pub length: u32,
    pub buf: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_count_and_last_segment_length() {
        let t = SegmentTable::new(10 * 1024, 2048);
        assert_eq!(t.total(), 5);
    }

    #[test]
    fn zero_size_file_has_no_segments() {
        let t = SegmentTable::new(0, 2048);
        assert_eq!(t.total(), 0);
    }

    #[tokio::test]
    async fn claims_are_leftmost_first_and_never_double_assigned() {
        let t = SegmentTable::new(10 * 1024, 2048);
        let mut claimed = std::collections::HashSet::new();
        for _ in 0..5 {
            let (idx, _, _) = t.claim_next().await.unwrap();
            assert!(claimed.insert(idx), "segment {idx} claimed twice");
        }
        assert!(t.claim_next().await.is_none());
    }

    #[tokio::test]
    async fn revert_makes_a_segment_claimable_again() {
        let t = SegmentTable::new(2048, 2048);
        let (idx, _, _) = t.claim_next().await.unwrap();
        t.revert(idx).await;
        let (idx2, _, _) = t.claim_next().await.unwrap();
        assert_eq!(idx, idx2);
    }

    #[tokio::test]
    async fn mark_downloaded_reports_completion_on_the_last_segment() {
        let t = SegmentTable::new(2048, 2048);
        let (idx, _, _) = t.claim_next().await.unwrap();
        assert!(t.mark_downloaded(idx).await);
    }
}
