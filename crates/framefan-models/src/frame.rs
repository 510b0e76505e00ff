//! Frame ranges and chunk ranges.

use serde::{Deserialize, Serialize};

/// An inclusive range of composition frames, `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: u32,
    pub end: u32,
}

impl FrameRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// The full range of a composition `duration_in_frames` long.
    ///
    /// Returns `None` for an empty composition.
    pub fn full(duration_in_frames: u32) -> Option<Self> {
        duration_in_frames
            .checked_sub(1)
            .map(|end| Self { start: 0, end })
    }

    /// Number of frames in the range (both ends included).
    pub fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Number of frames actually rendered when only every `nth` frame is kept.
    pub fn effective_len(&self, every_nth_frame: u32) -> u32 {
        if every_nth_frame == 0 || self.is_empty() {
            return 0;
        }
        self.len().div_ceil(every_nth_frame)
    }
}

/// The frame sub-range assigned to one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRange {
    pub index: u32,
    pub start_frame: u32,
    pub end_frame: u32,
}

impl ChunkRange {
    pub fn frame_range(&self) -> FrameRange {
        FrameRange::new(self.start_frame, self.end_frame)
    }
}
