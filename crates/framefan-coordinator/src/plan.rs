//! Chunk planning.

use framefan_models::{ChunkRange, FrameRange};

use crate::error::{CoordinatorError, CoordinatorResult};

/// Target concurrency grows from 75 to 150 as the render grows to 18000 frames.
const MIN_TARGET_CONCURRENCY: f64 = 75.0;
const MAX_TARGET_CONCURRENCY: f64 = 150.0;
const CONCURRENCY_RAMP_FRAMES: f64 = 18_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub min_frames_per_chunk: u32,
    pub max_chunks: u32,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            min_frames_per_chunk: 4,
            max_chunks: 200,
        }
    }
}

/// How a render's frames are split into chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub frame_range: FrameRange,
    pub frames_per_chunk: u32,
    pub every_nth_frame: u32,
    pub chunks: Vec<ChunkRange>,
}

impl ChunkPlan {
    /// Plan the whole composition with the default limits.
    pub fn compute(
        duration_in_frames: u32,
        frames_per_chunk: u32,
        every_nth_frame: u32,
    ) -> CoordinatorResult<Self> {
        Self::compute_with(
            PlanLimits::default(),
            duration_in_frames,
            None,
            Some(frames_per_chunk),
            every_nth_frame,
        )
    }

    /// Plan a render.
    ///
    /// `frame_range` defaults to the whole composition; `frames_per_chunk`
    /// defaults to [`default_frames_per_chunk`]. Chunks partition the
    /// rendered frames (every `every_nth_frame`th frame of the range) into
    /// groups of `frames_per_chunk`; the last group may be shorter.
    pub fn compute_with(
        limits: PlanLimits,
        duration_in_frames: u32,
        frame_range: Option<FrameRange>,
        frames_per_chunk: Option<u32>,
        every_nth_frame: u32,
    ) -> CoordinatorResult<Self> {
        if every_nth_frame == 0 {
            return Err(CoordinatorError::validation("everyNthFrame must be at least 1"));
        }

        let full = FrameRange::full(duration_in_frames)
            .ok_or_else(|| CoordinatorError::validation("composition has no frames"))?;
        let range = frame_range.unwrap_or(full);
        if range.is_empty() {
            return Err(CoordinatorError::validation(format!(
                "frame range {}-{} is empty",
                range.start, range.end
            )));
        }
        if range.end > full.end {
            return Err(CoordinatorError::validation(format!(
                "frame range {}-{} exceeds composition of {} frames",
                range.start, range.end, duration_in_frames
            )));
        }

        let effective = range.effective_len(every_nth_frame);
        let frames_per_chunk =
            frames_per_chunk.unwrap_or_else(|| default_frames_per_chunk(effective, limits));

        if frames_per_chunk == 0 {
            return Err(CoordinatorError::validation("framesPerChunk must be at least 1"));
        }
        if frames_per_chunk < limits.min_frames_per_chunk && effective >= limits.min_frames_per_chunk
        {
            return Err(CoordinatorError::validation(format!(
                "framesPerChunk {} is below the minimum of {}",
                frames_per_chunk, limits.min_frames_per_chunk
            )));
        }

        let chunk_count = effective.div_ceil(frames_per_chunk);
        if chunk_count > limits.max_chunks {
            return Err(CoordinatorError::validation(format!(
                "{} chunks exceed the maximum of {}; increase framesPerChunk",
                chunk_count, limits.max_chunks
            )));
        }

        // Work in u64 so start + offset * nth cannot overflow.
        let nth = u64::from(every_nth_frame);
        let start = u64::from(range.start);
        let end = u64::from(range.end);
        let per = u64::from(frames_per_chunk);
        let chunks = (0..chunk_count)
            .map(|index| {
                let first = u64::from(index) * per;
                let last = first + per - 1;
                ChunkRange {
                    index,
                    start_frame: (start + first * nth) as u32,
                    end_frame: (start + last * nth).min(end) as u32,
                }
            })
            .collect();

        Ok(Self {
            frame_range: range,
            frames_per_chunk,
            every_nth_frame,
            chunks,
        })
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }
}

/// Pick a chunk size for `frame_count` rendered frames.
///
/// Aims for a concurrency between 75 and 150 depending on length, never goes
/// below the minimum chunk size, then evens out chunk lengths.
pub fn default_frames_per_chunk(frame_count: u32, limits: PlanLimits) -> u32 {
    if frame_count == 0 {
        return limits.min_frames_per_chunk.max(1);
    }
    let frames = f64::from(frame_count);
    let ramp = (frames / CONCURRENCY_RAMP_FRAMES).clamp(0.0, 1.0);
    let concurrency =
        MIN_TARGET_CONCURRENCY + (MAX_TARGET_CONCURRENCY - MIN_TARGET_CONCURRENCY) * ramp;
    let per_chunk = (frames / concurrency).max(f64::from(limits.min_frames_per_chunk));
    let chunks_needed = (frames / per_chunk).ceil().max(1.0) as u32;
    let chunks_needed = chunks_needed.min(limits.max_chunks.max(1));
    frame_count.div_ceil(chunks_needed)
}
