//! Wave planning for parallel byte-range requests
//!
//! A wave covers at most one buffer's worth of the resource. Full waves are
//! split into up to [`MAX_PARALLEL`] contiguous pieces, each owning a disjoint
//! window of the shared body buffer. The tail wave is never split.

use std::fmt;

use crate::core::error::{Error, Result};

/// Upper bound on concurrent sub-requests in one wave
pub const MAX_PARALLEL: usize = 6;

/// Default wave length, equal to one pooled buffer
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Inclusive byte range in absolute resource offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Value for the HTTP `Range` request header
    pub fn header_value(&self) -> String {
        format!("bytes={self}")
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One sub-request: its resource range and its slot in the body buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubFetchWindow {
    pub range: ByteRange,
    pub offset: usize,
    pub len: usize,
}

/// A planned wave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavePlan {
    /// Range covered by the whole wave
    pub range: ByteRange,
    /// Contiguous windows, in resource order
    pub windows: Vec<SubFetchWindow>,
    /// Next byte to schedule once this wave is registered
    pub next_start: u64,
}

impl WavePlan {
    /// Planned byte count of the wave
    pub fn len(&self) -> usize {
        self.range.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Plan the wave that starts at `next_start`.
///
/// `chunk_size` is the maximum wave length (one buffer) and `parallel` the
/// target piece count, clamped to `1..=MAX_PARALLEL`.
pub fn plan_wave(
    next_start: u64,
    content_length: u64,
    chunk_size: usize,
    parallel: usize,
) -> Result<WavePlan> {
    if content_length == 0 {
        return Err(Error::UnknownContentLength);
    }
    if next_start >= content_length {
        return Err(Error::InvalidInput(format!(
            "nothing left to plan: next start {next_start} >= content length {content_length}"
        )));
    }
    if chunk_size == 0 {
        return Err(Error::InvalidInput("chunk size must be positive".to_string()));
    }

    let wave_length = (content_length - next_start).min(chunk_size as u64) as usize;

    let mut count = parallel.clamp(1, MAX_PARALLEL);
    if wave_length < chunk_size || wave_length / count == 0 {
        count = 1;
    }
    let piece_size = wave_length / count;

    let wave_end = next_start + wave_length as u64;
    let mut windows = Vec::with_capacity(count);
    let mut piece_start = next_start;
    let mut offset = 0usize;

    for i in 0..count {
        let len = if i == count - 1 {
            (wave_end - piece_start) as usize
        } else {
            piece_size
        };
        windows.push(SubFetchWindow {
            range: ByteRange::new(piece_start, piece_start + len as u64 - 1),
            offset,
            len,
        });
        piece_start += len as u64;
        offset += len;
    }

    log::debug!(
        "Planned wave {}-{} ({} bytes) in {} piece(s), next start {}",
        next_start,
        wave_end - 1,
        wave_length,
        count,
        wave_end
    );

    Ok(WavePlan {
        range: ByteRange::new(next_start, wave_end - 1),
        windows,
        next_start: wave_end,
    })
}

/// Every wave of a resource, in order
#[derive(Debug, Clone)]
pub struct Waves {
    next_start: u64,
    content_length: u64,
    chunk_size: usize,
    parallel: usize,
}

impl Waves {
    pub fn new(content_length: u64, chunk_size: usize, parallel: usize) -> Self {
        Self {
            next_start: 0,
            content_length,
            chunk_size,
            parallel,
        }
    }
}

impl Iterator for Waves {
    type Item = WavePlan;

    fn next(&mut self) -> Option<WavePlan> {
        let plan = plan_wave(
            self.next_start,
            self.content_length,
            self.chunk_size,
            self.parallel,
        )
        .ok()?;
        self.next_start = plan.next_start;
        Some(plan)
    }
}
