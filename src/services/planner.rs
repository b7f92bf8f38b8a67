//! Alignment arithmetic mapping a byte interval onto whole upstream chunks.

use crate::models::range::ByteInterval;

pub const MIN_CHUNK_SIZE: u64 = 4 * 1024;
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024;

/// Pull granularity for a request of `length` bytes.
///
/// A power of two between [`MIN_CHUNK_SIZE`] and [`MAX_CHUNK_SIZE`], roughly
/// the request length rounded up so small requests cost a single small pull.
pub fn chunk_size(length: u64) -> u64 {
    let kib = length.div_ceil(1024).max(1);
    kib.next_power_of_two()
        .saturating_mul(1024)
        .clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

/// How to stitch aligned chunks back into exactly the requested interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PullPlan {
    /// Offset of the first pull; a multiple of `chunk_size`.
    pub aligned_offset: u64,
    /// Leading bytes dropped from the first chunk.
    pub first_chunk_trim: u64,
    /// Leading bytes of the last chunk that are kept (`1..=chunk_size`).
    pub last_chunk_trim: u64,
    pub chunk_count: u64,
    pub chunk_size: u64,
}

impl PullPlan {
    /// Offset of the `part`-th pull.
    pub fn offset_of(&self, part: u64) -> u64 {
        self.aligned_offset + part * self.chunk_size
    }

    /// Byte range `start..end` to keep from the `part`-th chunk.
    pub fn keep_range(&self, part: u64) -> (usize, usize) {
        let start = if part == 0 { self.first_chunk_trim } else { 0 };
        let end = if part + 1 == self.chunk_count {
            self.last_chunk_trim
        } else {
            self.chunk_size
        };
        (start as usize, end as usize)
    }
}

/// Plan the pulls covering `interval` with chunks of `chunk_size` bytes.
///
/// The chunk count is taken from the chunk indices of the first and last byte,
/// so intervals straddling a chunk boundary get every chunk they touch.
pub fn plan(interval: ByteInterval, chunk_size: u64) -> PullPlan {
    assert!(chunk_size > 0, "chunk size must be positive");

    let aligned_offset = interval.from - interval.from % chunk_size;
    let first_chunk_trim = interval.from - aligned_offset;
    let last_chunk_trim = match (interval.until + 1) % chunk_size {
        0 => chunk_size,
        rem => rem,
    };
    let chunk_count = interval.until / chunk_size - interval.from / chunk_size + 1;

    PullPlan {
        aligned_offset,
        first_chunk_trim,
        last_chunk_trim,
        chunk_count,
        chunk_size,
    }
}
