/// A contiguous byte range of the input, `start..=end`, tagged with its
/// position in the plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    /// Number of bytes covered. Never zero for a planned range.
    pub fn byte_count(&self) -> ByteCount {
        self.end - self.start + 1
    }
}

/// Checksum of one chunk together with the number of bytes it covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkResult {
    pub hash: u64,
    pub length: u64,
}

pub type ByteCount = u64;
