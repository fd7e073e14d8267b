use crate::shared_types::ChunkRange;

/// Splits `size` bytes into at most `max_chunks` contiguous ranges of equal
/// size, except for a possibly shorter final range. A cap of zero is treated
/// as one; an empty input yields no ranges.
pub fn plan(size: u64, max_chunks: u32) -> Vec<ChunkRange> {
    if size == 0 {
        return Vec::new();
    }
    let chunk_size = size.div_ceil(u64::from(max_chunks.max(1)));
    let chunk_count = size.div_ceil(chunk_size);

    (0..chunk_count)
        .map(|i| {
            let start = i * chunk_size;
            let end = start.saturating_add(chunk_size - 1).min(size - 1);
            ChunkRange {
                index: i as u32,
                start,
                end,
            }
        })
        .collect()
}
