use crate::crc64::Crc64;
use crate::shared_types::ChunkResult;

/// Per-chunk results keyed by chunk index, filled in completion order.
#[derive(Debug)]
pub struct ResultTable {
    slots: Vec<Option<ChunkResult>>,
}

impl ResultTable {
    pub fn new(chunk_count: usize) -> Self {
        Self {
            slots: vec![None; chunk_count],
        }
    }

    /// Stores the result for `index`. Each index is recorded at most once;
    /// a second write or an out-of-range index is rejected and returns
    /// `false`.
    pub fn record(&mut self, index: u32, result: ChunkResult) -> bool {
        match self.slots.get_mut(index as usize) {
            Some(slot) if slot.is_none() => {
                *slot = Some(result);
                true
            }
            _ => false,
        }
    }

    /// First index still lacking a result.
    pub fn first_missing(&self) -> Option<u32> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|index| index as u32)
    }

    /// Results in chunk order, or the first missing index.
    pub fn into_ordered(self) -> Result<Vec<ChunkResult>, u32> {
        if let Some(index) = self.first_missing() {
            return Err(index);
        }
        Ok(self.slots.into_iter().flatten().collect())
    }

    /// Folds the complete table. A partial table is never folded; the first
    /// missing index is returned instead.
    pub fn fold(self, crc: &Crc64) -> Result<u64, u32> {
        self.into_ordered().map(|results| crc.fold(&results))
    }
}
