use crc::{Algorithm, Crc, Digest, CRC_64_ECMA_182, CRC_64_GO_ISO, CRC_64_XZ};

use crate::combine::{self, CombineParams};
use crate::shared_types::ChunkResult;

/// A CRC64 variant: the checksum primitive together with the combine
/// parameters derived from the same algorithm definition.
pub struct Crc64 {
    crc: Crc<u64>,
    params: CombineParams,
}

/// CRC-64/XZ: ECMA-182 polynomial, reflected, all-ones init and xorout.
pub static XZ: Crc64 = Crc64::new(&CRC_64_XZ);
/// CRC-64/ECMA-182 in its plain, non-reflected form.
pub static ECMA_182: Crc64 = Crc64::new(&CRC_64_ECMA_182);
pub static GO_ISO: Crc64 = Crc64::new(&CRC_64_GO_ISO);

impl Crc64 {
    pub const fn new(algorithm: &'static Algorithm<u64>) -> Self {
        Self {
            crc: Crc::<u64>::new(algorithm),
            params: CombineParams::from_algorithm(algorithm),
        }
    }

    pub fn algorithm(&self) -> &'static Algorithm<u64> {
        self.crc.algorithm
    }

    pub fn checksum(&self, bytes: &[u8]) -> u64 {
        self.crc.checksum(bytes)
    }

    pub fn digest(&self) -> Digest<'_, u64> {
        self.crc.digest()
    }

    /// Checksum of zero bytes; the hash of an empty file.
    pub fn empty(&self) -> u64 {
        self.crc.checksum(&[])
    }

    pub fn combine(&self, crc1: u64, crc2: u64, len2: u64) -> u64 {
        combine::combine(&self.params, crc1, crc2, len2)
    }

    /// Folds chunk results, ordered by their position in the source, into
    /// the checksum of the concatenation. An empty slice folds to
    /// [`Crc64::empty`].
    pub fn fold(&self, results: &[ChunkResult]) -> u64 {
        let Some((first, rest)) = results.split_first() else {
            return self.empty();
        };
        rest.iter().fold(first.hash, |acc, result| {
            self.combine(acc, result.hash, result.length)
        })
    }
}

impl std::fmt::Debug for Crc64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc64")
            .field("check", &self.crc.algorithm.check)
            .field("params", &self.params)
            .finish()
    }
}

/// CRC-64/XZ of `bytes`.
pub fn crc64(bytes: &[u8]) -> u64 {
    XZ.checksum(bytes)
}

/// Combines two CRC-64/XZ values; see [`combine::combine`].
pub fn combine(crc1: u64, crc2: u64, len2: u64) -> u64 {
    XZ.combine(crc1, crc2, len2)
}

/// Folds ordered CRC-64/XZ chunk results; see [`Crc64::fold`].
pub fn fold_ordered(results: &[ChunkResult]) -> u64 {
    XZ.fold(results)
}
