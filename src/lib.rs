//! CRC64 checksums of large files, computed over contiguous chunks in
//! parallel and merged with GF(2) matrix exponentiation into the value a
//! single sequential pass would produce.
//!
//! ```no_run
//! # async fn run() -> Result<(), crc64_split::HashFileError> {
//! let checksum = crc64_split::hash_file("disk.img", 8).await?;
//! println!("{} {}", checksum.decimal(), checksum.hex());
//! # Ok(())
//! # }
//! ```
//!
//! The combine and fold primitives work without any file I/O, e.g. to merge
//! checksums of separately uploaded parts:
//!
//! ```
//! use crc64_split::{combine, crc64};
//!
//! let whole = combine(crc64(b"1234"), crc64(b"56789"), 5);
//! assert_eq!(whole, 0x995d_c9bb_df19_39fa);
//! ```

#[macro_use]
extern crate log;

pub mod chunk_plan;
pub mod combine;
pub mod crc64;
pub mod file_hasher;
pub mod fold;
pub mod progress_reporter;
pub mod range_reader;
pub mod shared_types;

pub use crate::crc64::{combine, crc64, fold_ordered, Crc64};
pub use crate::file_hasher::{
    default_concurrency, hash_file, FileChecksum, FileHasher, HashFileError, HashOptions,
};
pub use crate::range_reader::{hash_range, FileRangeHasher, RangeHasher};
pub use crate::shared_types::{ByteCount, ChunkRange, ChunkResult};
