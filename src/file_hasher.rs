use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::chunk_plan;
use crate::crc64::XZ;
use crate::fold::ResultTable;
use crate::range_reader::{FileRangeHasher, RangeHasher};
use crate::shared_types::{ByteCount, ChunkRange, ChunkResult};

const MIN_CONCURRENCY: usize = 3;
const MAX_CONCURRENCY: usize = 16;
/// Hard cap on workers per file, whatever `max_concurrency` asks for. Each
/// worker holds its own file handle.
pub const WORKER_LIMIT: u32 = 256;

/// Worker count used when none is given: the number of CPUs, kept within
/// a small floor and a practical ceiling.
pub fn default_concurrency() -> u32 {
    num_cpus::get().clamp(MIN_CONCURRENCY, MAX_CONCURRENCY) as u32
}

#[derive(Error, Debug)]
pub enum HashFileError {
    #[error("cannot stat {}: {source}", .path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to hash chunk {index} (bytes {start}..={end}): {source}")]
    ChunkRead {
        index: u32,
        start: u64,
        end: u64,
        #[source]
        source: io::Error,
    },
    #[error("hashing worker did not run to completion: {0}")]
    WorkerDispatch(#[from] JoinError),
    #[error("chunk {index} never reported a result")]
    MissingChunk { index: u32 },
}

#[derive(Debug, Clone)]
pub struct HashOptions {
    /// Upper bound on concurrent workers (never more than [`WORKER_LIMIT`]),
    /// and on the number of chunks unless `max_chunks` is set.
    pub max_concurrency: u32,
    /// Splits into more (smaller) chunks than there are workers.
    pub max_chunks: Option<u32>,
    /// Fails a chunk that takes longer than this.
    pub chunk_timeout: Option<Duration>,
}

impl Default for HashOptions {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            max_chunks: None,
            chunk_timeout: None,
        }
    }
}

/// Whole-file checksum along with the number of bytes it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileChecksum {
    pub crc: u64,
    pub size: u64,
}

impl FileChecksum {
    pub fn decimal(&self) -> String {
        self.crc.to_string()
    }

    pub fn hex(&self) -> String {
        format!("0x{:016x}", self.crc)
    }
}

impl fmt::Display for FileChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.decimal(), self.hex())
    }
}

struct ChunkUpdate {
    range: ChunkRange,
    result: io::Result<u64>,
}

/// Splits a file into ranges, hashes them on a bounded set of workers and
/// folds the results back in file order.
pub struct FileHasher<H = FileRangeHasher> {
    hasher: Arc<H>,
    options: HashOptions,
    s_progress: Option<mpsc::Sender<ByteCount>>,
}

impl FileHasher<FileRangeHasher> {
    /// CRC-64/XZ over files on disk.
    pub fn new(options: HashOptions) -> Self {
        Self::with_hasher(FileRangeHasher::new(&XZ), options)
    }
}

impl<H: RangeHasher> FileHasher<H> {
    pub fn with_hasher(hasher: H, options: HashOptions) -> Self {
        Self {
            hasher: Arc::new(hasher),
            options,
            s_progress: None,
        }
    }

    /// Reports the size of every buffer hashed, across all workers.
    pub fn with_progress(mut self, s_progress: mpsc::Sender<ByteCount>) -> Self {
        self.s_progress = Some(s_progress);
        self
    }

    pub async fn hash_file(&self, path: impl AsRef<Path>) -> Result<FileChecksum, HashFileError> {
        let path = path.as_ref();
        let size = file_size(path).await?;
        let crc = self.hash_sized(path, size).await?;
        Ok(FileChecksum { crc, size })
    }

    async fn hash_sized(&self, path: &Path, size: u64) -> Result<u64, HashFileError> {
        let max_chunks = self
            .options
            .max_chunks
            .unwrap_or(self.options.max_concurrency);
        let ranges = chunk_plan::plan(size, max_chunks);
        if ranges.is_empty() {
            debug!("{} is empty", path.display());
            return Ok(self.hasher.crc().empty());
        }

        let chunk_count = ranges.len();
        let worker_count = self.options.max_concurrency.clamp(1, WORKER_LIMIT) as usize;
        let worker_count = worker_count.min(chunk_count);
        debug!(
            "hashing {} ({size} bytes) as {chunk_count} chunks with {worker_count} workers",
            path.display()
        );

        let (s_jobs, r_jobs) = async_channel::unbounded::<ChunkRange>();
        let (s_updates, mut r_updates) = mpsc::channel::<ChunkUpdate>(worker_count);

        for range in ranges {
            // unbounded and still open
            s_jobs.try_send(range).ok();
        }
        // workers drain what is queued, then see the channel closed
        s_jobs.close();

        let path: Arc<Path> = Arc::from(path);
        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            workers.spawn(run_hash_worker(
                self.hasher.clone(),
                path.clone(),
                r_jobs.clone(),
                s_updates.clone(),
                self.s_progress.clone(),
                self.options.chunk_timeout,
            ));
        }
        drop(s_updates);

        let mut table = ResultTable::new(chunk_count);
        let mut failure = None;
        loop {
            tokio::select! {
                biased;
                Some(update) = r_updates.recv() => {
                    let ChunkUpdate { range, result } = update;
                    match result {
                        Ok(hash) => {
                            trace!("chunk {} done: {hash:#018x}", range.index);
                            let recorded = table.record(
                                range.index,
                                ChunkResult {
                                    hash,
                                    length: range.byte_count(),
                                },
                            );
                            if !recorded {
                                warn!("ignoring repeated result for chunk {}", range.index);
                            }
                        }
                        Err(source) => {
                            error!(
                                "chunk {} ({}..={}) of {} failed: {source}",
                                range.index,
                                range.start,
                                range.end,
                                path.display()
                            );
                            failure = Some(HashFileError::ChunkRead {
                                index: range.index,
                                start: range.start,
                                end: range.end,
                                source,
                            });
                            break;
                        }
                    }
                }
                Some(joined) = workers.join_next() => {
                    if let Err(e) = joined {
                        error!("hashing worker for {} died: {e}", path.display());
                        failure = Some(HashFileError::WorkerDispatch(e));
                        break;
                    }
                }
                else => break,
            }
        }

        if let Some(e) = failure {
            // stop dispatching and discard whatever is in flight
            while r_jobs.try_recv().is_ok() {}
            workers.abort_all();
            while workers.join_next().await.is_some() {}
            return Err(e);
        }

        let crc = table
            .fold(self.hasher.crc())
            .map_err(|index| HashFileError::MissingChunk { index })?;
        debug!("{}: {crc:#018x}", path.display());
        Ok(crc)
    }
}

/// CRC-64/XZ of the file at `path`, hashed as at most `max_concurrency`
/// chunks in parallel.
pub async fn hash_file(
    path: impl AsRef<Path>,
    max_concurrency: u32,
) -> Result<FileChecksum, HashFileError> {
    FileHasher::new(HashOptions {
        max_concurrency,
        ..HashOptions::default()
    })
    .hash_file(path)
    .await
}

pub async fn file_size(path: &Path) -> Result<u64, HashFileError> {
    let stat_error = |source| HashFileError::Stat {
        path: path.to_owned(),
        source,
    };
    let metadata = tokio::fs::metadata(path).await.map_err(stat_error)?;
    if !metadata.is_file() {
        return Err(stat_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    Ok(metadata.len())
}

async fn run_hash_worker<H: RangeHasher>(
    hasher: Arc<H>,
    path: Arc<Path>,
    r_jobs: async_channel::Receiver<ChunkRange>,
    s_updates: mpsc::Sender<ChunkUpdate>,
    s_progress: Option<mpsc::Sender<ByteCount>>,
    chunk_timeout: Option<Duration>,
) {
    while let Ok(range) = r_jobs.recv().await {
        let job = hasher.hash_range(&path, range, s_progress.clone());
        let result = match chunk_timeout {
            Some(limit) => tokio::time::timeout(limit, job)
                .await
                .unwrap_or_else(|_| {
                    Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no result after {limit:?}"),
                    ))
                }),
            None => job.await,
        };
        if s_updates.send(ChunkUpdate { range, result }).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::crc64::Crc64;

    fn sample(len: usize) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(len as u64);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        data
    }

    fn fixture(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn options(max_concurrency: u32) -> HashOptions {
        HashOptions {
            max_concurrency,
            max_chunks: None,
            chunk_timeout: None,
        }
    }

    /// Hashes from memory, with a per-chunk delay to force a completion order
    /// and optional chunks that fail or panic.
    struct MemoryHasher {
        data: Vec<u8>,
        delays: Vec<Duration>,
        fail_on: Option<u32>,
        panic_on: Option<u32>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl MemoryHasher {
        fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                delays: Vec::new(),
                fail_on: None,
                panic_on: None,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }
    }

    impl RangeHasher for MemoryHasher {
        fn crc(&self) -> &'static Crc64 {
            &XZ
        }

        async fn hash_range(
            &self,
            _path: &Path,
            range: ChunkRange,
            _s_progress: Option<mpsc::Sender<ByteCount>>,
        ) -> io::Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on == Some(range.index) {
                panic!("hasher blew up on chunk {}", range.index);
            }
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(range.index as usize) {
                tokio::time::sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on == Some(range.index) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            Ok(XZ.checksum(&self.data[range.start as usize..=range.end as usize]))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn matches_sequential_hash_for_any_concurrency() {
        let data = sample(100_003);
        let file = fixture(&data);
        let whole = XZ.checksum(&data);

        for max_concurrency in [1, 2, 3, 4, 16, 64] {
            let checksum = hash_file(file.path(), max_concurrency).await.unwrap();
            assert_eq!(checksum.crc, whole, "{max_concurrency} workers");
            assert_eq!(checksum.size, data.len() as u64);
        }
    }

    #[tokio::test]
    async fn check_value_file() {
        let file = fixture(b"123456789");
        let checksum = hash_file(file.path(), 4).await.unwrap();
        assert_eq!(checksum.crc, 0x995d_c9bb_df19_39fa);
        assert_eq!(checksum.hex(), "0x995dc9bbdf1939fa");
        assert_eq!(checksum.decimal(), "11051210869376104954");
        assert_eq!(
            checksum.to_string(),
            "11051210869376104954 0x995dc9bbdf1939fa"
        );
    }

    #[tokio::test]
    async fn empty_file_hashes_to_empty_crc() {
        let file = fixture(b"");
        let checksum = hash_file(file.path(), 8).await.unwrap();
        assert_eq!(checksum, FileChecksum { crc: XZ.empty(), size: 0 });
        assert_eq!(checksum.hex(), "0x0000000000000000");
    }

    #[tokio::test]
    async fn missing_file_is_stat_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_file(dir.path().join("nope"), 4).await.unwrap_err();
        match err {
            HashFileError::Stat { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn directory_is_stat_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_file(dir.path(), 4).await.unwrap_err();
        assert!(matches!(err, HashFileError::Stat { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn completion_order_does_not_change_result() {
        let data = sample(1000);
        let file = fixture(&data);
        let whole = XZ.checksum(&data);

        let forward: Vec<_> = (0..10).map(|i| Duration::from_millis(i * 5)).collect();
        let reverse: Vec<_> = forward.iter().rev().copied().collect();
        let mut rng = StdRng::seed_from_u64(3);
        let random: Vec<_> = (0..10)
            .map(|_| Duration::from_millis(rng.random_range(0..40)))
            .collect();

        for delays in [forward, reverse, random] {
            let hasher = MemoryHasher {
                delays,
                ..MemoryHasher::new(data.clone())
            };
            let checksum = FileHasher::with_hasher(hasher, options(10))
                .hash_file(file.path())
                .await
                .unwrap();
            assert_eq!(checksum.crc, whole);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_failed_chunk_fails_the_file() {
        let data = sample(1000);
        let file = fixture(&data);
        let hasher = MemoryHasher {
            fail_on: Some(7),
            ..MemoryHasher::new(data)
        };

        let err = FileHasher::with_hasher(hasher, options(10))
            .hash_file(file.path())
            .await
            .unwrap_err();
        match err {
            HashFileError::ChunkRead {
                index,
                start,
                end,
                source,
            } => {
                assert_eq!((index, start, end), (7, 700, 799));
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failure_stops_dispatch() {
        let data = sample(1000);
        let file = fixture(&data);
        let mut delays = vec![Duration::from_millis(50); 10];
        delays[0] = Duration::ZERO;
        let hasher = Arc::new(MemoryHasher {
            delays,
            fail_on: Some(0),
            ..MemoryHasher::new(data)
        });

        let file_hasher = FileHasher {
            hasher: hasher.clone(),
            options: HashOptions {
                max_chunks: Some(10),
                ..options(2)
            },
            s_progress: None,
        };
        let err = file_hasher.hash_file(file.path()).await.unwrap_err();
        assert!(matches!(err, HashFileError::ChunkRead { index: 0, .. }));
        assert!(hasher.calls.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_worker_fails_fast() {
        let data = sample(1000);
        let file = fixture(&data);
        let mut delays = vec![Duration::from_millis(50); 10];
        delays[0] = Duration::ZERO;
        let hasher = Arc::new(MemoryHasher {
            delays,
            panic_on: Some(0),
            ..MemoryHasher::new(data)
        });

        let file_hasher = FileHasher {
            hasher: hasher.clone(),
            options: HashOptions {
                max_chunks: Some(10),
                ..options(2)
            },
            s_progress: None,
        };
        let result = file_hasher.hash_file(file.path()).await;
        match result {
            Err(HashFileError::WorkerDispatch(e)) => assert!(e.is_panic()),
            other => panic!("expected a worker failure, got {other:?}"),
        }
        assert!(hasher.calls.load(Ordering::SeqCst) < 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn oversized_concurrency_is_capped() {
        let data = sample(2000);
        let file = fixture(&data);
        let hasher = Arc::new(MemoryHasher {
            delays: vec![Duration::from_millis(2); 2000],
            ..MemoryHasher::new(data.clone())
        });

        let file_hasher = FileHasher {
            hasher: hasher.clone(),
            options: options(100_000),
            s_progress: None,
        };
        let checksum = file_hasher.hash_file(file.path()).await.unwrap();
        assert_eq!(checksum.crc, XZ.checksum(&data));
        // one byte per chunk, far more chunks than workers
        assert_eq!(hasher.calls.load(Ordering::SeqCst), 2000);
        let peak = hasher.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak <= WORKER_LIMIT as usize, "{peak} workers ran at once");
    }

    #[tokio::test]
    async fn slow_chunk_times_out() {
        let data = sample(100);
        let file = fixture(&data);
        let hasher = MemoryHasher {
            delays: vec![Duration::from_secs(30)],
            ..MemoryHasher::new(data)
        };
        let options = HashOptions {
            chunk_timeout: Some(Duration::from_millis(20)),
            ..options(1)
        };

        let err = FileHasher::with_hasher(hasher, options)
            .hash_file(file.path())
            .await
            .unwrap_err();
        match err {
            HashFileError::ChunkRead { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::TimedOut)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn more_chunks_than_workers() {
        let data = sample(10_000);
        let file = fixture(&data);
        let options = HashOptions {
            max_chunks: Some(37),
            ..options(3)
        };
        let checksum = FileHasher::with_hasher(FileRangeHasher::new(&XZ), options)
            .hash_file(file.path())
            .await
            .unwrap();
        assert_eq!(checksum.crc, XZ.checksum(&data));
    }

    #[tokio::test]
    async fn progress_adds_up_to_file_size() {
        let data = sample(50_000);
        let file = fixture(&data);
        let (s_progress, mut r_progress) = mpsc::channel(1024);
        let hasher = FileRangeHasher::new(&XZ).with_buffer_size(4096);

        let checksum = FileHasher::with_hasher(hasher, options(4))
            .with_progress(s_progress)
            .hash_file(file.path())
            .await
            .unwrap();
        assert_eq!(checksum.crc, XZ.checksum(&data));

        let mut total = 0;
        while let Ok(n) = r_progress.try_recv() {
            total += n;
        }
        assert_eq!(total, data.len() as u64);
    }

    #[test]
    fn default_concurrency_is_clamped() {
        let n = default_concurrency() as usize;
        assert!((MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&n));
    }
}
