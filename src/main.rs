#[macro_use]
extern crate log;

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use tokio::sync::mpsc;

use crc64_split::file_hasher::{file_size, WORKER_LIMIT};
use crc64_split::progress_reporter::ProgressReporter;
use crc64_split::{default_concurrency, ByteCount, FileHasher, HashOptions};

/// Print the CRC-64/XZ of each file, in decimal and hex.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Files to checksum
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Hash each file as this many chunks in parallel
    #[arg(
        short,
        long,
        default_value_t = default_concurrency(),
        value_parser = clap::value_parser!(u32).range(1..=WORKER_LIMIT as i64),
    )]
    threads: u32,

    /// Fail a chunk that takes longer than this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Show a progress bar per file
    #[arg(short, long)]
    progress: bool,

    /// Log more; repeat for debug and trace output
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8, multi: MultiProgress) -> Result<(), Box<dyn Error>> {
    let level = match verbosity {
        0 => simplelog::LevelFilter::Warn,
        1 => simplelog::LevelFilter::Info,
        2 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let logger = simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    );
    LogWrapper::new(multi, *logger).try_init()?;
    log::set_max_level(level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();
    let multi = MultiProgress::new();
    init_logging(args.verbose, multi.clone())?;

    let options = HashOptions {
        max_concurrency: args.threads,
        chunk_timeout: args.timeout.map(Duration::from_secs),
        ..HashOptions::default()
    };
    info!("hashing with up to {} workers per file", options.max_concurrency);

    for path in &args.paths {
        let mut hasher = FileHasher::new(options.clone());
        let mut reporter = None;
        if args.progress {
            let (s_progress, r_progress) = mpsc::channel::<ByteCount>(1024);
            let total_size = file_size(path).await?;
            reporter = Some(
                ProgressReporter::new(
                    r_progress,
                    total_size,
                    path.display().to_string(),
                    multi.clone(),
                )
                .spawn(),
            );
            hasher = hasher.with_progress(s_progress);
        }

        let result = hasher.hash_file(path).await;
        // closes the progress channel
        drop(hasher);
        if let Some(reporter) = reporter {
            reporter.await?;
        }

        match result {
            Ok(checksum) => {
                println!("{} {} {}", checksum.decimal(), checksum.hex(), path.display())
            }
            Err(e) => {
                error!("{}: {e}", path.display());
                return Err(e.into());
            }
        }
    }

    Ok(())
}
