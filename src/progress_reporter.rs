use std::sync::Arc;
use std::time::Duration;

use circular_buffer::CircularBuffer;

use indicatif::{MultiProgress, ProgressBar, ProgressState, ProgressStyle};

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::shared_types::ByteCount;

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);

type ProgressPoint = (ByteCount, Instant);

/// Draws a bar of bytes hashed so far, fed by the byte counts workers send.
pub struct ProgressReporter {
    r_progress: mpsc::Receiver<ByteCount>,
    total_size: u64,
    label: String,
    multi_progress: MultiProgress,
}

impl ProgressReporter {
    pub fn new(
        r_progress: mpsc::Receiver<ByteCount>,
        total_size: u64,
        label: String,
        multi_progress: MultiProgress,
    ) -> Self {
        Self {
            r_progress,
            total_size,
            label,
            multi_progress,
        }
    }

    /// Runs until every sender is dropped, then finishes the bar with the
    /// average throughput.
    pub fn spawn(self) -> JoinHandle<()> {
        let Self {
            mut r_progress,
            total_size,
            label,
            multi_progress,
        } = self;

        tokio::spawn(async move {
            let mut progress = 0;
            let history = Arc::new(RwLock::new(CircularBuffer::<50, ProgressPoint>::new()));
            let pb = multi_progress.add(ProgressBar::new(total_size));
            pb.set_style(bar_style());
            pb.set_prefix(label);

            let speed_updater = {
                let history = history.clone();
                let pb = pb.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(UPDATE_INTERVAL).await;
                        let q = history.read().await;
                        if let (
                            Some((latest_byte, latest_instant)),
                            Some((oldest_byte, oldest_instant)),
                        ) = (q.back(), q.front())
                        {
                            if latest_byte == oldest_byte {
                                continue;
                            }
                            let elapsed = latest_instant.duration_since(*oldest_instant);
                            let speed = (latest_byte - oldest_byte) as f64 / elapsed.as_secs_f64();
                            pb.set_message(format_speed(speed));
                        }
                    }
                })
            };

            while let Some(chunk_size) = r_progress.recv().await {
                progress += chunk_size;
                pb.set_position(progress);
                history.write().await.push_back((progress, Instant::now()));
            }
            speed_updater.abort();

            let speed = progress as f64 / pb.elapsed().as_secs_f64();
            pb.finish_with_message(format_speed(speed));
        })
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(concat!(
        "{prefix} {spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] ",
        "{bytes}/{total_bytes} ({eta}) ({msg})",
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
        write!(w, "{:.1}s", state.eta().as_secs_f64()).ok();
    })
    .progress_chars("#>-")
}

fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec > 1024.0 * 1024.0 {
        format!("{:.1} MB/s", bytes_per_sec / (1024.0 * 1024.0))
    } else {
        format!("{:.1} kB/s", bytes_per_sec / 1024.0)
    }
}
