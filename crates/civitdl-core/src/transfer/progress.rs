//! Transfer progress reporting.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Progress information for a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Bytes of the file present so far, including resumed bytes.
    pub bytes_downloaded: u64,
    /// Total bytes (if known).
    pub total_bytes: Option<u64>,
    /// Transfer speed in bytes per second for this run.
    pub speed_bytes_per_sec: f64,
    /// Percentage complete (0-100).
    pub percent: Option<f64>,
    /// Estimated time remaining in seconds.
    pub eta_seconds: Option<f64>,
}

impl DownloadProgress {
    pub fn new(bytes_downloaded: u64, total_bytes: Option<u64>, speed: f64) -> Self {
        let percent = total_bytes.map(|total| {
            if total > 0 {
                (bytes_downloaded as f64 / total as f64) * 100.0
            } else {
                0.0
            }
        });

        let eta_seconds = total_bytes.and_then(|total| {
            if speed > 0.0 && bytes_downloaded < total {
                Some((total - bytes_downloaded) as f64 / speed)
            } else {
                None
            }
        });

        Self {
            bytes_downloaded,
            total_bytes,
            speed_bytes_per_sec: speed,
            percent,
            eta_seconds,
        }
    }
}

/// Average speed since the tracker was created.
struct SpeedTracker {
    start_time: Instant,
    bytes: u64,
}

impl SpeedTracker {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            bytes: 0,
        }
    }

    fn record(&mut self, bytes: u64) {
        self.bytes += bytes;
    }

    fn speed(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.bytes as f64 / elapsed
        } else {
            0.0
        }
    }
}

/// Throttled, monotonic progress sender for one transfer.
///
/// A restart from byte zero (server ignored the range request) never makes
/// the reported count go backwards: reports are held at the high-water mark
/// until the new stream catches up.
pub(crate) struct ProgressReporter {
    tx: Option<mpsc::Sender<DownloadProgress>>,
    total: Option<u64>,
    interval: Duration,
    last_emit: Option<Instant>,
    high_water: u64,
    speed: SpeedTracker,
}

impl ProgressReporter {
    pub fn new(
        tx: Option<mpsc::Sender<DownloadProgress>>,
        total: Option<u64>,
        interval: Duration,
    ) -> Self {
        Self {
            tx,
            total,
            interval,
            last_emit: None,
            high_water: 0,
            speed: SpeedTracker::new(),
        }
    }

    pub fn set_total(&mut self, total: Option<u64>) {
        if total.is_some() {
            self.total = total;
        }
    }

    pub fn record_network_bytes(&mut self, bytes: u64) {
        self.speed.record(bytes);
    }

    /// Report `position`, rate-limited to the configured interval.
    pub async fn update(&mut self, position: u64) {
        let due = self
            .last_emit
            .map(|t| t.elapsed() >= self.interval)
            .unwrap_or(true);
        if due {
            self.emit(position).await;
        }
    }

    /// Report `position` unconditionally.
    pub async fn finish(&mut self, position: u64) {
        self.emit(position).await;
    }

    async fn emit(&mut self, position: u64) {
        self.high_water = self.high_water.max(position);
        self.last_emit = Some(Instant::now());
        if let Some(tx) = &self.tx {
            let progress = DownloadProgress::new(self.high_water, self.total, self.speed.speed());
            let _ = tx.send(progress).await;
        }
    }
}
