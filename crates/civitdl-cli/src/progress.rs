//! Terminal rendering of transfer progress.

use civitdl_core::DownloadProgress;
use indicatif::{HumanBytes, HumanDuration, MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 64;

/// Owns the bars of every transfer in flight.
#[derive(Clone, Default)]
pub struct ProgressRenderer {
    multi: MultiProgress,
}

impl ProgressRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a bar for one transfer and return the sender the core reports to.
    ///
    /// The bar is cleared when the sender is dropped.
    pub fn track(&self, label: &str) -> mpsc::Sender<DownloadProgress> {
        let (tx, mut rx) = mpsc::channel::<DownloadProgress>(CHANNEL_CAPACITY);
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(label.to_string());
        bar.set_message("connecting");
        bar.enable_steady_tick(Duration::from_millis(120));

        tokio::spawn(async move {
            let mut sized = false;
            while let Some(progress) = rx.recv().await {
                if let Some(total) = progress.total_bytes {
                    if !sized {
                        bar.set_style(bar_style());
                        bar.disable_steady_tick();
                        sized = true;
                    }
                    bar.set_length(total);
                }
                bar.set_position(progress.bytes_downloaded);
                bar.set_message(rate_message(&progress));
            }
            bar.finish_and_clear();
        });

        tx
    }

    /// Print a line above the bars without tearing them.
    pub fn println(&self, line: impl AsRef<str>) {
        // hidden targets swallow println
        if self.multi.is_hidden() || self.multi.println(line.as_ref()).is_err() {
            println!("{}", line.as_ref());
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {prefix} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix} [{bar:30.cyan/blue}] {bytes:>9}/{total_bytes:>9} ({percent:>3}%) {msg}",
    )
    .map(|style| style.progress_chars("█▓░"))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// "12.5 MiB/s, ETA 3 minutes"
fn rate_message(progress: &DownloadProgress) -> String {
    let speed = format!("{}/s", HumanBytes(progress.speed_bytes_per_sec as u64));
    match progress.eta_seconds {
        Some(eta) if eta.is_finite() && eta >= 0.0 => {
            format!("{speed}, ETA {}", HumanDuration(Duration::from_secs_f64(eta)))
        }
        _ => speed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_message_with_and_without_eta() {
        let running = DownloadProgress::new(1024, Some(4096), 1024.0);
        let message = rate_message(&running);
        assert!(message.starts_with("1.00 KiB/s"));
        assert!(message.contains("ETA"));

        let unknown_total = DownloadProgress::new(1024, None, 2048.0);
        assert_eq!(rate_message(&unknown_total), "2.00 KiB/s");
    }

    #[tokio::test]
    async fn test_bar_task_ends_when_sender_dropped() {
        let renderer = ProgressRenderer::new();
        let tx = renderer.track("model.safetensors");
        tx.send(DownloadProgress::new(10, Some(100), 5.0))
            .await
            .unwrap();
        drop(tx);
        tokio::task::yield_now().await;
    }
}
