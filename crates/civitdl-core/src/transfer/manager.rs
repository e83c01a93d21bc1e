//! Resumable single-file transfer.
//!
//! Bytes always land in `<destination>.part`. The canonical name appears
//! only by rename, after the size check and the digest check both pass, so
//! a file at the canonical path is never a truncated or corrupt transfer.
//! Transient failures, short bodies and cancellation keep the `.part` for
//! the next attempt to resume; a digest mismatch deletes it.

use super::progress::{DownloadProgress, ProgressReporter};
use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::integrity::compute_digest_async;
use crate::models::DeclaredHash;
use crate::network::{HttpClient, RetryConfig};
use crate::{CivitdlError, Result};
use futures::StreamExt;
use reqwest::{header, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    InProgress(u64),
    Verifying,
    Complete,
    Failed(String),
}

/// What to fetch and where to put it.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub destination: PathBuf,
    pub expected_size: Option<u64>,
    pub declared_hash: Option<DeclaredHash>,
    /// Discard any existing `.part` instead of resuming it.
    pub fresh_start: bool,
}

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub destination: PathBuf,
    /// Final size of the file.
    pub final_size: u64,
    /// Bytes received over the network during this call.
    pub bytes_transferred: u64,
    /// Offset the successful attempt resumed from.
    pub resumed_from: u64,
    pub attempts: u32,
}

/// Path of the in-progress file for `destination`.
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(NetworkConfig::DOWNLOAD_TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Performs transfers with the shared HTTP client and retry policy.
#[derive(Debug, Clone)]
pub struct TransferManager {
    http: HttpClient,
    retry: RetryConfig,
    progress_interval: Duration,
}

impl TransferManager {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            retry: RetryConfig::for_transfer(),
            progress_interval: NetworkConfig::DOWNLOAD_PROGRESS_INTERVAL,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Start tracking one transfer.
    pub fn begin(&self, request: TransferRequest) -> Transfer<'_> {
        Transfer {
            manager: self,
            request,
            state: TransferState::Pending,
        }
    }

    /// Run one transfer to completion.
    pub async fn transfer(
        &self,
        request: TransferRequest,
        progress: Option<mpsc::Sender<DownloadProgress>>,
        cancel: &CancellationToken,
    ) -> Result<TransferReport> {
        self.begin(request).run(progress, cancel).await
    }
}

/// One transfer and its state.
#[derive(Debug)]
pub struct Transfer<'a> {
    manager: &'a TransferManager,
    request: TransferRequest,
    state: TransferState,
}

/// Outcome of one HTTP attempt.
struct AttemptOutcome {
    bytes_received: u64,
    resumed_from: u64,
}

impl Transfer<'_> {
    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub async fn run(
        &mut self,
        progress: Option<mpsc::Sender<DownloadProgress>>,
        cancel: &CancellationToken,
    ) -> Result<TransferReport> {
        let result = self.run_inner(progress, cancel).await;
        if let Err(e) = &result {
            self.state = TransferState::Failed(e.to_string());
        }
        result
    }

    async fn run_inner(
        &mut self,
        progress: Option<mpsc::Sender<DownloadProgress>>,
        cancel: &CancellationToken,
    ) -> Result<TransferReport> {
        let destination = self.request.destination.clone();
        let part = part_path(&destination);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CivitdlError::io_with_path(e, parent))?;
        }
        if self.request.fresh_start {
            remove_if_exists(&part).await?;
        }

        let mut reporter = ProgressReporter::new(
            progress,
            self.request.expected_size,
            self.manager.progress_interval,
        );
        let manager = self.manager;
        let retry = &manager.retry;
        let bytes_transferred;
        let resumed_from;
        let mut attempts = 0u32;

        loop {
            cancel.check()?;
            attempts += 1;

            let existing = part_size(&part).await?;
            let outcome = match self.request.expected_size {
                Some(expected) if existing == expected => {
                    debug!("{} already holds all {} bytes", part.display(), expected);
                    Ok(AttemptOutcome {
                        bytes_received: 0,
                        resumed_from: existing,
                    })
                }
                Some(expected) if existing > expected => {
                    warn!(
                        "{} is larger than the declared size ({} > {}), restarting",
                        part.display(),
                        existing,
                        expected
                    );
                    remove_if_exists(&part).await?;
                    self.attempt(&part, 0, &mut reporter, cancel).await
                }
                _ => self.attempt(&part, existing, &mut reporter, cancel).await,
            };

            match outcome {
                Ok(outcome) => {
                    bytes_transferred = outcome.bytes_received;
                    resumed_from = outcome.resumed_from;
                    break;
                }
                Err(e) if e.is_retryable() && attempts < retry.max_attempts => {
                    let delay = retry.calculate_delay(attempts - 1);
                    warn!(
                        "Transfer attempt {}/{} failed: {} (retrying in {:?})",
                        attempts, retry.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        let final_size = part_size(&part).await?;
        reporter.finish(final_size).await;
        if let Some(expected) = self.request.expected_size {
            if final_size != expected {
                return Err(CivitdlError::TransferIncomplete {
                    expected,
                    actual: final_size,
                });
            }
        }

        self.state = TransferState::Verifying;
        if let Some(declared) = &self.request.declared_hash {
            let actual = compute_digest_async(part.clone(), declared.algorithm).await?;
            if !declared.matches(&actual) {
                remove_if_exists(&part).await?;
                return Err(CivitdlError::CorruptTransfer {
                    path: destination,
                    expected: declared.to_string(),
                    actual: format!("{}:{}", declared.algorithm, actual),
                });
            }
            debug!("Verified {} {}", declared.algorithm, actual);
        }

        promote(&part, &destination).await?;
        self.state = TransferState::Complete;
        info!(
            "Saved {} ({} bytes, {} transferred)",
            destination.display(),
            final_size,
            bytes_transferred
        );

        Ok(TransferReport {
            destination,
            final_size,
            bytes_transferred,
            resumed_from,
            attempts,
        })
    }

    /// One HTTP request, appending to or recreating the `.part` file.
    async fn attempt(
        &mut self,
        part: &Path,
        resume_from: u64,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome> {
        let url = self.request.url.as_str();
        let manager = self.manager;
        let mut request = manager.http.download_get(url);
        if resume_from > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", resume_from));
            info!("Resuming download from byte {}", resume_from);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CivitdlError::TransferCancelled),
            response = request.send() => {
                response.map_err(|e| CivitdlError::transfer_network(url, e))?
            }
        };
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE && resume_from > 0 {
            warn!("Server rejected resume offset {}, restarting from zero", resume_from);
            remove_if_exists(part).await?;
            return Err(CivitdlError::TransientTransfer {
                url: url.to_string(),
                message: "range not satisfiable".into(),
            });
        }
        if !status.is_success() {
            return Err(classify_download_status(status, url));
        }

        let is_resuming = resume_from > 0 && status == StatusCode::PARTIAL_CONTENT;
        if resume_from > 0 && !is_resuming {
            warn!("Server does not support Range requests, restarting from zero");
        }
        let offset = if is_resuming { resume_from } else { 0 };

        if self.request.expected_size.is_none() {
            reporter.set_total(response.content_length().map(|len| len + offset));
        }

        let mut file = if is_resuming {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(part)
                .await
                .map_err(|e| CivitdlError::io_with_path(e, part))?
        } else {
            tokio::fs::File::create(part)
                .await
                .map_err(|e| CivitdlError::io_with_path(e, part))?
        };

        let mut position = offset;
        let mut received = 0u64;
        self.state = TransferState::InProgress(position);
        reporter.update(position).await;

        let mut stream = response.bytes_stream();
        loop {
            // a stalled body must not outlive a cancel request
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = stream.next() => Some(next),
            };

            let chunk = match next {
                None => {
                    file.flush()
                        .await
                        .map_err(|e| CivitdlError::io_with_path(e, part))?;
                    info!("Transfer cancelled at byte {}, keeping {}", position, part.display());
                    return Err(CivitdlError::TransferCancelled);
                }
                Some(None) => break,
                Some(Some(Ok(chunk))) => chunk,
                Some(Some(Err(e))) => {
                    file.flush()
                        .await
                        .map_err(|e| CivitdlError::io_with_path(e, part))?;
                    return Err(CivitdlError::transfer_network(url, e));
                }
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| CivitdlError::io_with_path(e, part))?;
            position += chunk.len() as u64;
            received += chunk.len() as u64;
            reporter.record_network_bytes(chunk.len() as u64);
            self.state = TransferState::InProgress(position);
            reporter.update(position).await;
        }

        file.flush()
            .await
            .map_err(|e| CivitdlError::io_with_path(e, part))?;
        file.sync_all()
            .await
            .map_err(|e| CivitdlError::io_with_path(e, part))?;

        Ok(AttemptOutcome {
            bytes_received: received,
            resumed_from: offset,
        })
    }
}

fn classify_download_status(status: StatusCode, url: &str) -> CivitdlError {
    match status.as_u16() {
        401 | 403 => CivitdlError::AuthRequired {
            message: format!("download refused (HTTP {})", status.as_u16()),
        },
        404 | 410 => CivitdlError::NotFound {
            reference: url.to_string(),
        },
        _ => CivitdlError::TransientTransfer {
            url: url.to_string(),
            message: format!("HTTP {}", status),
        },
    }
}

async fn part_size(part: &Path) -> Result<u64> {
    match tokio::fs::metadata(part).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(CivitdlError::io_with_path(e, part)),
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CivitdlError::io_with_path(e, path)),
    }
}

/// Rename the verified `.part` onto the canonical name.
async fn promote(part: &Path, destination: &Path) -> Result<()> {
    if let Err(first) = tokio::fs::rename(part, destination).await {
        // rename does not replace an existing file on every platform
        if tokio::fs::try_exists(destination).await.unwrap_or(false) {
            remove_if_exists(destination).await?;
            tokio::fs::rename(part, destination)
                .await
                .map_err(|e| CivitdlError::io_with_path(e, destination))?;
        } else {
            return Err(CivitdlError::io_with_path(first, destination));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/comfy/models/loras/x.safetensors")),
            PathBuf::from("/comfy/models/loras/x.safetensors.part")
        );
    }

    #[test]
    fn test_download_status_classification() {
        let url = "https://civitai.com/api/download/models/1";
        assert_eq!(
            classify_download_status(StatusCode::UNAUTHORIZED, url).kind(),
            "AuthRequired"
        );
        assert_eq!(
            classify_download_status(StatusCode::NOT_FOUND, url).kind(),
            "NotFound"
        );
        assert!(classify_download_status(StatusCode::BAD_GATEWAY, url).is_retryable());
    }

    #[tokio::test]
    async fn test_complete_part_is_promoted_without_request() {
        let temp = tempfile::TempDir::new().unwrap();
        let destination = temp.path().join("model.safetensors");
        std::fs::write(part_path(&destination), b"abcd").unwrap();

        let manager = TransferManager::new(HttpClient::new(None).unwrap());
        let request = TransferRequest {
            // unroutable: any request would fail
            url: "http://127.0.0.1:9/never".into(),
            destination: destination.clone(),
            expected_size: Some(4),
            declared_hash: None,
            fresh_start: false,
        };
        let mut transfer = manager.begin(request);
        let report = transfer
            .run(None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transfer.state(), &TransferState::Complete);
        assert_eq!(report.bytes_transferred, 0);
        assert_eq!(std::fs::read(&destination).unwrap(), b"abcd");
        assert!(!part_path(&destination).exists());
    }

    #[tokio::test]
    async fn test_corrupt_part_is_deleted() {
        let temp = tempfile::TempDir::new().unwrap();
        let destination = temp.path().join("model.safetensors");
        std::fs::write(part_path(&destination), b"abcd").unwrap();

        let manager = TransferManager::new(HttpClient::new(None).unwrap());
        let request = TransferRequest {
            url: "http://127.0.0.1:9/never".into(),
            destination: destination.clone(),
            expected_size: Some(4),
            declared_hash: Some(DeclaredHash::new(
                crate::models::HashAlgorithm::Sha256,
                "00".repeat(32),
            )),
            fresh_start: false,
        };
        let mut transfer = manager.begin(request);
        let err = transfer
            .run(None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "CorruptTransfer");
        assert!(matches!(transfer.state(), TransferState::Failed(_)));
        assert!(!part_path(&destination).exists());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let temp = tempfile::TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let manager = TransferManager::new(HttpClient::new(None).unwrap());
        let err = manager
            .transfer(
                TransferRequest {
                    url: "http://127.0.0.1:9/never".into(),
                    destination: temp.path().join("x.bin"),
                    expected_size: None,
                    declared_hash: None,
                    fresh_start: false,
                },
                None,
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TransferCancelled");
    }
}
