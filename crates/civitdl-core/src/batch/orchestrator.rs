//! Best-effort execution of a job list.
//!
//! Every job runs to an outcome; a failure is recorded against its job and
//! the rest continue. With more than one worker, jobs run through an
//! ordered buffer so outcomes are reported in list order, and the
//! downloader's destination locks keep two jobs off the same path.

use super::job::BatchJob;
use crate::engine::{Downloader, JobOutcome};
use crate::transfer::DownloadProgress;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, warn, Instrument};

/// Identifies a job to progress consumers.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Zero-based position in the list.
    pub index: usize,
    pub total: usize,
    pub label: String,
}

/// Hands out a progress channel per job.
pub type ProgressFactory =
    Arc<dyn Fn(&JobContext) -> Option<mpsc::Sender<DownloadProgress>> + Send + Sync>;

/// One job's outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub index: usize,
    pub reference: String,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

/// Outcomes of a batch run, in list order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub reports: Vec<JobReport>,
}

impl BatchSummary {
    pub fn failed(&self) -> impl Iterator<Item = &JobReport> {
        self.reports.iter().filter(|r| r.outcome.is_failed())
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.reports.len() - self.failed_count()
    }

    /// 0 when every job succeeded or was skipped, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.failed_count() == 0 {
            0
        } else {
            1
        }
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for report in &self.reports {
            writeln!(f, "[{}] {}: {}", report.index + 1, report.reference, report.outcome)?;
        }
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded_count(),
            self.failed_count()
        )
    }
}

/// Runs jobs through a [`Downloader`].
pub struct BatchOrchestrator {
    downloader: Downloader,
    concurrency: usize,
    progress: Option<ProgressFactory>,
}

impl BatchOrchestrator {
    pub fn new(downloader: Downloader) -> Self {
        Self {
            downloader,
            concurrency: 1,
            progress: None,
        }
    }

    /// Number of jobs allowed in flight (minimum 1).
    pub fn with_concurrency(mut self, jobs: usize) -> Self {
        self.concurrency = jobs.max(1);
        self
    }

    pub fn with_progress(mut self, factory: ProgressFactory) -> Self {
        self.progress = Some(factory);
        self
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub async fn run(&self, jobs: Vec<BatchJob>) -> BatchSummary {
        let total = jobs.len();
        info!(
            "Running {} batch jobs ({} at a time)",
            total, self.concurrency
        );

        let reports = stream::iter(jobs.into_iter().enumerate())
            .map(|(index, job)| self.run_one(index, total, job))
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let summary = BatchSummary { reports };
        info!(
            "Batch finished: {} succeeded, {} failed",
            summary.succeeded_count(),
            summary.failed_count()
        );
        summary
    }

    async fn run_one(&self, index: usize, total: usize, job: BatchJob) -> JobReport {
        let span = info_span!("job", index = index + 1, reference = %job.label);
        async {
            let context = JobContext {
                index,
                total,
                label: job.label.clone(),
            };

            let result = match self.downloader.cancellation().check() {
                Err(cancelled) => Err(cancelled.into()),
                Ok(()) => {
                    let progress = self.progress.as_ref().and_then(|f| f(&context));
                    self.downloader.run_job(&job, progress).await
                }
            };

            let outcome = match result {
                Ok(outcome) => {
                    info!("{}", outcome);
                    outcome
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("Job failed after retries: {}", e);
                    } else {
                        error!("Job failed ({}): {}", e.kind(), e);
                    }
                    JobOutcome::failed(&e)
                }
            };

            JobReport {
                index,
                reference: job.label,
                outcome,
            }
        }
        .instrument(span)
        .await
    }
}
