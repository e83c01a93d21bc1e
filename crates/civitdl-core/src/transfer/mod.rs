//! Resumable byte-range transfer.
//!
//! # Module Organization
//!
//! - [`manager`] - single-file transfer with resume, retry and verification
//! - [`progress`] - progress records and throttled reporting
//! - [`locks`] - destination-path locks for concurrent jobs

mod locks;
mod manager;
mod progress;

pub use locks::{DestinationGuard, DestinationLocks};
pub use manager::{
    part_path, Transfer, TransferManager, TransferReport, TransferRequest, TransferState,
};
pub use progress::DownloadProgress;
