//! Content integrity: streaming digests and local-state classification.

mod hashing;
mod verifier;

pub use hashing::{compute_digest, compute_digest_async, hasher_for, StreamingHasher};
pub use verifier::{
    classify_version, verify_file, FileCheck, LocalCandidate, LocalState, VersionStatus,
};
