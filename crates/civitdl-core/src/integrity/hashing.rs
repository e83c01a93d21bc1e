//! Streaming digest computation.
//!
//! Every supported algorithm sits behind [`StreamingHasher`] and is looked
//! up by [`HashAlgorithm`], so the verifier honors whatever tag the catalog
//! published. Files are read in fixed 8MB chunks; memory use does not grow
//! with file size.

use crate::config::HashConfig;
use crate::models::HashAlgorithm;
use crate::{CivitdlError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

/// AutoV2 digests are the leading 10 hex characters of SHA256.
const AUTOV2_LEN: usize = 10;

/// Incremental digest over a byte stream.
pub trait StreamingHasher: Send {
    fn update(&mut self, data: &[u8]);

    /// Consume the hasher and return the lowercase hex digest.
    fn finalize_hex(self: Box<Self>) -> String;
}

struct Sha256Hasher(Sha256);

impl StreamingHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize_hex(self: Box<Self>) -> String {
        hex::encode(self.0.finalize())
    }
}

struct Blake3Hasher(blake3::Hasher);

impl StreamingHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize_hex(self: Box<Self>) -> String {
        self.0.finalize().to_hex().to_string()
    }
}

struct AutoV2Hasher(Sha256);

impl StreamingHasher for AutoV2Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize_hex(self: Box<Self>) -> String {
        let mut digest = hex::encode(self.0.finalize());
        digest.truncate(AUTOV2_LEN);
        digest
    }
}

/// Create a fresh hasher for `algorithm`.
pub fn hasher_for(algorithm: HashAlgorithm) -> Box<dyn StreamingHasher> {
    match algorithm {
        HashAlgorithm::Sha256 => Box::new(Sha256Hasher(Sha256::new())),
        HashAlgorithm::Blake3 => Box::new(Blake3Hasher(blake3::Hasher::new())),
        HashAlgorithm::AutoV2 => Box::new(AutoV2Hasher(Sha256::new())),
    }
}

/// Hash a file with `algorithm`, reading it in bounded chunks.
pub fn compute_digest(path: impl AsRef<Path>, algorithm: HashAlgorithm) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| CivitdlError::io_with_path(e, path))?;

    let mut hasher = hasher_for(algorithm);
    let mut buffer = vec![0u8; HashConfig::CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| CivitdlError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize_hex())
}

/// [`compute_digest`] on the blocking pool.
pub async fn compute_digest_async(path: PathBuf, algorithm: HashAlgorithm) -> Result<String> {
    tokio::task::spawn_blocking(move || compute_digest(&path, algorithm))
        .await
        .map_err(|e| CivitdlError::Other(format!("Hash computation task failed: {}", e)))?
}
