use crate::common::TransferError;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

pub type Sha256Digest = [u8; 32];

/// Incremental SHA-256 over plaintext, independent of chunk boundaries
#[derive(Clone, Default)]
pub struct ContentHasher {
    hasher: Sha256,
    bytes: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> Sha256Digest {
        self.hasher.finalize().into()
    }
}

pub fn digest_bytes(data: &[u8]) -> Sha256Digest {
    Sha256::digest(data).into()
}

/// Compare the digest of the reassembled file to the one agreed in the manifest
pub fn verify_digest(
    file_index: u32,
    actual: &Sha256Digest,
    expected: &Sha256Digest,
) -> Result<(), TransferError> {
    if actual != expected {
        return Err(TransferError::IntegrityMismatch {
            file_index,
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        });
    }
    Ok(())
}

pub async fn calculate_file_hash(path: &Path) -> Result<Sha256Digest, std::io::Error> {
    let mut file = File::open(path).await?;
    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

pub fn parse_hex_digest(encoded: &str) -> Result<Sha256Digest, TransferError> {
    let mut digest = [0u8; 32];
    hex::decode_to_slice(encoded, &mut digest)
        .map_err(|e| TransferError::protocol(format!("invalid sha256 digest: {e}")))?;
    Ok(digest)
}
