//! Ordered reassembly of chunks that arrive in any order.
//!
//! Chunks ahead of the contiguous frontier are held back; everything up to the
//! frontier is flushed to the sink and hashed in index order, so the digest
//! covers exactly the bytes the sink received.

use crate::common::TransferError;
use crate::crypto::{hash::verify_digest, ContentHasher, Sha256Digest};
use crate::transfer::sink::PlaintextSink;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestStatus {
    Unverified,
    Verified,
}

/// Reassembled file, owned by the caller once handed off
#[derive(Debug)]
pub struct TransferResult<O> {
    pub file_index: u32,
    pub output: O,
    pub digest: Sha256Digest,
    pub size: u64,
    pub status: DigestStatus,
}

impl<O> TransferResult<O> {
    pub fn is_verified(&self) -> bool {
        self.status == DigestStatus::Verified
    }
}

/// All chunks placed and hashed, output not yet released
pub struct Assembled<S> {
    file_index: u32,
    sink: S,
    digest: Sha256Digest,
    size: u64,
}

impl<S: PlaintextSink> Assembled<S> {
    pub fn digest(&self) -> &Sha256Digest {
        &self.digest
    }

    /// Verify against the expected digest, then finalize. A mismatch aborts the sink.
    pub async fn verify(
        self,
        expected: &Sha256Digest,
    ) -> Result<TransferResult<S::Output>, TransferError> {
        if let Err(err) = verify_digest(self.file_index, &self.digest, expected) {
            tracing::error!(file_index = self.file_index, error = %err, "digest mismatch");
            self.sink.abort().await;
            return Err(err);
        }
        self.release(DigestStatus::Verified).await
    }

    /// Release without a reference digest (framed stream without one)
    pub async fn release_unverified(self) -> Result<TransferResult<S::Output>, TransferError> {
        self.release(DigestStatus::Unverified).await
    }

    pub async fn abort(self) {
        self.sink.abort().await;
    }

    async fn release(
        self,
        status: DigestStatus,
    ) -> Result<TransferResult<S::Output>, TransferError> {
        let output = self.sink.finalize().await?;
        Ok(TransferResult {
            file_index: self.file_index,
            output,
            digest: self.digest,
            size: self.size,
            status,
        })
    }
}

pub struct Reassembler<S> {
    file_index: u32,
    /// `None` for a sequential stream whose length is unknown up front
    total_chunks: Option<u32>,
    next_index: u32,
    pending: BTreeMap<u32, Vec<u8>>,
    hasher: ContentHasher,
    sink: S,
}

impl<S: PlaintextSink> Reassembler<S> {
    pub fn new(file_index: u32, total_chunks: u32, sink: S) -> Self {
        Self {
            file_index,
            total_chunks: Some(total_chunks),
            next_index: 0,
            pending: BTreeMap::new(),
            hasher: ContentHasher::new(),
            sink,
        }
    }

    /// Sequential mode: chunks must arrive strictly in order, count unknown
    pub fn sequential(file_index: u32, sink: S) -> Self {
        Self {
            file_index,
            total_chunks: None,
            next_index: 0,
            pending: BTreeMap::new(),
            hasher: ContentHasher::new(),
            sink,
        }
    }

    pub fn total_chunks(&self) -> Option<u32> {
        self.total_chunks
    }

    /// Number of chunks flushed so far
    pub fn flushed(&self) -> u32 {
        self.next_index
    }

    /// Chunks held back waiting for an earlier index
    pub fn held(&self) -> usize {
        self.pending.len()
    }

    pub fn is_complete(&self) -> bool {
        match self.total_chunks {
            Some(total) => self.next_index == total,
            None => self.pending.is_empty(),
        }
    }

    /// Place one decrypted chunk. Duplicate and out-of-range indices are rejected.
    pub async fn accept(&mut self, index: u32, plaintext: Vec<u8>) -> Result<(), TransferError> {
        match self.total_chunks {
            Some(total) if index >= total => {
                return Err(TransferError::protocol(format!(
                    "chunk {index} out of range for file {} ({total} chunks)",
                    self.file_index
                )));
            }
            None if index > self.next_index => {
                return Err(TransferError::protocol(format!(
                    "frame {index} out of order for file {}, expected {}",
                    self.file_index, self.next_index
                )));
            }
            _ => {}
        }
        if index < self.next_index || self.pending.contains_key(&index) {
            return Err(TransferError::protocol(format!(
                "duplicate chunk {index} for file {}",
                self.file_index
            )));
        }

        if index != self.next_index {
            self.pending.insert(index, plaintext);
            return Ok(());
        }

        self.flush(plaintext).await?;
        while let Some(next) = self.pending.remove(&self.next_index) {
            self.flush(next).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, chunk: Vec<u8>) -> Result<(), TransferError> {
        self.sink.write_chunk(&chunk).await?;
        self.hasher.update(&chunk);
        self.next_index += 1;
        Ok(())
    }

    /// Every slot must be filled; a gap is a protocol violation and aborts the sink
    pub async fn finish(self) -> Result<Assembled<S>, TransferError> {
        if !self.is_complete() {
            let missing = self.next_index;
            let file_index = self.file_index;
            self.sink.abort().await;
            return Err(TransferError::protocol(format!(
                "file {file_index} incomplete: chunk {missing} missing"
            )));
        }

        let size = self.hasher.bytes_hashed();
        Ok(Assembled {
            file_index: self.file_index,
            sink: self.sink,
            digest: self.hasher.finalize(),
            size,
        })
    }

    pub async fn abort(self) {
        self.sink.abort().await;
    }
}
