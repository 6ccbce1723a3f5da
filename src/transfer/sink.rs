//! Destinations for reassembled plaintext.
//!
//! A sink receives bytes in file order. Nothing written is trustworthy until
//! `finalize`; `abort` discards whatever was flushed so far.

use crate::common::TransferError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait PlaintextSink: Send {
    type Output: Send;

    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError>;

    /// Called only after the digest has been verified
    async fn finalize(self) -> Result<Self::Output, TransferError>;

    async fn abort(self);
}

/// Collects the whole file in memory
#[derive(Default)]
pub struct MemorySink {
    buf: BytesMut,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }
}

#[async_trait]
impl PlaintextSink for MemorySink {
    type Output = Bytes;

    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    async fn finalize(self) -> Result<Bytes, TransferError> {
        Ok(self.buf.freeze())
    }

    async fn abort(self) {}
}

/// Progressive disk write into `<target>.part`, renamed into place on finalize
pub struct FileSink {
    target: PathBuf,
    part_path: PathBuf,
    file: File,
    written: u64,
}

impl FileSink {
    pub async fn create(target: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let target = target.into();
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let part_path = part_path_for(&target);
        let file = File::create(&part_path).await?;

        Ok(Self {
            target,
            part_path,
            file,
            written: 0,
        })
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl PlaintextSink for FileSink {
    type Output = PathBuf;

    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn finalize(mut self) -> Result<PathBuf, TransferError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        fs::rename(&self.part_path, &self.target).await?;
        tracing::debug!(path = %self.target.display(), bytes = self.written, "file finalized");
        Ok(self.target)
    }

    async fn abort(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.part_path).await {
            tracing::warn!(
                path = %self.part_path.display(),
                error = %e,
                "failed to discard partial file"
            );
        }
    }
}

fn part_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}
