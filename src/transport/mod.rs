//! Boundary to the relay. The engine only ever talks to these traits; the
//! relay's routing and storage live on the other side.

pub mod http;

use crate::common::{Manifest, TransferError};
use crate::crypto::Sha256Digest;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

pub use http::HttpTransport;

/// Encrypted frame stream for framed-stream uploads
pub type FrameStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Byte reader over a framed-stream download body
pub type StreamBody = Box<dyn AsyncRead + Send + Unpin>;

/// Opened framed-stream download
pub struct StreamDownload {
    pub body: StreamBody,
    /// Plaintext digest announced by the sender, if the relay passed one on
    pub sha256: Option<Sha256Digest>,
}

/// One encrypted chunk plus the metadata the receiver needs to place it
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub file_index: u32,
    pub relative_path: String,
    pub file_name: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub file_size: u64,
    /// Base nonce, sent with chunk 0 only
    pub nonce: Option<String>,
    pub data: Bytes,
}

#[async_trait]
pub trait DownloadTransport: Send + Sync {
    async fn fetch_manifest(&self) -> Result<Manifest, TransferError>;

    /// Ciphertext (with tag) of one chunk
    async fn fetch_chunk(&self, file_index: u32, chunk_index: u32) -> Result<Bytes, TransferError>;

    /// Whole-payload framed stream
    async fn open_stream(&self) -> Result<StreamDownload, TransferError>;

    async fn complete(&self) -> Result<(), TransferError>;
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn send_manifest(&self, manifest: &Manifest) -> Result<(), TransferError>;

    async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<(), TransferError>;

    /// `sha256` covers the plaintext and travels next to the body
    async fn upload_stream(
        &self,
        file_name: &str,
        sha256: &Sha256Digest,
        body: FrameStream,
    ) -> Result<(), TransferError>;

    /// Receiver merges the chunks of one file
    async fn finalize_file(&self, relative_path: &str) -> Result<(), TransferError>;

    /// Whole manifest done
    async fn complete(&self) -> Result<(), TransferError>;
}
