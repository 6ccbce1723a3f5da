use super::{ChunkUpload, DownloadTransport, FrameStream, StreamDownload, UploadTransport};
use crate::common::{Manifest, TransferConfig, TransferError};
use crate::credentials::{relay_url, LinkMode, TransferCredentials};
use crate::crypto::{hash::parse_hex_digest, Sha256Digest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{multipart, Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio_util::io::StreamReader;

pub const LOCK_TOKEN_HEADER: &str = "X-Lock-Token";
pub const FILE_NAME_HEADER: &str = "X-File-Name";
pub const CONTENT_SHA256_HEADER: &str = "X-Content-Sha256";

/// Manifest payload plus lock token for authenticated chunk requests
#[derive(Deserialize)]
struct ManifestResponse {
    #[serde(flatten)]
    manifest: Manifest,
    #[serde(rename = "lockToken")]
    lock_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeRequest<'a> {
    relative_path: &'a str,
}

/// reqwest client for the relay's `/send/<token>` and `/receive/<token>` routes
pub struct HttpTransport {
    client: Client,
    origin: Url,
    mode: LinkMode,
    token: String,
    lock_token: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(
        origin: Url,
        mode: LinkMode,
        token: impl Into<String>,
        config: &TransferConfig,
    ) -> Result<Self, TransferError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            // connect and idle-read bounds only: a stream body may run for as
            // long as it keeps moving, chunk attempts are bounded by RetryPolicy
            builder = builder.connect_timeout(timeout).read_timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            origin,
            mode,
            token: token.into(),
            lock_token: RwLock::new(None),
        })
    }

    /// Only the fragment-free parts of the link reach the transport
    pub fn from_credentials(
        creds: &TransferCredentials,
        config: &TransferConfig,
    ) -> Result<Self, TransferError> {
        Self::new(creds.origin.clone(), creds.mode, creds.token.clone(), config)
    }

    fn url(&self, extra: &[&str]) -> Url {
        relay_url(&self.origin, self.mode, &self.token, extra)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.bearer_auth(&self.token);
        let lock_token = self
            .lock_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match lock_token {
            Some(lock) => request.header(LOCK_TOKEN_HEADER, lock),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransferError> {
        let response = self.authed(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::HttpStatus {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl DownloadTransport for HttpTransport {
    async fn fetch_manifest(&self) -> Result<Manifest, TransferError> {
        let response = self.send(self.client.get(self.url(&["manifest"]))).await?;
        let body: ManifestResponse = response
            .json()
            .await
            .map_err(|e| TransferError::protocol(format!("malformed manifest: {e}")))?;

        if let Some(lock) = body.lock_token {
            *self.lock_token.write().unwrap_or_else(|e| e.into_inner()) = Some(lock);
        }
        Ok(body.manifest)
    }

    async fn fetch_chunk(&self, file_index: u32, chunk_index: u32) -> Result<Bytes, TransferError> {
        let (file, chunk) = (file_index.to_string(), chunk_index.to_string());
        let url = self.url(&[file.as_str(), "chunk", chunk.as_str()]);
        let response = self.send(self.client.get(url)).await?;
        Ok(response.bytes().await?)
    }

    async fn open_stream(&self) -> Result<StreamDownload, TransferError> {
        let response = self.send(self.client.get(self.url(&["data"]))).await?;
        let sha256 = match response.headers().get(CONTENT_SHA256_HEADER) {
            Some(value) => {
                let value = value.to_str().map_err(|_| {
                    TransferError::protocol(format!("{CONTENT_SHA256_HEADER} is not ASCII"))
                })?;
                Some(parse_hex_digest(value)?)
            }
            None => None,
        };
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(StreamDownload {
            body: Box::new(StreamReader::new(Box::pin(stream))),
            sha256,
        })
    }

    async fn complete(&self) -> Result<(), TransferError> {
        self.send(self.client.post(self.url(&["complete"]))).await?;
        Ok(())
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn send_manifest(&self, manifest: &Manifest) -> Result<(), TransferError> {
        self.send(self.client.post(self.url(&["manifest"])).json(manifest))
            .await?;
        Ok(())
    }

    async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<(), TransferError> {
        let len = chunk.data.len() as u64;
        let mut form = multipart::Form::new()
            .part(
                "chunk",
                multipart::Part::stream_with_length(reqwest::Body::from(chunk.data), len)
                    .file_name(chunk.file_name.clone()),
            )
            .text("relativePath", chunk.relative_path)
            .text("fileName", chunk.file_name)
            .text("chunkIndex", chunk.chunk_index.to_string())
            .text("totalChunks", chunk.total_chunks.to_string())
            .text("fileSize", chunk.file_size.to_string());
        if let Some(nonce) = chunk.nonce {
            form = form.text("nonce", nonce);
        }

        self.send(self.client.post(self.url(&["chunk"])).multipart(form))
            .await?;
        Ok(())
    }

    async fn upload_stream(
        &self,
        file_name: &str,
        sha256: &Sha256Digest,
        body: FrameStream,
    ) -> Result<(), TransferError> {
        let request = self
            .client
            .post(self.url(&["stream"]))
            .header(FILE_NAME_HEADER, file_name)
            .header(CONTENT_SHA256_HEADER, hex::encode(sha256))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(body));
        self.send(request).await?;
        Ok(())
    }

    async fn finalize_file(&self, relative_path: &str) -> Result<(), TransferError> {
        let request = self
            .client
            .post(self.url(&["finalize"]))
            .json(&FinalizeRequest { relative_path });
        self.send(request).await?;
        Ok(())
    }

    async fn complete(&self) -> Result<(), TransferError> {
        self.send(self.client.post(self.url(&["complete"]))).await?;
        Ok(())
    }
}
