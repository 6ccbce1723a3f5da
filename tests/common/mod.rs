#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chunkdrop::common::{Manifest, TransferConfig, TransferError};
use chunkdrop::crypto::Sha256Digest;
use chunkdrop::transport::{
    ChunkUpload, DownloadTransport, FrameStream, StreamDownload, UploadTransport,
};
use futures::TryStreamExt;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

pub const CHUNK_SIZE: u64 = 1024;

pub fn test_config() -> TransferConfig {
    TransferConfig {
        chunk_size: CHUNK_SIZE,
        concurrency: 8,
        max_attempts: 3,
        retry_base_delay_ms: 10,
        request_timeout_secs: 0,
        atomic: false,
    }
}

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Deterministic, non-repeating-per-chunk content
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u32).wrapping_mul(31).wrapping_add(seed as u32) % 251) as u8)
        .collect()
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, data).unwrap();
    path
}

#[derive(Default)]
struct Faults {
    /// Remaining transient failures per (file, chunk) fetch
    fetch_failures: HashMap<(u32, u32), u32>,
    /// Remaining transient failures per (file, chunk) upload
    upload_failures: HashMap<(u32, u32), u32>,
    /// Chunks served with one flipped bit
    corrupt: HashSet<(u32, u32)>,
    /// Whole frames cut from the end of the served stream
    dropped_frames: usize,
    /// Serve the stream without the sender's digest
    withhold_digest: bool,
    /// Gap before each served stream frame
    stream_pace: Duration,
}

#[derive(Default)]
struct RelayState {
    manifest: Option<Manifest>,
    chunks: HashMap<(u32, u32), Bytes>,
    nonces: HashMap<u32, String>,
    stream: Vec<u8>,
    stream_digest: Option<Sha256Digest>,
    finalized: Vec<String>,
    fetch_attempts: HashMap<(u32, u32), u32>,
    faults: Faults,
}

struct Inner {
    state: Mutex<RelayState>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicUsize,
    latency: Duration,
}

/// In-memory relay: stores whatever the uploader sends and serves it back to
/// the downloader, with injectable faults. Clones share state.
#[derive(Clone)]
pub struct MemoryRelay {
    inner: Arc<Inner>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every chunk request holds its slot for `latency`
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RelayState::default()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                latency,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RelayState> {
        self.inner.state.lock().unwrap()
    }

    pub fn fail_fetch(&self, file: u32, chunk: u32, times: u32) {
        self.state().faults.fetch_failures.insert((file, chunk), times);
    }

    pub fn fail_upload(&self, file: u32, chunk: u32, times: u32) {
        self.state().faults.upload_failures.insert((file, chunk), times);
    }

    pub fn corrupt(&self, file: u32, chunk: u32) {
        self.state().faults.corrupt.insert((file, chunk));
    }

    pub fn drop_trailing_frames(&self, frames: usize) {
        self.state().faults.dropped_frames = frames;
    }

    pub fn pace_stream(&self, gap: Duration) {
        self.state().faults.stream_pace = gap;
    }

    pub fn withhold_stream_digest(&self) {
        self.state().faults.withhold_digest = true;
    }

    /// Distinct chunks of `file` requested at least once
    pub fn chunks_fetched(&self, file: u32) -> usize {
        self.state()
            .fetch_attempts
            .keys()
            .filter(|(f, _)| *f == file)
            .count()
    }

    pub fn fetch_attempts(&self, file: u32, chunk: u32) -> u32 {
        self.state()
            .fetch_attempts
            .get(&(file, chunk))
            .copied()
            .unwrap_or(0)
    }

    pub fn stored_chunks(&self, file: u32) -> usize {
        self.state().chunks.keys().filter(|(f, _)| *f == file).count()
    }

    pub fn stored_nonce(&self, file: u32) -> Option<String> {
        self.state().nonces.get(&file).cloned()
    }

    pub fn finalized(&self) -> Vec<String> {
        self.state().finalized.clone()
    }

    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Take the next injected failure for `key`, if any remain
    fn take_failure(failures: &mut HashMap<(u32, u32), u32>, key: (u32, u32)) -> bool {
        match failures.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Offsets where each `[u32 BE len][frame]` record of `stream` starts
    fn frame_starts(stream: &[u8]) -> Vec<usize> {
        let mut starts = Vec::new();
        let mut at = 0;
        while at + 4 <= stream.len() {
            starts.push(at);
            let len = u32::from_be_bytes(stream[at..at + 4].try_into().unwrap()) as usize;
            at += 4 + len;
        }
        starts
    }

    async fn hold_slot(&self) {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.inner.latency.is_zero() {
            tokio::time::sleep(self.inner.latency).await;
        }
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DownloadTransport for MemoryRelay {
    async fn fetch_manifest(&self) -> Result<Manifest, TransferError> {
        let manifest = self
            .state()
            .manifest
            .clone()
            .ok_or(TransferError::HttpStatus { status: 404 })?;
        // what a peer would see: local paths never cross the wire
        let wire = serde_json::to_vec(&manifest).unwrap();
        Ok(serde_json::from_slice(&wire).unwrap())
    }

    async fn fetch_chunk(&self, file_index: u32, chunk_index: u32) -> Result<Bytes, TransferError> {
        self.hold_slot().await;

        let mut state = self.state();
        let key = (file_index, chunk_index);
        *state.fetch_attempts.entry(key).or_insert(0) += 1;

        if Self::take_failure(&mut state.faults.fetch_failures, key) {
            return Err(TransferError::Transport("connection reset".into()));
        }

        let chunk = state
            .chunks
            .get(&key)
            .cloned()
            .ok_or(TransferError::HttpStatus { status: 404 })?;

        if state.faults.corrupt.contains(&key) {
            let mut tampered = chunk.to_vec();
            tampered[0] ^= 0x01;
            return Ok(Bytes::from(tampered));
        }
        Ok(chunk)
    }

    async fn open_stream(&self) -> Result<StreamDownload, TransferError> {
        let state = self.state();
        let mut body = state.stream.clone();
        let dropped = state.faults.dropped_frames;
        if dropped > 0 {
            let starts = Self::frame_starts(&body);
            let keep = starts.len().saturating_sub(dropped);
            body.truncate(starts.get(keep).copied().unwrap_or(body.len()));
        }
        let sha256 = if state.faults.withhold_digest {
            None
        } else {
            state.stream_digest
        };
        let pace = state.faults.stream_pace;
        drop(state);

        if pace.is_zero() {
            return Ok(StreamDownload {
                body: Box::new(std::io::Cursor::new(body)),
                sha256,
            });
        }

        // frames trickle in through a pipe, one per `pace`
        let (mut tx, rx) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut starts = Self::frame_starts(&body);
            starts.push(body.len());
            for span in starts.windows(2) {
                tokio::time::sleep(pace).await;
                if tx.write_all(&body[span[0]..span[1]]).await.is_err() {
                    return;
                }
            }
        });
        Ok(StreamDownload {
            body: Box::new(rx),
            sha256,
        })
    }

    async fn complete(&self) -> Result<(), TransferError> {
        self.inner.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl UploadTransport for MemoryRelay {
    async fn send_manifest(&self, manifest: &Manifest) -> Result<(), TransferError> {
        self.state().manifest = Some(manifest.clone());
        Ok(())
    }

    async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<(), TransferError> {
        self.hold_slot().await;

        let mut state = self.state();
        let key = (chunk.file_index, chunk.chunk_index);
        if Self::take_failure(&mut state.faults.upload_failures, key) {
            return Err(TransferError::HttpStatus { status: 503 });
        }
        if let Some(nonce) = chunk.nonce {
            state.nonces.insert(chunk.file_index, nonce);
        }
        state.chunks.insert(key, Bytes::copy_from_slice(&chunk.data));
        Ok(())
    }

    async fn upload_stream(
        &self,
        _file_name: &str,
        sha256: &Sha256Digest,
        body: FrameStream,
    ) -> Result<(), TransferError> {
        let frames: Vec<Bytes> = body.try_collect().await?;
        let mut state = self.state();
        state.stream_digest = Some(*sha256);
        state.stream.clear();
        for frame in frames {
            state.stream.extend_from_slice(&frame);
        }
        Ok(())
    }

    async fn finalize_file(&self, relative_path: &str) -> Result<(), TransferError> {
        self.state().finalized.push(relative_path.to_string());
        Ok(())
    }

    async fn complete(&self) -> Result<(), TransferError> {
        self.inner.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
