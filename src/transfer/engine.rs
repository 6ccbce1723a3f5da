//! Whole-file and whole-manifest orchestration on top of the chunk primitives.
//!
//! Chunk work fans out through the bounded scheduler; everything that touches
//! the reassembler or progress runs on the caller's task, in completion order.

use crate::common::{FileEntry, FileError, Manifest, TransferConfig, TransferError};
use crate::crypto::{calculate_file_hash, ChunkCipher, EncryptionKey, Nonce, Sha256Digest};
use crate::transfer::buffer_pool::BufferPool;
use crate::transfer::chunker::{ChunkDescriptor, ChunkPlan};
use crate::transfer::io::read_and_seal;
use crate::transfer::progress::ProgressTracker;
use crate::transfer::reassembler::{Reassembler, TransferResult};
use crate::transfer::retry::{ChunkId, RetryPolicy};
use crate::transfer::scheduler::{run_bounded, BoundedScheduler};
use crate::transfer::sink::{FileSink, MemorySink, PlaintextSink};
use crate::transfer::stream::{decrypt_frames, encrypt_frames};
use crate::transport::{ChunkUpload, DownloadTransport, UploadTransport};
use crate::utils::security::resolve_destination;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// One outcome per manifest entry, in manifest order
#[derive(Debug)]
pub struct BatchReport<O> {
    pub outcomes: Vec<Result<O, FileError>>,
}

impl<O> BatchReport<O> {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileError> {
        self.outcomes.iter().filter_map(|o| o.as_ref().err())
    }
}

/// Mark every entry after `failed_index` as aborted
fn abort_remaining<O>(
    outcomes: &mut Vec<Result<O, FileError>>,
    files: &[FileEntry],
    failed_index: u32,
    progress: &ProgressTracker,
) {
    for entry in files.iter().skip(outcomes.len()) {
        progress.file_failed(entry.index as usize, "batch aborted");
        outcomes.push(Err(FileError::new(
            entry.index,
            &entry.name,
            TransferError::BatchAborted { failed_index },
        )));
    }
}

fn init_progress(progress: &ProgressTracker, manifest: &Manifest, chunk_size: u64) {
    let names = manifest.files.iter().map(|f| f.relative_path.clone()).collect();
    let totals = manifest
        .files
        .iter()
        .map(|f| f.total_chunks(chunk_size))
        .collect();
    progress.init_files(names, totals);
}

/// Receiving side: fetches ciphertext chunks, decrypts and reassembles them
pub struct Downloader<T> {
    transport: T,
    cipher: ChunkCipher,
    config: TransferConfig,
    retry: RetryPolicy,
    progress: ProgressTracker,
    allow_unverified: bool,
}

impl<T: DownloadTransport> Downloader<T> {
    pub fn new(transport: T, key: &EncryptionKey, config: TransferConfig) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            transport,
            cipher: ChunkCipher::new(key),
            config,
            retry,
            progress: ProgressTracker::new(),
            allow_unverified: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Release framed streams that arrive without any digest, marked
    /// `Unverified`. Off by default: such a stream is refused before download.
    pub fn allow_unverified(mut self, allow: bool) -> Self {
        self.allow_unverified = allow;
        self
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn fetch_manifest(&self) -> Result<Manifest, TransferError> {
        let manifest = self.transport.fetch_manifest().await?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Download every file of `manifest` into `dest`. A failed file leaves the
    /// others alone unless the config asks for an atomic batch.
    pub async fn download_all(
        &self,
        manifest: &Manifest,
        dest: &Path,
    ) -> Result<BatchReport<TransferResult<PathBuf>>, TransferError> {
        manifest.validate()?;
        init_progress(&self.progress, manifest, self.config.chunk_size);
        tracing::info!(
            files = manifest.files.len(),
            bytes = manifest.total_bytes(),
            dest = %dest.display(),
            "download started"
        );

        let mut outcomes = Vec::with_capacity(manifest.files.len());
        for entry in &manifest.files {
            let span = tracing::info_span!("file", index = entry.index, name = %entry.name);
            let result = self.download_entry(entry, dest).instrument(span).await;

            match result {
                Ok(done) => {
                    self.progress.file_complete(entry.index as usize);
                    outcomes.push(Ok(done));
                }
                Err(err) => {
                    tracing::error!(file_index = entry.index, error = %err, "file failed");
                    self.progress
                        .file_failed(entry.index as usize, err.to_string());
                    outcomes.push(Err(FileError::new(entry.index, &entry.name, err)));

                    if self.config.atomic {
                        self.roll_back(&mut outcomes, manifest, entry.index).await;
                        break;
                    }
                }
            }
        }

        let report = BatchReport { outcomes };
        if report.is_success() {
            // files are already in place; the relay times out the lock regardless
            if let Err(err) = DownloadTransport::complete(&self.transport).await {
                tracing::warn!(error = %err, "failed to notify relay of completion");
            }
        }
        Ok(report)
    }

    /// Atomic batch: remove what was already finalized, abort what is left
    async fn roll_back(
        &self,
        outcomes: &mut Vec<Result<TransferResult<PathBuf>, FileError>>,
        manifest: &Manifest,
        failed_index: u32,
    ) {
        for (position, outcome) in outcomes.iter_mut().enumerate() {
            let Ok(done) = outcome else { continue };
            if let Err(err) = tokio::fs::remove_file(&done.output).await {
                tracing::warn!(path = %done.output.display(), error = %err, "rollback failed");
            }
            if let Some(entry) = manifest.files.get(position) {
                self.progress
                    .file_failed(entry.index as usize, "batch aborted");
                *outcome = Err(FileError::new(
                    entry.index,
                    &entry.name,
                    TransferError::BatchAborted { failed_index },
                ));
            }
        }
        abort_remaining(outcomes, &manifest.files, failed_index, &self.progress);
    }

    async fn download_entry(
        &self,
        entry: &FileEntry,
        dest: &Path,
    ) -> Result<TransferResult<PathBuf>, TransferError> {
        let target = resolve_destination(dest, &entry.relative_path)
            .map_err(|e| TransferError::protocol(format!("{}: {e}", entry.relative_path)))?;
        let sink = FileSink::create(target).await?;
        self.download_file(entry, sink).await
    }

    pub async fn download_to_memory(
        &self,
        entry: &FileEntry,
    ) -> Result<TransferResult<Bytes>, TransferError> {
        let capacity = usize::try_from(entry.size).unwrap_or(0);
        self.download_file(entry, MemorySink::with_capacity(capacity))
            .await
    }

    /// Fetch, decrypt and reassemble one file into `sink`, then verify its digest.
    /// The sink is aborted on any failure.
    pub async fn download_file<S: PlaintextSink>(
        &self,
        entry: &FileEntry,
        sink: S,
    ) -> Result<TransferResult<S::Output>, TransferError> {
        let plan = ChunkPlan::new(entry.size, self.config.chunk_size);
        if let Err(err) = plan.check_addressable() {
            sink.abort().await;
            return Err(err);
        }

        let total = plan.total_chunks();
        let start = Instant::now();
        let mut reassembler = Reassembler::new(entry.index, total, sink);
        let mut scheduler = BoundedScheduler::new(0..total, self.config.concurrency, |index| {
            self.fetch_and_open(entry, &plan, index)
        });
        // positions are chunk indices; a slow chunk stalls admission, not memory
        let window = self.config.reorder_window();
        scheduler.admit_below(window);
        let mut failure = None;

        while let Some((_, result)) = scheduler.next().await {
            if failure.is_some() {
                // draining: in-flight results are discarded
                continue;
            }
            let placed = match result {
                Ok((index, plaintext)) => reassembler.accept(index, plaintext).await,
                Err(err) => Err(err),
            };
            match placed {
                Ok(()) => {
                    self.progress.increment_file(entry.index as usize);
                    scheduler.admit_below(reassembler.flushed() as usize + window);
                }
                Err(err) => {
                    scheduler.halt();
                    failure = Some(err);
                }
            }
        }

        if let Some(err) = failure {
            reassembler.abort().await;
            return Err(err);
        }

        let result = reassembler.finish().await?.verify(&entry.sha256).await?;
        tracing::info!(
            file_index = entry.index,
            chunks = total,
            bytes = result.size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "file verified"
        );
        Ok(result)
    }

    /// One chunk: ciphertext fetch under the retry policy, then a single decrypt.
    /// Authentication failures never reach the retry loop.
    async fn fetch_and_open(
        &self,
        entry: &FileEntry,
        plan: &ChunkPlan,
        chunk_index: u32,
    ) -> Result<(u32, Vec<u8>), TransferError> {
        let id = ChunkId::new(entry.index, chunk_index);
        let fetch_start = Instant::now();
        let ciphertext = self
            .retry
            .attempt(id, || self.transport.fetch_chunk(entry.index, chunk_index))
            .await?;
        tracing::debug!(
            file_index = entry.index,
            chunk_index,
            bytes = ciphertext.len(),
            elapsed_us = fetch_start.elapsed().as_micros() as u64,
            "chunk_fetch"
        );

        let plaintext = self
            .cipher
            .decrypt(&entry.nonce, entry.index, chunk_index, &ciphertext)?;

        let expected = plan.descriptor(chunk_index).map(|d| d.len);
        if expected != Some(plaintext.len()) {
            return Err(TransferError::protocol(format!(
                "chunk {chunk_index} of file {} has {} bytes, expected {:?}",
                entry.index,
                plaintext.len(),
                expected
            )));
        }
        Ok((chunk_index, plaintext))
    }

    /// Framed-stream download of the single payload behind the link. The digest
    /// is `expected` when given, else whatever the sender announced.
    pub async fn download_stream<S: PlaintextSink>(
        &self,
        nonce: &Nonce,
        sink: S,
        expected: Option<&Sha256Digest>,
    ) -> Result<TransferResult<S::Output>, TransferError> {
        self.progress.init_files(vec!["stream".to_string()], vec![0]);

        let opened = self
            .retry
            .attempt(ChunkId::new(0, 0), || self.transport.open_stream())
            .await
            .and_then(|opened| {
                let digest = expected.copied().or(opened.sha256);
                if digest.is_none() && !self.allow_unverified {
                    return Err(TransferError::protocol(
                        "stream has no content digest to verify against",
                    ));
                }
                Ok((opened.body, digest))
            });
        let (body, digest) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                sink.abort().await;
                self.progress.file_failed(0, err.to_string());
                return Err(err);
            }
        };

        let chunk_size = self.config.chunk_size as usize;
        let result = decrypt_frames(
            body,
            &self.cipher,
            nonce,
            chunk_size,
            sink,
            digest.as_ref(),
            Some(&self.progress),
        )
        .await;

        match &result {
            Ok(done) => {
                self.progress.file_complete(0);
                tracing::info!(bytes = done.size, verified = done.is_verified(), "stream received");
                if let Err(err) = DownloadTransport::complete(&self.transport).await {
                    tracing::warn!(error = %err, "failed to notify relay of completion");
                }
            }
            Err(err) => self.progress.file_failed(0, err.to_string()),
        }
        result
    }
}

/// Sending side: reads, seals and uploads chunks of local files
pub struct Uploader<T> {
    transport: T,
    cipher: ChunkCipher,
    config: TransferConfig,
    retry: RetryPolicy,
    progress: ProgressTracker,
    pool: Arc<BufferPool>,
}

impl<T: UploadTransport> Uploader<T> {
    pub fn new(transport: T, key: &EncryptionKey, config: TransferConfig) -> Self {
        let retry = RetryPolicy::from_config(&config);
        let pool = BufferPool::for_chunks(config.concurrency.max(1), config.chunk_size as usize);
        Self {
            transport,
            cipher: ChunkCipher::new(key),
            config,
            retry,
            progress: ProgressTracker::new(),
            pool,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Announce `manifest`, upload each file and finalize it. `complete` is sent
    /// only when every file made it.
    pub async fn upload_all(&self, manifest: &Manifest) -> Result<BatchReport<u32>, TransferError> {
        manifest.validate()?;
        self.transport.send_manifest(manifest).await?;
        init_progress(&self.progress, manifest, self.config.chunk_size);
        tracing::info!(
            files = manifest.files.len(),
            bytes = manifest.total_bytes(),
            "upload started"
        );

        let mut outcomes = Vec::with_capacity(manifest.files.len());
        for entry in &manifest.files {
            let span = tracing::info_span!("file", index = entry.index, name = %entry.name);
            let result = async {
                let chunks = self.upload_file(entry).await?;
                self.transport.finalize_file(&entry.relative_path).await?;
                Ok::<_, TransferError>(chunks)
            }
            .instrument(span)
            .await;

            match result {
                Ok(chunks) => {
                    self.progress.file_complete(entry.index as usize);
                    outcomes.push(Ok(chunks));
                }
                Err(err) => {
                    tracing::error!(file_index = entry.index, error = %err, "file failed");
                    self.progress
                        .file_failed(entry.index as usize, err.to_string());
                    outcomes.push(Err(FileError::new(entry.index, &entry.name, err)));

                    if self.config.atomic {
                        abort_remaining(
                            &mut outcomes,
                            &manifest.files,
                            entry.index,
                            &self.progress,
                        );
                        break;
                    }
                }
            }
        }

        let report = BatchReport { outcomes };
        if report.is_success() {
            UploadTransport::complete(&self.transport).await?;
            tracing::info!(files = report.succeeded(), "upload complete");
        } else {
            tracing::warn!(
                failed = report.failures().count(),
                "upload incomplete, not signalling completion"
            );
        }
        Ok(report)
    }

    /// Upload every chunk of one file, returning the chunk count
    pub async fn upload_file(&self, entry: &FileEntry) -> Result<u32, TransferError> {
        let path = entry.full_path.as_deref().ok_or_else(|| {
            TransferError::protocol(format!("file {} has no local path", entry.index))
        })?;
        let file = std::fs::File::open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk != entry.size {
            return Err(TransferError::protocol(format!(
                "{} changed since the manifest was built ({} -> {on_disk} bytes)",
                path.display(),
                entry.size
            )));
        }

        let plan = ChunkPlan::new(entry.size, self.config.chunk_size);
        plan.check_addressable()?;
        let total = plan.total_chunks();
        let file = Arc::new(file);
        let start = Instant::now();

        run_bounded(plan.iter(), self.config.concurrency, |chunk| {
            self.seal_and_send(entry, &file, chunk, total)
        })
        .await?;

        tracing::info!(
            file_index = entry.index,
            chunks = total,
            bytes = entry.size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "file uploaded"
        );
        Ok(total)
    }

    /// Seal once, then retry only the send. A retried chunk carries the same
    /// ciphertext, so no nonce counter is ever used for two plaintexts.
    async fn seal_and_send(
        &self,
        entry: &FileEntry,
        file: &Arc<std::fs::File>,
        chunk: ChunkDescriptor,
        total_chunks: u32,
    ) -> Result<(), TransferError> {
        let buffer = self.pool.take();
        let sealed = read_and_seal(
            Arc::clone(file),
            chunk,
            self.cipher.clone(),
            entry.nonce,
            buffer,
        )
        .await?;

        let upload = ChunkUpload {
            file_index: entry.index,
            relative_path: entry.relative_path.clone(),
            file_name: entry.name.clone(),
            chunk_index: chunk.index,
            total_chunks,
            file_size: entry.size,
            nonce: (chunk.index == 0).then(|| entry.nonce.to_base64()),
            data: self.pool.wrap(sealed),
        };

        let send_start = Instant::now();
        self.retry
            .attempt(ChunkId::new(entry.index, chunk.index), || {
                self.transport.upload_chunk(upload.clone())
            })
            .await?;
        tracing::debug!(
            file_index = entry.index,
            chunk_index = chunk.index,
            elapsed_us = send_start.elapsed().as_micros() as u64,
            "chunk_upload"
        );

        self.progress.increment_file(entry.index as usize);
        Ok(())
    }

    /// Framed-stream upload of one file as a single request body. The body is
    /// consumed as it is produced, so the request as a whole is not retried.
    pub async fn upload_stream(&self, path: &Path, nonce: &Nonce) -> Result<(), TransferError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::protocol(format!("{} has no file name", path.display())))?
            .to_string();
        let sha256 = calculate_file_hash(path).await?;
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        let total = ChunkPlan::new(size, self.config.chunk_size).total_chunks();
        self.progress.init_files(vec![file_name.clone()], vec![total]);

        let progress = self.progress.clone();
        let frames = encrypt_frames(
            file,
            self.cipher.clone(),
            *nonce,
            self.config.chunk_size as usize,
        )
        .inspect_ok(move |_| {
            progress.increment_file(0);
        })
        .boxed();

        let start = Instant::now();
        match self
            .transport
            .upload_stream(&file_name, &sha256, frames)
            .await
        {
            Ok(()) => {
                self.progress.file_complete(0);
                tracing::info!(
                    file = %file_name,
                    frames = total,
                    bytes = size,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "stream uploaded"
                );
                Ok(())
            }
            Err(err) => {
                self.progress.file_failed(0, err.to_string());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::digest_bytes;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves pre-sealed chunks of a single file
    struct StaticRelay {
        manifest: Manifest,
        chunks: HashMap<(u32, u32), Bytes>,
    }

    #[async_trait]
    impl DownloadTransport for StaticRelay {
        async fn fetch_manifest(&self) -> Result<Manifest, TransferError> {
            Ok(self.manifest.clone())
        }

        async fn fetch_chunk(&self, file: u32, chunk: u32) -> Result<Bytes, TransferError> {
            self.chunks
                .get(&(file, chunk))
                .cloned()
                .ok_or(TransferError::HttpStatus { status: 404 })
        }

        async fn open_stream(&self) -> Result<crate::transport::StreamDownload, TransferError> {
            Err(TransferError::HttpStatus { status: 404 })
        }

        async fn complete(&self) -> Result<(), TransferError> {
            Ok(())
        }
    }

    fn sealed_relay(key: &EncryptionKey, data: &[u8], chunk_size: u64) -> StaticRelay {
        let cipher = ChunkCipher::new(key);
        let entry = FileEntry {
            index: 0,
            name: "a.bin".into(),
            relative_path: "a.bin".into(),
            size: data.len() as u64,
            sha256: digest_bytes(data),
            nonce: Nonce::new(),
            full_path: None,
        };
        let plan = ChunkPlan::new(entry.size, chunk_size);
        let chunks = plan
            .iter()
            .map(|d| {
                let range = d.offset as usize..d.offset as usize + d.len;
                let sealed = cipher.encrypt(&entry.nonce, d.index, &data[range]).unwrap();
                ((0, d.index), Bytes::from(sealed))
            })
            .collect();
        StaticRelay {
            manifest: Manifest { files: vec![entry] },
            chunks,
        }
    }

    fn small_config() -> TransferConfig {
        TransferConfig {
            chunk_size: 100,
            concurrency: 3,
            ..TransferConfig::default()
        }
    }

    #[tokio::test]
    async fn downloads_into_memory() {
        let key = EncryptionKey::new();
        let data: Vec<u8> = (0..950u32).map(|i| (i % 241) as u8).collect();
        let downloader = Downloader::new(sealed_relay(&key, &data, 100), &key, small_config());

        let manifest = downloader.fetch_manifest().await.unwrap();
        downloader
            .progress()
            .init_files(vec!["a.bin".into()], vec![10]);
        let result = downloader
            .download_to_memory(&manifest.files[0])
            .await
            .unwrap();

        assert_eq!(&result.output[..], &data[..]);
        assert!(result.is_verified());
        assert_eq!(downloader.progress().increment_file(0), (10, 10));
    }

    #[tokio::test]
    async fn short_chunk_is_protocol_violation() {
        let key = EncryptionKey::new();
        let data = vec![7u8; 250];
        let mut relay = sealed_relay(&key, &data, 100);
        let nonce = relay.manifest.files[0].nonce;
        // validly sealed, but shorter than its slot
        let short = ChunkCipher::new(&key).encrypt(&nonce, 1, &[7u8; 10]).unwrap();
        relay.chunks.insert((0, 1), Bytes::from(short));

        let downloader = Downloader::new(relay, &key, small_config());
        let entry = downloader.transport().manifest.files[0].clone();
        let err = downloader.download_to_memory(&entry).await.unwrap_err();
        assert!(matches!(err, TransferError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn missing_chunk_is_not_retried_as_404() {
        let key = EncryptionKey::new();
        let mut relay = sealed_relay(&key, &[1u8; 300], 100);
        relay.chunks.remove(&(0, 2));

        let downloader = Downloader::new(relay, &key, small_config());
        let entry = downloader.transport().manifest.files[0].clone();
        let err = downloader.download_to_memory(&entry).await.unwrap_err();
        assert!(matches!(err, TransferError::HttpStatus { status: 404 }));
    }

    /// Records uploads; used to check sealing and chunk metadata
    #[derive(Default)]
    struct RecordingRelay {
        chunks: Mutex<Vec<ChunkUpload>>,
        finalized: Mutex<Vec<String>>,
        completed: Mutex<bool>,
    }

    #[async_trait]
    impl UploadTransport for RecordingRelay {
        async fn send_manifest(&self, _: &Manifest) -> Result<(), TransferError> {
            Ok(())
        }

        async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<(), TransferError> {
            self.chunks.lock().unwrap().push(chunk);
            Ok(())
        }

        async fn upload_stream(
            &self,
            _: &str,
            _: &Sha256Digest,
            _: crate::transport::FrameStream,
        ) -> Result<(), TransferError> {
            Ok(())
        }

        async fn finalize_file(&self, relative_path: &str) -> Result<(), TransferError> {
            self.finalized.lock().unwrap().push(relative_path.to_string());
            Ok(())
        }

        async fn complete(&self) -> Result<(), TransferError> {
            *self.completed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn upload_seals_each_chunk_with_its_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        let data: Vec<u8> = (0..420u32).map(|i| (i % 97) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let key = EncryptionKey::new();
        let manifest = Manifest::from_paths(&[path]).await.unwrap();
        let uploader = Uploader::new(RecordingRelay::default(), &key, small_config());
        let report = uploader.upload_all(&manifest).await.unwrap();
        assert!(report.is_success());

        let relay = uploader.transport();
        let mut chunks = relay.chunks.lock().unwrap().clone();
        chunks.sort_by_key(|c| c.chunk_index);
        assert_eq!(chunks.len(), 5);

        let entry = &manifest.files[0];
        let cipher = ChunkCipher::new(&key);
        let mut reassembled = Vec::new();
        for chunk in &chunks {
            assert_eq!(chunk.total_chunks, 5);
            assert_eq!(chunk.nonce.is_some(), chunk.chunk_index == 0);
            let plain = cipher
                .decrypt(&entry.nonce, 0, chunk.chunk_index, &chunk.data)
                .unwrap();
            reassembled.extend_from_slice(&plain);
        }
        assert_eq!(reassembled, data);
        assert_eq!(*relay.finalized.lock().unwrap(), vec!["doc.txt".to_string()]);
        assert!(*relay.completed.lock().unwrap());
    }

    #[tokio::test]
    async fn file_changed_after_manifest_fails_that_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grows.log");
        std::fs::write(&path, b"short").unwrap();

        let key = EncryptionKey::new();
        let manifest = Manifest::from_paths(&[path.clone()]).await.unwrap();
        std::fs::write(&path, b"much longer now").unwrap();

        let uploader = Uploader::new(RecordingRelay::default(), &key, small_config());
        let report = uploader.upload_all(&manifest).await.unwrap();
        assert!(!report.is_success());
        assert!(!*uploader.transport().completed.lock().unwrap());
    }
}
