use crate::common::TransferError;
use crate::crypto::{ChunkCipher, Nonce};
use crate::transfer::chunker::ChunkDescriptor;
use positioned_io::ReadAt;
use std::fs::File;
use std::io;
use std::sync::Arc;

/// Positioned read into `buffer`, replacing its contents. Independent of any
/// shared cursor so chunks can be read out of order from one handle.
pub fn read_chunk_at_position(
    file_handle: &File,
    start: u64,
    len: usize,
    buffer: &mut Vec<u8>,
) -> io::Result<()> {
    buffer.clear();
    buffer.resize(len, 0);

    file_handle.read_exact_at(start, buffer).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to read {len} bytes at offset {start}: {e}"),
        )
    })
}

/// Read + encrypt one chunk in a single blocking task. The buffer comes back
/// holding `ciphertext || tag`, sealed exactly once for its nonce counter.
pub async fn read_and_seal(
    file_handle: Arc<File>,
    chunk: ChunkDescriptor,
    cipher: ChunkCipher,
    nonce: Nonce,
    mut buffer: Vec<u8>,
) -> Result<Vec<u8>, TransferError> {
    tokio::task::spawn_blocking(move || {
        let read_start = std::time::Instant::now();
        read_chunk_at_position(&file_handle, chunk.offset, chunk.len, &mut buffer)?;
        tracing::debug!(
            chunk_index = chunk.index,
            bytes = chunk.len,
            elapsed_us = read_start.elapsed().as_micros() as u64,
            "chunk_read"
        );

        let encrypt_start = std::time::Instant::now();
        cipher.encrypt_in_place(&nonce, chunk.index, &mut buffer)?;
        tracing::debug!(
            chunk_index = chunk.index,
            bytes = buffer.len(),
            elapsed_us = encrypt_start.elapsed().as_micros() as u64,
            "chunk_encrypt"
        );
        Ok(buffer)
    })
    .await
    .map_err(|e| TransferError::Io(io::Error::new(io::ErrorKind::Other, e)))?
}
