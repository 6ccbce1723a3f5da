//! Framed-stream mode: one body carrying `[u32 BE length][ciphertext + tag]*`.
//!
//! Frames are produced and consumed strictly in order; frame `n` is sealed with
//! nonce counter `n`.

use crate::common::TransferError;
use crate::crypto::{ChunkCipher, Nonce, Sha256Digest, TAG_LEN};
use crate::transfer::chunker::SequentialChunker;
use crate::transfer::progress::ProgressTracker;
use crate::transfer::reassembler::{Reassembler, TransferResult};
use crate::transfer::sink::PlaintextSink;
use crate::transport::FrameStream;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{stream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, Encoder, FramedRead};

const LEN_PREFIX: usize = 4;

/// Length-prefixed frame codec with a hard ceiling on frame size
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame: usize,
}

impl FrameCodec {
    /// Frames carry at most one chunk plus its tag
    pub fn new(chunk_size: usize) -> Self {
        Self {
            max_frame: chunk_size.saturating_add(TAG_LEN),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = TransferError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, TransferError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&src[..LEN_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len < TAG_LEN || len > self.max_frame {
            return Err(TransferError::protocol(format!(
                "frame length {len} outside [{TAG_LEN}, {}]",
                self.max_frame
            )));
        }

        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, TransferError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(TransferError::protocol(format!(
                "stream ended inside a frame ({} trailing bytes)",
                src.len()
            ))),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = TransferError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), TransferError> {
        if item.len() > self.max_frame {
            return Err(TransferError::protocol(format!(
                "frame of {} bytes exceeds {}",
                item.len(),
                self.max_frame
            )));
        }
        dst.reserve(LEN_PREFIX + item.len());
        dst.put_u32(item.len() as u32);
        dst.put_slice(&item);
        Ok(())
    }
}

/// Read `reader` chunk by chunk and yield sealed, length-prefixed frames
pub fn encrypt_frames<R>(
    reader: R,
    cipher: ChunkCipher,
    nonce: Nonce,
    chunk_size: usize,
) -> FrameStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let chunker = SequentialChunker::new(reader, chunk_size);
    let codec = FrameCodec::new(chunk_size);

    stream::try_unfold(
        (chunker, cipher, codec),
        move |(mut chunker, cipher, mut codec)| async move {
            let Some((index, plaintext)) = chunker.next_chunk().await? else {
                tracing::debug!(frames = chunker.chunks_read(), "stream drained");
                return Ok(None);
            };

            let sealed = cipher.encrypt(&nonce, index, &plaintext)?;
            let mut framed = BytesMut::new();
            codec.encode(Bytes::from(sealed), &mut framed)?;
            tracing::debug!(chunk_index = index, bytes = plaintext.len(), "frame sealed");

            Ok::<_, TransferError>(Some((framed.freeze(), (chunker, cipher, codec))))
        },
    )
    .boxed()
}

/// Consume a framed stream in order, decrypt each frame into the sink, then
/// verify against `expected` when one is known. Any failure aborts the sink.
pub async fn decrypt_frames<R, S>(
    reader: R,
    cipher: &ChunkCipher,
    nonce: &Nonce,
    chunk_size: usize,
    sink: S,
    expected: Option<&Sha256Digest>,
    progress: Option<&ProgressTracker>,
) -> Result<TransferResult<S::Output>, TransferError>
where
    R: AsyncRead + Unpin,
    S: PlaintextSink,
{
    let mut frames = FramedRead::new(reader, FrameCodec::new(chunk_size));
    let mut reassembler = Reassembler::sequential(0, sink);
    let mut counter: u32 = 0;

    while let Some(frame) = frames.next().await {
        let step = match frame {
            Ok(frame) => match cipher.decrypt(nonce, 0, counter, &frame) {
                Ok(plaintext) => reassembler.accept(counter, plaintext).await,
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        if let Err(err) = step {
            tracing::error!(chunk_index = counter, error = %err, "framed stream aborted");
            reassembler.abort().await;
            return Err(err);
        }

        if let Some(progress) = progress {
            progress.increment_file(0);
        }
        counter = match counter.checked_add(1) {
            Some(next) => next,
            None => {
                reassembler.abort().await;
                return Err(TransferError::protocol("stream exceeds chunk counter range"));
            }
        };
    }

    let assembled = reassembler.finish().await?;
    match expected {
        Some(digest) => assembled.verify(digest).await,
        None => assembled.release_unverified().await,
    }
}
