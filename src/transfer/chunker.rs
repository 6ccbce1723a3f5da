//! Splits a byte source into dense, indexed chunks.

use crate::common::TransferError;
use bytes::{Bytes, BytesMut};
use std::ops::Range;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Chunk boundaries of a file whose length is known up front
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    size: u64,
    chunk_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: u32,
    pub offset: u64,
    pub len: usize,
}

impl ChunkDescriptor {
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.len as u64
    }
}

impl ChunkPlan {
    /// `chunk_size` must be non-zero, enforced by `TransferConfig::validate`
    pub fn new(size: u64, chunk_size: u64) -> Self {
        Self {
            size,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// `ceil(size / chunk_size)`, zero for an empty file
    pub fn total_chunks(&self) -> u32 {
        self.size.div_ceil(self.chunk_size).min(u32::MAX as u64) as u32
    }

    pub fn descriptor(&self, index: u32) -> Option<ChunkDescriptor> {
        if index >= self.total_chunks() {
            return None;
        }
        let offset = index as u64 * self.chunk_size;
        let end = (offset + self.chunk_size).min(self.size);
        Some(ChunkDescriptor {
            index,
            offset,
            len: (end - offset) as usize,
        })
    }

    pub fn range(&self, index: u32) -> Option<Range<u64>> {
        self.descriptor(index).map(|d| d.range())
    }

    /// Lazy, restartable: call again to start from index 0
    pub fn iter(&self) -> impl Iterator<Item = ChunkDescriptor> + '_ {
        (0..self.total_chunks()).filter_map(move |i| self.descriptor(i))
    }

    /// Files beyond 2^32 chunks would wrap the nonce counter
    pub fn check_addressable(&self) -> Result<(), TransferError> {
        if self.size.div_ceil(self.chunk_size) > u32::MAX as u64 {
            return Err(TransferError::protocol(format!(
                "{} bytes exceeds the chunk counter range at chunk size {}",
                self.size, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Chunks read strictly in arrival order from a reader of unknown length
pub struct SequentialChunker<R> {
    reader: R,
    chunk_size: usize,
    next_index: u32,
    done: bool,
}

impl<R: AsyncRead + Unpin> SequentialChunker<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            next_index: 0,
            done: false,
        }
    }

    /// Next full chunk (or the short final one). `None` once the reader is drained.
    pub async fn next_chunk(&mut self) -> Result<Option<(u32, Bytes)>, TransferError> {
        if self.done {
            return Ok(None);
        }

        let mut buf = BytesMut::with_capacity(self.chunk_size);
        while buf.len() < self.chunk_size {
            let limit = (self.chunk_size - buf.len()) as u64;
            let n = (&mut self.reader).take(limit).read_buf(&mut buf).await?;
            if n == 0 {
                self.done = true;
                break;
            }
        }

        if buf.is_empty() {
            return Ok(None);
        }

        let index = self.next_index;
        self.next_index = self
            .next_index
            .checked_add(1)
            .ok_or_else(|| TransferError::protocol("stream exceeds chunk counter range"))?;
        Ok(Some((index, buf.freeze())))
    }

    pub fn chunks_read(&self) -> u32 {
        self.next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn total_chunks_is_ceiling() {
        assert_eq!(ChunkPlan::new(0, MIB).total_chunks(), 0);
        assert_eq!(ChunkPlan::new(1, MIB).total_chunks(), 1);
        assert_eq!(ChunkPlan::new(MIB, MIB).total_chunks(), 1);
        assert_eq!(ChunkPlan::new(MIB + 1, MIB).total_chunks(), 2);
        assert_eq!(ChunkPlan::new(10 * MIB, MIB).total_chunks(), 10);
    }

    #[test]
    fn descriptors_cover_file_densely() {
        let plan = ChunkPlan::new(2500, 1000);
        let chunks: Vec<_> = plan.iter().collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].range(), 0..1000);
        assert_eq!(chunks[1].range(), 1000..2000);
        assert_eq!(chunks[2].range(), 2000..2500);
        assert_eq!(chunks[2].len, 500);
        assert!(plan.descriptor(3).is_none());
        assert_eq!(plan.iter().count(), 3, "iteration restarts");
    }

    #[test]
    fn empty_plan_yields_nothing() {
        let plan = ChunkPlan::new(0, MIB);
        assert_eq!(plan.iter().count(), 0);
        assert!(plan.range(0).is_none());
    }

    #[test]
    fn addressable_limit() {
        assert!(ChunkPlan::new(u64::MAX, 1).check_addressable().is_err());
        assert!(ChunkPlan::new(10 * MIB, MIB).check_addressable().is_ok());
    }

    #[tokio::test]
    async fn sequential_chunks_in_order() {
        let data: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
        let mut chunker = SequentialChunker::new(&data[..], 1000);

        let mut out = Vec::new();
        while let Some((index, bytes)) = chunker.next_chunk().await.unwrap() {
            out.push((index, bytes));
        }
        assert_eq!(out.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(out[2].1.len(), 500);
        let joined: Vec<u8> = out.iter().flat_map(|(_, b)| b.to_vec()).collect();
        assert_eq!(joined, data);
        assert_eq!(chunker.chunks_read(), 3);
    }

    #[tokio::test]
    async fn sequential_fills_chunks_from_short_reads() {
        // duplex delivers writes in small pieces
        let (mut tx, rx) = tokio::io::duplex(7);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for _ in 0..10 {
                tx.write_all(&[1u8; 10]).await.unwrap();
            }
        });

        let mut chunker = SequentialChunker::new(rx, 40);
        let sizes: Vec<usize> = {
            let mut v = Vec::new();
            while let Some((_, b)) = chunker.next_chunk().await.unwrap() {
                v.push(b.len());
            }
            v
        };
        assert_eq!(sizes, vec![40, 40, 20]);
    }

    #[tokio::test]
    async fn sequential_empty_source() {
        let mut chunker = SequentialChunker::new(&b""[..], 16);
        assert!(chunker.next_chunk().await.unwrap().is_none());
        assert_eq!(chunker.chunks_read(), 0);
    }
}
