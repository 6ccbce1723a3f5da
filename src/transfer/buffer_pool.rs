//! Reusable seal buffers for the upload path.
//!
//! An upload worker reads plaintext into a buffer taken from the pool, seals it
//! in place (the tag grows it by `TAG_LEN`) and hands the ciphertext to the
//! transport as `Bytes`. Once the last clone of those `Bytes` is gone, including
//! the copy a retry keeps around, the allocation goes back on the free list.

use crate::crypto::TAG_LEN;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    /// One full chunk plus its tag
    slot_len: usize,
}

impl BufferPool {
    /// One buffer per upload worker, each able to hold a sealed `chunk_size` chunk
    pub fn for_chunks(workers: usize, chunk_size: usize) -> Arc<Self> {
        let slot_len = chunk_size.saturating_add(TAG_LEN);
        let free = std::iter::repeat_with(|| Vec::with_capacity(slot_len))
            .take(workers)
            .collect();
        Arc::new(Self {
            free: Mutex::new(free),
            slot_len,
        })
    }

    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    /// Empty buffer with room for a sealed chunk. Allocates when every pooled
    /// buffer is still out with the transport.
    pub fn take(&self) -> Vec<u8> {
        self.free_list()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.slot_len))
    }

    /// Hand sealed `data` to the transport without copying
    pub fn wrap(self: &Arc<Self>, data: Vec<u8>) -> Bytes {
        Bytes::from_owner(Lease {
            data,
            home: Arc::clone(self),
        })
    }

    /// Buffers currently on the free list
    pub fn available(&self) -> usize {
        self.free_list().len()
    }

    fn free_list(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reclaim(&self, mut buf: Vec<u8>) {
        // too small to seal a full chunk into
        if buf.capacity() < self.slot_len {
            return;
        }
        buf.clear();
        self.free_list().push(buf);
    }
}

/// Keeps a pooled buffer alive behind `Bytes` and returns it when dropped
struct Lease {
    data: Vec<u8>,
    home: Arc<BufferPool>,
}

impl AsRef<[u8]> for Lease {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.home.reclaim(std::mem::take(&mut self.data));
    }
}
