//! Reusable byte buffers for the producer → decoder → detector handoff.
//!
//! # Design Notes
//! - Sources acquire a buffer, fill it, and hand it off inside a `Chunk`.
//!   The buffer travels by ownership through the stages and is returned to
//!   the pool by whichever stage drops the chunk last.
//! - The pool is a fixed-capacity lock-free queue; when it is empty, `acquire`
//!   falls back to a fresh allocation so producers never block on the pool
//!   (channel backpressure is the throttle, not buffer starvation).
//! - Buffers above `MAX_POOLED_CAPACITY` are dropped instead of returned so a
//!   single oversized read cannot pin memory for the rest of the run.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Buffers larger than this are not returned to the pool.
const MAX_POOLED_CAPACITY: usize = 4 * 1024 * 1024;

/// Fixed-capacity pool of byte buffers shared across pipeline stages.
#[derive(Clone)]
pub struct BufferPool {
    slots: Arc<ArrayQueue<Vec<u8>>>,
}

impl BufferPool {
    /// Creates a pool that retains at most `capacity` idle buffers.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer pool capacity must be > 0");
        Self {
            slots: Arc::new(ArrayQueue::new(capacity)),
        }
    }

    /// Acquires a cleared buffer, allocating if the pool is empty.
    pub fn acquire(&self) -> PooledBytes {
        let mut buf = self.slots.pop().unwrap_or_default();
        buf.clear();
        PooledBytes {
            buf,
            pool: Some(Arc::clone(&self.slots)),
        }
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.slots.len()
    }
}

/// Owned byte buffer, optionally tied to a [`BufferPool`].
///
/// Dropping a pooled instance returns the allocation to its pool. Buffers
/// created with `From<Vec<u8>>` (decoder outputs, tests) are plain
/// allocations with no pool.
pub struct PooledBytes {
    buf: Vec<u8>,
    pool: Option<Arc<ArrayQueue<Vec<u8>>>>,
}

impl PooledBytes {
    /// Mutable access for the filling producer.
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl From<Vec<u8>> for PooledBytes {
    fn from(buf: Vec<u8>) -> Self {
        Self { buf, pool: None }
    }
}

impl Deref for PooledBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl AsRef<[u8]> for PooledBytes {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl Clone for PooledBytes {
    /// Clones detach from the pool: only the original handle returns the
    /// buffer, so a buffer can never be released twice.
    fn clone(&self) -> Self {
        Self {
            buf: self.buf.clone(),
            pool: None,
        }
    }
}

impl fmt::Debug for PooledBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBytes")
            .field("len", &self.buf.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PooledBytes {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            if self.buf.capacity() <= MAX_POOLED_CAPACITY {
                let _ = pool.push(std::mem::take(&mut self.buf));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_roundtrip() {
        let pool = BufferPool::new(2);
        {
            let mut b = pool.acquire();
            b.as_mut_vec().extend_from_slice(b"abc");
            assert_eq!(&*b, b"abc");
        }
        assert_eq!(pool.idle(), 1);
        let b = pool.acquire();
        assert!(b.is_empty(), "reused buffer must be cleared");
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn clone_does_not_double_release() {
        let pool = BufferPool::new(4);
        let a = pool.acquire();
        let b = a.clone();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn unpooled_from_vec_never_touches_pool() {
        let b = PooledBytes::from(b"xyz".to_vec());
        assert_eq!(&*b, b"xyz");
    }

    #[test]
    fn oversized_buffers_are_dropped() {
        let pool = BufferPool::new(1);
        {
            let mut b = pool.acquire();
            b.as_mut_vec().reserve(MAX_POOLED_CAPACITY + 1);
        }
        assert_eq!(pool.idle(), 0);
    }
}
