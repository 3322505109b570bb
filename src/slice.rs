//! Borrowed byte-range views over pooled buffers (spec.md §3 "Slice", §4.1).
//!
//! A C `struct slice` is a bare `(ptr, len)` pair; the memory behind it is
//! freed by whoever the ownership contract says owns it at that moment. Rust
//! can't express "this pointer is borrowed until someone else calls free on
//! it" safely, so `Slice` instead *moves* a buffer handle: the last `Slice`
//! referencing a given [`MbufHandle`] causes it to drop, and `MbufHandle`'s
//! `Drop` returns the backing `Vec<u8>` to its [`MbufPool`] (or simply frees
//! it, for one-off buffers built outside the pool). That is the safe-Rust
//! encoding of "ownership transfers at well-defined call sites" from
//! DESIGN.md's grounding notes.

use std::sync::{Arc, Mutex};

struct MbufPoolInner {
    free: Vec<Vec<u8>>,
    buf_size: usize,
}

/// Free-list of fixed-capacity buffers. One pool per worker process
/// (spec.md §5 "the mbuf pool is per-worker-process").
#[derive(Clone)]
pub struct MbufPool {
    inner: Arc<Mutex<MbufPoolInner>>,
}

impl MbufPool {
    pub fn new(buf_size: usize) -> Self {
        MbufPool {
            inner: Arc::new(Mutex::new(MbufPoolInner {
                free: Vec::new(),
                buf_size,
            })),
        }
    }

    /// Checks a buffer out of the pool, allocating a fresh one if the
    /// free-list is empty.
    pub fn checkout(&self) -> MbufHandle {
        let mut inner = self.inner.lock().unwrap();
        let buf = inner
            .free
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(inner.buf_size));
        MbufHandle {
            buf: Some(buf),
            pool: Some(Arc::clone(&self.inner)),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.inner.lock().unwrap().buf_size
    }

    /// Number of buffers currently sitting idle in the free-list. Exposed for
    /// tests asserting slices don't leak.
    pub fn free_count(&self) -> usize {
        self.inner.lock().unwrap().free.len()
    }
}

/// A pooled (or bare) `Vec<u8>`, returned to its pool on drop.
pub struct MbufHandle {
    buf: Option<Vec<u8>>,
    pool: Option<Arc<Mutex<MbufPoolInner>>>,
}

impl MbufHandle {
    /// Wraps an already-allocated buffer with no pool behind it -- used for
    /// one-off response buffers an app builds itself (spec.md §4.1: "an app
    /// constructs response bytes into memory it allocated, commonly via the
    /// same mbuf pool" -- commonly, not always).
    pub fn bare(buf: Vec<u8>) -> Self {
        MbufHandle {
            buf: Some(buf),
            pool: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::ops::Deref for MbufHandle {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("MbufHandle used after drop")
    }
}

impl std::ops::DerefMut for MbufHandle {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("MbufHandle used after drop")
    }
}

impl Drop for MbufHandle {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            if let Some(pool) = &self.pool {
                buf.clear();
                if let Ok(mut inner) = pool.lock() {
                    inner.free.push(buf);
                }
            }
        }
    }
}

/// A non-owning view into an [`MbufHandle`]. Multiple slices may share one
/// handle (e.g. a header slice and a body slice over the same read buffer)
/// without copying; the handle is only returned to its pool once every
/// `Slice` referencing it has been dropped.
pub struct Slice {
    buf: Arc<MbufHandle>,
    off: usize,
    len: usize,
}

impl Slice {
    pub fn new(handle: MbufHandle, off: usize, len: usize) -> Self {
        debug_assert!(off + len <= handle.len());
        Slice {
            buf: Arc::new(handle),
            off,
            len,
        }
    }

    /// A slice spanning an entire handle.
    pub fn whole(handle: MbufHandle) -> Self {
        let len = handle.len();
        Slice::new(handle, 0, len)
    }

    /// Convenience for apps that just want to hand raw bytes to the worker;
    /// wraps them in an unpooled handle.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Slice::whole(MbufHandle::bare(data))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.off..self.off + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Advances the slice's head after a partial write, per spec.md §8
    /// "partial socket write -> slice head advances; no bytes duplicated".
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.len);
        self.off += n;
        self.len -= n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_out_buffers_return_to_the_pool_on_drop() {
        let pool = MbufPool::new(64);
        {
            let mut h = pool.checkout();
            h.extend_from_slice(b"hello");
        }
        assert_eq!(pool.free_count(), 1);
        let h2 = pool.checkout();
        assert!(h2.is_empty(), "returned buffer must be cleared before reuse");
    }

    #[test]
    fn slice_advance_shrinks_from_the_front() {
        let mut s = Slice::from_vec(b"abcdef".to_vec());
        assert_eq!(s.bytes(), b"abcdef");
        s.advance(2);
        assert_eq!(s.bytes(), b"cdef");
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn shared_handle_is_not_returned_until_last_slice_drops() {
        let pool = MbufPool::new(64);
        let mut h = pool.checkout();
        h.extend_from_slice(b"header+body");
        let handle = Arc::new(h);
        let a = Slice {
            buf: Arc::clone(&handle),
            off: 0,
            len: 6,
        };
        let b = Slice {
            buf: handle,
            off: 6,
            len: 5,
        };
        assert_eq!(a.bytes(), b"header");
        assert_eq!(b.bytes(), b"+body");
        drop(a);
        assert_eq!(pool.free_count(), 0, "still referenced by b");
        drop(b);
        assert_eq!(pool.free_count(), 1);
    }
}
