//! One parsed protocol message unit on a client (spec.md §3 "Conn", §4.4).

use std::any::Any;
use std::collections::VecDeque;
use std::io::{self, Read};

use crate::app::App;
use crate::slice::{MbufPool, Slice};

/// A cleanup registered via [`Conn::register_cleanup`]. Closures stand in for
/// the C `(fn, data)` pair -- the captured state *is* the `data` argument.
type Cleanup = Box<dyn FnOnce() + Send>;

pub struct Conn {
    /// Protocol-parsed data, opaque to everything but the protocol that
    /// produced it. Freed automatically when the `Box` drops (the Rust
    /// stand-in for `freeProtocolData`).
    pub protocol_data: Option<Box<dyn Any + Send>>,
    /// Bound app, set exactly once after `protocol_data` is parse-complete
    /// (invariant 2).
    pub app: Option<&'static dyn App>,
    pub app_data: Option<Box<dyn Any + Send>>,
    send_queue: VecDeque<Slice>,
    /// Set by the app once it has finished producing output for this conn.
    pub ready_send: bool,
    cleanup: Vec<Cleanup>,
    finished: bool,
}

impl Default for Conn {
    fn default() -> Self {
        Self::new()
    }
}

impl Conn {
    pub fn new() -> Self {
        Conn {
            protocol_data: None,
            app: None,
            app_data: None,
            send_queue: VecDeque::new(),
            ready_send: false,
            cleanup: Vec::new(),
            finished: false,
        }
    }

    /// `sendClientData` -- transfers slice ownership onto this conn's send
    /// queue, to be drained in enqueue order (invariant 3).
    pub fn send_client_data(&mut self, slice: Slice) {
        self.send_queue.push_back(slice);
    }

    pub fn send_queue(&mut self) -> &mut VecDeque<Slice> {
        &mut self.send_queue
    }

    /// `sendClientFile(conn, fd, len)` -- spec.md §6: "zero-copy file send
    /// (policy equivalent to sendfile where available; fallback is
    /// read+write with a pooled scratch buffer)". `mio`'s portable streams
    /// don't expose a raw `sendfile(2)`, so this always takes the fallback
    /// path: read the file through `pool`-sized chunks and enqueue each
    /// chunk as an ordinary [`Slice`], which the worker then drains exactly
    /// like any other response data (short writes advance the slice in
    /// place, same as `sendClientData`).
    pub fn send_client_file(&mut self, pool: &MbufPool, file: &mut std::fs::File, len: u64) -> io::Result<()> {
        let mut remaining = len;
        while remaining > 0 {
            let mut handle = pool.checkout();
            let want = remaining.min(pool.buf_size() as u64) as usize;
            handle.resize(want, 0);
            file.read_exact(&mut handle)?;
            remaining -= want as u64;
            self.send_client_data(Slice::whole(handle));
        }
        Ok(())
    }

    pub fn has_pending_send(&self) -> bool {
        !self.send_queue.is_empty()
    }

    /// `registerConnFree` -- pushes a cleanup to run, LIFO, at `finish`.
    pub fn register_cleanup<F: FnOnce() + Send + 'static>(&mut self, f: F) {
        self.cleanup.push(Box::new(f));
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// `finishConn` -- pops cleanups LIFO, drops protocol/app data and any
    /// unflushed slices, and marks the conn finished. Idempotent: a second
    /// call on an already-finished conn is a no-op (spec.md §8).
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        while let Some(cleanup) = self.cleanup.pop() {
            cleanup();
        }
        self.protocol_data = None;
        self.app_data = None;
        self.send_queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn cleanups_run_lifo_exactly_once() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut conn = Conn::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            conn.register_cleanup(move || order.lock().unwrap().push(i));
        }
        conn.finish();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);

        // Second finish is a no-op: nothing re-runs.
        conn.finish();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn send_queue_drains_in_enqueue_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut conn = Conn::new();
        conn.send_client_data(Slice::from_vec(b"first".to_vec()));
        conn.send_client_data(Slice::from_vec(b"second".to_vec()));
        let _ = &calls;
        assert_eq!(conn.send_queue().pop_front().unwrap().bytes(), b"first");
        assert_eq!(conn.send_queue().pop_front().unwrap().bytes(), b"second");
    }

    #[test]
    fn send_client_file_chunks_across_the_pools_buffer_size() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let body: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();
        std::io::Write::write_all(&mut tmp, &body).unwrap();

        let pool = MbufPool::new(64);
        let mut conn = Conn::new();
        let mut file = tmp.reopen().unwrap();
        conn.send_client_file(&pool, &mut file, body.len() as u64)
            .unwrap();

        // 200 bytes over a 64-byte pool -> 4 chunks (3 full + 1 partial).
        assert_eq!(conn.send_queue.len(), 4);
        let reassembled: Vec<u8> = conn
            .send_queue
            .iter()
            .flat_map(|s| s.bytes().to_vec())
            .collect();
        assert_eq!(reassembled, body);
    }

    /// Simulates a short write (as a throttled socket would produce): drain
    /// one slice's worth of bytes a few at a time and confirm every buffer
    /// is freed back to the pool exactly once, never double-freed, by the
    /// time the conn finishes (spec.md §8 "every slice enqueued... is
    /// either fully written... or freed on teardown; no slice leaks and
    /// none is double-freed").
    #[test]
    fn send_client_file_frees_every_chunk_exactly_once_under_short_writes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let body = vec![7u8; 150];
        std::io::Write::write_all(&mut tmp, &body).unwrap();

        let pool = MbufPool::new(64);
        let mut conn = Conn::new();
        let mut file = tmp.reopen().unwrap();
        conn.send_client_file(&pool, &mut file, body.len() as u64)
            .unwrap();

        let mut drained = Vec::new();
        while let Some(slice) = conn.send_queue.front_mut() {
            // "Write" at most 10 bytes at a time, as a throttled socket
            // would accept.
            let n = slice.len().min(10);
            drained.extend_from_slice(&slice.bytes()[..n]);
            slice.advance(n);
            if slice.is_empty() {
                conn.send_queue.pop_front();
            }
        }
        assert_eq!(drained, body);
        assert_eq!(pool.free_count(), 3, "all three checked-out buffers return exactly once");

        conn.finish();
        assert_eq!(
            pool.free_count(),
            3,
            "finishing an already-drained conn must not double-free"
        );
    }
}
