//! Per-socket connection state (spec.md §3 "Client", §4.7 "createClient").

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Instant;

use crate::conn::Conn;
use crate::protocol::Protocol;

/// Either end of the socket each worker model actually drives: the sync
/// worker wants a genuinely blocking `std::net::TcpStream`, the async worker
/// wants an `mio`-registered, always-nonblocking one. `Client` is shared
/// between both I/O models (spec.md §4.7's scaffold is worker-agnostic), so
/// it holds whichever variant its owning worker created it with.
pub enum ClientSocket {
    Blocking(std::net::TcpStream),
    NonBlocking(mio::net::TcpStream),
}

impl ClientSocket {
    pub fn as_mio_mut(&mut self) -> Option<&mut mio::net::TcpStream> {
        match self {
            ClientSocket::NonBlocking(s) => Some(s),
            ClientSocket::Blocking(_) => None,
        }
    }

    pub fn shutdown(&self) {
        let _ = match self {
            ClientSocket::Blocking(s) => s.shutdown(std::net::Shutdown::Both),
            ClientSocket::NonBlocking(s) => s.shutdown(std::net::Shutdown::Both),
        };
    }
}

impl Read for ClientSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ClientSocket::Blocking(s) => s.read(buf),
            ClientSocket::NonBlocking(s) => s.read(buf),
        }
    }
}

impl Write for ClientSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ClientSocket::Blocking(s) => s.write(buf),
            ClientSocket::NonBlocking(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ClientSocket::Blocking(s) => s.flush(),
            ClientSocket::NonBlocking(s) => s.flush(),
        }
    }
}

/// `struct client` -- one accepted or dialled socket and its parsing/sending
/// state.
pub struct Client {
    pub socket: ClientSocket,
    pub ip: String,
    pub port: u16,
    pub last_io: Instant,
    pub name: Option<String>,
    /// Set exactly once, at first byte or dial time (invariant 1).
    pub protocol: Option<&'static dyn Protocol>,
    /// The conn currently being parsed into, if any.
    pub pending: Option<Conn>,
    /// FIFO of fully-parsed conns awaiting dispatch/send.
    pub conns: VecDeque<Conn>,
    /// Bytes read off the wire but not yet consumed by the parser.
    pub read_buf: Vec<u8>,
    /// Opaque per-client slot owned by whichever app is currently active.
    pub client_data: Option<Box<dyn std::any::Any + Send>>,
    notify: Option<Box<dyn FnOnce(&Client) + Send>>,
    pub is_outer: bool,
    pub should_close: bool,
    pub valid: bool,
}

impl Client {
    pub fn new(socket: ClientSocket, ip: String, port: u16, is_outer: bool) -> Self {
        Client {
            socket,
            ip,
            port,
            last_io: Instant::now(),
            name: None,
            protocol: None,
            pending: None,
            conns: VecDeque::new(),
            read_buf: Vec::with_capacity(4096),
            client_data: None,
            notify: None,
            is_outer,
            should_close: false,
            valid: true,
        }
    }

    /// `refreshClient` -- monotonically advances `last_io` (invariant 6).
    pub fn touch(&mut self) {
        self.last_io = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_io.elapsed()
    }

    /// `setClientFreeNotify` -- install the one-shot hook fired at free.
    pub fn set_free_notify<F: FnOnce(&Client) + Send + 'static>(&mut self, f: F) {
        self.notify = Some(Box::new(f));
    }

    /// `setClientClose` -- requests graceful close once in-flight conns
    /// finish flushing (spec.md §6). Apps already hold `&mut Client`
    /// alongside their `&mut Conn` in `appCall`, so this is a plain method
    /// rather than a free function keyed off the conn.
    pub fn set_client_close(&mut self) {
        self.should_close = true;
    }

    /// `connGet` -- starts a new outbound conn on a dialed (`is_outer ==
    /// false`) client, for an app that is itself a client of an upstream
    /// (spec.md §4.7: "the symmetric outbound helper... e.g. a Redis proxy
    /// app"). Pushed straight onto the parsed-conn FIFO since an
    /// app-initiated outbound conn has no protocol bytes to parse.
    pub fn conn_get(&mut self) -> &mut Conn {
        self.conns.push_back(Conn::new());
        self.conns.back_mut().expect("just pushed")
    }

    /// A client with any non-empty send queue across its conns needs write
    /// opportunities from its worker (invariant 5).
    pub fn needs_send(&self) -> bool {
        self.conns.iter().any(|c| c.has_pending_send())
    }

    /// `should_close` with no in-flight conns, or `!valid` -- the two
    /// conditions under which a client is ready for `freeClient`.
    pub fn ready_to_free(&self) -> bool {
        !self.valid || (self.should_close && self.pending.is_none() && self.conns.is_empty())
    }

    /// `freeClient` -- runs the notify hook exactly once and drops every
    /// still-queued conn (which, via `Conn::finish`, frees their buffers).
    pub fn free(mut self) {
        for mut conn in self.conns.drain(..) {
            conn.finish();
        }
        if let Some(mut pending) = self.pending.take() {
            pending.finish();
        }
        self.socket.shutdown();
        if let Some(notify) = self.notify.take() {
            notify(&self);
        }
    }
}
