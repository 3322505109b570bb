//! Single-threaded, cooperative event-loop worker (spec.md §4.6). Grounded
//! in `HttpConnection::handle_read_phase`/`handle_write_phase`/
//! `handle_post_write_update`, generalized from the teacher's HTTP-only
//! connection to the protocol-agnostic `Client`/`Conn` pair. Handles many
//! mostly-idle connections at the price of forbidding blocking app calls.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpListener as StdTcpListener;
use std::time::{Duration, Instant};

use mio::net::TcpListener as MioTcpListener;
use mio::{Events, Interest, Poll, Token};
use proxy_log::{info, warn};

use crate::client::{Client, ClientSocket};
use crate::conn::Conn;
use crate::error::Result;
use crate::worker::{dispatch_ready_conns, drive_parser, Worker, WorkerProcess};

const CRON_INTERVAL: Duration = Duration::from_millis(250);

pub struct AsyncWorker {
    listener_protocols: HashMap<u16, &'static str>,
}

impl AsyncWorker {
    pub fn new(listener_protocols: HashMap<u16, &'static str>) -> Self {
        AsyncWorker { listener_protocols }
    }

    /// Accepts every pending connection on one ready listener, non-blocking
    /// until `WouldBlock` (edge-triggered readiness requires draining fully).
    fn accept_all(
        &self,
        poll: &Poll,
        process: &WorkerProcess,
        listener: &mut MioTcpListener,
        port: u16,
        next_token: &mut usize,
        clients: &mut HashMap<Token, Client>,
    ) {
        loop {
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    let Some(&proto_name) = self.listener_protocols.get(&port) else {
                        continue;
                    };
                    let Some(protocol) = process.protocols.by_name(proto_name) else {
                        warn!("no registered protocol named '{}'", proto_name);
                        continue;
                    };
                    let token = Token(*next_token);
                    *next_token += 1;
                    if poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)
                        .is_err()
                    {
                        continue;
                    }
                    let mut client = Client::new(
                        ClientSocket::NonBlocking(stream),
                        addr.ip().to_string(),
                        addr.port(),
                        true,
                    );
                    client.protocol = Some(protocol);
                    clients.insert(token, client);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("async worker accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Drains as much of a client's conn queue as the socket will currently
    /// accept, in FIFO order: a conn that still has unwritten bytes (or
    /// hasn't finished producing output) blocks every conn queued after it,
    /// so responses leave the wire in the order their conns completed
    /// parsing (spec.md §4.6 ordering guarantee).
    fn drain_sendable(&self, process: &mut WorkerProcess, client: &mut Client) {
        loop {
            let Some(mut conn) = client.conns.pop_front() else {
                break;
            };
            if conn.has_pending_send() {
                if let Err(e) = self.send_data(client, &mut conn) {
                    warn!("async worker write error to {}: {}", client.ip, e);
                    client.valid = false;
                    client.conns.push_front(conn);
                    break;
                }
            }
            if conn.has_pending_send() {
                client.conns.push_front(conn);
                break;
            }
            if conn.ready_send {
                conn.finish();
                process.record_conn_handled();
            } else {
                client.conns.push_front(conn);
                break;
            }
        }
    }

    fn handle_readable(&self, process: &WorkerProcess, client: &mut Client) {
        match self.recv_data(client) {
            Ok(_) => {}
            Err(e) => {
                warn!("async worker read error from {}: {}", client.ip, e);
                client.valid = false;
                return;
            }
        }
        if let Err(detail) = drive_parser(client) {
            warn!("malformed message from {}: {}", client.ip, detail);
            client.should_close = true;
        }
        dispatch_ready_conns(&process.apps, client);
    }

    fn reregister_interest(&self, poll: &Poll, token: Token, client: &mut Client) {
        let interest = if client.needs_send() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if let Some(stream) = client.socket.as_mio_mut() {
            let _ = poll.registry().reregister(stream, token, interest);
        }
    }
}

impl Worker for AsyncWorker {
    fn name(&self) -> &'static str {
        "AsyncWorker"
    }

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn send_data(&self, client: &mut Client, conn: &mut Conn) -> io::Result<usize> {
        let mut total = 0;
        while let Some(slice) = conn.send_queue().front_mut() {
            match client.socket.write(slice.bytes()) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    slice.advance(n);
                    if slice.is_empty() {
                        conn.send_queue().pop_front();
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if total > 0 {
            client.touch();
        }
        Ok(total)
    }

    fn recv_data(&self, client: &mut Client) -> io::Result<usize> {
        let mut total = 0usize;
        let mut buf = [0u8; crate::READ_BUF_SIZE];
        loop {
            match client.socket.read(&mut buf) {
                Ok(0) => {
                    client.should_close = true;
                    break;
                }
                Ok(n) => {
                    client.read_buf.extend_from_slice(&buf[..n]);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if total > 0 {
            client.touch();
        }
        Ok(total)
    }

    fn run(&mut self, process: &mut WorkerProcess, listeners: Vec<StdTcpListener>) -> Result<()> {
        self.setup()?;
        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(1024);

        let mut mio_listeners = Vec::new();
        for (i, listener) in listeners.into_iter().enumerate() {
            listener.set_nonblocking(true)?;
            let mut mio_listener = MioTcpListener::from_std(listener);
            let token = Token(i);
            let port = mio_listener.local_addr()?.port();
            poll.registry()
                .register(&mut mio_listener, token, Interest::READABLE)?;
            mio_listeners.push((token, mio_listener, port));
        }
        let mut next_token = mio_listeners.len();
        let mut clients: HashMap<Token, Client> = HashMap::new();

        info!(
            "async worker {} ready, {} listener(s)",
            process.pid,
            mio_listeners.len()
        );

        let mut last_cron = Instant::now();
        loop {
            if let Err(e) = poll.poll(&mut events, Some(CRON_INTERVAL)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                let token = event.token();

                if let Some((_, listener, port)) =
                    mio_listeners.iter_mut().find(|(t, _, _)| *t == token)
                {
                    self.accept_all(&poll, process, listener, *port, &mut next_token, &mut clients);
                    continue;
                }

                let Some(client) = clients.get_mut(&token) else {
                    continue;
                };

                if event.is_readable() {
                    self.handle_readable(process, client);
                }
                if event.is_writable() || client.needs_send() {
                    self.drain_sendable(process, client);
                }

                if client.ready_to_free() {
                    if let Some(mut client) = clients.remove(&token) {
                        if let Some(stream) = client.socket.as_mio_mut() {
                            let _ = poll.registry().deregister(stream);
                        }
                        client.free();
                    }
                } else {
                    self.reregister_interest(&poll, token, client);
                }
            }

            if last_cron.elapsed() >= CRON_INTERVAL {
                last_cron = Instant::now();
                process.cron_tick(clients.len() as u32);

                let idle_timeout = process.idle_timeout;
                let timed_out: Vec<Token> = clients
                    .iter()
                    .filter(|(_, c)| c.idle_for() > idle_timeout)
                    .map(|(t, _)| *t)
                    .collect();
                for token in timed_out {
                    if let Some(mut client) = clients.remove(&token) {
                        client.should_close = true;
                        self.drain_sendable(process, &mut client);
                        if let Some(stream) = client.socket.as_mio_mut() {
                            let _ = poll.registry().deregister(stream);
                        }
                        client.free();
                    }
                }
            }
        }
    }
}
