//! One-thread, one-connection-at-a-time blocking worker (spec.md §4.5).
//! Grounded in `HttpConnection::read_data`/`write_data`, made genuinely
//! blocking instead of non-blocking-with-`WouldBlock`: trivially correct,
//! no shared state between clients, chosen when apps cannot yield (e.g. an
//! embedded scripting runtime).

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpListener as StdTcpListener;
use std::time::Duration;

use proxy_log::{errors, info, warn};

use crate::client::{Client, ClientSocket};
use crate::conn::Conn;
use crate::error::Result;
use crate::worker::{dispatch_ready_conns, drive_parser, Worker, WorkerProcess};

pub struct SyncWorker {
    listener_protocols: std::collections::HashMap<u16, &'static str>,
}

impl SyncWorker {
    pub fn new(listener_protocols: std::collections::HashMap<u16, &'static str>) -> Self {
        SyncWorker { listener_protocols }
    }

    /// Runs one client end-to-end: read until at least one conn parses (or
    /// the client errors/closes), dispatch through the app, drain the send
    /// queue with blocking writes, finish the conn, loop for the next
    /// pipelined conn.
    fn serve_client(&self, process: &mut WorkerProcess, client: &mut Client) {
        loop {
            match self.recv_data(client) {
                Ok(0) => {
                    client.should_close = true;
                }
                Ok(_) => client.touch(),
                Err(e) => {
                    warn!("sync worker read error from {}: {}", client.ip, e);
                    client.valid = false;
                }
            }

            if let Err(detail) = drive_parser(client) {
                warn!("malformed message from {}: {}", client.ip, detail);
                client.should_close = true;
            }
            dispatch_ready_conns(&process.apps, client);

            // Flush every conn that now has output, oldest first, so
            // responses leave the wire in arrival order (spec.md §4.5).
            while let Some(mut conn) = client.conns.pop_front() {
                if let Err(e) = self.drain_conn_blocking(client, &mut conn) {
                    warn!("sync worker write error to {}: {}", client.ip, e);
                    client.valid = false;
                }
                if conn.ready_send && !conn.has_pending_send() {
                    conn.finish();
                    process.record_conn_handled();
                } else {
                    // App left this conn mid-flight (shouldn't happen for a
                    // sync-only app, but keep the invariant anyway: put it
                    // back at the front and stop this sweep).
                    client.conns.push_front(conn);
                    break;
                }
            }

            if client.should_close {
                // Closing for good: an incomplete pending parse will never
                // see its remaining bytes, so drop it rather than spin.
                if let Some(mut pending) = client.pending.take() {
                    pending.finish();
                }
            }

            if client.ready_to_free() || !client.valid {
                return;
            }
            // Loop back for the next pipelined conn, or block on fresh bytes.
        }
    }

    fn drain_conn_blocking(&self, client: &mut Client, conn: &mut Conn) -> io::Result<()> {
        while conn.has_pending_send() {
            let n = self.send_data(client, conn)?;
            if n == 0 {
                break;
            }
        }
        Ok(())
    }
}

impl Worker for SyncWorker {
    fn name(&self) -> &'static str {
        "SyncWorker"
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
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        client.touch();
        Ok(total)
    }

    fn recv_data(&self, client: &mut Client) -> io::Result<usize> {
        let mut buf = [0u8; crate::READ_BUF_SIZE];
        match client.socket.read(&mut buf) {
            Ok(n) => {
                client.read_buf.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Err(e) => Err(e),
        }
    }

    fn run(&mut self, process: &mut WorkerProcess, listeners: Vec<StdTcpListener>) -> Result<()> {
        self.setup()?;
        for listener in &listeners {
            listener.set_nonblocking(true)?;
        }
        info!(
            "sync worker {} ready, {} listener(s)",
            process.pid,
            listeners.len()
        );

        loop {
            let mut accepted_any = false;
            for listener in &listeners {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        accepted_any = true;
                        let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
                        let proto_name = self.listener_protocols.get(&port).copied();
                        let Some(proto_name) = proto_name else {
                            continue;
                        };
                        let Some(protocol) = process.protocols.by_name(proto_name) else {
                            errors!("no registered protocol named '{}'", proto_name);
                            continue;
                        };
                        if stream.set_nonblocking(false).is_err() {
                            continue;
                        }
                        let mut client = Client::new(
                            ClientSocket::Blocking(stream),
                            addr.ip().to_string(),
                            addr.port(),
                            true,
                        );
                        client.protocol = Some(protocol);
                        self.serve_client(process, &mut client);
                        client.free();
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => warn!("sync worker accept error: {}", e),
                }
            }
            if !accepted_any {
                process.cron_tick(0);
                std::thread::sleep(Duration::from_millis(25));
            }
        }
    }
}
