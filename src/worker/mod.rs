//! Worker-process scaffold shared by both I/O models (spec.md §4.7, §6).
//! `WorkerProcess` is the `struct workerProcess` context threaded explicitly
//! through the worker instead of held as an ambient global (design notes,
//! §9): protocol/app tables, pid/ppid, start time, the mbuf pool and the
//! stats channel.

pub mod async_worker;
pub mod sync_worker;

use std::io;
use std::time::{Duration, Instant};

use nix::unistd::{getpid, getppid};
use proxy_log::{info, warn};

use crate::app::AppRegistry;
use crate::client::Client;
use crate::conn::Conn;
use crate::error::Result;
use crate::protocol::ProtocolTable;
use crate::slice::MbufPool;
use crate::stats::{StatsChannel, StatsPacket};

pub use async_worker::AsyncWorker;
pub use sync_worker::SyncWorker;

/// `struct workerProcess` -- process-wide state, passed explicitly rather
/// than held in globals.
pub struct WorkerProcess {
    pub protocols: ProtocolTable,
    pub apps: AppRegistry,
    pub worker_name: &'static str,
    pub pid: i32,
    pub ppid: i32,
    pub start_time: Instant,
    pub mbuf_pool: MbufPool,
    pub idle_timeout: Duration,
    pub stats_interval: Duration,
    stats: Option<StatsChannel>,
    last_stats_send: Instant,
    conns_handled: u64,
}

impl WorkerProcess {
    pub fn new(
        worker_name: &'static str,
        protocols: ProtocolTable,
        apps: AppRegistry,
        mbuf_buf_size: usize,
        idle_timeout: Duration,
        stats_interval: Duration,
        stats: Option<StatsChannel>,
    ) -> Self {
        WorkerProcess {
            protocols,
            apps,
            worker_name,
            pid: getpid().as_raw(),
            ppid: getppid().as_raw(),
            start_time: Instant::now(),
            mbuf_pool: MbufPool::new(mbuf_buf_size),
            idle_timeout,
            stats_interval,
            stats,
            last_stats_send: Instant::now(),
            conns_handled: 0,
        }
    }

    pub fn record_conn_handled(&mut self) {
        self.conns_handled += 1;
    }

    /// `workerProcessCron(fake_func, data)` -- ticks the shared housekeeping:
    /// app cron callbacks, a stats packet on the refresh timer, and a check
    /// that the master process is still alive.
    pub fn cron_tick(&mut self, active_conns: u32) {
        self.apps.cron_all();

        if self.last_stats_send.elapsed() >= self.stats_interval {
            self.last_stats_send = Instant::now();
            if let Some(stats) = &mut self.stats {
                let packet = StatsPacket {
                    pid: self.pid as u32,
                    conns_handled: self.conns_handled,
                    conns_active: active_conns,
                };
                if let Err(e) = stats.send(&packet) {
                    warn!("worker {} failed writing stats packet: {}", self.pid, e);
                }
            }
        }

        if getppid().as_raw() != self.ppid {
            warn!("worker {} detected master died (ppid changed), exiting", self.pid);
            std::process::exit(0);
        }
    }
}

/// `struct worker` -- `{name, setup, cron, sendData, recvData}`. Exactly one
/// is selected per process at startup (spec.md §3 "Worker registration").
pub trait Worker {
    fn name(&self) -> &'static str;

    /// Allocates whatever per-worker scratch the I/O model needs (an event
    /// center for the async worker, nothing for the sync worker).
    fn setup(&mut self) -> Result<()>;

    /// `sendData(conn)` -- drains as much of `conn`'s queue as the socket
    /// will currently accept. Returns bytes written, or an I/O error.
    fn send_data(&self, client: &mut Client, conn: &mut Conn) -> io::Result<usize>;

    /// `recvData(client)` -- reads available bytes into the client's read
    /// buffer. Returns bytes read (`0` means EOF), or an I/O error.
    fn recv_data(&self, client: &mut Client) -> io::Result<usize>;

    /// Runs the worker's full accept/process/teardown loop until the master
    /// dies or a fatal boot error occurs.
    fn run(&mut self, process: &mut WorkerProcess, listeners: Vec<std::net::TcpListener>) -> Result<()>;
}

/// Drains a single client's read buffer through its bound protocol's parser,
/// producing zero or more fully-parsed conns and leaving any pipelined
/// remainder ready to seed the next one. Shared by both worker models --
/// this is the one piece of §4.2 ("incremental parsing") that does not
/// differ between sync and async.
pub fn drive_parser(client: &mut Client) -> std::result::Result<(), String> {
    let protocol = match client.protocol {
        Some(p) => p,
        None => return Ok(()),
    };
    loop {
        if client.read_buf.is_empty() {
            break;
        }
        let mut conn = client.pending.take().unwrap_or_else(|| {
            let mut c = Conn::new();
            c.protocol_data = Some(protocol.init_protocol_data());
            c
        });

        let mut nparsed = 0usize;
        let outcome = protocol.parse(&mut conn, &client.read_buf, &mut nparsed);
        client.read_buf.drain(..nparsed);

        match outcome {
            crate::protocol::ParseOutcome::NeedMore => {
                client.pending = Some(conn);
                break;
            }
            crate::protocol::ParseOutcome::Malformed(detail) => {
                client.should_close = true;
                return Err(detail);
            }
            crate::protocol::ParseOutcome::Complete => {
                client.conns.push_back(conn);
                if nparsed == 0 {
                    // A well-behaved parser always consumes something on
                    // `Complete`; bail instead of looping forever.
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Dispatches every fully-parsed conn on a client that hasn't been handed to
/// an app yet (spec.md §4.2 "On 0, the worker calls spotAppAndCall"). On
/// `Wrong`, clears the app's `is_init` latch and runs `deallocApp` exactly
/// once via `AppRegistry::mark_wrong` (spec.md §8).
pub fn dispatch_ready_conns(apps: &AppRegistry, client: &mut Client) {
    let protocol = match client.protocol {
        Some(p) => p,
        None => return,
    };
    // Conns are swapped out so `client` can be passed mutably to each
    // dispatch call without aliasing the very queue being walked.
    let mut conns = std::mem::take(&mut client.conns);
    for conn in conns.iter_mut() {
        if conn.app.is_none() {
            let result = protocol.spot_app_and_call(apps, client, conn);
            if result == crate::app::AppCallResult::Wrong {
                info!("app dispatch for protocol '{}' returned WRONG", protocol.name());
                if let Some(app) = conn.app {
                    if let Some(entry) = apps.by_protocol_and_name(app.proto_belong(), app.name()) {
                        apps.mark_wrong(entry);
                    }
                }
            }
        }
    }
    client.conns = conns;
}
