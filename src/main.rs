//! wheatd master/worker entrypoint (SPEC_FULL.md component #10 "Master/
//! process fan-out"). Reads the config file named on the command line (or
//! `wheatd.yaml` by default), forks `worker_processes` children -- each
//! binds its own `SO_REUSEPORT` socket per listener so the kernel load-
//! balances accepts across the fleet -- then re-enters each child as the
//! configured worker (`SyncWorker`/`AsyncWorker`). The parent stays a thin
//! supervisor: reap exited children, drain the stats channel for liveness,
//! nothing more (spec.md §1 Non-goals: "master fork/supervision mechanics
//! beyond process fan-out" is the line, and this is exactly that line).

use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, getpid, ForkResult, Pid};
use parser::FromYaml;
use proxy_log::{errors, info, warn};
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};

use wheatd::app::AppRegistry;
use wheatd::apps;
use wheatd::config::display::display_config;
use wheatd::config::validate::validate_listeners;
use wheatd::config::{AppConfig, ListenerConfig};
use wheatd::error::{Error, Result, WORKER_BOOT_ERROR};
use wheatd::protocol::ProtocolTable;
use wheatd::protocols;
use wheatd::stats::{StatsChannel, StatsReader};
use wheatd::worker::{AsyncWorker, SyncWorker, Worker, WorkerProcess};

fn load_config() -> Result<AppConfig> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "wheatd.yaml".to_string());
    let text = std::fs::read_to_string(&path).map_err(Error::Io)?;
    let mut config = AppConfig::from_str(&text)?;
    config.listeners = validate_listeners(config.listeners);
    if config.listeners.is_empty() {
        return Err(Error::Other(
            "no valid listeners remain after conflict validation".to_string(),
        ));
    }
    Ok(config)
}

/// Binds one `SO_REUSEPORT` socket per configured listener. Called once per
/// worker process, post-fork, so every worker accepts independently off
/// the same `(host, port)` pairs.
fn bind_listeners(listeners: &[ListenerConfig]) -> Result<Vec<StdTcpListener>> {
    let mut bound = Vec::with_capacity(listeners.len());
    for listener in listeners {
        let addr: SocketAddr = format!("{}:{}", listener.host, listener.port).parse()?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(SockProtocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_reuse_port(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;
        bound.push(socket.into());
    }
    Ok(bound)
}

fn listener_protocols(listeners: &[ListenerConfig]) -> HashMap<u16, &'static str> {
    let mut map = HashMap::new();
    for listener in listeners {
        let name: &'static str = if listener.protocol == "redis" { "redis" } else { "http" };
        map.insert(listener.port, name);
    }
    map
}

/// Builds the protocol/app registries and runs the configured worker model
/// until the master dies or a fatal boot error occurs. Entered once per
/// forked child.
fn run_worker(config: &AppConfig, stats: Option<StatsChannel>) -> Result<()> {
    let protocol_table = ProtocolTable::new(protocols::all());
    protocol_table
        .init_all()
        .map_err(|(name, detail)| Error::ProtocolBootFailed(format!("{}: {}", name, detail)))?;

    let app_registry = AppRegistry::new(apps::all());
    apps::static_file::configure(config.static_root.clone());

    let listeners = bind_listeners(&config.listeners)?;
    let proto_by_port = listener_protocols(&config.listeners);

    let worker_name: &'static str = if config.worker_name == "async" { "async" } else { "sync" };
    let mut worker: Box<dyn Worker> = if worker_name == "async" {
        Box::new(AsyncWorker::new(proto_by_port))
    } else {
        Box::new(SyncWorker::new(proto_by_port))
    };

    let mut process = WorkerProcess::new(
        worker_name,
        protocol_table,
        app_registry,
        config.mbuf_size,
        config.idle_timeout(),
        config.stats_interval(),
        stats,
    );

    let result = worker.run(&mut process, listeners);
    process.apps.dealloc_all();
    process.protocols.dealloc_all();
    result
}

fn supervise(children: Vec<Pid>, mut stats_readers: Vec<StatsReader>) {
    let mut alive: HashSet<Pid> = children.into_iter().collect();
    while !alive.is_empty() {
        for reader in &mut stats_readers {
            let _ = reader.poll();
        }

        let mut exited = Vec::new();
        for pid in &alive {
            match waitpid(*pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(p, code)) => {
                    warn!("worker {} exited with status {}", p, code);
                    exited.push(*pid);
                }
                Ok(WaitStatus::Signaled(p, sig, _)) => {
                    warn!("worker {} killed by signal {:?}", p, sig);
                    exited.push(*pid);
                }
                _ => {}
            }
        }
        for pid in exited {
            alive.remove(&pid);
        }
        if !alive.is_empty() {
            std::thread::sleep(Duration::from_millis(250));
        }
    }
    info!("all workers exited, master shutting down");
}

fn run() -> Result<()> {
    let config = load_config()?;
    display_config(&config);

    let worker_processes = config.worker_processes.max(1);
    let mut children = Vec::with_capacity(worker_processes);
    let mut stats_readers = Vec::with_capacity(worker_processes);

    for _ in 0..worker_processes {
        let (master_side, worker_side) = UnixStream::pair()?;

        // SAFETY: the parent branch only records the child's pid and a
        // socket handle before looping back to fork again; the child
        // branch does no allocation-sensitive work before `run_worker`
        // re-establishes its own state -- the narrow window nix's `fork`
        // warns about.
        match unsafe { fork()? } {
            ForkResult::Parent { child } => {
                drop(worker_side);
                children.push(child);
                stats_readers.push(StatsReader::new(master_side)?);
            }
            ForkResult::Child => {
                drop(master_side);
                let stats = StatsChannel::new(worker_side).ok();
                match run_worker(&config, stats) {
                    Ok(()) => std::process::exit(0),
                    Err(e) => {
                        errors!("worker boot failed: {}", e);
                        std::process::exit(WORKER_BOOT_ERROR);
                    }
                }
            }
        }
    }

    info!(
        "master pid {} supervising {} worker process(es)",
        getpid(),
        children.len()
    );
    supervise(children, stats_readers);
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        errors!("{}", e);
        std::process::exit(WORKER_BOOT_ERROR);
    }
}
