//! End-to-end worker tests driven with plain `std::net::TcpStream`, in the
//! style the teacher's own `tests/http_tests.rs`/`tests/server_chunked.rs`
//! used: no async test harness, just a real bound socket and a real
//! client connection (spec.md §8 scenarios 1 and 5, SPEC_FULL.md §1
//! "[ADDED] Test tooling").

use std::any::Any;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use wheatd::app::{dispatch, App, AppCallResult, AppRegistry};
use wheatd::apps;
use wheatd::client::{Client, ClientSocket};
use wheatd::conn::Conn;
use wheatd::protocol::{ParseOutcome, Protocol, ProtocolTable};
use wheatd::protocols;
use wheatd::worker::{dispatch_ready_conns, SyncWorker, Worker, WorkerProcess};

fn spawn_sync_worker(proto_name: &'static str) -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    std::thread::spawn(move || {
        let mut listener_protocols = HashMap::new();
        listener_protocols.insert(port, proto_name);

        let protocol_table = ProtocolTable::new(protocols::all());
        protocol_table.init_all().unwrap();
        let app_registry = AppRegistry::new(apps::all());

        let mut process = WorkerProcess::new(
            "sync",
            protocol_table,
            app_registry,
            4096,
            Duration::from_secs(30),
            Duration::from_secs(5),
            None,
        );

        let mut worker = SyncWorker::new(listener_protocols);
        let _ = worker.run(&mut process, vec![listener]);
    });

    // Give the worker thread a moment to start accepting.
    std::thread::sleep(Duration::from_millis(50));
    port
}

#[test]
fn http_get_against_static_root_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("index.html"), b"hello from disk").unwrap();
    apps::static_file::configure(tmp.path());

    let port = spawn_sync_worker("http");

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("hello from disk"));
}

/// spec.md §8 scenario 2: a 10 KiB file served whole, with a `Content-Length`
/// matching the body exactly -- the `Conn::send_client_file` path
/// (`apps/static_file.rs`), not the single-`Vec` `build_response` path the
/// error branches use.
#[test]
fn http_get_static_file_reports_accurate_content_length() {
    let tmp = tempfile::tempdir().unwrap();
    let body: Vec<u8> = (0..10 * 1024u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(tmp.path().join("blob.bin"), &body).unwrap();
    apps::static_file::configure(tmp.path());

    let port = spawn_sync_worker("http");

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .write_all(b"GET /blob.bin HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
        if raw.len() >= body.len() + 200 {
            break;
        }
    }

    let header_end = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let header = String::from_utf8_lossy(&raw[..header_end]);
    assert!(header.starts_with("HTTP/1.1 200 OK"));
    let content_length: usize = header
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(content_length, body.len());
    assert_eq!(&raw[header_end..], body.as_slice());
}

#[test]
fn http_missing_file_is_404() {
    let tmp = tempfile::tempdir().unwrap();
    apps::static_file::configure(tmp.path());

    let port = spawn_sync_worker("http");

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .write_all(b"GET /nope.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 404 Not Found"));
}

#[test]
fn redis_set_then_get_round_trips_over_the_wire() {
    let port = spawn_sync_worker("redis");
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();

    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .unwrap();
    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"+OK\r\n");

    stream
        .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
        .unwrap();
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"$3\r\nbar\r\n");
}

#[test]
fn redis_pipelined_pings_are_answered_in_order() {
    let port = spawn_sync_worker("redis");
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();

    stream
        .write_all(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n")
        .unwrap();

    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"+PONG\r\n+PONG\r\n");
}

/// A stub app that goes `Wrong` on its third call, standing in for spec.md
/// §8 end-to-end scenario 6 ("app failure contagion"). Counts are plain
/// `'static` atomics, the same shape `apps/redis_app.rs`'s `Mutex<HashMap>`
/// uses for process-lifetime app state.
struct FlakyApp {
    calls: AtomicUsize,
    app_data_inits: AtomicUsize,
    inits: AtomicUsize,
    deinits: AtomicUsize,
}

static FLAKY_APP: FlakyApp = FlakyApp {
    calls: AtomicUsize::new(0),
    app_data_inits: AtomicUsize::new(0),
    inits: AtomicUsize::new(0),
    deinits: AtomicUsize::new(0),
};

impl App for FlakyApp {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn proto_belong(&self) -> &'static str {
        "stub"
    }

    fn init_app(&self) -> Result<(), String> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dealloc_app(&self) {
        self.deinits.fetch_add(1, Ordering::SeqCst);
    }

    fn init_app_data(&self) -> Box<dyn Any + Send> {
        self.app_data_inits.fetch_add(1, Ordering::SeqCst);
        Box::new(7u32)
    }

    fn app_call(&self, _client: &mut Client, conn: &mut Conn, _arg: Option<&dyn Any>) -> AppCallResult {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 3 {
            return AppCallResult::Wrong;
        }
        conn.ready_send = true;
        AppCallResult::Ok
    }
}

/// A minimal protocol whose every conn is already "parsed" -- only
/// `spot_app_and_call` matters here, routed through `app::dispatch` exactly
/// the way `protocols/redis.rs` routes to its one app.
struct StubProtocol;

static STUB_PROTOCOL: StubProtocol = StubProtocol;

impl Protocol for StubProtocol {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn init_protocol_data(&self) -> Box<dyn Any + Send> {
        Box::new(())
    }

    fn parse(&self, _conn: &mut Conn, _input: &[u8], nparsed: &mut usize) -> ParseOutcome {
        *nparsed = 0;
        ParseOutcome::Complete
    }

    fn spot_app_and_call(&self, apps: &AppRegistry, client: &mut Client, conn: &mut Conn) -> AppCallResult {
        dispatch(apps, "stub", "flaky", client, conn)
    }
}

/// A `Client` needs a real socket; its other end is never driven here since
/// this test only exercises `dispatch_ready_conns`, not I/O.
fn dummy_client() -> (Client, TcpStream) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let keep_alive = TcpStream::connect(addr).unwrap();
    let (server_side, _) = listener.accept().unwrap();
    let client = Client::new(ClientSocket::Blocking(server_side), addr.ip().to_string(), addr.port(), true);
    (client, keep_alive)
}

#[test]
fn app_returning_wrong_clears_init_and_deallocs_exactly_once() {
    let apps = AppRegistry::new(vec![&FLAKY_APP]);
    let (mut client, _keep_alive) = dummy_client();
    client.protocol = Some(&STUB_PROTOCOL);

    for _ in 0..4 {
        client.conns.push_back(Conn::new());
    }

    dispatch_ready_conns(&apps, &mut client);

    assert_eq!(FLAKY_APP.calls.load(Ordering::SeqCst), 4, "all four conns reached app_call");
    assert_eq!(
        FLAKY_APP.inits.load(Ordering::SeqCst),
        2,
        "init_app reruns once the registry re-selects the app after Wrong"
    );
    assert_eq!(
        FLAKY_APP.deinits.load(Ordering::SeqCst),
        1,
        "dealloc_app runs exactly once for the Wrong call"
    );
    assert_eq!(
        FLAKY_APP.app_data_inits.load(Ordering::SeqCst),
        4,
        "every dispatched conn gets its own per-conn app data"
    );

    let ready: Vec<bool> = client.conns.iter().map(|c| c.ready_send).collect();
    assert_eq!(
        ready,
        vec![true, true, false, true],
        "the first two and the fourth conn complete normally; the third (Wrong) never marks ready_send"
    );

    let entry = apps.by_protocol_and_name("stub", "flaky").unwrap();
    assert!(
        entry.is_init(),
        "a later conn on the same protocol/app re-selects cleanly and leaves it initialized again"
    );
}
