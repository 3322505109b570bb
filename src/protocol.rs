//! Protocol registration and dispatch (spec.md §3 "Protocol registration",
//! §4.2, §6). Grounded directly in `register.c`'s `struct protocol` /
//! `ProtocolTable[]` -- one static table entry per pluggable wire protocol,
//! looked up by name.

use std::any::Any;

use crate::app::{AppCallResult, AppRegistry};
use crate::client::Client;
use crate::conn::Conn;

/// Outcome of feeding a chunk of bytes to a protocol's incremental parser.
/// Maps onto the C parser's `{0, 1, -1}` return convention (spec.md §4.2).
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// `0` -- this conn is fully parsed; finalize and dispatch.
    Complete,
    /// `1` -- need more bytes; keep the pending conn alive.
    NeedMore,
    /// `-1` -- malformed; fatal for this client.
    Malformed(String),
}

/// `struct protocol` -- pluggable bytes-to-conn parser plus per-conn
/// lifecycle hooks. One implementation per wire protocol (HTTP, Redis, ...).
pub trait Protocol: Sync + Send {
    fn name(&self) -> &'static str;

    /// `initProtocolData` -- allocates the parser's resumable state, stored
    /// opaquely on the conn (design note: "a state machine stored in the
    /// conn's protocol-data... not recursion on callbacks").
    fn init_protocol_data(&self) -> Box<dyn Any + Send>;

    /// `parser(conn, slice, *nparsed)` -- incremental, re-entrant per client.
    /// `nparsed` reports how many bytes of `input` were consumed; leftover
    /// bytes seed the next parse cycle and may begin a new conn on the same
    /// client (pipelining).
    fn parse(&self, conn: &mut Conn, input: &[u8], nparsed: &mut usize) -> ParseOutcome;

    /// `spotAppAndCall` -- given a fully-parsed conn, locate the app
    /// registered for it in `apps` and invoke `appCall`. Returns WRONG only
    /// if the app itself is unusable, never for an ordinary request-level
    /// failure (spec.md §4.3).
    fn spot_app_and_call(&self, apps: &AppRegistry, client: &mut Client, conn: &mut Conn) -> AppCallResult;

    /// `initProtocol` -- module-wide boot hook, run once at worker setup.
    fn init_protocol(&self) -> Result<(), String> {
        Ok(())
    }

    /// `deallocProtocol` -- module-wide teardown hook.
    fn dealloc_protocol(&self) {}
}

/// Immutable table of registered protocols, built once at boot
/// (`ProtocolTable[]` in `register.c`).
pub struct ProtocolTable {
    protocols: Vec<&'static dyn Protocol>,
}

impl ProtocolTable {
    pub fn new(protocols: Vec<&'static dyn Protocol>) -> Self {
        ProtocolTable { protocols }
    }

    pub fn by_name(&self, name: &str) -> Option<&'static dyn Protocol> {
        self.protocols.iter().copied().find(|p| p.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static dyn Protocol> + '_ {
        self.protocols.iter().copied()
    }

    pub fn init_all(&self) -> Result<(), (String, String)> {
        for p in &self.protocols {
            p.init_protocol().map_err(|e| (p.name().to_string(), e))?;
        }
        Ok(())
    }

    pub fn dealloc_all(&self) {
        for p in &self.protocols {
            p.dealloc_protocol();
        }
    }
}
