//! Application registration and dispatch (spec.md §3 "App registration",
//! §4.3, §6). Grounded in `register.c`'s `struct app` / `appTable[]`.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::client::Client;
use crate::conn::Conn;

/// Result of `appCall`. `Wrong` means the app itself is unusable (e.g. a
/// corrupted init) and the worker will unload/deinit it; an ordinary
/// request-level failure is `Ok` with a protocol-level error response queued
/// -- never `Wrong` (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCallResult {
    Ok,
    Wrong,
}

/// `struct app` -- a conn-to-response handler registered under a specific
/// protocol.
pub trait App: Sync + Send {
    fn name(&self) -> &'static str;
    fn proto_belong(&self) -> &'static str;

    /// `appCall(conn, arg)`. May finish synchronously (all response slices
    /// enqueued before returning) or partially, leaving `conn.ready_send`
    /// false to be resumed on the next event (async worker apps only).
    fn app_call(&self, client: &mut Client, conn: &mut Conn, arg: Option<&dyn Any>) -> AppCallResult;

    /// `initApp(protocol)` -- run once, the first time a conn binds to this
    /// app.
    fn init_app(&self) -> Result<(), String> {
        Ok(())
    }

    /// `deallocApp` -- run once an app is unloaded (boot failure or a
    /// `Wrong` return from `appCall`).
    fn dealloc_app(&self) {}

    /// `initAppData(conn)` -- per-conn app-private state constructor.
    fn init_app_data(&self) -> Box<dyn Any + Send> {
        Box::new(())
    }

    /// `appCron()` -- periodic per-app housekeeping, invoked by every
    /// worker's cron tick for every currently-initialized app.
    fn app_cron(&self) {}
}

/// One row of the app table plus its `is_init` latch (spec.md §3: "a
/// one-shot `is_init` latch").
pub struct AppEntry {
    pub app: &'static dyn App,
    is_init: AtomicBool,
}

impl AppEntry {
    pub fn new(app: &'static dyn App) -> Self {
        AppEntry {
            app,
            is_init: AtomicBool::new(false),
        }
    }

    pub fn is_init(&self) -> bool {
        self.is_init.load(Ordering::Acquire)
    }
}

/// Immutable table of registered apps, built once at boot (`appTable[]`).
pub struct AppRegistry {
    entries: Vec<AppEntry>,
}

impl AppRegistry {
    pub fn new(apps: Vec<&'static dyn App>) -> Self {
        AppRegistry {
            entries: apps.into_iter().map(AppEntry::new).collect(),
        }
    }

    pub fn by_protocol_and_name(&self, protocol: &str, name: &str) -> Option<&AppEntry> {
        self.entries
            .iter()
            .find(|e| e.app.proto_belong() == protocol && e.app.name() == name)
    }

    /// Lazily runs `initApp` the first time a conn is dispatched to this
    /// app, flipping the `is_init` latch.
    pub fn ensure_init(&self, entry: &AppEntry) -> Result<(), String> {
        if entry.is_init.load(Ordering::Acquire) {
            return Ok(());
        }
        entry.app.init_app()?;
        entry.is_init.store(true, Ordering::Release);
        Ok(())
    }

    /// An app returned `Wrong`: clear `is_init` and call `deallocApp` exactly
    /// once, per spec.md §8's testable property.
    pub fn mark_wrong(&self, entry: &AppEntry) {
        if entry
            .is_init
            .swap(false, Ordering::AcqRel)
        {
            entry.app.dealloc_app();
        }
    }

    pub fn cron_all(&self) {
        for entry in &self.entries {
            if entry.is_init() {
                entry.app.app_cron();
            }
        }
    }

    pub fn dealloc_all(&self) {
        for entry in &self.entries {
            if entry.is_init.swap(false, Ordering::AcqRel) {
                entry.app.dealloc_app();
            }
        }
    }
}

/// `spotAppAndCall`'s shared body (spec.md §4.2/§6): resolve `app_name` under
/// `protocol_name` in the registry, lazily run `initApp`, bind the conn to
/// the app and its fresh per-conn app data, then invoke `appCall`. A lookup
/// miss or a failed `initApp` is reported as `Wrong` rather than panicking --
/// the protocol's own `spot_app_and_call` has no other way to fail.
pub fn dispatch(
    apps: &AppRegistry,
    protocol_name: &str,
    app_name: &str,
    client: &mut Client,
    conn: &mut Conn,
) -> AppCallResult {
    let Some(entry) = apps.by_protocol_and_name(protocol_name, app_name) else {
        return AppCallResult::Wrong;
    };
    if apps.ensure_init(entry).is_err() {
        return AppCallResult::Wrong;
    }
    conn.app = Some(entry.app);
    conn.app_data = Some(entry.app.init_app_data());
    entry.app.app_call(client, conn, None)
}
