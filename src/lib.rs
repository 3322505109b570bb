//! Worker-runtime library: connection/request pipeline, protocol and app
//! registries, and the two worker I/O models (sync, async). `src/main.rs`
//! is the thin master/fan-out entrypoint built on top of this crate.

pub mod app;
pub mod apps;
pub mod client;
pub mod conn;
pub mod config;
pub mod error;
pub mod protocol;
pub mod protocols;
pub mod slice;
pub mod stats;
pub mod worker;

/// Per-`read()` stack buffer size for both worker I/O models, grounded in
/// the teacher's `prelude.rs` `READ_BUF_SIZE`/`MAX_READ_DATA` constants.
pub const READ_BUF_SIZE: usize = 4096;
