use core::fmt;
use std::fmt::{Debug, Display, Formatter};

use parser::YamlError;

/// Crate-wide error type. Mirrors the error-kind taxonomy of the worker
/// runtime's error handling design: transient I/O never reaches here (it is
/// handled inline as `WouldBlock`); everything that does is either a boot-time
/// failure or a reason a client's teardown was triggered by something other
/// than its own protocol/app.
pub enum Error {
    Io(std::io::Error),
    Config(YamlError),
    AddrParse(std::net::AddrParseError),
    /// A protocol module failed its `initProtocol` hook.
    ProtocolBootFailed(String),
    /// An app module failed its `initApp` hook.
    AppBootFailed(String),
    /// A protocol parser reported malformed input (parser return `-1`).
    MalformedMessage(String),
    /// `setup()` failed for the selected worker; the one error kind that maps
    /// to the fixed `WORKER_BOOT_ERROR` exit code.
    WorkerBoot(String),
    Other(String),
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: ")?;
        match self {
            Error::Io(e) => write!(f, "{}", e),
            Error::Config(e) => write!(f, "{}", e),
            Error::AddrParse(e) => write!(f, "{}", e),
            Error::ProtocolBootFailed(name) => write!(f, "protocol '{}' failed to boot", name),
            Error::AppBootFailed(name) => write!(f, "app '{}' failed to boot", name),
            Error::MalformedMessage(detail) => write!(f, "malformed message: {}", detail),
            Error::WorkerBoot(detail) => write!(f, "worker boot failed: {}", detail),
            Error::Other(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<YamlError> for Error {
    fn from(e: YamlError) -> Self {
        Error::Config(e)
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Error::AddrParse(e)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Exit code mandated for a worker that fails to boot (spec.md §6).
pub const WORKER_BOOT_ERROR: i32 = 3;
