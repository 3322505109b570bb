//! Built-in wire protocols (spec.md §4.2 generalized to two concrete
//! parsers). Each module owns a single `'static` instance registered into
//! the `ProtocolTable` at boot.

pub mod http;
pub mod redis;

use crate::protocol::Protocol;

pub fn all() -> Vec<&'static dyn Protocol> {
    vec![&http::HTTP_PROTOCOL, &redis::REDIS_PROTOCOL]
}
