//! In-memory key/value store app (spec.md §4.3, SPEC_FULL.md **[ADDED]**).
//! Answers the four commands a minimal RESP-2 client actually exercises:
//! `PING`, `GET`, `SET`, `DEL`. Not a Redis clone -- just enough of the
//! protocol surface to demonstrate the app contract end-to-end against
//! `protocols/redis.rs`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::app::{App, AppCallResult};
use crate::client::Client;
use crate::conn::Conn;
use crate::protocols::redis::RedisParseState;
use crate::slice::Slice;

fn simple_string(s: &str) -> Vec<u8> {
    format!("+{}\r\n", s).into_bytes()
}

fn error(msg: &str) -> Vec<u8> {
    format!("-ERR {}\r\n", msg).into_bytes()
}

fn bulk_string(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn null_bulk_string() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

fn integer(n: i64) -> Vec<u8> {
    format!(":{}\r\n", n).into_bytes()
}

pub struct RedisApp {
    store: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

pub static REDIS_APP: RedisApp = RedisApp {
    store: Mutex::new(HashMap::new()),
};

impl App for RedisApp {
    fn name(&self) -> &'static str {
        "redis_kv"
    }

    fn proto_belong(&self) -> &'static str {
        "redis"
    }

    fn app_call(&self, _client: &mut Client, conn: &mut Conn, _arg: Option<&dyn Any>) -> AppCallResult {
        let Some(state) = conn
            .protocol_data
            .as_ref()
            .and_then(|d| d.downcast_ref::<RedisParseState>())
        else {
            conn.send_client_data(Slice::from_vec(error("no request state")));
            conn.ready_send = true;
            return AppCallResult::Ok;
        };

        let reply = self.dispatch(&state.args);
        conn.send_client_data(Slice::from_vec(reply));
        conn.ready_send = true;
        AppCallResult::Ok
    }
}

impl RedisApp {
    fn dispatch(&self, args: &[Vec<u8>]) -> Vec<u8> {
        let Some(cmd) = args.first() else {
            return error("empty command");
        };
        let cmd = String::from_utf8_lossy(cmd).to_ascii_uppercase();

        match cmd.as_str() {
            "PING" => match args.get(1) {
                Some(msg) => bulk_string(msg),
                None => simple_string("PONG"),
            },
            "GET" => {
                let Some(key) = args.get(1) else {
                    return error("wrong number of arguments for 'get'");
                };
                let store = self.store.lock().unwrap();
                match store.get(key.as_slice()) {
                    Some(value) => bulk_string(value),
                    None => null_bulk_string(),
                }
            }
            "SET" => {
                let (Some(key), Some(value)) = (args.get(1), args.get(2)) else {
                    return error("wrong number of arguments for 'set'");
                };
                let mut store = self.store.lock().unwrap();
                store.insert(key.clone(), value.clone());
                simple_string("OK")
            }
            "DEL" => {
                let mut store = self.store.lock().unwrap();
                let removed = args[1..]
                    .iter()
                    .filter(|k| store.remove(k.as_slice()).is_some())
                    .count();
                integer(removed as i64)
            }
            other => error(&format!("unknown command '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn ping_without_message_replies_pong() {
        let app = RedisApp {
            store: Mutex::new(HashMap::new()),
        };
        assert_eq!(app.dispatch(&[bytes("PING")]), b"+PONG\r\n");
    }

    #[test]
    fn get_missing_key_returns_null_bulk() {
        let app = RedisApp {
            store: Mutex::new(HashMap::new()),
        };
        assert_eq!(app.dispatch(&[bytes("GET"), bytes("missing")]), b"$-1\r\n");
    }

    #[test]
    fn set_then_get_roundtrips() {
        let app = RedisApp {
            store: Mutex::new(HashMap::new()),
        };
        assert_eq!(app.dispatch(&[bytes("SET"), bytes("k"), bytes("v")]), b"+OK\r\n");
        assert_eq!(app.dispatch(&[bytes("GET"), bytes("k")]), b"$1\r\nv\r\n");
    }

    #[test]
    fn del_counts_removed_keys() {
        let app = RedisApp {
            store: Mutex::new(HashMap::new()),
        };
        app.dispatch(&[bytes("SET"), bytes("a"), bytes("1")]);
        let removed = app.dispatch(&[bytes("DEL"), bytes("a"), bytes("b")]);
        assert_eq!(removed, b":1\r\n");
    }

    #[test]
    fn unknown_command_is_an_error_reply() {
        let app = RedisApp {
            store: Mutex::new(HashMap::new()),
        };
        let reply = app.dispatch(&[bytes("FOO")]);
        assert!(reply.starts_with(b"-ERR"));
    }
}
