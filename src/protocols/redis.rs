//! RESP-2 incremental parser (spec.md §4.2, SPEC_FULL.md **[ADDED]**).
//! New protocol, but built exactly the way `protocols/http.rs` is: an
//! explicit resumable state machine stored in the conn's protocol data,
//! advancing a `cursor` over whatever bytes the worker currently hands it,
//! never recursion.
//!
//! Only the client-request subset of RESP-2 is parsed -- an array of bulk
//! strings, e.g. `*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n` -- which is all a real
//! client ever sends; inline commands and server-reply types (`+`, `-`,
//! `:`) are not accepted as input.

use std::any::Any;

use crate::app::{AppCallResult, AppRegistry};
use crate::client::Client;
use crate::conn::Conn;
use crate::protocol::{ParseOutcome, Protocol};

const MAX_ARGS: usize = 1024;
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

#[derive(Debug)]
enum Stage {
    ArrayHeader,
    BulkHeader,
    BulkData(usize),
    BulkTrailingCrlf,
    Complete,
}

pub struct RedisParseState {
    pub args: Vec<Vec<u8>>,
    cursor: usize,
    stage: Stage,
    expected_args: usize,
}

impl RedisParseState {
    fn new() -> Self {
        RedisParseState {
            args: Vec::new(),
            cursor: 0,
            stage: Stage::ArrayHeader,
            expected_args: 0,
        }
    }
}

fn find_crlf(input: &[u8], start: usize) -> Option<usize> {
    let search = input.get(start..)?;
    let mut pos = 0;
    while let Some(r) = search[pos..].iter().position(|&b| b == b'\r') {
        let abs = pos + r;
        if search.get(abs + 1) == Some(&b'\n') {
            return Some(start + abs);
        }
        pos = abs + 1;
    }
    None
}

fn line_at<'a>(input: &'a [u8], start: usize, end: usize) -> Result<&'a str, String> {
    std::str::from_utf8(&input[start..end]).map_err(|_| "invalid utf-8 in resp line".to_string())
}

pub struct RedisProtocol;

pub static REDIS_PROTOCOL: RedisProtocol = RedisProtocol;

impl Protocol for RedisProtocol {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn init_protocol_data(&self) -> Box<dyn Any + Send> {
        Box::new(RedisParseState::new())
    }

    fn parse(&self, conn: &mut Conn, input: &[u8], nparsed: &mut usize) -> ParseOutcome {
        let Some(state) = conn
            .protocol_data
            .as_mut()
            .and_then(|d| d.downcast_mut::<RedisParseState>())
        else {
            *nparsed = 0;
            return ParseOutcome::Malformed("conn has no redis parse state".to_string());
        };

        loop {
            match state.stage {
                Stage::ArrayHeader => match find_crlf(input, state.cursor) {
                    Some(idx) => {
                        let line = match line_at(input, state.cursor, idx) {
                            Ok(l) => l,
                            Err(e) => {
                                *nparsed = 0;
                                return ParseOutcome::Malformed(e);
                            }
                        };
                        if !line.starts_with('*') {
                            *nparsed = 0;
                            return ParseOutcome::Malformed(
                                "expected array header '*<n>'".to_string(),
                            );
                        }
                        let Ok(n) = line[1..].parse::<i64>() else {
                            *nparsed = 0;
                            return ParseOutcome::Malformed("invalid array length".to_string());
                        };
                        if n < 0 || n as usize > MAX_ARGS {
                            *nparsed = 0;
                            return ParseOutcome::Malformed("invalid array length".to_string());
                        }
                        state.expected_args = n as usize;
                        state.cursor = idx + 2;
                        state.stage = if state.expected_args == 0 {
                            Stage::Complete
                        } else {
                            Stage::BulkHeader
                        };
                    }
                    None => {
                        *nparsed = 0;
                        return ParseOutcome::NeedMore;
                    }
                },
                Stage::BulkHeader => match find_crlf(input, state.cursor) {
                    Some(idx) => {
                        let line = match line_at(input, state.cursor, idx) {
                            Ok(l) => l,
                            Err(e) => {
                                *nparsed = 0;
                                return ParseOutcome::Malformed(e);
                            }
                        };
                        if !line.starts_with('$') {
                            *nparsed = 0;
                            return ParseOutcome::Malformed(
                                "expected bulk header '$<len>'".to_string(),
                            );
                        }
                        let Ok(len) = line[1..].parse::<i64>() else {
                            *nparsed = 0;
                            return ParseOutcome::Malformed("invalid bulk length".to_string());
                        };
                        if len < 0 || len as usize > MAX_BULK_LEN {
                            *nparsed = 0;
                            return ParseOutcome::Malformed("invalid bulk length".to_string());
                        }
                        state.cursor = idx + 2;
                        state.stage = Stage::BulkData(len as usize);
                    }
                    None => {
                        *nparsed = 0;
                        return ParseOutcome::NeedMore;
                    }
                },
                Stage::BulkData(len) => {
                    if input.len().saturating_sub(state.cursor) < len {
                        *nparsed = 0;
                        return ParseOutcome::NeedMore;
                    }
                    state
                        .args
                        .push(input[state.cursor..state.cursor + len].to_vec());
                    state.cursor += len;
                    state.stage = Stage::BulkTrailingCrlf;
                }
                Stage::BulkTrailingCrlf => {
                    if input.len().saturating_sub(state.cursor) < 2 {
                        *nparsed = 0;
                        return ParseOutcome::NeedMore;
                    }
                    if &input[state.cursor..state.cursor + 2] != b"\r\n" {
                        *nparsed = 0;
                        return ParseOutcome::Malformed("malformed bulk terminator".to_string());
                    }
                    state.cursor += 2;
                    state.stage = if state.args.len() == state.expected_args {
                        Stage::Complete
                    } else {
                        Stage::BulkHeader
                    };
                }
                Stage::Complete => {
                    *nparsed = state.cursor;
                    return ParseOutcome::Complete;
                }
            }
        }
    }

    fn spot_app_and_call(&self, apps: &AppRegistry, client: &mut Client, conn: &mut Conn) -> AppCallResult {
        crate::app::dispatch(apps, "redis", "redis_kv", client, conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> (Conn, ParseOutcome, usize) {
        let mut conn = Conn::new();
        conn.protocol_data = Some(REDIS_PROTOCOL.init_protocol_data());
        let mut nparsed = 0;
        let outcome = REDIS_PROTOCOL.parse(&mut conn, input, &mut nparsed);
        (conn, outcome, nparsed)
    }

    #[test]
    fn incomplete_array_header_needs_more() {
        let (_, outcome, n) = parse_all(b"*2\r\n");
        assert_eq!(outcome, ParseOutcome::NeedMore);
        assert_eq!(n, 0);
    }

    #[test]
    fn parses_a_full_get_command() {
        let (conn, outcome, n) = parse_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
        assert_eq!(outcome, ParseOutcome::Complete);
        let state = conn
            .protocol_data
            .as_ref()
            .unwrap()
            .downcast_ref::<RedisParseState>()
            .unwrap();
        assert_eq!(state.args, vec![b"GET".to_vec(), b"foo".to_vec()]);
        assert_eq!(n, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n".len());
    }

    #[test]
    fn leaves_pipelined_bytes_unconsumed() {
        let input = b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n";
        let (_, outcome, n) = parse_all(input);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(&input[n..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn malformed_header_is_rejected() {
        let (_, outcome, _) = parse_all(b"!2\r\n");
        assert!(matches!(outcome, ParseOutcome::Malformed(_)));
    }

    #[test]
    fn resumes_across_calls_on_the_same_conn() {
        let mut conn = Conn::new();
        conn.protocol_data = Some(REDIS_PROTOCOL.init_protocol_data());
        let mut nparsed = 0;
        let outcome = REDIS_PROTOCOL.parse(&mut conn, b"*1\r\n$4\r\nPI", &mut nparsed);
        assert_eq!(outcome, ParseOutcome::NeedMore);
        let outcome = REDIS_PROTOCOL.parse(&mut conn, b"*1\r\n$4\r\nPING\r\n", &mut nparsed);
        assert_eq!(outcome, ParseOutcome::Complete);
    }
}
