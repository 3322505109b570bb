//! HTTP/1.1 incremental parser (spec.md §4.2). Grounded in
//! `HttpRequest::parse_request`/`parse_headers`/`parse_unchunked_body`/
//! `parse_chunked_body`, rebuilt non-destructively over a borrowed `&[u8]`
//! instead of draining an owned buffer: the state machine tracks a `cursor`
//! into whatever bytes the worker currently hands it, which stays valid
//! across `NeedMore` calls because nothing before the cursor is ever drained
//! until the request is `Complete`.

use std::any::Any;
use std::collections::HashMap;
use std::str::FromStr;

use crate::app::{AppCallResult, AppRegistry};
use crate::client::Client;
use crate::conn::Conn;
use crate::protocol::{ParseOutcome, Protocol};

const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
const MAX_HEADER_LINE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
    Put,
    Head,
}

impl FromStr for Method {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            "PUT" => Ok(Method::Put),
            "HEAD" => Ok(Method::Head),
            _ => Err(()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Stage {
    RequestLine,
    Headers,
    HeadersDone,
    Body,
    ChunkedBody,
    Complete,
}

#[derive(Debug)]
enum ChunkState {
    ReadSize,
    ReadData(usize),
    ReadTrailingCrlf,
    ReadTrailers,
}

pub struct HttpParseState {
    pub method: Method,
    pub url: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    cursor: usize,
    stage: Stage,
    chunk_state: ChunkState,
    body_remaining: usize,
}

impl HttpParseState {
    fn new() -> Self {
        HttpParseState {
            method: Method::Get,
            url: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            cursor: 0,
            stage: Stage::RequestLine,
            chunk_state: ChunkState::ReadSize,
            body_remaining: 0,
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

pub struct HttpProtocol;

pub static HTTP_PROTOCOL: HttpProtocol = HttpProtocol;

impl Protocol for HttpProtocol {
    fn name(&self) -> &'static str {
        "http"
    }

    fn init_protocol_data(&self) -> Box<dyn Any + Send> {
        Box::new(HttpParseState::new())
    }

    fn parse(&self, conn: &mut Conn, input: &[u8], nparsed: &mut usize) -> ParseOutcome {
        let Some(state) = conn
            .protocol_data
            .as_mut()
            .and_then(|d| d.downcast_mut::<HttpParseState>())
        else {
            *nparsed = 0;
            return ParseOutcome::Malformed("conn has no http parse state".to_string());
        };

        loop {
            match state.stage {
                Stage::RequestLine => match find_crlf(input, state.cursor) {
                    Some(idx) => {
                        if idx - state.cursor > MAX_HEADER_LINE {
                            *nparsed = 0;
                            return ParseOutcome::Malformed("request line too long".to_string());
                        }
                        let Ok(line) = std::str::from_utf8(&input[state.cursor..idx]) else {
                            *nparsed = 0;
                            return ParseOutcome::Malformed("invalid utf-8 in request line".to_string());
                        };
                        let parts: Vec<&str> = line.split_whitespace().collect();
                        if parts.len() != 3 {
                            *nparsed = 0;
                            return ParseOutcome::Malformed("malformed request line".to_string());
                        }
                        let Ok(method) = Method::from_str(parts[0]) else {
                            *nparsed = 0;
                            return ParseOutcome::Malformed(format!("unsupported method '{}'", parts[0]));
                        };
                        state.method = method;
                        state.url = parts[1].to_string();
                        state.version = parts[2].to_string();
                        state.cursor = idx + 2;
                        state.stage = Stage::Headers;
                    }
                    None => {
                        *nparsed = 0;
                        return ParseOutcome::NeedMore;
                    }
                },
                Stage::Headers => match find_crlf(input, state.cursor) {
                    Some(idx) => {
                        if idx == state.cursor {
                            state.cursor += 2;
                            state.stage = Stage::HeadersDone;
                            continue;
                        }
                        if idx - state.cursor > MAX_HEADER_LINE {
                            *nparsed = 0;
                            return ParseOutcome::Malformed("header line too long".to_string());
                        }
                        let Ok(line) = std::str::from_utf8(&input[state.cursor..idx]) else {
                            *nparsed = 0;
                            return ParseOutcome::Malformed("invalid utf-8 in header".to_string());
                        };
                        match line.find(':') {
                            Some(sep) => {
                                let key = line[..sep].trim().to_ascii_lowercase();
                                let val = line[sep + 1..].trim().to_string();
                                state.headers.insert(key, val);
                            }
                            None => {
                                *nparsed = 0;
                                return ParseOutcome::Malformed("malformed header line".to_string());
                            }
                        }
                        state.cursor = idx + 2;
                    }
                    None => {
                        *nparsed = 0;
                        return ParseOutcome::NeedMore;
                    }
                },
                Stage::HeadersDone => {
                    let content_length = state
                        .headers
                        .get("content-length")
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    let is_chunked = state
                        .headers
                        .get("transfer-encoding")
                        .map(|v| v.contains("chunked"))
                        .unwrap_or(false);
                    if content_length > MAX_BODY_SIZE {
                        *nparsed = 0;
                        return ParseOutcome::Malformed("payload too large".to_string());
                    }
                    state.body_remaining = content_length;
                    state.stage = if is_chunked {
                        Stage::ChunkedBody
                    } else if content_length > 0 {
                        Stage::Body
                    } else {
                        Stage::Complete
                    };
                }
                Stage::Body => {
                    let available = input.len().saturating_sub(state.cursor);
                    let take = available.min(state.body_remaining);
                    if take > 0 {
                        state
                            .body
                            .extend_from_slice(&input[state.cursor..state.cursor + take]);
                        state.cursor += take;
                        state.body_remaining -= take;
                    }
                    if state.body_remaining == 0 {
                        state.stage = Stage::Complete;
                    } else {
                        *nparsed = 0;
                        return ParseOutcome::NeedMore;
                    }
                }
                Stage::ChunkedBody => match state.chunk_state {
                    ChunkState::ReadSize => match find_crlf(input, state.cursor) {
                        Some(idx) => {
                            let Ok(hex) = std::str::from_utf8(&input[state.cursor..idx]) else {
                                *nparsed = 0;
                                return ParseOutcome::Malformed("invalid chunk size".to_string());
                            };
                            let Ok(size) = usize::from_str_radix(hex.trim(), 16) else {
                                *nparsed = 0;
                                return ParseOutcome::Malformed("invalid chunk size".to_string());
                            };
                            if state.body.len() + size > MAX_BODY_SIZE {
                                *nparsed = 0;
                                return ParseOutcome::Malformed("payload too large".to_string());
                            }
                            state.cursor = idx + 2;
                            state.chunk_state = if size == 0 {
                                ChunkState::ReadTrailers
                            } else {
                                ChunkState::ReadData(size)
                            };
                        }
                        None => {
                            *nparsed = 0;
                            return ParseOutcome::NeedMore;
                        }
                    },
                    ChunkState::ReadData(remaining) => {
                        let available = input.len().saturating_sub(state.cursor);
                        if available == 0 {
                            *nparsed = 0;
                            return ParseOutcome::NeedMore;
                        }
                        let take = available.min(remaining);
                        state
                            .body
                            .extend_from_slice(&input[state.cursor..state.cursor + take]);
                        state.cursor += take;
                        let left = remaining - take;
                        if left == 0 {
                            state.chunk_state = ChunkState::ReadTrailingCrlf;
                        } else {
                            state.chunk_state = ChunkState::ReadData(left);
                            *nparsed = 0;
                            return ParseOutcome::NeedMore;
                        }
                    }
                    ChunkState::ReadTrailingCrlf => {
                        if input.len().saturating_sub(state.cursor) < 2 {
                            *nparsed = 0;
                            return ParseOutcome::NeedMore;
                        }
                        if &input[state.cursor..state.cursor + 2] != b"\r\n" {
                            *nparsed = 0;
                            return ParseOutcome::Malformed("malformed chunk terminator".to_string());
                        }
                        state.cursor += 2;
                        state.chunk_state = ChunkState::ReadSize;
                    }
                    ChunkState::ReadTrailers => match find_crlf(input, state.cursor) {
                        Some(idx) => {
                            if idx == state.cursor {
                                state.cursor += 2;
                                state.stage = Stage::Complete;
                            } else {
                                state.cursor = idx + 2;
                            }
                        }
                        None => {
                            *nparsed = 0;
                            return ParseOutcome::NeedMore;
                        }
                    },
                },
                Stage::Complete => {
                    *nparsed = state.cursor;
                    return ParseOutcome::Complete;
                }
            }
        }
    }

    fn spot_app_and_call(&self, apps: &AppRegistry, client: &mut Client, conn: &mut Conn) -> AppCallResult {
        let url = conn
            .protocol_data
            .as_ref()
            .and_then(|d| d.downcast_ref::<HttpParseState>())
            .map(|s| s.url.clone())
            .unwrap_or_default();

        let app_name = if url.starts_with("/wsgi") { "wsgi" } else { "static_file" };
        crate::app::dispatch(apps, "http", app_name, client, conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> (Conn, ParseOutcome, usize) {
        let mut conn = Conn::new();
        conn.protocol_data = Some(HTTP_PROTOCOL.init_protocol_data());
        let mut nparsed = 0;
        let outcome = HTTP_PROTOCOL.parse(&mut conn, input, &mut nparsed);
        (conn, outcome, nparsed)
    }

    #[test]
    fn incomplete_request_line_needs_more() {
        let (_, outcome, n) = parse_all(b"GET /foo HTTP/1.1\r\n");
        assert_eq!(outcome, ParseOutcome::NeedMore);
        assert_eq!(n, 0);
    }

    #[test]
    fn bodyless_get_completes_at_blank_line() {
        let (conn, outcome, n) = parse_all(b"GET /foo HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(outcome, ParseOutcome::Complete);
        let state = conn
            .protocol_data
            .as_ref()
            .unwrap()
            .downcast_ref::<HttpParseState>()
            .unwrap();
        assert_eq!(state.url, "/foo");
        assert_eq!(n, b"GET /foo HTTP/1.1\r\nHost: x\r\n\r\n".len());
    }

    #[test]
    fn leaves_pipelined_bytes_unconsumed() {
        let input = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let (_, outcome, n) = parse_all(input);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert!(n < input.len());
        assert_eq!(&input[n..], b"GET /b HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn malformed_method_is_rejected() {
        let (_, outcome, _) = parse_all(b"SING /a HTTP/1.1\r\n\r\n");
        assert!(matches!(outcome, ParseOutcome::Malformed(_)));
    }

    #[test]
    fn resumes_across_calls_on_the_same_conn() {
        let mut conn = Conn::new();
        conn.protocol_data = Some(HTTP_PROTOCOL.init_protocol_data());
        let mut nparsed = 0;
        let outcome = HTTP_PROTOCOL.parse(&mut conn, b"GET /foo HTTP/1.1\r\n", &mut nparsed);
        assert_eq!(outcome, ParseOutcome::NeedMore);
        let outcome = HTTP_PROTOCOL.parse(
            &mut conn,
            b"GET /foo HTTP/1.1\r\nHost: x\r\n\r\n",
            &mut nparsed,
        );
        assert_eq!(outcome, ParseOutcome::Complete);
    }
}
