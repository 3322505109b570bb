//! WSGI-style app (spec.md §4.3, Non-goals: "WSGI/Python embedding... a
//! registrable Rust callback standing in for the WSGI bridge -- explicitly
//! not a CPython embed"). The contract a real WSGI bridge would expose --
//! request in, `(status, body)` out -- is kept; the CPython interpreter
//! behind it is not. `register` lets a host binary plug in its own handler
//! the way a real deployment would plug in its Python application object.

use std::any::Any;
use std::sync::OnceLock;

use crate::app::{App, AppCallResult};
use crate::client::Client;
use crate::conn::Conn;
use crate::protocols::http::HttpParseState;
use crate::slice::Slice;

pub type WsgiHandler = dyn Fn(&HttpParseState) -> (u16, Vec<u8>) + Sync + Send;

static HANDLER: OnceLock<Box<WsgiHandler>> = OnceLock::new();

/// Plugs in the request handler. Called at most once, at worker boot;
/// later calls are ignored (the first registration wins, matching the
/// one-shot `init_app` contract apps are otherwise built around).
pub fn register<F>(handler: F)
where
    F: Fn(&HttpParseState) -> (u16, Vec<u8>) + Sync + Send + 'static,
{
    let _ = HANDLER.set(Box::new(handler));
}

fn default_handler(state: &HttpParseState) -> (u16, Vec<u8>) {
    let body = format!(
        "{{\"method\":\"{:?}\",\"path\":\"{}\",\"headers\":{}}}",
        state.method,
        state.url,
        state.headers.len()
    );
    (200, body.into_bytes())
}

fn status_line(code: u16) -> String {
    match code {
        200 => "200 OK".to_string(),
        400 => "400 Bad Request".to_string(),
        404 => "404 Not Found".to_string(),
        500 => "500 Internal Server Error".to_string(),
        other => format!("{} Unknown", other),
    }
}

pub struct WsgiApp;

pub static WSGI_APP: WsgiApp = WsgiApp;

impl App for WsgiApp {
    fn name(&self) -> &'static str {
        "wsgi"
    }

    fn proto_belong(&self) -> &'static str {
        "http"
    }

    fn app_call(&self, _client: &mut Client, conn: &mut Conn, _arg: Option<&dyn Any>) -> AppCallResult {
        let Some(state) = conn
            .protocol_data
            .as_ref()
            .and_then(|d| d.downcast_ref::<HttpParseState>())
        else {
            conn.ready_send = true;
            return AppCallResult::Ok;
        };

        let handler = HANDLER.get_or_init(|| Box::new(default_handler));
        let (code, body) = handler(state);

        let mut response = Vec::with_capacity(body.len() + 96);
        response.extend_from_slice(format!("HTTP/1.1 {}\r\n", status_line(code)).as_bytes());
        response.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        response.extend_from_slice(b"Content-Type: application/json\r\n");
        response.extend_from_slice(b"Connection: keep-alive\r\n\r\n");
        response.extend_from_slice(&body);

        conn.send_client_data(Slice::from_vec(response));
        conn.ready_send = true;
        AppCallResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::http::{Method, HTTP_PROTOCOL};
    use crate::protocol::Protocol;

    #[test]
    fn default_handler_reports_method_and_path() {
        let mut conn = Conn::new();
        conn.protocol_data = Some(HTTP_PROTOCOL.init_protocol_data());
        let mut nparsed = 0;
        HTTP_PROTOCOL.parse(&mut conn, b"GET /wsgi/app HTTP/1.1\r\n\r\n", &mut nparsed);
        let state = conn
            .protocol_data
            .as_ref()
            .unwrap()
            .downcast_ref::<HttpParseState>()
            .unwrap();
        assert_eq!(state.method, Method::Get);
        let (code, body) = default_handler(state);
        assert_eq!(code, 200);
        assert!(String::from_utf8(body).unwrap().contains("/wsgi/app"));
    }
}
