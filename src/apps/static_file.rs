//! Static-file serving app (spec.md §4.3 **[ADDED app]**). Grounded in
//! `http_provider.rs`'s `DataProvider` (root-relative path resolution, mime
//! lookup, traversal guard) and `handlers/get_handler.rs`'s
//! `NotFound`/`PermissionDenied` -> 404/403 mapping, generalized off the old
//! `RouteConfig`/`ActiveAction` plumbing onto the plain `App` contract.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use proxy_log::info;

use crate::app::{App, AppCallResult};
use crate::client::Client;
use crate::conn::Conn;
use crate::protocols::http::{HttpParseState, Method};
use crate::slice::{MbufPool, Slice};

static ROOT: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Scratch-buffer pool backing `sendClientFile` reads (spec.md §6). A
/// dedicated per-app pool rather than the worker's own `mbuf_pool`: the
/// `App` contract (spec.md §3) never threads `WorkerProcess` through
/// `appCall`, and a static-file body is exactly the "pooled scratch buffer"
/// case the fallback sendfile path calls for.
fn file_pool() -> &'static MbufPool {
    static POOL: OnceLock<MbufPool> = OnceLock::new();
    POOL.get_or_init(|| MbufPool::new(64 * 1024))
}

/// Sets the document root. Called at worker boot from the loaded config;
/// reconfigurable (last write wins) rather than one-shot, so tests can
/// point separate cases at separate temp roots within the same process.
pub fn configure(root: impl Into<PathBuf>) {
    *ROOT.lock().unwrap() = Some(root.into());
}

fn root() -> PathBuf {
    ROOT.lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| PathBuf::from("./www"))
}

fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|s| s.to_str()).unwrap_or("") {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Joins `url` onto the document root, rejecting any path that would escape
/// it. Grounded in `DataProvider::sanitize_path` + the `starts_with` guard
/// in `DataProvider::read_file`, hardened against `..` components: a bare
/// `starts_with` check on an un-normalized join still matches a prefix like
/// `/srv/www/../../etc/passwd`, so any parent-dir component is rejected
/// outright instead.
fn resolve(url: &str) -> Option<PathBuf> {
    let trimmed = url.trim_start_matches('/');
    let trimmed = if trimmed.is_empty() { "index.html" } else { trimmed };
    let rel = Path::new(trimmed);
    if rel
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir | std::path::Component::RootDir))
    {
        return None;
    }
    Some(root().join(rel))
}

fn status_line(code: u16) -> &'static str {
    match code {
        200 => "200 OK",
        403 => "403 Forbidden",
        404 => "404 Not Found",
        405 => "405 Method Not Allowed",
        _ => "500 Internal Server Error",
    }
}

fn build_response(code: u16, content_type: &str, body: Vec<u8>, head_only: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 128);
    out.extend_from_slice(format!("HTTP/1.1 {}\r\n", status_line(code)).as_bytes());
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
    out.extend_from_slice(b"Connection: keep-alive\r\n\r\n");
    if !head_only {
        out.extend_from_slice(&body);
    }
    out
}

fn response_header(code: u16, content_type: &str, content_length: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    out.extend_from_slice(format!("HTTP/1.1 {}\r\n", status_line(code)).as_bytes());
    out.extend_from_slice(format!("Content-Length: {}\r\n", content_length).as_bytes());
    out.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
    out.extend_from_slice(b"Connection: keep-alive\r\n\r\n");
    out
}

pub struct StaticFileApp;

pub static STATIC_FILE_APP: StaticFileApp = StaticFileApp;

impl App for StaticFileApp {
    fn name(&self) -> &'static str {
        "static_file"
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
            conn.send_client_data(Slice::from_vec(build_response(
                500,
                "text/plain",
                b"no request state".to_vec(),
                false,
            )));
            return AppCallResult::Ok;
        };

        if !matches!(state.method, Method::Get | Method::Head) {
            conn.ready_send = true;
            conn.send_client_data(Slice::from_vec(build_response(
                405,
                "text/plain",
                b"method not allowed".to_vec(),
                state.method == Method::Head,
            )));
            return AppCallResult::Ok;
        }

        let head_only = state.method == Method::Head;
        let url = state.url.clone();

        let path = match resolve(&url) {
            Some(path) => path,
            None => {
                conn.send_client_data(Slice::from_vec(build_response(
                    403,
                    "text/plain",
                    b"forbidden".to_vec(),
                    head_only,
                )));
                conn.ready_send = true;
                info!("static_file '{}' -> 403", url);
                return AppCallResult::Ok;
            }
        };

        let opened = std::fs::File::open(&path).and_then(|f| f.metadata().map(|m| (f, m.len())));
        match opened {
            Ok((mut file, len)) => {
                let content_type = mime_type(&path);
                conn.send_client_data(Slice::from_vec(response_header(200, content_type, len)));
                if !head_only {
                    if let Err(e) = conn.send_client_file(file_pool(), &mut file, len) {
                        conn.send_client_data(Slice::from_vec(
                            format!("error reading file: {}", e).into_bytes(),
                        ));
                    }
                }
                conn.ready_send = true;
                info!("static_file served '{}' ({} bytes)", url, len);
            }
            Err(e) => {
                let code = if e.kind() == std::io::ErrorKind::NotFound { 404 } else { 403 };
                let reason = if code == 404 { "not found" } else { "forbidden" };
                conn.send_client_data(Slice::from_vec(build_response(
                    code,
                    "text/plain",
                    reason.as_bytes().to_vec(),
                    head_only,
                )));
                conn.ready_send = true;
                info!("static_file '{}' -> {}", url, code);
            }
        }

        AppCallResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_outside_root() {
        configure("/srv/www");
        assert!(resolve("/../../etc/passwd").is_none());
    }

    #[test]
    fn empty_url_maps_to_index() {
        configure("/srv/www");
        let resolved = resolve("/").unwrap();
        assert!(resolved.ends_with("index.html"));
    }

    #[test]
    fn mime_type_by_extension() {
        assert_eq!(mime_type(Path::new("a.html")), "text/html");
        assert_eq!(mime_type(Path::new("a.unknown")), "application/octet-stream");
    }
}
