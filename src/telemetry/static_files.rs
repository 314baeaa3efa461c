//! Static file server for the browser dashboard.
//!
//! Serves the `www` directory over plain HTTP and, before starting, writes
//! `websocketinfo.js` so the page knows which address and port to open its
//! WebSocket against. Anything resolving outside the root is a 404.

#![allow(missing_docs)]

use std::fs::{self, File};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tiny_http::{Header, Request, Response, Server};

use crate::core::config::TelemetryConfig;
use crate::core::errors::{ChurnError, Result};
use crate::daemon::signals::SignalHandler;

pub const WEBSOCKET_INFO_FILE: &str = "websocketinfo.js";
const INDEX_FILE: &str = "index.html";

pub struct StaticServer {
    server: Server,
    root: PathBuf,
    poll_interval: Duration,
}

impl StaticServer {
    pub fn bind(config: &TelemetryConfig) -> Result<Self> {
        let address = format!("{}:{}", config.bind_address, config.http_port);
        let server = Server::http(&address).map_err(|e| ChurnError::Bind {
            address,
            details: e.to_string(),
        })?;
        Ok(Self {
            server,
            root: config.www_dir.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve requests until shutdown.
    pub fn run(&self, shutdown: &SignalHandler) {
        while !shutdown.should_shutdown() {
            match self.server.recv_timeout(self.poll_interval) {
                Ok(Some(request)) => self.handle(request),
                Ok(None) => {}
                Err(e) => {
                    eprintln!("[DCH-HTTP] receive failed: {e}");
                    std::thread::sleep(self.poll_interval);
                }
            }
        }
    }

    fn handle(&self, request: Request) {
        let resolved = resolve_request_path(&self.root, request.url());
        let result = match resolved.and_then(|path| File::open(&path).ok().map(|f| (path, f))) {
            Some((path, file)) => {
                let mut response = Response::from_file(file);
                if let Ok(header) =
                    Header::from_bytes(&b"Content-Type"[..], content_type(&path).as_bytes())
                {
                    response = response.with_header(header);
                }
                request.respond(response)
            }
            None => request.respond(Response::from_string("404 Not Found").with_status_code(404)),
        };
        if let Err(e) = result {
            eprintln!("[DCH-HTTP] failed to send response: {e}");
        }
    }
}

/// Map a request URL onto a regular file under `root`.
///
/// Returns `None` for `..` segments, absolute escapes, symlinks leading out of
/// the root and anything that is not a regular file.
pub fn resolve_request_path(root: &Path, url: &str) -> Option<PathBuf> {
    let path_part = url.split(['?', '#']).next().unwrap_or("");
    let relative = path_part.trim_start_matches('/');
    let relative = if relative.is_empty() || relative.ends_with('/') {
        format!("{relative}{INDEX_FILE}")
    } else {
        relative.to_string()
    };
    if relative.contains('\\') {
        return None;
    }
    let rel_path = Path::new(&relative);
    if !rel_path
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return None;
    }

    let canonical_root = fs::canonicalize(root).ok()?;
    let candidate = fs::canonicalize(canonical_root.join(rel_path)).ok()?;
    (candidate.starts_with(&canonical_root) && candidate.is_file()).then_some(candidate)
}

pub fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" => "application/javascript",
        "css" => "text/css",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Write `websocketinfo.js` into `www_dir` and return its path.
pub fn write_websocket_info(www_dir: &Path, address: &str, port: u16) -> Result<PathBuf> {
    fs::create_dir_all(www_dir).map_err(|e| ChurnError::io(www_dir, e))?;
    let path = www_dir.join(WEBSOCKET_INFO_FILE);
    let script = format!(
        "var WebSocketIFAddress = \"{address}\";\nvar WebSocketIFPort = \"{port}\";\n"
    );
    fs::write(&path, script).map_err(|e| ChurnError::io(&path, e))?;
    Ok(path)
}

/// Address observers should dial: the bind address, or for a wildcard bind
/// the host's outbound interface address (loopback if none is routable).
pub fn advertised_address(bind_address: &str) -> String {
    match bind_address.parse::<IpAddr>() {
        Ok(ip) if ip.is_unspecified() => outbound_ipv4().map_or_else(
            || "127.0.0.1".to_string(),
            |ip| ip.to_string(),
        ),
        _ => bind_address.to_string(),
    }
}

/// Local address the kernel would route external traffic from. Connecting a
/// UDP socket sends no packets.
fn outbound_ipv4() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("192.0.2.1:9").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

// ──────────────────── tests ────────────────────
