//! Raw request/response dumps for debugging

use crate::BufferedResponse;
use bytes::Bytes;
use hyper::{HeaderMap, Request};
use std::io::{self, Write};
use tracing::{info, warn};

/// Log target of the dumps, so they can be filtered separately
pub const DUMP_TARGET: &str = "iap_proxy::dump";

/// Writes complete raw requests and responses to the log when enabled.
///
/// Dumps are escaped and quoted so each one stays on a single log line.
/// A dump that cannot be rendered is reported and otherwise ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct DebugLogger {
    enabled: bool,
}

impl DebugLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dump_request(&self, request: &Request<Bytes>) {
        if !self.enabled {
            return;
        }
        match render_request(request) {
            Ok(raw) => info!(target: DUMP_TARGET, "{}", quote(&raw)),
            Err(e) => warn!("failed to dump the request, {}", e),
        }
    }

    pub fn dump_response(&self, response: &BufferedResponse) {
        if !self.enabled {
            return;
        }
        match render_response(response) {
            Ok(raw) => info!(target: DUMP_TARGET, "{}", quote(&raw)),
            Err(e) => warn!("failed to dump the response, {}", e),
        }
    }
}

/// Render a request in HTTP/1.1 wire form, body included
pub fn render_request(request: &Request<Bytes>) -> io::Result<Vec<u8>> {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut raw = Vec::with_capacity(256 + request.body().len());
    write!(raw, "{} {} {:?}\r\n", request.method(), target, request.version())?;
    write_headers(&mut raw, request.headers())?;
    raw.write_all(request.body())?;
    Ok(raw)
}

/// Render a buffered response in HTTP/1.1 wire form, body included
pub fn render_response(response: &BufferedResponse) -> io::Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(256 + response.body.len());
    write!(raw, "HTTP/1.1 {}\r\n", response.status)?;
    write_headers(&mut raw, &response.headers)?;
    raw.write_all(&response.body)?;
    Ok(raw)
}

fn write_headers(raw: &mut Vec<u8>, headers: &HeaderMap) -> io::Result<()> {
    for (name, value) in headers {
        raw.write_all(name.as_str().as_bytes())?;
        raw.write_all(b": ")?;
        raw.write_all(value.as_bytes())?;
        raw.write_all(b"\r\n")?;
    }
    raw.write_all(b"\r\n")
}

fn quote(raw: &[u8]) -> String {
    format!("\"{}\"", raw.escape_ascii())
}
