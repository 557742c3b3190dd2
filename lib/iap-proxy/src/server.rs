//! HTTPS accept loop

use crate::ProxyHandler;
use anyhow::{Context, Result};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

/// Accept connections until the listener fails.
///
/// Each connection is served on its own task. Failures of a single
/// connection are logged and never end the loop.
pub async fn serve(listener: TcpListener, acceptor: TlsAcceptor, handler: Arc<ProxyHandler>) -> Result<()> {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) if is_connection_error(&e) => {
                debug!("Error accepting connection: {}", e);
                continue;
            }
            Err(e) => return Err(e).context("failed to accept connection"),
        };

        tokio::task::spawn(serve_connection(
            stream,
            peer_addr,
            acceptor.clone(),
            handler.clone(),
        ));
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    handler: Arc<ProxyHandler>,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(tls_stream) => tls_stream,
        Err(e) => {
            debug!("TLS error from {}: {}", peer_addr, e);
            return;
        }
    };

    let io = TokioIo::new(tls_stream);
    let service = service_fn(move |req| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(handler.handle(req, Some(peer_addr)).await) }
    });

    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
        if e.is_incomplete_message() {
            debug!("Connection from {} closed mid-request: {}", peer_addr, e);
        } else {
            warn!("Error serving connection from {}: {}", peer_addr, e);
        }
    }
}

/// Errors that concern one connection rather than the listener
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
