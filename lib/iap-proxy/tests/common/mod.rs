//! Throwaway PKI and a TLS backend for round-trip tests

#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::AUTHORIZATION;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use iap_core::TrustInfo;
use iap_proxy::TlsServerConfig;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// A CA and one `localhost` server certificate it signed
pub struct Pki {
    ca_cert: Certificate,
    pub leaf_pem: String,
    pub leaf_key_pem: String,
}

impl Pki {
    pub fn new(name: &str) -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, format!("{} ca", name));
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        Self {
            ca_cert,
            leaf_pem: leaf.pem(),
            leaf_key_pem: leaf_key.serialize_pem(),
        }
    }

    pub fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }

    pub fn trust(&self) -> TrustInfo {
        TrustInfo::from_pem(self.ca_pem().as_bytes()).unwrap()
    }

    pub fn server_config(&self) -> TlsServerConfig {
        TlsServerConfig::from_pem(self.leaf_pem.as_bytes(), self.leaf_key_pem.as_bytes()).unwrap()
    }
}

/// Serve a small fixed API over TLS on an ephemeral port.
///
/// - `/slow` answers after two seconds
/// - `/large` answers with 4096 bytes
/// - `/status/<code>` answers with that status
/// - `/ordered` answers with a `Connection` header between other headers
/// - anything else echoes the `Authorization` values it received
pub async fn spawn_backend(pki: &Pki, name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = pki.server_config().acceptor();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(tls) = acceptor.accept(stream).await else {
                    return;
                };
                let service = service_fn(move |req| backend(req, name));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(tls), service)
                    .await;
            });
        }
    });

    addr
}

async fn backend(req: Request<Incoming>, name: &'static str) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();

    if path == "/slow" {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    if path == "/large" {
        return Ok(Response::new(Full::new(Bytes::from(vec![b'x'; 4096]))));
    }
    if path == "/ordered" {
        let response = Response::builder()
            .header("x-first", "1")
            .header("connection", "keep-alive")
            .header("k", "a")
            .header("k", "b")
            .header("j", "c")
            .header("content-length", "7")
            .body(Full::new(Bytes::from_static(b"ordered")))
            .unwrap();
        return Ok(response);
    }
    if let Some(code) = path.strip_prefix("/status/") {
        let status = code.parse::<u16>().ok().and_then(|c| StatusCode::from_u16(c).ok());
        let mut response = Response::new(Full::new(Bytes::from(format!("{} {}", name, code))));
        *response.status_mut() = status.unwrap_or(StatusCode::BAD_REQUEST);
        return Ok(response);
    }

    let authorization: Vec<&str> = req
        .headers()
        .get_all(AUTHORIZATION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let response = Response::builder()
        .header("k", "a")
        .header("k", "b")
        .header("j", "c")
        .header("connection", "keep-alive")
        .body(Full::new(Bytes::from(format!(
            "{} auth=[{}]",
            name,
            authorization.join(",")
        ))))
        .unwrap();
    Ok(response)
}
