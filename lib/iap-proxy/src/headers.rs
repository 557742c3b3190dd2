//! Header rewrites applied between client and backend

use hyper::header::{HeaderName, HeaderValue, AUTHORIZATION, CONNECTION};
use hyper::HeaderMap;
use std::net::IpAddr;

/// Side channel carrying the credential the backend should see
pub const X_REAL_AUTHORIZATION: HeaderName = HeaderName::from_static("x-real-authorization");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Promote `X-Real-Authorization` to `Authorization`.
///
/// When at least one `X-Real-Authorization` value is present, every existing
/// `Authorization` value is dropped and each `X-Real-Authorization` value is
/// appended as `Authorization`, in order. Otherwise nothing changes. Returns
/// whether the headers were rewritten.
pub fn promote_real_authorization(headers: &mut HeaderMap) -> bool {
    let real: Vec<HeaderValue> = headers
        .get_all(&X_REAL_AUTHORIZATION)
        .iter()
        .cloned()
        .collect();
    if real.is_empty() {
        return false;
    }

    retain_in_order(headers, |name| *name != AUTHORIZATION);
    for value in real {
        headers.append(AUTHORIZATION, value);
    }
    true
}

/// Check if header is hop-by-hop (should not be forwarded)
pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Remove hop-by-hop headers, including any named by `Connection`.
/// The remaining entries keep their order.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    retain_in_order(headers, |name| {
        !is_hop_by_hop_header(name.as_str()) && !named.contains(name)
    });
}

// `HeaderMap::remove` moves the last entry into the freed slot, so
// removal rebuilds the map instead.
fn retain_in_order(headers: &mut HeaderMap, keep: impl Fn(&HeaderName) -> bool) {
    let mut kept = HeaderMap::with_capacity(headers.len());
    let mut current: Option<(HeaderName, bool)> = None;

    for (name, value) in std::mem::take(headers) {
        if let Some(name) = name {
            let retained = keep(&name);
            current = Some((name, retained));
        }
        if let Some((name, true)) = &current {
            kept.append(name.clone(), value);
        }
    }
    *headers = kept;
}

/// Record the client address in `X-Forwarded-For`, after any prior hops
pub fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();

    let chain = if prior.is_empty() {
        client.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client)
    };

    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
