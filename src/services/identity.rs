//! Voter identity derivation from the network origin of a request.
//!
//! This is a weak, spoofable heuristic for "one vote per person", not authentication.

use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};

use crate::state::SharedState;

/// Identity used when no origin can be determined.
pub const UNKNOWN_IDENTITY: &str = "unknown-ip";
const MAX_IDENTITY_BYTES: usize = 256;
const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Derive the identity of a voter.
///
/// With `trust_proxy_headers`, the first `X-Forwarded-For` entry wins, then `X-Real-IP`.
/// Otherwise (or when neither is usable) the socket peer address is used.
pub fn derive_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> String {
    let from_headers = trust_proxy_headers
        .then(|| {
            header_value(headers, FORWARDED_FOR)
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .or_else(|| {
                    header_value(headers, REAL_IP)
                        .map(str::trim)
                        .filter(|value| !value.is_empty())
                })
        })
        .flatten();

    match from_headers {
        Some(value) => truncate(value).to_string(),
        None => peer
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string()),
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Cut `value` to at most [`MAX_IDENTITY_BYTES`] on a character boundary.
fn truncate(value: &str) -> &str {
    if value.len() <= MAX_IDENTITY_BYTES {
        return value;
    }
    let mut end = MAX_IDENTITY_BYTES;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Extractor yielding the derived identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterIdentity(pub String);

impl FromRequestParts<SharedState> for VoterIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(VoterIdentity(derive_identity(
            &parts.headers,
            peer,
            state.config().identity.trust_proxy_headers,
        )))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.10:51234".parse().unwrap())
    }

    #[test]
    fn first_forwarded_entry_wins() {
        let headers = headers(&[
            ("x-forwarded-for", " 203.0.113.5 , 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(derive_identity(&headers, peer(), true), "203.0.113.5");
    }

    #[test]
    fn real_ip_is_used_without_forwarded_for() {
        let headers = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(derive_identity(&headers, peer(), true), "198.51.100.2");
    }

    #[test]
    fn proxy_headers_are_ignored_when_untrusted() {
        let headers = headers(&[("x-forwarded-for", "203.0.113.5")]);
        assert_eq!(derive_identity(&headers, peer(), false), "192.0.2.10");
    }

    #[test]
    fn falls_back_to_unknown() {
        let headers = headers(&[("x-forwarded-for", " , ")]);
        assert_eq!(derive_identity(&headers, None, true), UNKNOWN_IDENTITY);
    }

    #[test]
    fn oversized_values_are_capped() {
        let long = "a".repeat(300);
        let headers = headers(&[("x-forwarded-for", long.as_str())]);
        assert_eq!(derive_identity(&headers, None, true).len(), MAX_IDENTITY_BYTES);

        let multibyte = "é".repeat(200);
        let cut = truncate(&multibyte);
        assert_eq!(cut.len(), MAX_IDENTITY_BYTES);
        assert!(multibyte.starts_with(cut));
    }
}
