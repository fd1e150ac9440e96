//! # Cache Key Generator
//!
//! Derives deterministic cache keys from the identifying content of a request.
//!
//! Read routes are identified by their query parameters, write routes by their
//! raw body. Query parameters are canonicalized first so that parameter order
//! and percent-encoding variants map to the same key:
//!
//! ```text
//! ?b=2&a=1&a=3      ->  a=1,3&b=2
//! ?city=New+York    ->  city=New York
//! ```
//!
//! The canonical bytes are hashed with SHA-256 and the first 8 digest bytes are
//! hex-encoded behind the route's prefix literal, e.g. `view_events_3f1d0c9a7b2e4f60`.

use crate::core::config::FingerprintSource;
use crate::core::types::InboundRequest;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Number of digest bytes kept in a key
const DIGEST_BYTES: usize = 8;

/// Opaque, fixed-length cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the cache key for `content` under `route_prefix`
///
/// Pure: the same input always yields the same key, and empty content yields
/// the key of the empty-string hash.
pub fn derive_key(content: &[u8], route_prefix: &str) -> CacheKey {
    let digest = Sha256::digest(content);
    let mut key = String::with_capacity(route_prefix.len() + DIGEST_BYTES * 2);
    key.push_str(route_prefix);
    key.push_str(&hex::encode(&digest[..DIGEST_BYTES]));
    CacheKey(key)
}

/// Canonical form of a raw query string
///
/// Names are sorted, each rendered as `name=v1,v2` with the values of a
/// repeated name in their original order, and pairs joined with `&`. Names and
/// values are percent-decoded with `+` read as a space.
pub fn canonical_query(raw: &str) -> String {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for pair in raw.split('&').filter(|segment| !segment.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(decode_component(name))
            .or_default()
            .push(decode_component(value));
    }

    params
        .iter()
        .map(|(name, values)| format!("{}={}", name, values.join(",")))
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_component(component: &str) -> String {
    let spaced = component.replace('+', " ");
    let bytes = urlencoding::decode_binary(spaced.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Per-route key generator
///
/// Knows which part of the request identifies it and which prefix the
/// route's keys carry.
#[derive(Debug, Clone)]
pub struct RouteKeyGenerator {
    prefix: String,
    source: FingerprintSource,
}

impl RouteKeyGenerator {
    pub fn new<S: Into<String>>(prefix: S, source: FingerprintSource) -> Self {
        Self {
            prefix: prefix.into(),
            source,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn source(&self) -> FingerprintSource {
        self.source
    }

    /// Generate the cache key for a request on this route
    pub fn generate_key(&self, request: &InboundRequest) -> CacheKey {
        match self.source {
            FingerprintSource::Query => {
                derive_key(canonical_query(request.query()).as_bytes(), &self.prefix)
            }
            FingerprintSource::Body => derive_key(&request.body, &self.prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use bytes::Bytes;

    fn request(uri: &str, body: &'static [u8]) -> InboundRequest {
        InboundRequest {
            method: Method::GET,
            uri: uri.parse().unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body),
            client_addr: "127.0.0.1:40000".to_string(),
        }
    }

    #[test]
    fn test_empty_content_key() {
        assert_eq!(derive_key(b"", "purchase_").as_str(), "purchase_e3b0c44298fc1c14");
    }

    #[test]
    fn test_key_shape() {
        let key = derive_key(b"a=1", "view_events_");
        assert!(key.as_str().starts_with("view_events_"));
        assert_eq!(key.as_str().len(), "view_events_".len() + 16);
        assert!(key.as_str()["view_events_".len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_canonical_query_sorts_and_groups() {
        assert_eq!(canonical_query("b=2&a=1&a=3"), "a=1,3&b=2");
        assert_eq!(canonical_query("a=3&b=2&a=1"), "a=3,1&b=2");
        assert_eq!(canonical_query(""), "");
        assert_eq!(canonical_query("flag&x=1"), "flag=&x=1");
    }

    #[test]
    fn test_canonical_query_decodes() {
        assert_eq!(canonical_query("city=New+York"), "city=New York");
        assert_eq!(canonical_query("city=New%20York"), "city=New York");
        assert_eq!(canonical_query("q%5B%5D=x"), "q[]=x");
    }

    #[test]
    fn test_parameter_order_does_not_change_key() {
        let generator = RouteKeyGenerator::new("view_events_", FingerprintSource::Query);

        let a = generator.generate_key(&request("/events?a=1&b=2", b""));
        let b = generator.generate_key(&request("/events?b=2&a=1", b""));
        assert_eq!(a, b);
    }

    #[test]
    fn test_value_change_changes_key() {
        let generator = RouteKeyGenerator::new("view_events_", FingerprintSource::Query);

        let a = generator.generate_key(&request("/events?a=1", b""));
        let b = generator.generate_key(&request("/events?a=2", b""));
        assert_ne!(a, b);
    }

    #[test]
    fn test_body_fingerprint_ignores_query() {
        let generator = RouteKeyGenerator::new("purchase_", FingerprintSource::Body);

        let a = generator.generate_key(&request("/purchase?x=1", br#"{"seat":"A1"}"#));
        let b = generator.generate_key(&request("/purchase", br#"{"seat":"A1"}"#));
        let c = generator.generate_key(&request("/purchase", br#"{"seat":"A2"}"#));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, derive_key(br#"{"seat":"A1"}"#, "purchase_"));
    }

    #[test]
    fn test_prefixes_separate_routes() {
        assert_ne!(
            derive_key(b"a=1", "view_events_"),
            derive_key(b"a=1", "view_bookings_")
        );
    }
}
