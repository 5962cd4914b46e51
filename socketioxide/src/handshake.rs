//! The read-only connection snapshot handed to middleware and exposed on
//! every [`crate::socket::Socket`] (spec.md §3, "Handshake").

use std::collections::HashMap;
use std::net::SocketAddr;

use http::request::Parts;
use serde_json::Value;

use engineioxide::socket::ProtocolVersion as EngineProtocolVersion;

/// The socket.io protocol version negotiated for a connection. Distinct
/// from [`engineioxide::socket::ProtocolVersion`], which tracks the
/// underlying engine.io wire version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V4,
    V5,
}

impl From<EngineProtocolVersion> for ProtocolVersion {
    fn from(v: EngineProtocolVersion) -> Self {
        match v {
            EngineProtocolVersion::V3 => ProtocolVersion::V4,
            EngineProtocolVersion::V4 => ProtocolVersion::V5,
        }
    }
}

/// A frozen record of how a client arrived: its auth payload, the request
/// that established the engine transport, and when admission happened.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// The `auth` object sent with the CONNECT packet, if any.
    pub auth: Value,
    /// Milliseconds since the Unix epoch when the handshake completed.
    pub issued_at_ms: u128,
    /// The remote address of the underlying transport, when known (absent
    /// for in-process/test transports).
    pub address: Option<SocketAddr>,
    /// Whether the request's `Origin` header differs from the server's own
    /// host, mirroring the JS implementation's `xdomain` flag.
    pub xdomain: bool,
    pub secure: bool,
    pub url: String,
    pub headers: http::HeaderMap,
    /// The request's query string, parsed into a flat map (spec.md §6
    /// "Handshake").
    pub query: HashMap<String, String>,
}

impl Handshake {
    pub fn new(auth: Value, parts: &Parts, address: Option<SocketAddr>, issued_at_ms: u128) -> Self {
        let query = parts
            .uri
            .query()
            .map(parse_query)
            .unwrap_or_default();
        let xdomain = parts
            .headers
            .get(http::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(|origin| {
                let host = parts
                    .headers
                    .get(http::header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                !origin.contains(host)
            })
            .unwrap_or(false);
        let secure = parts.uri.scheme_str() == Some("https");

        Self {
            auth,
            issued_at_ms,
            address,
            xdomain,
            secure,
            url: parts.uri.to_string(),
            headers: parts.headers.clone(),
            query,
        }
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
