//! Client fingerprint derivation.

use axum::http::HeaderMap;

/// Address used when no client address header is present.
pub const UNKNOWN_ADDRESS: &str = "unknown-ip";

/// Address headers in order of trust. The edge sets the first one.
const ADDRESS_HEADERS: [&str; 3] = ["cf-connecting-ip", "x-forwarded-for", "x-real-ip"];

/// A stable client identity used to partition rate limit counters.
///
/// The key is composed of the client address and user-agent, serialized
/// as `address::agent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Client network address
    pub address: String,
    /// Raw user-agent string, possibly empty
    pub agent: String,
}

impl Fingerprint {
    /// Create a fingerprint from its parts.
    pub fn new(address: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            agent: agent.into(),
        }
    }

    /// Derive the fingerprint from request headers.
    ///
    /// Never fails: a missing address becomes [`UNKNOWN_ADDRESS`] and a missing
    /// user-agent becomes the empty string.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let address = ADDRESS_HEADERS
            .iter()
            .find_map(|name| {
                let value = headers.get(*name)?.to_str().ok()?;
                // X-Forwarded-For is a list; the originating client comes first.
                let first = value.split(',').next()?.trim();
                (!first.is_empty()).then(|| first.to_string())
            })
            .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());

        let agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Self { address, agent }
    }

    /// The opaque partition key.
    pub fn to_key(&self) -> String {
        format!("{}::{}", self.address, self.agent)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.address, self.agent)
    }
}
