//! Bot and malformed-request screening.

use axum::http::{header, HeaderMap};
use serde::Serialize;
use tracing::warn;

use crate::config::AdmissionConfig;
use crate::ratelimit::Fingerprint;

/// Accept-header fragments that mark a binary content fetch.
const BINARY_MEDIA_HINTS: [&str; 4] = ["image/", "application/octet-stream", "video/", "audio/"];

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// No user-agent on a non-content request
    EmptyUserAgent,
    /// User-agent matched an automation pattern on a non-content request
    AutomatedClient {
        /// The matching pattern
        pattern: String,
    },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::EmptyUserAgent => write!(f, "empty user-agent"),
            RejectReason::AutomatedClient { pattern } => {
                write!(f, "automated client ({})", pattern)
            }
        }
    }
}

/// Result of [`AdmissionFilter::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The request may proceed to rate limiting.
    Admit,
    /// The request must be answered with 403.
    Reject(RejectReason),
}

/// Flags computed while evaluating a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionFlags {
    /// User-agent matched the trusted allow-list
    pub trusted: bool,
    /// Path or Accept header indicates a binary content fetch
    pub looks_like_content_fetch: bool,
    /// No user-agent was sent
    pub empty_agent: bool,
    /// First automation pattern the user-agent matched
    pub automation_match: Option<String>,
}

/// Structured record of a rejection.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord<'a> {
    /// Client address from the fingerprint
    pub client_address: &'a str,
    /// Raw user-agent, possibly empty
    pub user_agent: &'a str,
    /// Raw `Accept` header, possibly empty
    pub accept: &'a str,
    /// Request path
    pub path: &'a str,
    /// Flags computed by the filter
    pub flags: &'a AdmissionFlags,
    /// Why the request was refused
    pub reason: &'a RejectReason,
}

impl AuditRecord<'_> {
    fn emit(&self) {
        warn!(
            target: "bucketgate::audit",
            client_address = %self.client_address,
            user_agent = %self.user_agent,
            accept = %self.accept,
            path = %self.path,
            trusted = self.flags.trusted,
            looks_like_content_fetch = self.flags.looks_like_content_fetch,
            empty_agent = self.flags.empty_agent,
            automation_match = ?self.flags.automation_match,
            reason = %self.reason,
            "Request rejected by admission filter"
        );
    }
}

/// Rejects bot-like or malformed requests before they spend rate limit budget.
///
/// Policy, in order:
/// 1. trusted user-agent prefix: admit, skipping every later check;
/// 2. compute `looks_like_content_fetch` from the path and `Accept` header;
/// 3. empty user-agent and not a content fetch: reject;
/// 4. automation user-agent and not a content fetch: reject;
/// 5. admit.
#[derive(Debug, Clone)]
pub struct AdmissionFilter {
    trusted_agent_prefixes: Vec<String>,
    blocked_agent_patterns: Vec<String>,
    content_route_prefix: String,
}

impl AdmissionFilter {
    /// Build the filter from configuration.
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            trusted_agent_prefixes: config.trusted_agent_prefixes.clone(),
            blocked_agent_patterns: config
                .blocked_agent_patterns
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
            content_route_prefix: config.content_route_prefix.clone(),
        }
    }

    /// Decide whether a request may proceed, emitting an audit record on rejection.
    pub fn evaluate(&self, path: &str, headers: &HeaderMap) -> AdmissionDecision {
        let agent = header_str(headers, header::USER_AGENT.as_str());
        let accept = header_str(headers, header::ACCEPT.as_str());

        let (decision, flags) = self.classify(path, agent, accept);

        if let AdmissionDecision::Reject(reason) = &decision {
            let fingerprint = Fingerprint::from_headers(headers);
            AuditRecord {
                client_address: &fingerprint.address,
                user_agent: agent,
                accept,
                path,
                flags: &flags,
                reason,
            }
            .emit();
        }

        decision
    }

    /// Apply the policy to already-extracted fields.
    pub fn classify(
        &self,
        path: &str,
        agent: &str,
        accept: &str,
    ) -> (AdmissionDecision, AdmissionFlags) {
        let mut flags = AdmissionFlags::default();

        if self.is_trusted(agent) {
            flags.trusted = true;
            return (AdmissionDecision::Admit, flags);
        }

        flags.looks_like_content_fetch = self.looks_like_content_fetch(path, accept);
        flags.empty_agent = agent.trim().is_empty();
        flags.automation_match = self.automation_match(agent).map(str::to_string);

        if flags.looks_like_content_fetch {
            return (AdmissionDecision::Admit, flags);
        }

        if flags.empty_agent {
            return (
                AdmissionDecision::Reject(RejectReason::EmptyUserAgent),
                flags,
            );
        }

        if let Some(pattern) = flags.automation_match.clone() {
            return (
                AdmissionDecision::Reject(RejectReason::AutomatedClient { pattern }),
                flags,
            );
        }

        (AdmissionDecision::Admit, flags)
    }

    /// Whether the path targets the binary content route or `Accept` asks for binary media.
    pub fn looks_like_content_fetch(&self, path: &str, accept: &str) -> bool {
        if !self.content_route_prefix.is_empty() && path.starts_with(&self.content_route_prefix) {
            return true;
        }
        let accept = accept.to_ascii_lowercase();
        BINARY_MEDIA_HINTS.iter().any(|hint| accept.contains(hint))
    }

    fn is_trusted(&self, agent: &str) -> bool {
        !agent.is_empty()
            && self
                .trusted_agent_prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && agent.starts_with(prefix.as_str()))
    }

    fn automation_match(&self, agent: &str) -> Option<&str> {
        if agent.is_empty() {
            return None;
        }
        let agent = agent.to_ascii_lowercase();
        self.blocked_agent_patterns
            .iter()
            .find(|pattern| agent.contains(pattern.as_str()))
            .map(String::as_str)
    }
}

impl Default for AdmissionFilter {
    fn default() -> Self {
        Self::new(&AdmissionConfig::default())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}
