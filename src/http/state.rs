//! Shared handler state.

use std::sync::Arc;

use super::pipeline::Pipeline;
use crate::admission::AdmissionFilter;
use crate::config::GatewayConfig;
use crate::janitor::Janitor;
use crate::objects::{ExpiryIndex, ObjectStore};
use crate::ratelimit::RateLimiter;

/// Everything a request handler can reach.
///
/// Holds only clients of the shared backends; no mutable state lives here.
pub struct AppState {
    pub pipeline: Pipeline,
    pub limiter: Arc<RateLimiter>,
    pub objects: Arc<dyn ObjectStore>,
    pub expiries: Arc<dyn ExpiryIndex>,
    pub janitor: Arc<Janitor>,
    /// Prefix stripped from request paths to form object keys
    pub route_prefix: String,
    /// Bearer token guarding the manual cleanup trigger
    pub trigger_token: Option<String>,
}

impl AppState {
    /// Assemble the state with the standard admission + rate limit pipeline.
    pub fn new(
        config: &GatewayConfig,
        limiter: Arc<RateLimiter>,
        objects: Arc<dyn ObjectStore>,
        expiries: Arc<dyn ExpiryIndex>,
        janitor: Arc<Janitor>,
    ) -> Self {
        Self {
            pipeline: Pipeline::standard(AdmissionFilter::new(&config.admission), limiter.clone()),
            limiter,
            objects,
            expiries,
            janitor,
            route_prefix: config.storage.route_prefix.clone(),
            trigger_token: config.janitor.trigger_token.clone(),
        }
    }
}
