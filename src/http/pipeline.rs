//! Ordered request interceptors run ahead of the object handlers.
//!
//! Each interceptor either lets the request continue or halts it with an error.
//! Headers staged by interceptors that let the request through are merged into
//! the final response.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::state::AppState;
use crate::admission::{AdmissionDecision, AdmissionFilter};
use crate::error::GatewayError;
use crate::ratelimit::{Decision, Fingerprint, RateLimiter};

/// Per-request data shared by the interceptors.
#[derive(Debug)]
pub struct RequestContext<'a> {
    /// Raw request path
    pub path: &'a str,
    /// Inbound request headers
    pub headers: &'a HeaderMap,
    /// Client fingerprint derived from `headers`
    pub fingerprint: Fingerprint,
    /// Headers to merge into the response
    pub response_headers: HeaderMap,
}

impl<'a> RequestContext<'a> {
    pub fn new(path: &'a str, headers: &'a HeaderMap) -> Self {
        Self {
            path,
            headers,
            fingerprint: Fingerprint::from_headers(headers),
            response_headers: HeaderMap::new(),
        }
    }
}

/// What an interceptor decided.
#[derive(Debug)]
pub enum Verdict {
    Continue,
    Halt(GatewayError),
}

/// A stage of the request pipeline.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn intercept(&self, ctx: &mut RequestContext<'_>) -> Verdict;
}

/// Bot and malformed-request screening.
pub struct AdmissionInterceptor {
    filter: AdmissionFilter,
}

impl AdmissionInterceptor {
    pub fn new(filter: AdmissionFilter) -> Self {
        Self { filter }
    }
}

#[async_trait]
impl Interceptor for AdmissionInterceptor {
    fn name(&self) -> &'static str {
        "admission"
    }

    async fn intercept(&self, ctx: &mut RequestContext<'_>) -> Verdict {
        match self.filter.evaluate(ctx.path, ctx.headers) {
            AdmissionDecision::Admit => Verdict::Continue,
            AdmissionDecision::Reject(reason) => {
                Verdict::Halt(GatewayError::Forbidden(reason.to_string()))
            }
        }
    }
}

/// Two-tier rate limiting keyed by the request fingerprint.
pub struct RateLimitInterceptor {
    limiter: Arc<RateLimiter>,
}

impl RateLimitInterceptor {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn intercept(&self, ctx: &mut RequestContext<'_>) -> Verdict {
        match self.limiter.admit(&ctx.fingerprint).await {
            Decision::Admit(Some(quota)) => {
                quota.write_headers(&mut ctx.response_headers);
                Verdict::Continue
            }
            Decision::Admit(None) => Verdict::Continue,
            Decision::Deny(kind) => Verdict::Halt(kind.into()),
        }
    }
}

/// The interceptors applied to object routes, in order.
#[derive(Clone, Default)]
pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Pipeline {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    /// Admission first, then rate limiting, so rejected bots never spend budget.
    pub fn standard(filter: AdmissionFilter, limiter: Arc<RateLimiter>) -> Self {
        Self::new(vec![
            Arc::new(AdmissionInterceptor::new(filter)),
            Arc::new(RateLimitInterceptor::new(limiter)),
        ])
    }

    /// Run every interceptor until one halts.
    pub async fn run(&self, ctx: &mut RequestContext<'_>) -> Result<(), GatewayError> {
        for interceptor in &self.interceptors {
            if let Verdict::Halt(err) = interceptor.intercept(ctx).await {
                debug!(
                    interceptor = interceptor.name(),
                    path = ctx.path,
                    error = %err,
                    "Request halted"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

/// Axum middleware running the state's pipeline around object handlers.
pub async fn run_pipeline(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    // the body is not Sync, so only the parts are borrowed across the await
    let (parts, body) = request.into_parts();
    let staged = {
        let mut ctx = RequestContext::new(parts.uri.path(), &parts.headers);
        if let Err(err) = state.pipeline.run(&mut ctx).await {
            return err.into_response();
        }
        ctx.response_headers
    };

    let mut response = next.run(Request::from_parts(parts, body)).await;
    let headers = response.headers_mut();
    for (name, value) in staged.iter() {
        if !headers.contains_key(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
    response
}
