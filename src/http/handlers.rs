//! Request handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::state::AppState;
use crate::error::{GatewayError, Result};
use crate::janitor::JanitorReport;
use crate::objects::{
    from_extension, object_key, resolve_content_type, ObjectMeta, FALLBACK_CONTENT_TYPE,
    LIST_LIMIT,
};
use crate::ratelimit::Fingerprint;
use crate::store::ttl_delta;

/// Fixed caching policy for served objects.
const CACHE_CONTROL: &str = "public, max-age=86400";

/// Upload header declaring how many seconds the object must be kept.
pub const OBJECT_TTL_HEADER: &str = "x-object-ttl";

/// `GET /health`: liveness check outside the pipeline.
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "message": "bucketgate is running",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// `GET /<key>`: stream an object with derived headers.
pub async fn get_object(State(state): State<Arc<AppState>>, uri: Uri) -> Result<Response> {
    let key = object_key(uri.path(), &state.route_prefix)?;

    let object = state
        .objects
        .get(&key)
        .await?
        .ok_or_else(|| GatewayError::NotFound(key.clone()))?;

    let content_type = resolve_content_type(object.meta.content_type.as_deref(), &key);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.body.len()));
    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", object.meta.etag)) {
        headers.insert(header::ETAG, etag);
    }
    if let Ok(modified) = HeaderValue::from_str(&http_date(&object.meta)) {
        headers.insert(header::LAST_MODIFIED, modified);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    Ok((headers, object.body).into_response())
}

fn http_date(meta: &ObjectMeta) -> String {
    meta.uploaded_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Body of a successful upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Always `true`; failures use the error body
    pub success: bool,
    /// Stored object key
    pub key: String,
    /// Content type recorded with the object
    pub content_type: String,
    /// Body length in bytes
    pub size: u64,
    /// Version tag assigned by the bucket
    pub etag: String,
}

/// `POST /<key>`: store the request body.
///
/// A request rejected here as malformed gets its sustained-tier hit refunded.
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>> {
    match store_upload(&state, uri.path(), &headers, body).await {
        Err(err @ GatewayError::BadRequest(_)) => {
            let fingerprint = Fingerprint::from_headers(&headers);
            if let Err(e) = state.limiter.refund(&fingerprint).await {
                warn!(fingerprint = %fingerprint, error = %e, "Failed to refund rejected upload");
            }
            Err(err)
        }
        other => other.map(Json),
    }
}

async fn store_upload(
    state: &AppState,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<UploadResponse> {
    let key = object_key(path, &state.route_prefix)?;
    if body.is_empty() {
        return Err(GatewayError::BadRequest("Request body is empty".to_string()));
    }
    let expires_at = object_ttl(headers)?
        .map(|ttl| {
            Utc::now().checked_add_signed(ttl_delta(ttl)).ok_or_else(|| {
                GatewayError::BadRequest("X-Object-Ttl is out of range".to_string())
            })
        })
        .transpose()?;
    let content_type = upload_content_type(headers, &key);

    // an expiry row without its object is harmless, the reverse is not
    if let Some(expires_at) = expires_at {
        state.expiries.set_expiry(&key, expires_at).await?;
    }

    let meta = state.objects.put(&key, body, &content_type).await?;

    info!(key = %key, size = meta.size, content_type = %content_type, "Object stored");
    Ok(UploadResponse {
        success: true,
        key,
        content_type,
        size: meta.size,
        etag: meta.etag,
    })
}

/// Declared content type unless absent or generic, then the extension table.
fn upload_content_type(headers: &HeaderMap, key: &str) -> String {
    let declared = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ct| !ct.is_empty() && !ct.starts_with(FALLBACK_CONTENT_TYPE));

    match declared {
        Some(ct) => ct.to_string(),
        None => from_extension(key)
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string(),
    }
}

fn object_ttl(headers: &HeaderMap) -> Result<Option<Duration>> {
    let Some(raw) = headers.get(OBJECT_TTL_HEADER) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| Some(Duration::from_secs(secs)))
        .ok_or_else(|| {
            GatewayError::BadRequest("X-Object-Ttl must be a whole number of seconds".to_string())
        })
}

/// Query string of the debug listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Key prefix; empty lists everything
    #[serde(default)]
    pub prefix: String,
}

/// `GET /debug/list?prefix=`: development-only listing.
pub async fn debug_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>> {
    let listing = state.objects.list(&query.prefix, LIST_LIMIT).await?;
    Ok(Json(serde_json::json!({
        "count": listing.objects.len(),
        "truncated": listing.truncated,
        "objects": listing.objects,
    })))
}

/// `POST /_scheduled/cleanup`: run the janitor now and report.
///
/// Refused with 401 unless a trigger token is configured and presented as a bearer token.
pub async fn scheduled_cleanup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<JanitorReport>> {
    let Some(expected) = state.trigger_token.as_deref().filter(|t| !t.is_empty()) else {
        warn!("Cleanup trigger called but no trigger token is configured");
        return Err(GatewayError::Unauthorized);
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided != Some(expected) {
        warn!("Cleanup trigger called without a valid token");
        return Err(GatewayError::Unauthorized);
    }

    info!("Manual cleanup triggered");
    Ok(Json(state.janitor.run().await))
}
