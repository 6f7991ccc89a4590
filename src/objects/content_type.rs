//! Content-type inference for object keys.

/// Content type used when nothing better is known.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type implied by the key's extension, if it is a known image type.
pub fn from_extension(key: &str) -> Option<&'static str> {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    let (_, ext) = file_name.rsplit_once('.')?;

    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "svg" => Some("image/svg+xml"),
        "avif" => Some("image/avif"),
        "ico" => Some("image/x-icon"),
        _ => None,
    }
}

/// Resolve a content type: backend-reported metadata, then the extension table,
/// then the generic binary fallback.
pub fn resolve_content_type(reported: Option<&str>, key: &str) -> String {
    reported
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .or_else(|| from_extension(key))
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}
