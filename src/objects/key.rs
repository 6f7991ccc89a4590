//! Object key derivation from request paths.

use percent_encoding::percent_decode_str;

use crate::error::GatewayError;

/// Derive the object key from a request path.
///
/// The path is percent-decoded, its leading `/` dropped, and `route_prefix`
/// stripped when present. Empty keys (including exactly the prefix) and keys
/// with `.` or `..` segments are rejected before any backend call.
pub fn object_key(path: &str, route_prefix: &str) -> Result<String, GatewayError> {
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| GatewayError::BadRequest("Object key is not valid UTF-8".to_string()))?;

    let trimmed = decoded.trim_start_matches('/');
    let prefix = route_prefix.trim_start_matches('/');
    let key = if prefix.is_empty() {
        trimmed
    } else {
        trimmed.strip_prefix(prefix).unwrap_or(trimmed)
    };

    if key.is_empty() || key.chars().all(|c| c == '/') {
        return Err(GatewayError::BadRequest("Object key is required".to_string()));
    }

    if key.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(GatewayError::BadRequest("Object key is invalid".to_string()));
    }

    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_key() {
        assert_eq!(object_key("/a.png", "").unwrap(), "a.png");
        assert_eq!(object_key("/dir/a.png", "").unwrap(), "dir/a.png");
    }

    #[test]
    fn test_percent_decoding() {
        assert_eq!(
            object_key("/my%20photo%E2%9C%93.png", "").unwrap(),
            "my photo✓.png"
        );
    }

    #[test]
    fn test_route_prefix_stripped() {
        assert_eq!(object_key("/images/a.png", "images/").unwrap(), "a.png");
        assert_eq!(object_key("/images/a.png", "/images/").unwrap(), "a.png");
        // prefix is optional on the request path
        assert_eq!(object_key("/a.png", "images/").unwrap(), "a.png");
    }

    #[test]
    fn test_empty_and_degenerate_keys() {
        assert!(matches!(
            object_key("/", ""),
            Err(GatewayError::BadRequest(_))
        ));
        assert!(matches!(
            object_key("/images/", "images/"),
            Err(GatewayError::BadRequest(_))
        ));
        assert!(matches!(
            object_key("/images//", "images/"),
            Err(GatewayError::BadRequest(_))
        ));
    }

    #[test]
    fn test_traversal_rejected() {
        assert!(object_key("/../etc/passwd", "").is_err());
        assert!(object_key("/a/%2E%2E/b", "").is_err());
        assert!(object_key("/a/./b", "").is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        assert!(matches!(
            object_key("/%FF%FE", ""),
            Err(GatewayError::BadRequest(_))
        ));
    }
}
