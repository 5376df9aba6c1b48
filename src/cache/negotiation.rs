//! Media type resolution for cache keys.

use axum::http::{HeaderMap, header};

/// Picks the media type a request will be answered with.
pub trait MediaTypeNegotiator: Send + Sync {
    fn negotiate(&self, headers: &HeaderMap) -> Option<String>;
}

/// Media type for a request: endpoint override, then the negotiator, then the
/// first `Accept` entry when supported, then `default`.
pub fn resolve_media_type(
    endpoint_override: Option<&str>,
    negotiator: Option<&dyn MediaTypeNegotiator>,
    headers: &HeaderMap,
    supported: &[String],
    default: &str,
) -> String {
    if let Some(media_type) = endpoint_override {
        return essence(media_type);
    }
    if let Some(media_type) = negotiator.and_then(|negotiator| negotiator.negotiate(headers)) {
        return essence(&media_type);
    }

    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .and_then(|accept| accept.split(',').next())
        .map(essence)
        .filter(|candidate| {
            supported
                .iter()
                .any(|media_type| media_type.eq_ignore_ascii_case(candidate))
        })
        .unwrap_or_else(|| essence(default))
}

/// `type/subtype` without parameters, lower-cased.
pub fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
