//! Cache-control response headers.

use std::time::SystemTime;

use axum::http::{HeaderMap, HeaderValue, header};
use time::OffsetDateTime;

use super::endpoint::EndpointPolicy;
use super::time::CacheTime;

/// Write `Cache-Control`, `Pragma` and `Last-Modified` for a cacheable response.
pub fn apply_cache_headers(
    headers: &mut HeaderMap,
    time: &CacheTime,
    policy: &EndpointPolicy,
    generated_at: Option<OffsetDateTime>,
    has_body: bool,
) {
    if let Some(value) = cache_control(time, policy) {
        headers.insert(header::CACHE_CONTROL, value);
        if policy.no_cache && !has_max_age(time, policy) {
            headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        }
    }

    if has_body && let Some(generated_at) = generated_at {
        let formatted = httpdate::fmt_http_date(SystemTime::from(generated_at));
        if let Ok(value) = HeaderValue::from_str(&formatted) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}

fn has_max_age(time: &CacheTime, policy: &EndpointPolicy) -> bool {
    time.client_max_age.is_positive() || policy.must_revalidate || policy.private
}

fn cache_control(time: &CacheTime, policy: &EndpointPolicy) -> Option<HeaderValue> {
    if has_max_age(time, policy) {
        let mut directives = vec![format!(
            "max-age={}",
            time.client_max_age.whole_seconds().max(0)
        )];
        if let Some(shared) = time.shared_max_age {
            directives.push(format!("s-maxage={}", shared.whole_seconds().max(0)));
        }
        if policy.must_revalidate {
            directives.push("must-revalidate".to_string());
        }
        if policy.private {
            directives.push("private".to_string());
        }
        HeaderValue::from_str(&directives.join(", ")).ok()
    } else if policy.no_cache {
        Some(HeaderValue::from_static("no-cache"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use time::macros::datetime;

    use super::*;
    use crate::cache::time::CachePolicy;

    const NOW: OffsetDateTime = datetime!(2024-03-10 12:00:00 UTC);

    fn apply(
        policy: &EndpointPolicy,
        generated_at: Option<OffsetDateTime>,
        body: bool,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let time = policy.policy.evaluate(NOW);
        apply_cache_headers(&mut headers, &time, policy, generated_at, body);
        headers
    }

    fn cache_control(headers: &HeaderMap) -> Option<&str> {
        headers
            .get(header::CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
    }

    #[test]
    fn positive_client_time_sets_max_age() {
        let headers = apply(&EndpointPolicy::new(CachePolicy::fixed(100, 100)), None, true);
        assert_eq!(cache_control(&headers), Some("max-age=100"));
        assert!(headers.get(header::PRAGMA).is_none());
    }

    #[test]
    fn shared_max_age_and_flags_are_appended() {
        let policy = EndpointPolicy::new(CachePolicy::fixed_shared(100, 50, 200))
            .with_must_revalidate()
            .with_private();
        let headers = apply(&policy, None, true);
        assert_eq!(
            cache_control(&headers),
            Some("max-age=50, s-maxage=200, must-revalidate, private")
        );
    }

    #[test]
    fn must_revalidate_alone_emits_zero_max_age() {
        let policy = EndpointPolicy::new(CachePolicy::fixed(100, 0)).with_must_revalidate();
        let headers = apply(&policy, None, true);
        assert_eq!(cache_control(&headers), Some("max-age=0, must-revalidate"));
    }

    #[test]
    fn no_cache_sets_pragma() {
        let policy = EndpointPolicy::new(CachePolicy::fixed(100, 0)).with_no_cache();
        let headers = apply(&policy, None, true);
        assert_eq!(cache_control(&headers), Some("no-cache"));
        assert_eq!(
            headers.get(header::PRAGMA).and_then(|v| v.to_str().ok()),
            Some("no-cache")
        );
    }

    #[test]
    fn nothing_to_advertise_leaves_headers_untouched() {
        let headers = apply(&EndpointPolicy::new(CachePolicy::fixed(100, 0)), None, true);
        assert!(headers.is_empty());
    }

    #[test]
    fn past_absolute_expiration_never_goes_negative() {
        let policy = EndpointPolicy::new(
            CachePolicy::absolute(2024, 3, 10, 11, 0, 0).expect("valid date"),
        )
        .with_must_revalidate();
        let headers = apply(&policy, None, true);
        assert_eq!(cache_control(&headers), Some("max-age=0, must-revalidate"));
    }

    #[test]
    fn last_modified_requires_body_and_timestamp() {
        let policy = EndpointPolicy::new(CachePolicy::fixed(100, 100));
        let generated = NOW - Duration::minutes(5);

        let with_body = apply(&policy, Some(generated), true);
        assert_eq!(
            with_body
                .get(header::LAST_MODIFIED)
                .and_then(|v| v.to_str().ok()),
            Some("Sun, 10 Mar 2024 11:55:00 GMT")
        );

        let without_body = apply(&policy, Some(generated), false);
        assert!(without_body.get(header::LAST_MODIFIED).is_none());
    }
}
