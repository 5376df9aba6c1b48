//! Output cache middleware.
//!
//! Both layers are attached per route with `middleware::from_fn_with_state`, so
//! path parameters are already matched when they run.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes},
    extract::{FromRequestParts, RawPathParams, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header, request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body::{Body as _, Frame};
use http_body_util::{BodyExt, Limited};
use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::context::{Principal, RequestContext};
use super::endpoint::{ActionDescriptor, EndpointPolicy, SkipReason};
use super::headers::apply_cache_headers;
use super::interceptor::{
    Lookup, StoredVariant, capture_custom_headers, lookup, new_etag, store_variant,
};
use super::invalidation::apply_rules;
use super::keys::{KeyError, base_key};
use super::negotiation::resolve_media_type;
use super::runtime::{CachedEndpoint, InvalidationEndpoint};
use super::store::AsyncOutputCacheStore;
use super::time::CacheTime;

const METRIC_HIT: &str = "output_cache_hit_total";
const METRIC_MISS: &str = "output_cache_miss_total";
const METRIC_NOT_MODIFIED: &str = "output_cache_not_modified_total";
const METRIC_STORE: &str = "output_cache_store_total";
const METRIC_SKIP: &str = "output_cache_skip_total";
const METRIC_STORE_ERROR: &str = "output_cache_store_error_total";

/// Serve cached responses and store fresh ones for one action.
#[instrument(
    skip_all,
    fields(controller = %endpoint.controller.name, action = %endpoint.action.name)
)]
pub async fn output_cache_layer(
    State(endpoint): State<CachedEndpoint>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let cache = &endpoint.cache;
    let policy = endpoint.policy.as_ref();

    if !cache.config().enabled {
        return next.run(request).await;
    }

    let principal = request.extensions().get::<Principal>().cloned();
    if let Some(reason) = policy.skip_reason(request.method(), principal.is_some()) {
        return skip(reason, next, request).await;
    }

    let (mut parts, body) = request.into_parts();
    let key_body = buffer_key_body(
        &parts.method,
        body,
        policy.exclude_query_string,
        cache.config().max_body_bytes,
    )
    .await;
    let (body, buffered) = match key_body {
        Ok(split) => split,
        Err(response) => return response,
    };
    let ctx = request_context(
        &endpoint.controller.name,
        &endpoint.action,
        &mut parts,
        buffered,
        principal,
    )
    .await;

    let media_type = resolve_media_type(
        policy.media_type.as_deref(),
        cache.negotiator(),
        &parts.headers,
        &cache.config().supported_media_types,
        &cache.config().default_media_type,
    );
    let generator = cache.key_generator(policy.key_generator.as_deref());
    let key = match generator.make_key(&ctx, &media_type, &policy.key_options()) {
        Ok(key) => key,
        Err(KeyError::MissingPrincipal) => {
            return skip(
                SkipReason::AnonymousPrincipal,
                next,
                Request::from_parts(parts, body),
            )
            .await;
        }
    };

    let store = cache.resolve_store(&parts.extensions);
    let if_none_match = parts
        .headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok());

    match lookup(store.as_ref(), &key, if_none_match).await {
        Ok(Lookup::NotModified { etag }) => {
            counter!(METRIC_NOT_MODIFIED).increment(1);
            debug!(cache = "output", outcome = "not_modified", %key, "conditional request matched");
            let time = policy.policy.evaluate(OffsetDateTime::now_utc());
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            set_etag(response.headers_mut(), &etag);
            apply_cache_headers(response.headers_mut(), &time, policy, None, false);
            return response;
        }
        Ok(Lookup::Replay(variant)) => {
            counter!(METRIC_HIT).increment(1);
            debug!(cache = "output", outcome = "hit", %key, "serving cached response");
            let time = policy.policy.evaluate(OffsetDateTime::now_utc());
            return replay(variant, &time, policy);
        }
        Ok(Lookup::Live) => {}
        Err(err) => {
            warn!(cache = "output", %key, error = %err, "cache lookup failed, treating as miss");
        }
    }

    counter!(METRIC_MISS).increment(1);
    debug!(cache = "output", outcome = "miss", %key, "cache miss, executing handler");

    let response = next.run(Request::from_parts(parts, body)).await;
    if !response.status().is_success() {
        return response;
    }

    let now = OffsetDateTime::now_utc();
    let time = policy.policy.evaluate(now);
    let (mut response_parts, body) = response.into_parts();

    let hint = body.size_hint();
    let has_body = hint.exact() != Some(0);
    let too_large = hint
        .upper()
        .is_some_and(|upper| upper > cache.config().max_body_bytes as u64);

    let body = if time.is_expired_at(now) || !has_body || too_large {
        debug!(
            cache = "output",
            outcome = "not_stored",
            expired = time.is_expired_at(now),
            has_body,
            too_large,
            "response not stored"
        );
        body
    } else {
        let bytes = match BodyExt::collect(body).await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!(cache = "output", %key, error = %err, "failed to buffer response body");
                return Response::from_parts(response_parts, Body::new(FailedBody::new(err)));
            }
        };

        if bytes.len() > cache.config().max_body_bytes {
            debug!(cache = "output", %key, size = bytes.len(), "response exceeds body limit");
        } else if !contains(store.as_ref(), &key).await {
            let variant = StoredVariant {
                body: bytes.clone(),
                content_type: response_parts
                    .headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
                    .unwrap_or_else(|| media_type.clone()),
                etag: Some(new_etag()),
                generated_at: Some(now),
                custom_headers: capture_custom_headers(
                    &response_parts.headers,
                    &policy.include_custom_headers,
                ),
            };
            let base = base_key(&endpoint.controller.name, &endpoint.action.name);

            match store_variant(store.as_ref(), &base, &key, &variant, time.absolute_expiration)
                .await
            {
                Ok(()) => {
                    counter!(METRIC_STORE).increment(1);
                    debug!(cache = "output", outcome = "stored", %key, "response stored");
                    if let Some(etag) = &variant.etag {
                        set_etag(&mut response_parts.headers, etag);
                    }
                }
                Err(err) => {
                    counter!(METRIC_STORE_ERROR).increment(1);
                    warn!(cache = "output", %key, error = %err, "failed to store response");
                }
            }
        }
        Body::from(bytes)
    };

    apply_cache_headers(
        &mut response_parts.headers,
        &time,
        policy,
        Some(now),
        has_body,
    );
    Response::from_parts(response_parts, body)
}

/// Invalidate cached responses after a successful mutating request.
#[instrument(
    skip_all,
    fields(controller = %endpoint.controller.name, action = %endpoint.action.name)
)]
pub async fn invalidation_layer(
    State(endpoint): State<InvalidationEndpoint>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let principal = request.extensions().get::<Principal>().cloned();
    let (mut parts, body) = request.into_parts();
    let ctx = request_context(
        &endpoint.controller.name,
        &endpoint.action,
        &mut parts,
        None,
        principal,
    )
    .await;
    let store = endpoint.cache.resolve_store(&parts.extensions);

    let response = next.run(Request::from_parts(parts, body)).await;
    if response.status().is_success() {
        apply_rules(
            store.as_ref(),
            &endpoint.rules,
            &ctx,
            &endpoint.controller,
            &endpoint.action,
        )
        .await;
    }
    response
}

async fn skip(reason: SkipReason, next: Next, request: Request<Body>) -> Response {
    counter!(METRIC_SKIP, "reason" => reason.as_str()).increment(1);
    debug!(cache = "output", outcome = "skip", reason = reason.as_str(), "bypassing output cache");
    next.run(request).await
}

/// Buffer POST/PUT bodies so their JSON properties can join the key.
///
/// Bodies that are not known to fit within `limit` stay unread and the key is
/// built without them.
async fn buffer_key_body(
    method: &Method,
    body: Body,
    exclude_query_string: bool,
    limit: usize,
) -> Result<(Body, Option<Bytes>), Response> {
    if exclude_query_string || (method != Method::POST && method != Method::PUT) {
        return Ok((body, None));
    }
    let fits = body
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= limit as u64);
    if !fits {
        debug!(cache = "output", limit, "request body left out of the cache key");
        return Ok((body, None));
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            Ok((Body::from(bytes.clone()), Some(bytes)))
        }
        Err(err) => {
            warn!(cache = "output", error = %err, "failed to read request body");
            Err(StatusCode::BAD_REQUEST.into_response())
        }
    }
}

/// Response body that yields the handler's body error instead of data.
struct FailedBody {
    error: Option<axum::Error>,
}

impl FailedBody {
    fn new(error: axum::Error) -> Self {
        Self { error: Some(error) }
    }
}

impl http_body::Body for FailedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.error.take().map(Err))
    }

    fn is_end_stream(&self) -> bool {
        self.error.is_none()
    }
}

async fn request_context(
    controller: &str,
    action: &ActionDescriptor,
    parts: &mut request::Parts,
    body: Option<Bytes>,
    principal: Option<Principal>,
) -> RequestContext {
    let path_params: Vec<(String, String)> = RawPathParams::from_request_parts(parts, &())
        .await
        .map(|params| {
            params
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let mut ctx = RequestContext::new(parts.method.clone(), controller, &action.name)
        .with_headers(parts.headers.clone());
    ctx.query = parts.uri.query().map(str::to_string);
    ctx.arguments = action.bind(&path_params, &ctx.query_pairs());
    ctx.body = body;
    ctx.principal = principal;
    ctx
}

async fn contains(store: &dyn AsyncOutputCacheStore, key: &str) -> bool {
    match store.contains(key).await {
        Ok(found) => found,
        Err(err) => {
            warn!(cache = "output", %key, error = %err, "cache lookup failed before store");
            true
        }
    }
}

fn replay(variant: StoredVariant, time: &CacheTime, policy: &EndpointPolicy) -> Response {
    let mut response = Response::new(Body::from(variant.body));
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&variant.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(etag) = &variant.etag {
        set_etag(headers, etag);
    }
    for (name, value) in &variant.custom_headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }

    apply_cache_headers(headers, time, policy, variant.generated_at, true);
    response
}

fn set_etag(headers: &mut HeaderMap, etag: &str) {
    if let Ok(value) = HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, value);
    }
}
