//! Cache key derivation.
//!
//! A key has the shape `{base}{parameters}:{headers}:{media type}`, where the
//! base is `{controller}-{action}` lower-cased and empty segments are left out.
//! Every record stored for one response shares the key and adds a suffix.

use std::collections::HashSet;

use axum::http::{Method, header};
use serde_json::{Map, Value};
use thiserror::Error;

use super::context::{ArgumentValue, RequestContext};

pub const CONTENT_TYPE_SUFFIX: &str = ":response-ct";
pub const ETAG_SUFFIX: &str = ":response-etag";
pub const GENERATED_AT_SUFFIX: &str = ":response-generationtimestamp";
pub const CUSTOM_HEADERS_SUFFIX: &str = ":custom-headers";

const CALLBACK: &str = "callback";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("per-user cache key requested for an anonymous request")]
    MissingPrincipal,
}

/// Per-endpoint knobs that change how a key is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyOptions {
    pub exclude_query_string: bool,
    pub exclude_auth_header: bool,
    /// Request headers whose values become part of the key.
    pub vary_by_headers: Vec<String>,
}

/// Strategy turning a request into a cache key.
pub trait CacheKeyGenerator: Send + Sync {
    fn make_key(
        &self,
        ctx: &RequestContext,
        media_type: &str,
        options: &KeyOptions,
    ) -> Result<String, KeyError>;
}

/// `{base}{parameters}:[{headers}:]{media type}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCacheKeyGenerator;

impl CacheKeyGenerator for DefaultCacheKeyGenerator {
    fn make_key(
        &self,
        ctx: &RequestContext,
        media_type: &str,
        options: &KeyOptions,
    ) -> Result<String, KeyError> {
        Ok(compose(ctx, options, None, media_type))
    }
}

/// Like [`DefaultCacheKeyGenerator`] with the principal name before the media type.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerUserCacheKeyGenerator;

impl CacheKeyGenerator for PerUserCacheKeyGenerator {
    fn make_key(
        &self,
        ctx: &RequestContext,
        media_type: &str,
        options: &KeyOptions,
    ) -> Result<String, KeyError> {
        let user = ctx
            .principal
            .as_ref()
            .map(|principal| principal.name.to_lowercase())
            .ok_or(KeyError::MissingPrincipal)?;
        Ok(compose(ctx, options, Some(&user), media_type))
    }
}

fn compose(
    ctx: &RequestContext,
    options: &KeyOptions,
    user: Option<&str>,
    media_type: &str,
) -> String {
    let mut key = base_key(&ctx.controller, &ctx.action);
    key.push_str(&format_parameters(ctx, options.exclude_query_string));

    let headers = format_custom_headers(ctx, options);
    if !headers.is_empty() {
        key.push(':');
        key.push_str(&headers);
    }
    if let Some(user) = user {
        key.push(':');
        key.push_str(user);
    }
    key.push(':');
    key.push_str(media_type);
    key
}

/// Invalidation anchor shared by every variant of one action.
pub fn base_key(controller: &str, action: &str) -> String {
    format!("{}-{}", controller.to_lowercase(), action.to_lowercase())
}

/// Parameter segment, `-` followed by `&`-joined `name=value` pairs, or empty.
pub fn format_parameters(ctx: &RequestContext, exclude_query_string: bool) -> String {
    let mut pairs = UniquePairs::default();
    let strip_callback = has_jsonp_callback(ctx);

    for argument in &ctx.arguments {
        if strip_callback && argument.name.eq_ignore_ascii_case(CALLBACK) {
            continue;
        }
        if let Some(value) = &argument.value {
            pairs.push(format!("{}={}", argument.name, value.key_text()));
        }
    }

    if exclude_query_string {
        return pairs.finish();
    }

    for (name, value) in ctx.query_pairs() {
        if !name.eq_ignore_ascii_case(CALLBACK) {
            pairs.push(format!("{name}={value}"));
        }
    }
    if ctx.method == Method::POST || ctx.method == Method::PUT {
        for pair in body_pairs(ctx) {
            pairs.push(pair);
        }
    }

    pairs.finish()
}

/// Ordered `name=value` pairs without duplicates.
#[derive(Default)]
struct UniquePairs {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl UniquePairs {
    fn push(&mut self, pair: String) {
        if self.seen.insert(pair.clone()) {
            self.ordered.push(pair);
        }
    }

    fn finish(self) -> String {
        if self.ordered.is_empty() {
            String::new()
        } else {
            format!("-{}", self.ordered.join("&"))
        }
    }
}

/// GET requests naming a non-empty JSONP `callback` in the query string.
fn has_jsonp_callback(ctx: &RequestContext) -> bool {
    ctx.method == Method::GET
        && ctx
            .query_pairs()
            .iter()
            .any(|(name, value)| name.eq_ignore_ascii_case(CALLBACK) && !value.trim().is_empty())
}

/// `name=value` per property of a flat JSON object body.
fn body_pairs(ctx: &RequestContext) -> Vec<String> {
    let Some(body) = ctx.body.as_deref().filter(|body| !body.is_empty()) else {
        return Vec::new();
    };
    let Ok(object) = serde_json::from_slice::<Map<String, Value>>(body) else {
        return Vec::new();
    };
    object
        .iter()
        .map(|(name, value)| format!("{name}={}", body_value_text(value)))
        .collect()
}

fn body_value_text(value: &Value) -> String {
    value
        .to_string()
        .chars()
        .filter(|c| !matches!(c, '{' | '}' | '[' | ']' | '"'))
        .map(|c| if c == ',' { '_' } else { c })
        .collect::<String>()
        .to_lowercase()
}

/// Header segment built from the configured vary-by request headers.
pub fn format_custom_headers(ctx: &RequestContext, options: &KeyOptions) -> String {
    let mut names: Vec<String> = options
        .vary_by_headers
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .filter(|name| !(options.exclude_auth_header && name == header::AUTHORIZATION.as_str()))
        .collect();
    names.sort();
    names.dedup();

    names
        .into_iter()
        .filter_map(|name| {
            let mut values: Vec<String> = ctx
                .headers
                .get_all(name.as_str())
                .iter()
                .filter_map(|value| value.to_str().ok().map(str::to_string))
                .collect();
            let value = match values.len() {
                0 => return None,
                1 => ArgumentValue::Single(values.remove(0)),
                _ => ArgumentValue::Many(values),
            };
            Some(format!("{name}={}", value.key_text()))
        })
        .collect::<Vec<_>>()
        .join("&")
}

pub fn content_type_key(key: &str) -> String {
    format!("{key}{CONTENT_TYPE_SUFFIX}")
}

pub fn etag_key(key: &str) -> String {
    format!("{key}{ETAG_SUFFIX}")
}

pub fn generated_at_key(key: &str) -> String {
    format!("{key}{GENERATED_AT_SUFFIX}")
}

pub fn custom_headers_key(key: &str) -> String {
    format!("{key}{CUSTOM_HEADERS_SUFFIX}")
}
