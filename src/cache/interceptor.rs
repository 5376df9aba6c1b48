//! Lookup and store halves of the response cache.
//!
//! A cached response is a group of records sharing one key: the body under the
//! key itself plus content type, ETag, generation timestamp and captured
//! headers under suffixed keys, all depending on the action's base key.

use axum::http::HeaderMap;
use bytes::Bytes;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use super::keys::{content_type_key, custom_headers_key, etag_key, generated_at_key};
use super::store::{AsyncOutputCacheStore, CacheRecord, CacheValue, StoreError};

/// Response data kept for one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVariant {
    pub body: Bytes,
    pub content_type: String,
    pub etag: Option<String>,
    pub generated_at: Option<OffsetDateTime>,
    pub custom_headers: Vec<(String, String)>,
}

/// Outcome of consulting the store before the handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Nothing usable stored; run the handler.
    Live,
    /// The client already holds the stored representation.
    NotModified { etag: String },
    Replay(StoredVariant),
}

/// Fresh strong ETag.
pub fn new_etag() -> String {
    format!("\"{}\"", Uuid::new_v4())
}

/// True when any entity tag listed in `If-None-Match` equals `etag`.
pub fn if_none_match_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == etag)
}

pub async fn lookup(
    store: &dyn AsyncOutputCacheStore,
    key: &str,
    if_none_match: Option<&str>,
) -> Result<Lookup, StoreError> {
    if !store.contains(key).await? {
        return Ok(Lookup::Live);
    }

    let etag = text(store, &etag_key(key)).await?;
    if let (Some(etag), Some(if_none_match)) = (&etag, if_none_match)
        && if_none_match_matches(if_none_match, etag)
    {
        return Ok(Lookup::NotModified { etag: etag.clone() });
    }

    let body = match store.get(key).await? {
        Some(CacheValue::Bytes(body)) => body,
        Some(CacheValue::Text(body)) => Bytes::from(body),
        Some(CacheValue::Empty) | None => return Ok(Lookup::Live),
    };

    let content_type = match text(store, &content_type_key(key)).await? {
        Some(content_type) => content_type,
        None => media_type_of(key).to_string(),
    };
    let generated_at = text(store, &generated_at_key(key))
        .await?
        .and_then(|stamp| OffsetDateTime::parse(&stamp, &Rfc3339).ok());
    let custom_headers = text(store, &custom_headers_key(key))
        .await?
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default();

    Ok(Lookup::Replay(StoredVariant {
        body,
        content_type,
        etag,
        generated_at,
        custom_headers,
    }))
}

/// Persist `variant` under `key` as one ordered batch depending on `base_key`.
///
/// The base key placeholder is written first when missing.
pub async fn store_variant(
    store: &dyn AsyncOutputCacheStore,
    base_key: &str,
    key: &str,
    variant: &StoredVariant,
    expiration: OffsetDateTime,
) -> Result<(), StoreError> {
    if !store.contains(base_key).await? {
        store
            .add(base_key, CacheValue::Empty, expiration, None)
            .await?;
    }

    let mut records = vec![
        CacheRecord::new(key, variant.body.clone()),
        CacheRecord::new(content_type_key(key), variant.content_type.clone()),
    ];
    if let Some(etag) = &variant.etag {
        records.push(CacheRecord::new(etag_key(key), etag.clone()));
    }
    if let Some(generated_at) = variant.generated_at {
        let stamp = generated_at
            .format(&Rfc3339)
            .map_err(|err| StoreError::operation("format_timestamp", err.to_string()))?;
        records.push(CacheRecord::new(generated_at_key(key), stamp));
    }
    if !variant.custom_headers.is_empty() {
        let json = serde_json::to_string(&variant.custom_headers)
            .map_err(|err| StoreError::operation("encode_headers", err.to_string()))?;
        records.push(CacheRecord::new(custom_headers_key(key), json));
    }

    store.add_all(records, expiration, Some(base_key)).await
}

/// Values of the named response headers, in configuration order.
pub fn capture_custom_headers(headers: &HeaderMap, names: &[String]) -> Vec<(String, String)> {
    names
        .iter()
        .flat_map(|name| {
            let name = name.to_ascii_lowercase();
            headers
                .get_all(name.as_str())
                .iter()
                .filter_map(|value| value.to_str().ok())
                .map(|value| (name.clone(), value.to_string()))
                .collect::<Vec<_>>()
        })
        .collect()
}

async fn text(
    store: &dyn AsyncOutputCacheStore,
    key: &str,
) -> Result<Option<String>, StoreError> {
    Ok(match store.get(key).await? {
        Some(CacheValue::Text(text)) => Some(text),
        _ => None,
    })
}

/// Media type segment at the end of a cache key.
fn media_type_of(key: &str) -> &str {
    key.rsplit(':').next().unwrap_or(key)
}
