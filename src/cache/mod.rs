//! Output cache.
//!
//! Server-side memoization of handler responses:
//!
//! - **Keys**: derived from controller, action, arguments, query string, vary-by
//!   headers, principal and negotiated media type (`keys`)
//! - **Store**: keyed records with absolute expiration and dependency-linked
//!   removal (`store`)
//! - **Policies**: fixed, absolute and recurring expirations (`time`)
//! - **Middleware**: lookup, replay, conditional requests and invalidation
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `output-cache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_body_bytes = 4194304
//!
//! [cache.endpoints.teams.get]
//! policy = { kind = "fixed_duration", server_seconds = 100, client_seconds = 100 }
//! # ... see config.rs for all options
//! ```

mod config;
mod context;
mod endpoint;
mod headers;
mod interceptor;
mod invalidation;
mod keys;
mod lock;
mod middleware;
mod negotiation;
mod registry;
mod runtime;
mod store;
mod time;

pub use config::OutputCacheConfig;
pub(crate) use config::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_MEDIA_TYPE, DEFAULT_PURGE_INTERVAL_MS,
    DEFAULT_SUPPORTED_MEDIA_TYPES,
};
pub use context::{ActionArgument, ArgumentValue, Principal, RequestContext};
pub use endpoint::{
    ActionDescriptor, ControllerDescriptor, EndpointPolicy, ParameterDescriptor, ParameterSource,
    SkipReason, TypeRef,
};
pub use headers::apply_cache_headers;
pub use interceptor::{Lookup, StoredVariant, lookup, store_variant};
pub use invalidation::{
    BaseKeyPrefix, InvalidationRule, Invalidator, KeyPrefixGenerator, apply_rules, auto_targets,
    invalidate_base_key, invalidate_prefix,
};
pub use keys::{
    CONTENT_TYPE_SUFFIX, CUSTOM_HEADERS_SUFFIX, CacheKeyGenerator, DefaultCacheKeyGenerator,
    ETAG_SUFFIX, GENERATED_AT_SUFFIX, KeyError, KeyOptions, PerUserCacheKeyGenerator, base_key,
};
pub use middleware::{invalidation_layer, output_cache_layer};
pub use negotiation::{MediaTypeNegotiator, resolve_media_type};
pub use registry::DependencyIndex;
pub use runtime::{
    CachedEndpoint, DEFAULT_KEY_GENERATOR, InvalidationEndpoint, OutputCache, OutputCacheBuilder,
    PER_USER_KEY_GENERATOR, StoreOverride,
};
pub use store::{
    AsyncOutputCacheStore, CacheRecord, CacheValue, MemoryStore, OutputCacheStore, StoreError,
};
pub use time::{CachePolicy, CacheTime, PolicyError};
