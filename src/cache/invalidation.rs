//! Removal of cached responses after state changes.
//!
//! Every rule targets base keys (or key prefixes); removing a base key drops
//! all variants stored under it. All operations are idempotent.

use std::fmt;
use std::sync::Arc;

use axum::http::Method;
use metrics::counter;
use tracing::{debug, warn};

use super::context::RequestContext;
use super::endpoint::{ActionDescriptor, ControllerDescriptor};
use super::keys::base_key;
use super::store::{AsyncOutputCacheStore, StoreError};

const METRIC_INVALIDATE: &str = "output_cache_invalidate_total";

/// Maps a request and a base key to a key prefix to purge.
pub trait KeyPrefixGenerator: Send + Sync {
    fn prefix(&self, ctx: &RequestContext, base_key: &str) -> String;
}

/// Uses the base key itself as prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseKeyPrefix;

impl KeyPrefixGenerator for BaseKeyPrefix {
    fn prefix(&self, _ctx: &RequestContext, base_key: &str) -> String {
        base_key.to_string()
    }
}

/// What a mutating endpoint invalidates once it has succeeded.
#[derive(Clone)]
pub enum InvalidationRule {
    /// One action, in the current controller unless `controller` is set.
    Explicit {
        controller: Option<String>,
        action: String,
    },
    /// Every GET-like action of the current controller.
    Auto { try_match_type: bool },
    /// Every key starting with the prefix computed for the target action.
    Prefix {
        controller: Option<String>,
        action: String,
        generator: Arc<dyn KeyPrefixGenerator>,
    },
}

impl fmt::Debug for InvalidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit { controller, action } => f
                .debug_struct("Explicit")
                .field("controller", controller)
                .field("action", action)
                .finish(),
            Self::Auto { try_match_type } => f
                .debug_struct("Auto")
                .field("try_match_type", try_match_type)
                .finish(),
            Self::Prefix {
                controller, action, ..
            } => f
                .debug_struct("Prefix")
                .field("controller", controller)
                .field("action", action)
                .finish_non_exhaustive(),
        }
    }
}

impl InvalidationRule {
    pub fn action(action: impl Into<String>) -> Self {
        Self::Explicit {
            controller: None,
            action: action.into(),
        }
    }

    pub fn action_in(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Explicit {
            controller: Some(controller.into()),
            action: action.into(),
        }
    }

    pub fn auto() -> Self {
        Self::Auto {
            try_match_type: false,
        }
    }

    pub fn auto_matching_types() -> Self {
        Self::Auto {
            try_match_type: true,
        }
    }

    pub fn prefix(action: impl Into<String>, generator: Arc<dyn KeyPrefixGenerator>) -> Self {
        Self::Prefix {
            controller: None,
            action: action.into(),
            generator,
        }
    }

    pub fn prefix_in(
        controller: impl Into<String>,
        action: impl Into<String>,
        generator: Arc<dyn KeyPrefixGenerator>,
    ) -> Self {
        Self::Prefix {
            controller: Some(controller.into()),
            action: action.into(),
            generator,
        }
    }
}

pub fn is_mutating(method: &Method) -> bool {
    [Method::POST, Method::PUT, Method::DELETE, Method::PATCH].contains(method)
}

/// Base keys of the GET-like actions auto-invalidation should clear.
///
/// With `try_match_type`, only actions whose return type (or collection element
/// type) matches a parameter type of `mutating` are kept.
pub fn auto_targets(
    controller: &ControllerDescriptor,
    mutating: &ActionDescriptor,
    try_match_type: bool,
) -> Vec<String> {
    controller
        .actions
        .iter()
        .filter(|action| action.is_get_like())
        .filter(|action| {
            !try_match_type
                || action.returns.as_ref().is_some_and(|returns| {
                    mutating
                        .parameters
                        .iter()
                        .any(|parameter| parameter.type_name == returns.element())
                })
        })
        .map(|action| base_key(&controller.name, &action.name))
        .collect()
}

/// Remove `base_key` and every record depending on it, if present.
///
/// Other actions whose base key merely starts with `base_key` are untouched.
pub async fn invalidate_base_key(
    store: &dyn AsyncOutputCacheStore,
    base_key: &str,
) -> Result<bool, StoreError> {
    if !store.contains(base_key).await? {
        return Ok(false);
    }
    store.remove(base_key).await?;
    counter!(METRIC_INVALIDATE, "kind" => "base_key").increment(1);
    debug!(cache = "output", base_key, "invalidated base key");
    Ok(true)
}

/// Remove every key starting with `prefix`; returns how many keys matched.
pub async fn invalidate_prefix(
    store: &dyn AsyncOutputCacheStore,
    prefix: &str,
) -> Result<usize, StoreError> {
    let keys = store.find_keys_starting_with(prefix).await?;
    for key in &keys {
        store.remove(key).await?;
    }
    if !keys.is_empty() {
        counter!(METRIC_INVALIDATE, "kind" => "prefix").increment(1);
        debug!(cache = "output", prefix, removed = keys.len(), "invalidated prefix");
    }
    Ok(keys.len())
}

/// Run `rules` for a mutating request that completed successfully.
///
/// Other verbs invalidate nothing. Store failures are logged and do not stop
/// the remaining rules.
pub async fn apply_rules(
    store: &dyn AsyncOutputCacheStore,
    rules: &[InvalidationRule],
    ctx: &RequestContext,
    controller: &ControllerDescriptor,
    action: &ActionDescriptor,
) {
    if !is_mutating(&ctx.method) {
        return;
    }
    for rule in rules {
        match rule {
            InvalidationRule::Explicit {
                controller: target,
                action: target_action,
            } => {
                let key = base_key(target.as_deref().unwrap_or(&controller.name), target_action);
                report(invalidate_base_key(store, &key).await.map(drop), &key);
            }
            InvalidationRule::Auto { try_match_type } => {
                for key in auto_targets(controller, action, *try_match_type) {
                    report(invalidate_base_key(store, &key).await.map(drop), &key);
                }
            }
            InvalidationRule::Prefix {
                controller: target,
                action: target_action,
                generator,
            } => {
                let key = base_key(target.as_deref().unwrap_or(&controller.name), target_action);
                let prefix = generator.prefix(ctx, &key);
                report(invalidate_prefix(store, &prefix).await.map(drop), &prefix);
            }
        }
    }
}

fn report(result: Result<(), StoreError>, key: &str) {
    if let Err(err) = result {
        warn!(cache = "output", key, error = %err, "cache invalidation failed");
    }
}

/// Invalidation entry point for application code.
#[derive(Clone)]
pub struct Invalidator {
    store: Arc<dyn AsyncOutputCacheStore>,
}

impl Invalidator {
    pub fn new(store: Arc<dyn AsyncOutputCacheStore>) -> Self {
        Self { store }
    }

    /// Drop every cached variant of `controller`/`action`.
    pub async fn invalidate(&self, controller: &str, action: &str) -> Result<bool, StoreError> {
        invalidate_base_key(self.store.as_ref(), &base_key(controller, action)).await
    }

    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        invalidate_prefix(self.store.as_ref(), prefix).await
    }
}
