//! Shared output cache state and per-route handles.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Extensions;
use tracing::debug;

use super::config::OutputCacheConfig;
use super::endpoint::{ActionDescriptor, ControllerDescriptor, EndpointPolicy};
use super::invalidation::{InvalidationRule, Invalidator};
use super::keys::{CacheKeyGenerator, DefaultCacheKeyGenerator, PerUserCacheKeyGenerator};
use super::negotiation::MediaTypeNegotiator;
use super::store::{AsyncOutputCacheStore, MemoryStore};

pub const DEFAULT_KEY_GENERATOR: &str = "default";
pub const PER_USER_KEY_GENERATOR: &str = "per_user";

/// Request extension that routes one request to a specific store.
#[derive(Clone)]
pub struct StoreOverride(pub Arc<dyn AsyncOutputCacheStore>);

struct Inner {
    config: OutputCacheConfig,
    provider: Option<Arc<dyn AsyncOutputCacheStore>>,
    memory: Arc<MemoryStore>,
    generators: HashMap<String, Arc<dyn CacheKeyGenerator>>,
    negotiator: Option<Arc<dyn MediaTypeNegotiator>>,
}

/// Shared output cache: configuration, stores, key generators.
#[derive(Clone)]
pub struct OutputCache {
    inner: Arc<Inner>,
}

pub struct OutputCacheBuilder {
    config: OutputCacheConfig,
    provider: Option<Arc<dyn AsyncOutputCacheStore>>,
    generators: HashMap<String, Arc<dyn CacheKeyGenerator>>,
    negotiator: Option<Arc<dyn MediaTypeNegotiator>>,
}

impl OutputCacheBuilder {
    /// Store used instead of the built-in memory store.
    pub fn store(mut self, store: Arc<dyn AsyncOutputCacheStore>) -> Self {
        self.provider = Some(store);
        self
    }

    /// Register (or replace) a named key generator.
    pub fn key_generator(
        mut self,
        name: impl Into<String>,
        generator: Arc<dyn CacheKeyGenerator>,
    ) -> Self {
        self.generators.insert(name.into(), generator);
        self
    }

    pub fn negotiator(mut self, negotiator: Arc<dyn MediaTypeNegotiator>) -> Self {
        self.negotiator = Some(negotiator);
        self
    }

    pub fn build(self) -> OutputCache {
        OutputCache {
            inner: Arc::new(Inner {
                config: self.config,
                provider: self.provider,
                memory: Arc::new(MemoryStore::new()),
                generators: self.generators,
                negotiator: self.negotiator,
            }),
        }
    }
}

impl OutputCache {
    pub fn builder(config: OutputCacheConfig) -> OutputCacheBuilder {
        let mut generators: HashMap<String, Arc<dyn CacheKeyGenerator>> = HashMap::new();
        generators.insert(
            DEFAULT_KEY_GENERATOR.to_string(),
            Arc::new(DefaultCacheKeyGenerator),
        );
        generators.insert(
            PER_USER_KEY_GENERATOR.to_string(),
            Arc::new(PerUserCacheKeyGenerator),
        );

        OutputCacheBuilder {
            config,
            provider: None,
            generators,
            negotiator: None,
        }
    }

    pub fn new(config: OutputCacheConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &OutputCacheConfig {
        &self.inner.config
    }

    /// Built-in memory store, used when no provider is registered.
    pub fn memory_store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.inner.memory)
    }

    /// Registered provider, or the built-in memory store.
    pub fn store(&self) -> Arc<dyn AsyncOutputCacheStore> {
        match &self.inner.provider {
            Some(provider) => Arc::clone(provider),
            None => self.memory_store(),
        }
    }

    /// Store for one request: a [`StoreOverride`] extension wins over [`Self::store`].
    pub fn resolve_store(&self, extensions: &Extensions) -> Arc<dyn AsyncOutputCacheStore> {
        match extensions.get::<StoreOverride>() {
            Some(StoreOverride(store)) => Arc::clone(store),
            None => self.store(),
        }
    }

    /// Named key generator; unknown names fall back to the default one.
    pub fn key_generator(&self, name: Option<&str>) -> Arc<dyn CacheKeyGenerator> {
        let name = name.unwrap_or(DEFAULT_KEY_GENERATOR);
        match self.inner.generators.get(name) {
            Some(generator) => Arc::clone(generator),
            None => {
                debug!(cache = "output", generator = name, "unknown key generator, using default");
                self.inner
                    .generators
                    .get(DEFAULT_KEY_GENERATOR)
                    .map(Arc::clone)
                    .unwrap_or_else(|| Arc::new(DefaultCacheKeyGenerator))
            }
        }
    }

    pub fn negotiator(&self) -> Option<&dyn MediaTypeNegotiator> {
        self.inner.negotiator.as_deref()
    }

    /// Handle for a cached route. A policy configured for the action replaces
    /// `policy`.
    pub fn endpoint(
        &self,
        controller: &ControllerDescriptor,
        action: &str,
        policy: EndpointPolicy,
    ) -> CachedEndpoint {
        let policy = self
            .config()
            .endpoint_policy(&controller.name, action)
            .cloned()
            .unwrap_or(policy);

        CachedEndpoint {
            cache: self.clone(),
            controller: Arc::new(controller.clone()),
            action: Arc::new(describe(controller, action)),
            policy: Arc::new(policy),
        }
    }

    /// Handle for a route whose success invalidates cached responses.
    pub fn invalidation(
        &self,
        controller: &ControllerDescriptor,
        action: &str,
        rules: Vec<InvalidationRule>,
    ) -> InvalidationEndpoint {
        InvalidationEndpoint {
            cache: self.clone(),
            controller: Arc::new(controller.clone()),
            action: Arc::new(describe(controller, action)),
            rules: Arc::new(rules),
        }
    }

    pub fn invalidator(&self) -> Invalidator {
        Invalidator::new(self.store())
    }
}

fn describe(controller: &ControllerDescriptor, action: &str) -> ActionDescriptor {
    controller
        .action(action)
        .cloned()
        .unwrap_or_else(|| ActionDescriptor::new(action))
}

/// State for [`output_cache_layer`](super::output_cache_layer).
#[derive(Clone)]
pub struct CachedEndpoint {
    pub cache: OutputCache,
    pub controller: Arc<ControllerDescriptor>,
    pub action: Arc<ActionDescriptor>,
    pub policy: Arc<EndpointPolicy>,
}

/// State for [`invalidation_layer`](super::invalidation_layer).
#[derive(Clone)]
pub struct InvalidationEndpoint {
    pub cache: OutputCache,
    pub controller: Arc<ControllerDescriptor>,
    pub action: Arc<ActionDescriptor>,
    pub rules: Arc<Vec<InvalidationRule>>,
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, Method};

    use super::*;
    use crate::cache::context::RequestContext;
    use crate::cache::keys::{KeyError, KeyOptions};
    use crate::cache::time::CachePolicy;

    struct Constant;

    impl CacheKeyGenerator for Constant {
        fn make_key(
            &self,
            _ctx: &RequestContext,
            _media_type: &str,
            _options: &KeyOptions,
        ) -> Result<String, KeyError> {
            Ok("constant".into())
        }
    }

    struct Fixed;

    impl MediaTypeNegotiator for Fixed {
        fn negotiate(&self, _headers: &HeaderMap) -> Option<String> {
            Some("text/plain".into())
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Method::GET, "teams", "get")
    }

    #[test]
    fn generator_registry_falls_back_to_default() {
        let cache = OutputCache::builder(OutputCacheConfig::default())
            .key_generator("constant", Arc::new(Constant))
            .build();
        let options = KeyOptions::default();

        let custom = cache.key_generator(Some("constant"));
        assert_eq!(custom.make_key(&ctx(), "a/b", &options), Ok("constant".into()));

        let unknown = cache.key_generator(Some("missing"));
        assert_eq!(
            unknown.make_key(&ctx(), "a/b", &options),
            Ok("teams-get:a/b".into())
        );

        let per_user = cache.key_generator(Some(PER_USER_KEY_GENERATOR));
        assert_eq!(
            per_user.make_key(&ctx(), "a/b", &options),
            Err(KeyError::MissingPrincipal)
        );
    }

    #[test]
    fn store_resolution_order() {
        let provider: Arc<dyn AsyncOutputCacheStore> = Arc::new(MemoryStore::new());
        let cache = OutputCache::builder(OutputCacheConfig::default())
            .store(Arc::clone(&provider))
            .build();

        let mut extensions = Extensions::new();
        assert!(Arc::ptr_eq(&cache.resolve_store(&extensions), &provider));

        let scoped: Arc<dyn AsyncOutputCacheStore> = Arc::new(MemoryStore::new());
        extensions.insert(StoreOverride(Arc::clone(&scoped)));
        assert!(Arc::ptr_eq(&cache.resolve_store(&extensions), &scoped));

        let fallback = OutputCache::new(OutputCacheConfig::default());
        let memory: Arc<dyn AsyncOutputCacheStore> = fallback.memory_store();
        assert!(Arc::ptr_eq(&fallback.resolve_store(&Extensions::new()), &memory));
    }

    #[test]
    fn configured_policy_replaces_code_policy() {
        let mut config = OutputCacheConfig::default();
        config.endpoints.insert(
            "teams".into(),
            HashMap::from([(
                "get".into(),
                EndpointPolicy::new(CachePolicy::fixed(5, 5)),
            )]),
        );
        let cache = OutputCache::builder(config)
            .negotiator(Arc::new(Fixed))
            .build();
        let controller = ControllerDescriptor::new("Teams");

        let configured =
            cache.endpoint(&controller, "Get", EndpointPolicy::new(CachePolicy::fixed(100, 100)));
        assert_eq!(configured.policy.policy, CachePolicy::fixed(5, 5));
        assert_eq!(configured.action.name, "Get");

        let coded = cache.endpoint(
            &controller,
            "List",
            EndpointPolicy::new(CachePolicy::fixed(100, 100)),
        );
        assert_eq!(coded.policy.policy, CachePolicy::fixed(100, 100));
        assert_eq!(
            cache.negotiator().and_then(|n| n.negotiate(&HeaderMap::new())),
            Some("text/plain".into())
        );
    }
}
