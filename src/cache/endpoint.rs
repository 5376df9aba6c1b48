//! Per-endpoint cache policy and static action descriptions.

use axum::http::Method;
use serde::Deserialize;

use super::context::{ActionArgument, ArgumentValue};
use super::keys::KeyOptions;
use super::time::CachePolicy;

/// Declarative caching rules for one action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointPolicy {
    pub policy: CachePolicy,
    pub must_revalidate: bool,
    pub no_cache: bool,
    pub private: bool,
    /// Skip both lookup and store for authenticated requests.
    pub anonymous_only: bool,
    pub exclude_query_string: bool,
    pub exclude_auth_header: bool,
    /// Response headers captured on store and replayed on hits.
    pub include_custom_headers: Vec<String>,
    /// Request headers that take part in the cache key.
    pub vary_by_headers: Vec<String>,
    /// Name of a registered key generator.
    pub key_generator: Option<String>,
    /// Fixed media type, bypassing negotiation.
    pub media_type: Option<String>,
    /// HTTP verbs eligible for caching.
    pub methods: Vec<String>,
    /// Disables caching entirely; wins over every other flag.
    pub ignore: bool,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        Self {
            policy: CachePolicy::default(),
            must_revalidate: false,
            no_cache: false,
            private: false,
            anonymous_only: false,
            exclude_query_string: false,
            exclude_auth_header: false,
            include_custom_headers: Vec::new(),
            vary_by_headers: Vec::new(),
            key_generator: None,
            media_type: None,
            methods: vec![Method::GET.to_string()],
            ignore: false,
        }
    }
}

/// Why a request bypassed the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Ignored,
    Method,
    Authenticated,
    AnonymousPrincipal,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Method => "method",
            Self::Authenticated => "authenticated",
            Self::AnonymousPrincipal => "anonymous_principal",
        }
    }
}

impl EndpointPolicy {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn ignored() -> Self {
        Self {
            ignore: true,
            ..Self::default()
        }
    }

    pub fn with_must_revalidate(mut self) -> Self {
        self.must_revalidate = true;
        self
    }

    pub fn with_no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    pub fn with_private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn with_anonymous_only(mut self) -> Self {
        self.anonymous_only = true;
        self
    }

    pub fn with_exclude_query_string(mut self) -> Self {
        self.exclude_query_string = true;
        self
    }

    pub fn with_exclude_auth_header(mut self) -> Self {
        self.exclude_auth_header = true;
        self
    }

    pub fn with_custom_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_custom_headers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_vary_by_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vary_by_headers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_key_generator(mut self, name: impl Into<String>) -> Self {
        self.key_generator = Some(name.into());
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.methods = methods.into_iter().map(|method| method.to_string()).collect();
        self
    }

    pub fn caches_method(&self, method: &Method) -> bool {
        self.methods
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(method.as_str()))
    }

    /// Reason to bypass the cache for this request, if any.
    pub fn skip_reason(&self, method: &Method, authenticated: bool) -> Option<SkipReason> {
        if self.ignore {
            Some(SkipReason::Ignored)
        } else if !self.caches_method(method) {
            Some(SkipReason::Method)
        } else if self.anonymous_only && authenticated {
            Some(SkipReason::Authenticated)
        } else {
            None
        }
    }

    pub fn key_options(&self) -> KeyOptions {
        KeyOptions {
            exclude_query_string: self.exclude_query_string,
            exclude_auth_header: self.exclude_auth_header,
            vary_by_headers: self.vary_by_headers.clone(),
        }
    }
}

/// Declared return type of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Single(String),
    Collection(String),
}

impl TypeRef {
    /// The type itself, or the element type of a collection.
    pub fn element(&self) -> &str {
        match self {
            Self::Single(name) | Self::Collection(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSource {
    Path,
    Query,
    Body,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub type_name: String,
    pub source: ParameterSource,
}

impl ParameterDescriptor {
    pub fn path(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, type_name, ParameterSource::Path)
    }

    pub fn query(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, type_name, ParameterSource::Query)
    }

    pub fn body(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, type_name, ParameterSource::Body)
    }

    fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        source: ParameterSource,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            source,
        }
    }
}

/// Static description of one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub name: String,
    /// Explicit GET marker for actions whose name does not start with `get`.
    pub http_get: bool,
    pub returns: Option<TypeRef>,
    pub parameters: Vec<ParameterDescriptor>,
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            http_get: false,
            returns: None,
            parameters: Vec::new(),
        }
    }

    pub fn http_get(mut self) -> Self {
        self.http_get = true;
        self
    }

    pub fn returning(mut self, returns: TypeRef) -> Self {
        self.returns = Some(returns);
        self
    }

    pub fn with_parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Actions that read state: explicit GET marker or a name starting with `get`.
    pub fn is_get_like(&self) -> bool {
        self.http_get || self.name.to_ascii_lowercase().starts_with("get")
    }

    /// Bind path and query values to the declared parameters.
    ///
    /// Without declared parameters every path value is bound under its own name.
    /// Body parameters are never bound.
    pub fn bind(
        &self,
        path_params: &[(String, String)],
        query_pairs: &[(String, String)],
    ) -> Vec<ActionArgument> {
        if self.parameters.is_empty() {
            return path_params
                .iter()
                .map(|(name, value)| ActionArgument::single(name.clone(), value.clone()))
                .collect();
        }

        self.parameters
            .iter()
            .filter_map(|parameter| {
                let value = match parameter.source {
                    ParameterSource::Body => return None,
                    ParameterSource::Path => path_params
                        .iter()
                        .find(|(name, _)| name == &parameter.name)
                        .map(|(_, value)| ArgumentValue::Single(value.clone())),
                    ParameterSource::Query => {
                        let mut values: Vec<String> = query_pairs
                            .iter()
                            .filter(|(name, _)| name == &parameter.name)
                            .map(|(_, value)| value.clone())
                            .collect();
                        match values.len() {
                            0 => None,
                            1 => Some(ArgumentValue::Single(values.remove(0))),
                            _ => Some(ArgumentValue::Many(values)),
                        }
                    }
                };
                Some(ActionArgument {
                    name: parameter.name.clone(),
                    value,
                })
            })
            .collect()
    }
}

/// Static description of a controller and its actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerDescriptor {
    pub name: String,
    pub actions: Vec<ActionDescriptor>,
}

impl ControllerDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: ActionDescriptor) -> Self {
        self.actions.push(action);
        self
    }

    pub fn action(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions
            .iter()
            .find(|action| action.name.eq_ignore_ascii_case(name))
    }
}
