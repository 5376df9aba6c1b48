//! Request identity as seen by key generators and invalidation rules.

use axum::http::{HeaderMap, Method};
use bytes::Bytes;

/// Authenticated identity attached to a request as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Value bound to one action parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    Single(String),
    Many(Vec<String>),
}

impl ArgumentValue {
    /// Text used inside cache keys; each element of a list ends with `;`.
    pub fn key_text(&self) -> String {
        match self {
            Self::Single(value) => value.clone(),
            Self::Many(values) => values.iter().map(|value| format!("{value};")).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionArgument {
    pub name: String,
    /// `None` when the parameter was declared but nothing was bound.
    pub value: Option<ArgumentValue>,
}

impl ActionArgument {
    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(ArgumentValue::Single(value.into())),
        }
    }
}

/// Everything about one request that can influence a cache key.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub controller: String,
    pub action: String,
    pub arguments: Vec<ActionArgument>,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Buffered request body, present for verbs whose body feeds the key.
    pub body: Option<Bytes>,
    pub principal: Option<Principal>,
}

impl RequestContext {
    pub fn new(method: Method, controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            method,
            controller: controller.into(),
            action: action.into(),
            arguments: Vec::new(),
            query: None,
            headers: HeaderMap::new(),
            body: None,
            principal: None,
        }
    }

    pub fn with_argument(mut self, argument: ActionArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Decoded query pairs in request order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
