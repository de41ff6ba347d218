//! Call descriptions handed to `Connection`.

use crate::http::HttpMethod;
use crate::sign::Params;

pub const DEFAULT_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const DEFAULT_ACCEPT: &str = "text/xml";

/// Per-call header overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub content_type: Option<String>,
    pub accept: Option<String>,
}

impl RequestOptions {
    pub fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    pub fn accept(&self) -> &str {
        self.accept.as_deref().unwrap_or(DEFAULT_ACCEPT)
    }
}

/// One API call: resource path (relative to `/page/api`), parameters,
/// method, optional raw body and header overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub params: Params,
    pub body: Option<String>,
    pub options: RequestOptions,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            params: Params::new(),
            body: None,
            options: RequestOptions::default(),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.options.content_type = Some(content_type.to_string());
        self
    }

    pub fn accept(mut self, accept: &str) -> Self {
        self.options.accept = Some(accept.to_string());
        self
    }
}

/// A call after signing. Built fresh per dispatch and discarded afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// Full path including the `/page/api` prefix.
    pub path: String,
    pub timestamp: i64,
    /// Caller parameters plus `api_ver`, `api_id` and `api_ts`.
    pub query_params: Params,
    /// Lowercase hex HMAC-SHA1, sent as `api_mac`.
    pub signature: String,
}

impl SignedRequest {
    /// `application/x-www-form-urlencoded` query including `api_mac`, keys sorted.
    pub fn query_string(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        let mut with_mac = self.query_params.clone();
        with_mac.insert("api_mac".to_string(), self.signature.clone());
        for (key, value) in &with_mac {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}
