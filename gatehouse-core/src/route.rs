//! Route context classification
//!
//! Decides whether an inbound request is an API request or a web request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of an inbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Machine client expecting JSON
    Api,
    /// Browser navigation
    Web,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Api => f.write_str("api"),
            RequestKind::Web => f.write_str("web"),
        }
    }
}

/// The parts of a request the classifier looks at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Raw `Accept` header
    #[serde(default)]
    pub accept: Option<String>,
    /// Request path
    #[serde(default)]
    pub path: String,
    /// Whether the request was sent by script (`X-Requested-With: XMLHttpRequest`)
    #[serde(default)]
    pub ajax: bool,
}

impl RequestInfo {
    /// Request for a path with no headers
    pub fn new(path: impl Into<String>) -> Self {
        RequestInfo {
            accept: None,
            path: path.into(),
            ajax: false,
        }
    }

    /// Set the `Accept` header
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Mark as a script request
    pub fn with_ajax(mut self, ajax: bool) -> Self {
        self.ajax = ajax;
        self
    }
}

/// Classifies requests as API or web
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    api_prefix: String,
}

impl Default for RouteClassifier {
    fn default() -> Self {
        RouteClassifier::new("api")
    }
}

impl RouteClassifier {
    /// Create a classifier with an API path prefix
    pub fn new(api_prefix: impl Into<String>) -> Self {
        RouteClassifier {
            api_prefix: api_prefix.into().trim_matches('/').to_string(),
        }
    }

    /// The configured API prefix, without slashes
    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    /// Classify a request
    pub fn classify(&self, request: &RequestInfo) -> RequestKind {
        if self.expects_json(request) || self.has_api_prefix(&request.path) {
            RequestKind::Api
        } else {
            RequestKind::Web
        }
    }

    fn expects_json(&self, request: &RequestInfo) -> bool {
        let first = request
            .accept
            .as_deref()
            .and_then(|accept| accept.split(',').next())
            .map(|media| media.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();

        if first.contains("/json") || first.contains("+json") {
            return true;
        }

        request.ajax && (first.is_empty() || first == "*/*" || first == "*")
    }

    fn has_api_prefix(&self, path: &str) -> bool {
        if self.api_prefix.is_empty() {
            return false;
        }

        let path = path.trim_start_matches('/');
        match path.strip_prefix(self.api_prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}
