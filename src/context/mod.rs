//! Per-request context handed to route handlers and middleware.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::Request;

/// Path parameters captured by the matched route (e.g. the `wildcard` tail).
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }
}

/// Per-request context: the request itself plus whatever the router extracted.
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    /// Create a context with no path parameters.
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// The cancellation signal of the underlying connection.
    pub fn cancellation(&self) -> &CancellationToken {
        self.request.cancellation()
    }

    /// Deserializes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }

    /// Gives the request back, e.g. to pass it on to an asset source.
    pub fn into_request(self) -> Request {
        self.request
    }
}
