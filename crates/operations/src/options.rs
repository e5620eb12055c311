//! `Options`: the transient configuration consumed when an operation is built.
//!
//! A fresh `Options` value is built for every operation and moved into the
//! operation's constructor, so nothing configured here can leak into the next
//! operation.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::{OperationError, Payload};

/// String-keyed, multi-valued map used for headers, query parameters and
/// transform options.
pub type Params = BTreeMap<String, Vec<String>>;

/// Decides the fate of a failed operation: `Ok(())` recovers, `Err` aborts
/// with the returned error.
pub type FailureHandler =
    Arc<dyn Fn(OperationError) -> Result<(), OperationError> + Send + Sync>;

/// Sees the outgoing request right before it is sent.
pub type RequestHandler = Arc<dyn Fn(&mut reqwest::Request) + Send + Sync>;

/// Owns the interpretation of a response once installed.
pub type ResponseHandler = Arc<
    dyn Fn(reqwest::Response) -> BoxFuture<'static, Result<Payload, OperationError>> + Send + Sync,
>;

/// Body of a local transform.
pub type TransformFn = Arc<dyn Fn(&[u8], &Params) -> anyhow::Result<Payload> + Send + Sync>;

/// Builder for the optional parts of an operation.
#[derive(Clone, Default)]
pub struct Options {
    pub(crate) headers: Params,
    pub(crate) query: Params,
    pub(crate) params: Params,
    pub(crate) failure_handler: Option<FailureHandler>,
    pub(crate) request_handler: Option<RequestHandler>,
    pub(crate) response_handler: Option<ResponseHandler>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header to the HTTP call. Keys are stored lower-cased.
    ///
    /// A `method` header overrides the HTTP method of the call.
    pub fn header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .entry(key.as_ref().to_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// Add query-string values for `key`.
    pub fn query<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.query
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Add option values handed to a local transform.
    pub fn option<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.params
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn on_failure<F>(mut self, handler: F) -> Self
    where
        F: Fn(OperationError) -> Result<(), OperationError> + Send + Sync + 'static,
    {
        self.failure_handler = Some(Arc::new(handler));
        self
    }

    pub fn request_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut reqwest::Request) + Send + Sync + 'static,
    {
        self.request_handler = Some(Arc::new(handler));
        self
    }

    pub fn on_response<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(reqwest::Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, OperationError>> + Send + 'static,
    {
        self.response_handler = Some(Arc::new(move |response| handler(response).boxed()));
        self
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("params", &self.params)
            .field("failure_handler", &self.failure_handler.is_some())
            .field("request_handler", &self.request_handler.is_some())
            .field("response_handler", &self.response_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_lowercased_and_accumulate() {
        let opts = Options::new()
            .header("X-Trace", "a")
            .header("x-trace", "b")
            .header("Method", "GET");

        assert_eq!(opts.headers["x-trace"], vec!["a", "b"]);
        assert_eq!(opts.headers["method"], vec!["GET"]);
    }

    #[test]
    fn query_values_append_per_key() {
        let opts = Options::new().query("k", ["v1"]).query("k", ["v2", "v3"]);
        assert_eq!(opts.query["k"], vec!["v1", "v2", "v3"]);
        assert!(opts.params.is_empty());
    }

    #[test]
    fn handlers_are_recorded() {
        let opts = Options::new()
            .on_failure(|_| Ok(()))
            .request_handler(|_| {})
            .on_response(|_| async { Ok::<_, OperationError>(Vec::new()) });

        assert!(opts.failure_handler.is_some());
        assert!(opts.request_handler.is_some());
        assert!(opts.response_handler.is_some());
    }
}
