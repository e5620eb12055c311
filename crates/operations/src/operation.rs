//! Built-in operations: local transforms, remote function calls and raw HTTP
//! calls, gathered in the closed [`Operation`] sum type.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::http::{self, ErrorBody, RequestSpec};
use crate::options::{FailureHandler, Options, Params, RequestHandler, ResponseHandler, TransformFn};
use crate::{ExecutableOperation, ExecutionOptions, OperationError, OperationProperties, Payload};

/// Identity shared by every local transform.
pub const MODIFIER_ID: &str = "modifier";

/// Prefix of a raw HTTP call's identity.
pub const HTTP_REQUEST_ID_PREFIX: &str = "http-req-";

/// Give the failure handler a chance to recover `err`.
///
/// A recovered operation continues with an empty payload.
fn recover(
    handler: Option<&FailureHandler>,
    err: OperationError,
) -> Result<Payload, OperationError> {
    let Some(handler) = handler else {
        return Err(err);
    };

    match handler(err) {
        Ok(()) => {
            debug!("failure handler recovered the operation");
            Ok(Vec::new())
        }
        Err(err) => Err(err),
    }
}

// ---------------------------------------------------------------------------
// Modifier
// ---------------------------------------------------------------------------

/// A local transform: `output = f(input, options)`.
#[derive(Clone)]
pub struct Modifier {
    id: String,
    transform: TransformFn,
    params: Params,
    failure_handler: Option<FailureHandler>,
}

impl Modifier {
    /// A transform with no options, identified as `modifier` in errors too.
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(&[u8]) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        Self::from_options(MODIFIER_ID, move |input, _| transform(input), Options::new())
    }

    /// A named transform receiving the option values set with
    /// [`Options::option`]. Only those values and the failure handler are
    /// read from `options`.
    pub fn from_options<F>(id: impl Into<String>, transform: F, options: Options) -> Self
    where
        F: Fn(&[u8], &Params) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            transform: Arc::new(transform),
            params: options.params,
            failure_handler: options.failure_handler,
        }
    }

    /// Name used in error messages; the operation identity stays `modifier`.
    pub fn name(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    async fn run(
        &self,
        input: Payload,
        options: &ExecutionOptions,
    ) -> Result<Payload, OperationError> {
        info!(request_id = %options.request_id, "executing modifier `{}`", self.id);

        (self.transform)(&input, &self.params).or_else(|source| {
            let err = OperationError::Modifier {
                id: self.id.clone(),
                source,
            };
            warn!(request_id = %options.request_id, "{err}");
            recover(self.failure_handler.as_ref(), err)
        })
    }
}

// ---------------------------------------------------------------------------
// Function
// ---------------------------------------------------------------------------

/// A remote function reached through the gateway at `<gateway>/function/<name>`.
#[derive(Clone)]
pub struct Function {
    name: String,
    headers: Params,
    query: Params,
    failure_handler: Option<FailureHandler>,
    request_handler: Option<RequestHandler>,
    response_handler: Option<ResponseHandler>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_options(name, Options::new())
    }

    pub fn from_options(name: impl Into<String>, options: Options) -> Self {
        Self {
            name: name.into(),
            headers: options.headers,
            query: options.query,
            failure_handler: options.failure_handler,
            request_handler: options.request_handler,
            response_handler: options.response_handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn headers(&self) -> &Params {
        &self.headers
    }

    pub fn query(&self) -> &Params {
        &self.query
    }

    async fn run(
        &self,
        input: Payload,
        options: &ExecutionOptions,
    ) -> Result<Payload, OperationError> {
        info!(request_id = %options.request_id, "executing function `{}`", self.name);

        let result = match http::function_url(&options.gateway, &self.name) {
            Ok(url) => {
                let spec = RequestSpec {
                    headers: &self.headers,
                    query: &self.query,
                    request_handler: self.request_handler.as_ref(),
                    response_handler: self.response_handler.as_ref(),
                    error_body: ErrorBody::Keep,
                };
                http::send(&url, spec, input, options).await
            }
            Err(err) => Err(err),
        };

        result.or_else(|source| {
            let err = OperationError::Function {
                name: self.name.clone(),
                source: Box::new(source),
            };
            warn!(request_id = %options.request_id, "{err}");
            recover(self.failure_handler.as_ref(), err)
        })
    }
}

// ---------------------------------------------------------------------------
// HttpRequest
// ---------------------------------------------------------------------------

/// A raw HTTP call against a literal URL.
///
/// With a response handler installed, the handler's output is the call's
/// output, exactly as for [`Function`]. Without one, a non-2xx body is dropped.
#[derive(Clone)]
pub struct HttpRequest {
    url: String,
    headers: Params,
    query: Params,
    failure_handler: Option<FailureHandler>,
    request_handler: Option<RequestHandler>,
    response_handler: Option<ResponseHandler>,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_options(url, Options::new())
    }

    pub fn from_options(url: impl Into<String>, options: Options) -> Self {
        Self {
            url: url.into(),
            headers: options.headers,
            query: options.query,
            failure_handler: options.failure_handler,
            request_handler: options.request_handler,
            response_handler: options.response_handler,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Params {
        &self.headers
    }

    pub fn query(&self) -> &Params {
        &self.query
    }

    async fn run(
        &self,
        input: Payload,
        options: &ExecutionOptions,
    ) -> Result<Payload, OperationError> {
        info!(request_id = %options.request_id, "executing http request `{}`", self.url);

        // Unlike remote functions, a non-2xx body is dropped here.
        let spec = RequestSpec {
            headers: &self.headers,
            query: &self.query,
            request_handler: self.request_handler.as_ref(),
            response_handler: self.response_handler.as_ref(),
            error_body: ErrorBody::Discard,
        };

        http::send(&self.url, spec, input, options)
            .await
            .or_else(|source| {
                let err = OperationError::HttpRequest {
                    url: self.url.clone(),
                    source: Box::new(source),
                };
                warn!(request_id = %options.request_id, "{err}");
                recover(self.failure_handler.as_ref(), err)
            })
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// The built-in operation kinds.
#[derive(Clone)]
pub enum Operation {
    Modifier(Modifier),
    Function(Function),
    HttpRequest(HttpRequest),
}

impl Operation {
    pub fn modifier<F>(transform: F) -> Self
    where
        F: Fn(&[u8]) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        Self::Modifier(Modifier::new(transform))
    }

    pub fn function(name: impl Into<String>, options: Options) -> Self {
        Self::Function(Function::from_options(name, options))
    }

    pub fn http_request(url: impl Into<String>, options: Options) -> Self {
        Self::HttpRequest(HttpRequest::from_options(url, options))
    }

    fn failure_handler(&self) -> Option<&FailureHandler> {
        match self {
            Self::Modifier(op) => op.failure_handler.as_ref(),
            Self::Function(op) => op.failure_handler.as_ref(),
            Self::HttpRequest(op) => op.failure_handler.as_ref(),
        }
    }
}

impl From<Modifier> for Operation {
    fn from(op: Modifier) -> Self {
        Self::Modifier(op)
    }
}

impl From<Function> for Operation {
    fn from(op: Function) -> Self {
        Self::Function(op)
    }
}

impl From<HttpRequest> for Operation {
    fn from(op: HttpRequest) -> Self {
        Self::HttpRequest(op)
    }
}

#[async_trait]
impl ExecutableOperation for Operation {
    fn id(&self) -> String {
        match self {
            Self::Modifier(_) => MODIFIER_ID.to_string(),
            Self::Function(op) => op.name.clone(),
            Self::HttpRequest(op) => {
                let url = op.url.as_str();
                let start = url
                    .char_indices()
                    .rev()
                    .nth(15)
                    .map(|(idx, _)| idx)
                    .unwrap_or(0);
                format!("{HTTP_REQUEST_ID_PREFIX}{}", &url[start..])
            }
        }
    }

    async fn execute(
        &self,
        input: Payload,
        options: &ExecutionOptions,
    ) -> Result<Payload, OperationError> {
        match self {
            Self::Modifier(op) => op.run(input, options).await,
            Self::Function(op) => op.run(input, options).await,
            Self::HttpRequest(op) => op.run(input, options).await,
        }
    }

    fn properties(&self) -> OperationProperties {
        let has_response_handler = match self {
            Self::Modifier(_) => false,
            Self::Function(op) => op.response_handler.is_some(),
            Self::HttpRequest(op) => op.response_handler.is_some(),
        };

        OperationProperties {
            is_modifier: matches!(self, Self::Modifier(_)),
            is_function: matches!(self, Self::Function(_)),
            is_http_request: matches!(self, Self::HttpRequest(_)),
            has_failure_handler: self.failure_handler().is_some(),
            has_response_handler,
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Modifier(_) => "Modifier",
            Self::Function(_) => "Function",
            Self::HttpRequest(_) => "HttpRequest",
        };
        f.debug_struct(kind)
            .field("id", &self.id())
            .field("properties", &self.properties())
            .finish()
    }
}
