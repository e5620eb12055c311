//! HTTP request construction and dispatch shared by remote functions and raw
//! HTTP calls.

use reqwest::{Client, Method, Request};
use tracing::debug;
use url::{form_urlencoded, Url};

use crate::options::{Params, RequestHandler, ResponseHandler};
use crate::{ExecutionOptions, OperationError, Payload};

/// Method used when neither a `method` header nor an environment default is set.
pub const DEFAULT_METHOD: &str = "POST";

/// Path prefix under which the gateway exposes functions.
pub const FUNCTION_PATH: &str = "function";

/// What to keep from the body of a non-2xx response when no response handler
/// is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorBody {
    Keep,
    Discard,
}

/// Everything needed to send one request.
pub(crate) struct RequestSpec<'a> {
    pub headers: &'a Params,
    pub query: &'a Params,
    pub request_handler: Option<&'a RequestHandler>,
    pub response_handler: Option<&'a ResponseHandler>,
    pub error_body: ErrorBody,
}

/// Render `params` as a query string: `?k=v1&k=v2`, or `""` when empty.
pub fn make_query_string(params: &Params) -> String {
    let pairs: Vec<String> = params
        .iter()
        .flat_map(|(key, values)| {
            values
                .iter()
                .map(move |value| format!("{}={}", encode(key), encode(value)))
        })
        .collect();

    if pairs.is_empty() {
        String::new()
    } else {
        format!("?{}", pairs.join("&"))
    }
}

fn encode(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// Build `<gateway>/function/<name>`. A gateway without a scheme is reached
/// over plain `http://`.
pub fn function_url(gateway: &str, function: &str) -> Result<String, OperationError> {
    let base = if gateway.contains("://") {
        gateway.to_string()
    } else {
        format!("http://{gateway}")
    };

    let mut url = Url::parse(&base).map_err(|e| OperationError::Transport {
        url: base.clone(),
        message: e.to_string(),
    })?;

    url.path_segments_mut()
        .map_err(|_| OperationError::Transport {
            url: base.clone(),
            message: "gateway address cannot carry a path".into(),
        })?
        .pop_if_empty()
        .push(FUNCTION_PATH)
        .push(function);

    Ok(url.into())
}

/// Pick the HTTP method: `method` header, then environment default, then POST.
pub fn resolve_method(headers: &Params, default_method: Option<&str>) -> String {
    headers
        .get("method")
        .and_then(|values| values.first())
        .map(String::as_str)
        .or(default_method)
        .unwrap_or(DEFAULT_METHOD)
        .to_uppercase()
}

fn transport(url: &str, err: impl ToString) -> OperationError {
    OperationError::Transport {
        url: url.to_string(),
        message: err.to_string(),
    }
}

fn build_request(
    client: &Client,
    url: &str,
    method: &str,
    input: Payload,
    headers: &Params,
) -> Result<Request, OperationError> {
    let method = Method::from_bytes(method.as_bytes()).map_err(|e| transport(url, e))?;

    let mut builder = client.request(method, url).body(input);
    for (key, values) in headers {
        for value in values {
            builder = builder.header(key.as_str(), value.as_str());
        }
    }

    builder.build().map_err(|e| transport(url, e))
}

/// Send `input` to `target` and interpret the answer.
pub(crate) async fn send(
    target: &str,
    spec: RequestSpec<'_>,
    input: Payload,
    options: &ExecutionOptions,
) -> Result<Payload, OperationError> {
    let method = resolve_method(spec.headers, options.default_method.as_deref());
    let url = format!("{target}{}", make_query_string(spec.query));

    let client = Client::builder().build().map_err(|e| transport(&url, e))?;
    let mut request = build_request(&client, &url, &method, input, spec.headers)?;

    if let Some(handler) = spec.request_handler {
        handler(&mut request);
    }

    debug!(%method, %url, "sending request");
    let response = client.execute(request).await.map_err(|e| transport(&url, e))?;

    if let Some(handler) = spec.response_handler {
        return handler(response).await;
    }

    let status = response.status();
    if status.is_success() {
        let body = response.bytes().await.map_err(|e| transport(&url, e))?;
        return Ok(body.to_vec());
    }

    let body = match spec.error_body {
        ErrorBody::Keep => response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .unwrap_or_default(),
        ErrorBody::Discard => Vec::new(),
    };

    Err(OperationError::Status {
        status: status.as_u16(),
        url: target.to_string(),
        body,
    })
}
