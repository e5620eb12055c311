//! Operation-level error type.

use thiserror::Error;

use crate::Payload;

/// Errors returned by an operation's `execute` method.
///
/// Dispatch failures are wrapped once with the operation they came from
/// (`Modifier`, `Function`, `HttpRequest`) before the operation's failure
/// handler sees them. Connection and request-building problems are plain
/// `Transport` errors; there is no separate error kind for the network.
#[derive(Debug, Error)]
pub enum OperationError {
    /// A local transform returned an error.
    #[error("function({id}) execution failed: {source}")]
    Modifier {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A remote function call failed.
    #[error("Function({name}) execution failed: {source}")]
    Function {
        name: String,
        #[source]
        source: Box<OperationError>,
    },

    /// A raw HTTP call failed.
    #[error("HttpRequest({url}) execution failed: {source}")]
    HttpRequest {
        url: String,
        #[source]
        source: Box<OperationError>,
    },

    /// The request could not be built or sent.
    #[error("cannot connect to {url}: {message}")]
    Transport { url: String, message: String },

    /// The upstream answered outside `200..=299`.
    ///
    /// `body` holds whatever the caller decided to keep for diagnostics.
    #[error("invalid return status {status} while connecting {url}")]
    Status {
        status: u16,
        url: String,
        body: Payload,
    },

    /// Raised by user handlers or test doubles.
    #[error("{0}")]
    Custom(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OperationError {
    /// Shorthand for [`OperationError::Custom`].
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// The payload produced alongside this error, if any.
    ///
    /// Remote functions keep the response body of a non-2xx answer here,
    /// raw HTTP calls do not.
    pub fn output(&self) -> &[u8] {
        match self {
            Self::Status { body, .. } => body,
            Self::Function { source, .. } | Self::HttpRequest { source, .. } => source.output(),
            _ => &[],
        }
    }

    /// HTTP status code carried by this error or its cause.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Function { source, .. } | Self::HttpRequest { source, .. } => source.status(),
            _ => None,
        }
    }
}
