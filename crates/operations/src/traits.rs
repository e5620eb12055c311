//! The `ExecutableOperation` trait: the contract every operation must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{OperationError, Payload};

/// Environment key holding the default HTTP method for remote calls.
pub const DEFAULT_METHOD_ENV: &str = "default-method";
/// Environment key holding the function gateway address.
pub const GATEWAY_ENV: &str = "gateway";
/// Gateway used when [`GATEWAY_ENV`] is unset.
pub const DEFAULT_GATEWAY: &str = "gateway:8080";

/// Per-call options handed to every operation by the engine.
///
/// Defined here (in the operations crate) so both the engine and individual
/// operation implementations can import it without a circular dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Correlation id of the current request.
    pub request_id: String,
    /// Gateway address used to build remote-function URLs.
    pub gateway: String,
    /// Environment-level HTTP method override (a `method` header still wins).
    pub default_method: Option<String>,
}

impl ExecutionOptions {
    pub fn new(request_id: impl Into<String>, gateway: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            gateway: gateway.into(),
            default_method: None,
        }
    }

    /// Build options from the process environment with a fresh request id.
    pub fn from_env() -> Self {
        let gateway = std::env::var(GATEWAY_ENV).unwrap_or_else(|_| DEFAULT_GATEWAY.to_string());
        let default_method = std::env::var(DEFAULT_METHOD_ENV)
            .ok()
            .filter(|method| !method.trim().is_empty());

        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            gateway,
            default_method,
        }
    }

    pub fn with_default_method(mut self, method: impl Into<String>) -> Self {
        self.default_method = Some(method.into());
        self
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), DEFAULT_GATEWAY)
    }
}

/// Capabilities configured on an operation, for engine-side auditing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationProperties {
    #[serde(rename = "isMod")]
    pub is_modifier: bool,
    pub is_function: bool,
    pub is_http_request: bool,
    pub has_failure_handler: bool,
    pub has_response_handler: bool,
}

/// The core operation trait.
///
/// Everything placed on a node's chain implements this. `execute` may be
/// called from any engine worker, so implementations must not rely on shared
/// mutable state beyond their own frozen configuration.
#[async_trait]
pub trait ExecutableOperation: Send + Sync {
    /// Stable identity of the operation inside its node.
    fn id(&self) -> String;

    /// Run the operation on the previous operation's output.
    async fn execute(
        &self,
        input: Payload,
        options: &ExecutionOptions,
    ) -> Result<Payload, OperationError>;

    /// Which capabilities are configured. Side-effect free.
    fn properties(&self) -> OperationProperties {
        OperationProperties::default()
    }
}
