//! `operations` crate: the `ExecutableOperation` trait and the built-in
//! operations placed on a node's chain.
//!
//! Every operation, built-in or caller-defined, implements
//! [`ExecutableOperation`]. Engines dispatch execution through this trait
//! object and never look inside the concrete type.

pub mod error;
pub mod http;
pub mod mock;
pub mod operation;
pub mod options;
pub mod traits;

/// Opaque payload flowing between operations.
pub type Payload = Vec<u8>;

pub use error::OperationError;
pub use operation::{Function, HttpRequest, Modifier, Operation};
pub use options::{FailureHandler, Options, Params, RequestHandler, ResponseHandler};
pub use traits::{ExecutableOperation, ExecutionOptions, OperationProperties};
