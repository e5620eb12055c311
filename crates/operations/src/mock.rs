//! `MockOperation`: a test double for `ExecutableOperation`.
//!
//! Useful in unit and integration tests where a real transform or a reachable
//! gateway is either unavailable or irrelevant.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::{ExecutableOperation, ExecutionOptions, OperationError, Payload};

/// Behaviour injected into `MockOperation` at construction time.
pub enum MockBehaviour {
    /// Return a fixed payload.
    ReturnValue(Payload),
    /// Return the input followed by a suffix.
    Append(Payload),
    /// Fail with a `Custom` error.
    Fail(String),
}

/// A mock operation that records every call it receives and returns a
/// programmer-specified result.
pub struct MockOperation {
    /// Identity reported to the engine.
    pub name: String,
    /// What the operation will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All inputs seen by this operation (in call order).
    pub calls: Arc<Mutex<Vec<Payload>>>,
}

impl MockOperation {
    fn with(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given payload.
    pub fn returning(name: impl Into<String>, value: impl Into<Payload>) -> Self {
        Self::with(name, MockBehaviour::ReturnValue(value.into()))
    }

    /// Create a mock that appends `suffix` to whatever it receives.
    pub fn appending(name: impl Into<String>, suffix: impl Into<Payload>) -> Self {
        Self::with(name, MockBehaviour::Append(suffix.into()))
    }

    /// Create a mock that always fails.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::Fail(msg.into()))
    }

    /// Number of times this operation has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Inputs received so far.
    pub fn inputs(&self) -> Vec<Payload> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutableOperation for MockOperation {
    fn id(&self) -> String {
        self.name.clone()
    }

    async fn execute(
        &self,
        input: Payload,
        _options: &ExecutionOptions,
    ) -> Result<Payload, OperationError> {
        self.calls.lock().unwrap().push(input.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::Append(suffix) => {
                let mut out = input;
                out.extend_from_slice(suffix);
                Ok(out)
            }
            MockBehaviour::Fail(msg) => Err(OperationError::Custom(msg.clone())),
        }
    }
}
