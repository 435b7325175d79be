// src/runtime/interpreter.rs
//! The runtime abstraction
//!
//! A runtime is an expensive-to-construct execution context that serves
//! exactly one request at a time. It is deliberately opaque: the pool and
//! dispatcher only ever see `execute` and `destroy`. A runtime carries no
//! internal synchronization — exclusive ownership is enforced by the pool,
//! which never hands out a runtime that is already in use.

use crate::utils::errors::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use ulid::Ulid;

/// Pool-assigned identity of a runtime instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeId(Ulid);

impl RuntimeId {
    pub(crate) fn new() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An inbound request with an opaque payload
///
/// Parsing and routing happen upstream; the engine only transports bytes
/// to the runtime and bytes back.
#[derive(Debug, Clone)]
pub struct RuntimeRequest {
    pub payload: Bytes,
}

impl RuntimeRequest {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// The runtime's answer to a request
#[derive(Debug, Clone)]
pub struct RuntimeResponse {
    pub payload: Bytes,
}

impl RuntimeResponse {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// A single-owner execution context
///
/// Implementations report unrecoverable internal damage through errors for
/// which [`EngineError::corrupts_runtime`] returns true; the pool then
/// destroys the instance instead of re-pooling it.
///
/// [`EngineError::corrupts_runtime`]: crate::utils::errors::EngineError::corrupts_runtime
#[async_trait]
pub trait InterpreterRuntime: Send {
    /// Serve one request. Requires exclusive ownership.
    async fn execute(&mut self, request: RuntimeRequest) -> Result<RuntimeResponse>;

    /// Release all resources held by this runtime. Idempotent: a second
    /// call must be a no-op, not an error.
    async fn destroy(&mut self) -> Result<()>;
}
