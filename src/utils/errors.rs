// src/utils/errors.rs
//! Error taxonomy for the engine
//!
//! Pool-internal faults are recovered locally; callers only ever see the
//! fault relevant to their own request. The dispatcher uses
//! [`EngineError::corrupts_runtime`] to decide whether a failed execution
//! poisons the runtime or only the request.

use std::time::Duration;
use thiserror::Error;

/// All failure kinds surfaced by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The factory could not build a runtime. Not retried internally;
    /// the acquiring caller decides what to do.
    #[error("runtime construction failed: {0}")]
    Construction(String),

    /// No runtime became available within the caller's budget.
    #[error("no runtime became available within {0:?}")]
    AcquireTimeout(Duration),

    /// The pool is draining or closed. Terminal for the request.
    #[error("pool is shutting down")]
    PoolShuttingDown,

    /// Execution left the runtime in an unusable state. The runtime is
    /// destroyed and replaced; only this request sees the failure.
    #[error("runtime corrupted: {0}")]
    RuntimeCorrupted(String),

    /// Application-level failure. The runtime itself is still healthy.
    #[error("application error: {0}")]
    Application(String),

    /// Execution exceeded its time budget. The runtime may be wedged
    /// mid-request, so this is treated as corrupting.
    #[error("execution timed out")]
    ExecutionTimeout,

    /// The interpreter process could not be started.
    #[error("process spawn failed: {0}")]
    ProcessSpawnFailed(String),

    /// The dispatcher could not obtain a runtime for this request.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("observability init failed: {0}")]
    Observability(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this execution failure poisons the runtime that served it.
    ///
    /// Application-level errors leave the runtime reusable; anything that
    /// may have broken the interpreter's internal state does not.
    pub fn corrupts_runtime(&self) -> bool {
        matches!(
            self,
            EngineError::RuntimeCorrupted(_) | EngineError::ExecutionTimeout
        )
    }

    /// Whether the caller may retry with backoff (external policy).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::AcquireTimeout(_) | EngineError::ServiceUnavailable(_)
        )
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;
