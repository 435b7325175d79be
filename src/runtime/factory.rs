// src/runtime/factory.rs
//! Runtime construction
//!
//! The factory encapsulates everything needed to build a runtime:
//! application root, interpreter selection, environment isolation, and
//! execution budget. Construction failures are surfaced as-is — retry
//! policy belongs to the pool's callers, never to the factory.

use crate::runtime::interpreter::InterpreterRuntime;
use crate::runtime::process::InterpreterKind;
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Construction parameters shared by every runtime a factory builds
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Interpreter backing each runtime
    pub interpreter: InterpreterKind,

    /// Application root the interpreter is started in
    pub app_root: PathBuf,

    /// Extra environment variables for the interpreter process
    pub env_vars: Vec<(String, String)>,

    /// Start interpreters with a scrubbed host environment
    pub clear_host_env: bool,

    /// Per-request execution budget
    pub execute_timeout: Duration,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            interpreter: InterpreterKind::Ruby,
            app_root: PathBuf::from("."),
            env_vars: vec![],
            clear_host_env: false,
            execute_timeout: Duration::from_secs(300),
        }
    }
}

/// Builds and tears down runtime instances
#[async_trait]
pub trait RuntimeFactory: Send + Sync {
    /// Build one runtime, allocating whatever external resources it needs.
    /// Fails with `EngineError::Construction`; never retries internally.
    async fn create(&self) -> Result<Box<dyn InterpreterRuntime>>;

    /// Tear a runtime down, releasing its resources. Safe to call on a
    /// runtime that was already destroyed.
    async fn destroy(&self, mut runtime: Box<dyn InterpreterRuntime>) {
        if let Err(e) = runtime.destroy().await {
            warn!("runtime destroy failed: {e}");
        }
    }
}
