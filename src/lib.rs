// src/lib.rs
//! Gantry Engine
//!
//! A bounded pool of reusable interpreter runtimes behind a per-request
//! dispatcher. Each runtime is expensive to construct and serves exactly
//! one request at a time; the pool provides controlled creation, FIFO
//! backpressure under contention, health-based eviction, and graceful
//! drain on shutdown.
//!
//! # Architecture
//!
//! - **runtime**: the runtime abstraction, the process-backed
//!   implementation, the factory, and the pool itself
//! - **dispatch**: the per-request entry point (acquire → execute →
//!   classify → release)
//! - **observability**: tracing and metrics initialization
//! - **utils**: configuration loading and the error taxonomy
//!
//! # Example
//!
//! ```rust,no_run
//! use gantry_engine::{Dispatcher, EngineConfig, RuntimePool};
//! use gantry_engine::runtime::{ProcessRuntimeFactory, RuntimeRequest};
//! use std::sync::Arc;
//!
//! # async fn run() -> gantry_engine::Result<()> {
//! let config = EngineConfig::load()?;
//! let factory = Arc::new(ProcessRuntimeFactory::new(config.factory_config()));
//! let pool = RuntimePool::new(config.pool_config(), factory).await?;
//! let maintenance = Arc::clone(&pool).start_maintenance(config.sweep_interval());
//!
//! let dispatcher = Dispatcher::new(Arc::clone(&pool), config.pool_config().acquire_timeout);
//! let _response = dispatcher.dispatch(RuntimeRequest::new("GET /")).await?;
//!
//! pool.shutdown(config.drain_timeout()).await;
//! maintenance.abort();
//! # Ok(())
//! # }
//! ```

// Public module exports
pub mod dispatch;
pub mod observability;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use dispatch::Dispatcher;
pub use runtime::factory::{FactoryConfig, RuntimeFactory};
pub use runtime::interpreter::{InterpreterRuntime, RuntimeId, RuntimeRequest, RuntimeResponse};
pub use runtime::pool::{PoolConfig, PoolStats, PooledRuntime, ReleaseOutcome, RuntimePool};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
