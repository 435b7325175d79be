// src/runtime/mod.rs
//! Interpreter runtime layer
//!
//! This module turns many concurrent request handlers into callers of a
//! small, bounded set of interpreter runtimes:
//!
//! - **Interpreter**: the opaque single-owner execution context
//!   (`execute` and `destroy`, nothing else)
//! - **Factory**: controlled construction and teardown of runtimes
//! - **Process**: the production runtime, one interpreter process per
//!   instance, framed over stdin/stdout
//! - **Pool**: bounded checkout/return with FIFO backpressure,
//!   health-based eviction, and graceful drain
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                RuntimePool (max N)              │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐       │
//! │  │ Ruby     │  │ Ruby     │  │ Ruby     │  ...  │
//! │  │ Process  │  │ Process  │  │ Process  │       │
//! │  └──────────┘  └──────────┘  └──────────┘       │
//! │        ▲             ▲             ▲            │
//! │        └──── exclusive leases ─────┘            │
//! │                      │                          │
//! │        concurrent request handlers              │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! A runtime costs an interpreter process plus loaded application state,
//! so the pool bounds how many exist and reuses warm ones aggressively.

pub mod factory;
pub mod interpreter;
pub mod pool;
pub mod process;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use factory::{FactoryConfig, RuntimeFactory};
pub use interpreter::{InterpreterRuntime, RuntimeId, RuntimeRequest, RuntimeResponse};
pub use pool::{PoolConfig, PoolStats, PooledRuntime, ReleaseOutcome, RuntimePool};
pub use process::{InterpreterKind, ProcessRuntime, ProcessRuntimeFactory};
