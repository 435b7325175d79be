// src/dispatch/mod.rs
//! Request dispatch
//!
//! The dispatcher is the boundary-facing entry point invoked once per
//! inbound request: acquire a runtime, execute, classify the outcome,
//! release. The surrounding transport only starts and stops the pool and
//! hands requests in; it never touches runtimes directly.

pub mod dispatcher;

pub use dispatcher::Dispatcher;
