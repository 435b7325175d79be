// src/runtime/testing.rs
//! In-memory runtime and factory stubs for tests

use crate::runtime::factory::RuntimeFactory;
use crate::runtime::interpreter::{InterpreterRuntime, RuntimeRequest, RuntimeResponse};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// What a stub runtime does with the next `execute` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecBehavior {
    /// Respond with the request payload
    Echo,
    /// Fail with an application-level error; the runtime stays healthy
    AppError,
    /// Fail with a corrupting error; the runtime must be destroyed
    Corrupt,
}

/// Counting factory whose runtimes follow a shared scripted behavior
pub(crate) struct StubFactory {
    pub created: AtomicUsize,
    pub destroyed: Arc<AtomicUsize>,
    pub fail_creation: AtomicBool,
    /// Creations allowed before every further one fails
    pub fail_after: AtomicUsize,
    behavior: Arc<Mutex<ExecBehavior>>,
}

impl StubFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
            destroyed: Arc::new(AtomicUsize::new(0)),
            fail_creation: AtomicBool::new(false),
            fail_after: AtomicUsize::new(usize::MAX),
            behavior: Arc::new(Mutex::new(ExecBehavior::Echo)),
        })
    }

    pub fn set_behavior(&self, behavior: ExecBehavior) {
        *self.behavior.lock() = behavior;
    }
}

#[async_trait]
impl RuntimeFactory for StubFactory {
    async fn create(&self) -> Result<Box<dyn InterpreterRuntime>> {
        if self.fail_creation.load(Ordering::SeqCst)
            || self.created.load(Ordering::SeqCst) >= self.fail_after.load(Ordering::SeqCst)
        {
            return Err(EngineError::Construction("stub factory refused".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubRuntime {
            destroyed_once: false,
            destroyed: Arc::clone(&self.destroyed),
            behavior: Arc::clone(&self.behavior),
        }))
    }
}

pub(crate) struct StubRuntime {
    destroyed_once: bool,
    destroyed: Arc<AtomicUsize>,
    behavior: Arc<Mutex<ExecBehavior>>,
}

#[async_trait]
impl InterpreterRuntime for StubRuntime {
    async fn execute(&mut self, request: RuntimeRequest) -> Result<RuntimeResponse> {
        match *self.behavior.lock() {
            ExecBehavior::Echo => Ok(RuntimeResponse::new(request.payload)),
            ExecBehavior::AppError => Err(EngineError::Application("scripted failure".into())),
            ExecBehavior::Corrupt => {
                Err(EngineError::RuntimeCorrupted("scripted corruption".into()))
            }
        }
    }

    async fn destroy(&mut self) -> Result<()> {
        if !self.destroyed_once {
            self.destroyed_once = true;
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
