// src/dispatch/dispatcher.rs
//! Per-request dispatch against the runtime pool

use crate::runtime::interpreter::{RuntimeRequest, RuntimeResponse};
use crate::runtime::pool::{ReleaseOutcome, RuntimePool};
use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Dispatches each inbound request to a pooled runtime
///
/// The release is guaranteed on every path: explicitly after execution,
/// and by the lease guard if the request future is dropped mid-flight.
pub struct Dispatcher {
    pool: Arc<RuntimePool>,

    /// Request-level acquire budget, distinct from the pool's default
    acquire_timeout: Duration,
}

impl Dispatcher {
    pub fn new(pool: Arc<RuntimePool>, acquire_timeout: Duration) -> Self {
        Self {
            pool,
            acquire_timeout,
        }
    }

    /// The pool this dispatcher draws from
    pub fn pool(&self) -> &Arc<RuntimePool> {
        &self.pool
    }

    /// Serve one request end to end.
    ///
    /// Acquire failures become `ServiceUnavailable` — retry policy, if
    /// any, belongs to the transport layer above. Execution failures are
    /// classified: a corrupting error fails the runtime (it is destroyed
    /// and replaced), an application error re-pools it untouched. Either
    /// way only this request sees the failure.
    pub async fn dispatch(&self, request: RuntimeRequest) -> Result<RuntimeResponse> {
        let mut lease = match self.pool.acquire(self.acquire_timeout).await {
            Ok(lease) => lease,
            Err(e @ (EngineError::AcquireTimeout(_) | EngineError::PoolShuttingDown)) => {
                return Err(EngineError::ServiceUnavailable(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        debug!("request dispatched to runtime {}", lease.id());

        match lease.execute(request).await {
            Ok(response) => {
                lease.release(ReleaseOutcome::Ok);
                Ok(response)
            }
            Err(e) if e.corrupts_runtime() => {
                warn!("runtime {} corrupted while serving request: {e}", lease.id());
                lease.release(ReleaseOutcome::Failed);
                Err(e)
            }
            Err(e) => {
                // Application-level failure: the runtime is still healthy.
                lease.release(ReleaseOutcome::Ok);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::pool::PoolConfig;
    use crate::runtime::testing::{ExecBehavior, StubFactory};
    use std::sync::atomic::Ordering;

    async fn dispatcher_with(
        min: usize,
        max: usize,
        acquire_timeout: Duration,
    ) -> (Dispatcher, Arc<StubFactory>) {
        let factory = StubFactory::new();
        let pool = RuntimePool::new(
            PoolConfig {
                min_size: min,
                max_size: max,
                acquire_timeout: Duration::from_secs(5),
                idle_eviction_age: Duration::from_secs(300),
            },
            factory.clone(),
        )
        .await
        .unwrap();
        (Dispatcher::new(pool, acquire_timeout), factory)
    }

    #[tokio::test]
    async fn test_dispatch_success_repools_runtime() {
        let (dispatcher, _factory) = dispatcher_with(1, 1, Duration::from_secs(1)).await;

        let response = dispatcher
            .dispatch(RuntimeRequest::new("GET /"))
            .await
            .unwrap();
        assert_eq!(&response.payload[..], b"GET /");

        let stats = dispatcher.pool().stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn test_application_error_keeps_runtime() {
        let (dispatcher, factory) = dispatcher_with(1, 1, Duration::from_secs(1)).await;
        factory.set_behavior(ExecBehavior::AppError);

        let err = dispatcher
            .dispatch(RuntimeRequest::new("POST /orders"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Application(_)));

        // Same runtime, no destruction, no fresh construction.
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pool().stats().idle, 1);
    }

    #[tokio::test]
    async fn test_corrupting_error_fails_runtime() {
        let (dispatcher, factory) = dispatcher_with(0, 1, Duration::from_secs(1)).await;
        factory.set_behavior(ExecBehavior::Corrupt);

        let err = dispatcher
            .dispatch(RuntimeRequest::new("GET /"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RuntimeCorrupted(_)));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);

        // The next request gets a freshly constructed runtime.
        factory.set_behavior(ExecBehavior::Echo);
        dispatcher
            .dispatch(RuntimeRequest::new("GET /"))
            .await
            .unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_reports_service_unavailable() {
        let (dispatcher, _factory) = dispatcher_with(0, 1, Duration::from_millis(100)).await;
        let lease = dispatcher
            .pool()
            .acquire(Duration::from_secs(1))
            .await
            .unwrap();

        let err = dispatcher
            .dispatch(RuntimeRequest::new("GET /"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ServiceUnavailable(_)));
        assert!(err.is_retryable());

        lease.release(ReleaseOutcome::Ok);
    }

    #[tokio::test]
    async fn test_shutdown_reports_service_unavailable() {
        let (dispatcher, _factory) = dispatcher_with(0, 1, Duration::from_secs(1)).await;
        dispatcher.pool().shutdown(Duration::from_secs(1)).await;

        let err = dispatcher
            .dispatch(RuntimeRequest::new("GET /"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ServiceUnavailable(_)));
    }
}
