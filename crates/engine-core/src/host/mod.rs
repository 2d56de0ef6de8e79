//! Single-owner-per-run execution host: serializes mutating calls for one
//! run behind a critical section, re-entrant on the same task.
//!
//! New relative to the teacher (which opens one pool per CLI invocation with
//! no per-run ownership abstraction), but built from the same concurrency
//! primitives its orchestrator already uses (`tokio::sync` guards rather
//! than an external concurrent-map crate).

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::engine::{RunEngine, RunEngineError, RunEngineInput, RunOutcome};

tokio::task_local! {
    static REENTRANT: ();
}

/// Owns the pool handle and the per-run critical section for a single run.
///
/// `run_exclusive` chains closures onto the run's lock: the next call
/// starts only after the previous one resolves. A call made from within an
/// already-held section on the same task is a no-op pass-through rather
/// than a deadlock, matching the "nested acquisition is a no-op" rule for
/// re-entrant recovery.
pub struct RuntimeHost {
    run_id: Uuid,
    pool: PgPool,
    lock: Arc<Mutex<()>>,
    engine: Arc<RunEngine>,
}

impl RuntimeHost {
    pub fn new(run_id: Uuid, pool: PgPool, engine: Arc<RunEngine>) -> Self {
        Self {
            run_id,
            pool,
            lock: Arc::new(Mutex::new(())),
            engine,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `f` inside the host's per-run critical section. Re-entrant: if
    /// the calling task already holds this host's section, `f` runs
    /// immediately without trying to re-acquire the lock.
    pub async fn run_exclusive<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        if REENTRANT.try_with(|_| ()).is_ok() {
            return f().await;
        }

        let _guard = self.lock.lock().await;
        REENTRANT.scope((), f()).await
    }

    /// Drive a fresh run through the pipeline, inside the critical section.
    pub async fn execute(&self, input: RunEngineInput) -> Result<RunOutcome, RunEngineError> {
        let engine = Arc::clone(&self.engine);
        self.run_exclusive(|| async move { engine.execute(input).await }).await
    }

    /// Resume this host's run, inside the critical section.
    pub async fn resume(&self) -> Result<RunOutcome, RunEngineError> {
        let engine = Arc::clone(&self.engine);
        let run_id = self.run_id;
        self.run_exclusive(|| async move { engine.resume(run_id).await }).await
    }

    /// Retry this host's run after a failure, inside the critical section.
    pub async fn retry(&self) -> Result<RunOutcome, RunEngineError> {
        let engine = Arc::clone(&self.engine);
        let run_id = self.run_id;
        self.run_exclusive(|| async move { engine.retry(run_id).await }).await
    }

    /// Cancel this host's run, inside the critical section.
    pub async fn cancel(&self) -> Result<(), RunEngineError> {
        let engine = Arc::clone(&self.engine);
        let run_id = self.run_id;
        self.run_exclusive(|| async move { engine.cancel(run_id).await }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_exclusive_serialises_calls() {
        let lock = Arc::new(Mutex::new(()));
        let counter = Arc::new(tokio::sync::Mutex::new(0));

        let host_lock = lock.clone();
        let c1 = counter.clone();
        let a = async move {
            let _g = host_lock.lock().await;
            let mut n = c1.lock().await;
            *n += 1;
        };

        let host_lock = lock.clone();
        let c2 = counter.clone();
        let b = async move {
            let _g = host_lock.lock().await;
            let mut n = c2.lock().await;
            *n += 1;
        };

        tokio::join!(a, b);
        assert_eq!(*counter.lock().await, 2);
    }

    #[tokio::test]
    async fn nested_run_exclusive_is_a_no_op() {
        let engine_lock = Arc::new(Mutex::new(()));
        let outer_lock = engine_lock.clone();

        let result = REENTRANT
            .scope((), async move {
                let _guard = outer_lock.try_lock();
                // Simulates a re-entrant call: REENTRANT is already set in
                // this task, so a nested `run_exclusive` must not try to
                // lock again.
                REENTRANT.try_with(|_| ()).is_ok()
            })
            .await;

        assert!(result);
    }
}
