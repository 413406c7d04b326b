//! Execution context
//!
//! Everything an operator needs at runtime, passed explicitly instead of
//! living in thread-locals: storage, catalog, functions, parameter
//! values, the worker count, the cooperative cancel flag with its
//! deadline, and the first-error slot workers report into.

use crate::catalog::Catalog;
use crate::error::{QuiverError, QuiverResult};
use crate::function::FunctionRegistry;
use crate::storage::{StorageManager, Transaction};
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared, per-query execution context
pub struct ExecutionContext {
    pub storage: Arc<StorageManager>,
    pub catalog: Arc<RwLock<Catalog>>,
    pub functions: Arc<FunctionRegistry>,
    pub parameters: HashMap<String, Value>,
    /// Standing session options, for `CURRENT_SETTING`
    pub settings: HashMap<String, Value>,
    pub num_threads: usize,
    pub max_recursive_depth: u64,
    pub transaction: Transaction,
    cancelled: Arc<AtomicBool>,
    started: Instant,
    deadline: Option<Instant>,
    first_error: Mutex<Option<QuiverError>>,
}

impl ExecutionContext {
    pub fn new(
        storage: Arc<StorageManager>,
        catalog: Arc<RwLock<Catalog>>,
        functions: Arc<FunctionRegistry>,
        transaction: Transaction,
        num_threads: usize,
        timeout: Option<Duration>,
        max_recursive_depth: u64,
    ) -> Self {
        let started = Instant::now();
        ExecutionContext {
            storage,
            catalog,
            functions,
            parameters: HashMap::new(),
            settings: HashMap::new(),
            num_threads,
            max_recursive_depth,
            transaction,
            cancelled: Arc::new(AtomicBool::new(false)),
            started,
            deadline: timeout.map(|t| started + t),
            first_error: Mutex::new(None),
        }
    }

    /// Poll point for cooperative cancellation. Called at every morsel
    /// fetch and at each recursive-extend frontier level.
    pub fn check_interrupted(&self) -> QuiverResult<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(QuiverError::Interrupted);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(QuiverError::Interrupted);
            }
        }
        Ok(())
    }

    /// Raise the flag; pipelines drain at their next poll
    pub fn interrupt(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// A handle that outlives the context's borrow, for interrupting from
    /// another thread
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Record a worker failure; the first error wins and cancels the
    /// query. `Interrupted` never displaces a real error.
    pub fn record_error(&self, error: QuiverError) {
        let mut slot = self.first_error.lock();
        match (&*slot, &error) {
            (None, _) => *slot = Some(error),
            (Some(QuiverError::Interrupted), e) if !matches!(e, QuiverError::Interrupted) => {
                *slot = Some(error);
            }
            _ => {}
        }
        drop(slot);
        self.interrupt();
    }

    pub fn take_error(&self) -> Option<QuiverError> {
        self.first_error.lock().take()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Cancels an associated query from another thread
#[derive(Clone)]
pub struct InterruptHandle {
    cancelled: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn context(timeout: Option<Duration>) -> ExecutionContext {
        let temp = std::env::temp_dir().join(format!("quiver-ctx-test-{}", std::process::id()));
        let storage = Arc::new(
            StorageManager::new(PathBuf::from(temp), false).expect("storage"),
        );
        let catalog = Arc::new(RwLock::new(Catalog::new()));
        let functions = Arc::new(FunctionRegistry::with_builtins());
        ExecutionContext::new(
            storage,
            catalog,
            functions,
            Transaction { id: 1 },
            2,
            timeout,
            30,
        )
    }

    #[test]
    fn test_not_interrupted_by_default() {
        let ctx = context(None);
        assert!(ctx.check_interrupted().is_ok());
    }

    #[test]
    fn test_explicit_interrupt() {
        let ctx = context(None);
        let handle = ctx.interrupt_handle();
        handle.interrupt();
        assert!(matches!(
            ctx.check_interrupted(),
            Err(QuiverError::Interrupted)
        ));
    }

    #[test]
    fn test_deadline_expiry() {
        let ctx = context(Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(10));
        assert!(matches!(
            ctx.check_interrupted(),
            Err(QuiverError::Interrupted)
        ));
        assert!(ctx.is_interrupted());
    }

    #[test]
    fn test_first_error_wins_over_interrupted() {
        let ctx = context(None);
        ctx.record_error(QuiverError::Interrupted);
        ctx.record_error(QuiverError::runtime("boom"));
        ctx.record_error(QuiverError::runtime("later"));
        let err = ctx.take_error().expect("error");
        assert!(err.to_string().contains("boom"));
        assert!(ctx.is_interrupted());
    }
}
