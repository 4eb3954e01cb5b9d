pub use inline::InlineExecutor;
pub use pool::ThreadPool;
pub use serial::SerialExecutor;

mod inline;
mod pool;
mod serial;

use std::sync::Arc;

/// A unit of work accepted by an [`Executor`].
pub struct Task(Box<dyn FnOnce() + Send + 'static>);

impl Task {
    pub fn new(work: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(work))
    }

    #[inline]
    pub fn run(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Task")
    }
}

/// Pluggable execution backend. The core only ever submits work; where
/// and when it runs is the executor's business. Submission must never
/// block the caller.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, task: Task);
}

/// Shared handle to an executor, injected into every node at construction.
pub type ExecutorHandle = Arc<dyn Executor>;
