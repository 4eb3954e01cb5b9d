use crate::executor::{Executor, ExecutorHandle, Task};
use crate::utils::panic_message;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

thread_local! {
    static RUN_QUEUE: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Same-thread executor for deterministic tests and single-threaded use.
///
/// Work is queued on a thread-local trampoline and drained by the
/// outermost `execute` call on that thread, so a node that resubmits
/// itself (a busy actor) runs as a loop instead of recursing the stack.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl InlineExecutor {
    /// Shared handle, ready to inject into nodes.
    pub fn handle() -> ExecutorHandle {
        Arc::new(InlineExecutor)
    }
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.set(false);
    }
}

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        RUN_QUEUE.with_borrow_mut(|q| q.push_back(task));
        if DRAINING.get() {
            // a frame further up the stack owns the drain
            return;
        }
        DRAINING.set(true);
        let _guard = DrainGuard;
        loop {
            let next = RUN_QUEUE.with_borrow_mut(|q| q.pop_front());
            let Some(task) = next else { break };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
                tracing::error!("inline task panicked: {}", panic_message(payload));
            }
        }
    }
}
