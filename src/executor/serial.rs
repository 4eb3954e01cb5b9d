use crate::executor::{Executor, ExecutorHandle, Task};
use crate::flow::InputPort;
use crate::node::{Control, Node, PermitGate};
use crate::port::StreamInput;
use crate::utils::panic_message;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Mutual-exclusion executor without a dedicated thread.
///
/// A single-input actor guarded by a one-permit gate runs submitted
/// tasks on the backing executor, one at a time, in submission order.
/// The gate permit is consumed by each firing and returned when the
/// task finishes, so otherwise-concurrent callers are serialized.
/// Useful for protecting shared mutable state touched by several nodes.
pub struct SerialExecutor {
    tasks: StreamInput<Task>,
    node: Node,
}

impl SerialExecutor {
    pub fn new(backing: ExecutorHandle) -> Arc<Self> {
        let node = Node::new(backing);
        let tasks: StreamInput<Task> = node.stream_input();
        let gate: PermitGate = node.permit_gate(1);

        let action_tasks = tasks.clone();
        node.set_action(move || -> anyhow::Result<Control> {
            if let Some(task) = action_tasks.take() {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
                    tracing::error!("serialized task panicked: {}", panic_message(payload));
                }
                gate.release(1)?;
            }
            if action_tasks.is_closed() {
                return Ok(Control::Complete);
            }
            Ok(Control::Rearm)
        });
        node.start();

        Arc::new(Self { tasks, node })
    }

    /// Stop accepting tasks; already-queued ones still run, then the
    /// inner actor completes.
    pub fn shutdown(&self) {
        self.tasks.complete();
    }

    pub fn is_completed(&self) -> bool {
        self.node.is_completed()
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, task: Task) {
        if self.tasks.post(task).is_err() {
            tracing::warn!("task submitted to a shut down serial executor, dropped");
        }
    }
}
