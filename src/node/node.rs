use crate::error::{Fault, fault};
use crate::executor::{ExecutorHandle, Task};
use crate::flow::TerminalSink;
use crate::node::completion::Completion;
use crate::node::gate::PermitGate;
use crate::node::transition::{PinId, PinKind, Transition};
use crate::port::{ScalarInput, StreamInput, StreamOutput};
use crate::utils::panic_message;
use anyhow::anyhow;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use uuid::fmt::Simple;

/// Unique identifier of a node, for logs and `Debug` output.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct NodeId {
    raw: Simple,
}

impl NodeId {
    fn new() -> Self {
        Self {
            raw: Uuid::new_v4().simple(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// What the scheduler does after an action invocation returns `Ok`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Control {
    /// Re-check the pin table and fire again as soon as it clears.
    /// This is the reusable-actor message loop.
    Rearm,
    /// The node is done; latch terminal state and never fire again.
    Complete,
}

/// The unit of work a node runs when all of its pins are unblocked.
///
/// Supplied at construction as a closure or explicit impl; the runtime
/// never discovers actions by reflection or inheritance. An `Err` (or a
/// panic) becomes the node's terminal fault and is propagated to every
/// registered output port.
pub trait Action: Send + 'static {
    fn run(&mut self) -> anyhow::Result<Control>;
}

impl<F> Action for F
where
    F: FnMut() -> anyhow::Result<Control> + Send + 'static,
{
    fn run(&mut self) -> anyhow::Result<Control> {
        self()
    }
}

pub(crate) struct NodeCore {
    id: NodeId,
    transition: Transition,
    executor: ExecutorHandle,
    action: Mutex<Option<Box<dyn Action>>>,
    completion: Completion,
    outputs: Mutex<Vec<Arc<dyn TerminalSink>>>,
}

impl NodeCore {
    /// Submit one execution of this node. Callers must hold no locks.
    pub(crate) fn submit(self: &Arc<Self>) {
        let core = self.clone();
        self.executor.execute(Task::new(move || core.run()));
    }

    fn run(self: &Arc<Self>) {
        if self.completion.is_completed() {
            return;
        }
        let mut action = self.action.lock().take();
        let outcome = match action.as_mut() {
            Some(a) => catch_unwind(AssertUnwindSafe(|| a.run())),
            None => Ok(Err(anyhow!("node fired without an action"))),
        };
        match outcome {
            Ok(Ok(Control::Rearm)) => {
                self.restore_action(action);
                if self.transition.rearm() {
                    self.submit();
                }
            }
            Ok(Ok(Control::Complete)) => {
                self.restore_action(action);
                self.complete(None);
            }
            Ok(Err(err)) => {
                self.restore_action(action);
                self.complete(Some(fault(err)));
            }
            Err(payload) => {
                // the action is poisoned; do not restore it
                let msg = panic_message(payload);
                self.complete(Some(fault(anyhow!("action panicked: {msg}"))));
            }
        }
    }

    fn restore_action(&self, action: Option<Box<dyn Action>>) {
        if let Some(a) = action {
            let mut slot = self.action.lock();
            if slot.is_none() {
                *slot = Some(a);
            }
        }
    }

    /// Latch terminal state and fan completion out to every output port.
    fn complete(&self, cause: Option<Fault>) {
        self.transition.mark_completed();
        if !self.completion.complete(cause.clone()) {
            return;
        }
        if let Some(err) = &cause {
            tracing::error!(node = %self.id, "node failed: {err:#}");
        }
        let sinks: Vec<_> = self.outputs.lock().drain(..).collect();
        for sink in sinks {
            sink.complete_from_node(cause.clone());
        }
    }

    pub(crate) fn transition(&self) -> &Transition {
        &self.transition
    }
}

/// Handle controlling one pin inside a node's table. Owned by the port
/// (or gate) that drives it.
///
/// `unblock`/`complete` return whether the transition cleared; the
/// caller must then invoke [`Pin::fire`] once every lock it holds is
/// released. Ports flip their pin while still holding their own state
/// lock (port lock nests over the transition lock, and the transition
/// never calls back out), which keeps pin state and port state in step
/// under concurrent producers and consumers.
#[derive(Clone)]
pub(crate) struct Pin {
    core: Arc<NodeCore>,
    id: PinId,
}

impl Pin {
    pub(crate) fn block(&self) {
        self.core.transition.block(self.id);
    }

    /// Returns true if the caller must `fire()` after dropping its locks.
    #[must_use]
    pub(crate) fn unblock(&self) -> bool {
        self.core.transition.unblock(self.id)
    }

    /// Permanently unblock: the pin never gates the node again.
    /// Returns true if the caller must `fire()` after dropping its locks.
    #[must_use]
    pub(crate) fn complete(&self) -> bool {
        self.core.transition.complete_pin(self.id)
    }

    /// Submit the owning node. Callers must hold no locks.
    pub(crate) fn fire(&self) {
        self.core.submit();
    }

    pub(crate) fn id(&self) -> PinId {
        self.id
    }

    pub(crate) fn core(&self) -> &Arc<NodeCore> {
        &self.core
    }
}

/// A gated unit of computation.
///
/// A node owns a set of pins (its control pin, one per input port, one
/// per permit gate). Every pin transition adjusts a blocked count; the
/// transition that clears the table submits the node's [`Action`] to
/// the executor exactly once, guarded against re-entry until the action
/// returns. Cloning the handle is cheap and shares the same node.
#[derive(Clone)]
pub struct Node {
    core: Arc<NodeCore>,
}

impl Node {
    /// Create a node bound to an executor. The node does nothing until
    /// [`Node::start`] hands it the control token.
    pub fn new(executor: ExecutorHandle) -> Self {
        Self {
            core: Arc::new(NodeCore {
                id: NodeId::new(),
                transition: Transition::new(),
                executor,
                action: Mutex::new(None),
                completion: Completion::default(),
                outputs: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.core.id
    }

    /// Install the action to run on each firing. Replaces any previous
    /// action; typically called exactly once before `start`.
    pub fn set_action(&self, action: impl Action) {
        *self.core.action.lock() = Some(Box::new(action));
    }

    /// Pass the control token to the node. Only the first call has any
    /// effect. If every other pin is already unblocked this submits the
    /// node immediately.
    pub fn start(&self) {
        if self.core.transition.start() {
            self.core.submit();
        }
    }

    /// One-shot typed input; stays ready forever after its first value.
    pub fn scalar_input<T: Send + 'static>(&self) -> ScalarInput<T> {
        let pin = Pin {
            core: self.core.clone(),
            id: self.core.transition.register(PinKind::Port, true),
        };
        ScalarInput::new(pin)
    }

    /// FIFO stream input with pushback and end-of-stream support.
    pub fn stream_input<T: Send + 'static>(&self) -> StreamInput<T> {
        let pin = Pin {
            core: self.core.clone(),
            id: self.core.transition.register(PinKind::Port, true),
        };
        StreamInput::new(pin)
    }

    /// Demand-driven output. The port is registered on the node so a
    /// terminal fault (or normal completion) propagates to subscribers.
    pub fn stream_output<T: Send + 'static>(&self) -> StreamOutput<T> {
        let out = StreamOutput::new();
        let sink = out.terminal_sink();
        // registration races node completion: the check and the push
        // happen under the outputs lock, which completion also takes
        let deliver_now = {
            let mut outputs = self.core.outputs.lock();
            if self.core.completion.is_completed() {
                true
            } else {
                outputs.push(sink.clone());
                false
            }
        };
        if deliver_now {
            sink.complete_from_node(self.core.completion.fault());
        }
        out
    }

    /// Counting pin: the node fires only while the balance is positive,
    /// and each firing consumes one permit.
    pub fn permit_gate(&self, initial: i64) -> PermitGate {
        let initial = initial.max(0);
        let pin = Pin {
            core: self.core.clone(),
            id: self
                .core
                .transition
                .register(PinKind::Gate { permits: initial }, initial <= 0),
        };
        PermitGate::new(pin)
    }

    pub fn is_completed(&self) -> bool {
        self.core.completion.is_completed()
    }

    /// Terminal error, if the node completed exceptionally.
    pub fn completion_error(&self) -> Option<Fault> {
        self.core.completion.fault()
    }

    /// Block until the node completes or the timeout elapses. A test and
    /// shutdown convenience; the runtime itself never calls it.
    pub fn wait_completed(&self, timeout: Duration) -> bool {
        self.core.completion.wait(timeout)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.core.id)
            .field("completed", &self.core.completion.is_completed())
            .field("running", &self.core.transition.is_running())
            .finish()
    }
}
