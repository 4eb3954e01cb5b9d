pub use crate::config::PoolConfig;
pub use crate::error::{Fault, GateError, PostError, PostFailReason, PushbackError, fault};
pub use crate::executor::{Executor, ExecutorHandle, InlineExecutor, SerialExecutor, Task, ThreadPool};
pub use crate::flow::{InputPort, Publisher, Subscriber};
pub use crate::node::{Action, Control, Node, NodeId, PermitGate};
pub use crate::port::{ScalarInput, StreamInput, StreamOutput, Subscription};
pub use crate::utils::logger::LoggerConfig;
