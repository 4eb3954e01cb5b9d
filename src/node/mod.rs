pub use gate::PermitGate;
pub use node::{Action, Control, Node, NodeId};

mod completion;
mod gate;
#[allow(clippy::module_inception)]
mod node;
mod transition;

pub(crate) use node::Pin;
