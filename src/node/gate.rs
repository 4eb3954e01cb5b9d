use crate::error::GateError;
use crate::node::node::Pin;

/// Counting pin: a semaphore wired into a node's firing condition.
///
/// The node is gated while the balance is non-positive; each successful
/// firing consumes one permit automatically. With an initial balance of
/// one this degenerates to mutual exclusion (see `SerialExecutor`).
#[derive(Clone)]
pub struct PermitGate {
    pin: Pin,
}

impl PermitGate {
    pub(crate) fn new(pin: Pin) -> Self {
        Self { pin }
    }

    /// Add `n >= 0` permits. Crossing from zero to positive unblocks the
    /// gate and may fire the node.
    pub fn release(&self, n: i64) -> Result<(), GateError> {
        let core = self.pin.core().clone();
        if core.transition().gate_release(self.pin.id(), n)? {
            core.submit();
        }
        Ok(())
    }

    /// Take `n > 0` permits out of the balance. Fails without side
    /// effects if fewer than `n` are available; the balance never goes
    /// negative. Crossing to zero blocks the gate.
    pub fn acquire(&self, n: i64) -> Result<(), GateError> {
        self.pin.core().transition().gate_acquire(self.pin.id(), n)
    }

    /// Current balance.
    pub fn permits(&self) -> i64 {
        self.pin.core().transition().gate_permits(self.pin.id())
    }
}
