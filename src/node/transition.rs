use crate::error::GateError;
use parking_lot::Mutex;

/// Index of a pin inside its node's pin table.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct PinId(usize);

#[derive(Debug)]
pub(crate) enum PinKind {
    /// The built-in control pin: consumed on every firing, returned on rearm.
    Control,
    /// A pin driven by an input port.
    Port,
    /// A counting pin: one permit is consumed per firing.
    Gate { permits: i64 },
}

#[derive(Debug)]
struct PinSlot {
    kind: PinKind,
    blocked: bool,
    /// A completed pin counts as permanently unblocked.
    completed: bool,
}

#[derive(Debug)]
struct Table {
    pins: Vec<PinSlot>,
    /// Count of pins currently blocked. Zero means the node may fire.
    blocked: usize,
    /// At-most-one-in-flight execution guard.
    running: bool,
    /// Terminal latch; no firing ever happens after this.
    completed: bool,
    /// `start()` works only once.
    started: bool,
}

/// The pin table and firing state machine of one node.
///
/// All checks-and-mutations happen under one private lock. The lock is
/// never held while submitting to an executor or invoking user code:
/// every mutating operation instead *returns* whether the caller must
/// submit the node, and the caller submits after the lock is gone.
#[derive(Debug)]
pub(crate) struct Transition {
    table: Mutex<Table>,
}

const CONTROL: usize = 0;

impl Transition {
    /// New table with the control pin registered and blocked.
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                pins: vec![PinSlot {
                    kind: PinKind::Control,
                    blocked: true,
                    completed: false,
                }],
                blocked: 1,
                running: false,
                completed: false,
                started: false,
            }),
        }
    }

    /// Register a new pin. Blocked pins raise the blocked count, so
    /// registration while the node is mid-run simply gates the next cycle.
    pub(crate) fn register(&self, kind: PinKind, initially_blocked: bool) -> PinId {
        let mut t = self.table.lock();
        let blocked = initially_blocked && !t.completed;
        t.pins.push(PinSlot {
            kind,
            blocked,
            completed: false,
        });
        if blocked {
            t.blocked += 1;
        }
        PinId(t.pins.len() - 1)
    }

    /// First call unblocks the control pin; later calls are ignored.
    /// Returns true if the node must be submitted.
    pub(crate) fn start(&self) -> bool {
        let mut t = self.table.lock();
        if t.started || t.completed {
            return false;
        }
        t.started = true;
        unblock_slot(&mut t, CONTROL);
        try_fire(&mut t)
    }

    /// Block a pin; idempotent, and a no-op once the pin completed.
    pub(crate) fn block(&self, pin: PinId) {
        let mut t = self.table.lock();
        let slot = &mut t.pins[pin.0];
        if slot.completed || slot.blocked {
            return;
        }
        slot.blocked = true;
        t.blocked += 1;
    }

    /// Unblock a pin; idempotent. Returns true if the node must be submitted.
    pub(crate) fn unblock(&self, pin: PinId) -> bool {
        let mut t = self.table.lock();
        if !t.pins[pin.0].blocked {
            return false;
        }
        unblock_slot(&mut t, pin.0);
        try_fire(&mut t)
    }

    /// Latch a pin as permanently unblocked (end-of-stream, one-shot
    /// scalar). Returns true if the node must be submitted.
    pub(crate) fn complete_pin(&self, pin: PinId) -> bool {
        let mut t = self.table.lock();
        let slot = &mut t.pins[pin.0];
        if slot.completed {
            return false;
        }
        slot.completed = true;
        if t.pins[pin.0].blocked {
            unblock_slot(&mut t, pin.0);
        }
        try_fire(&mut t)
    }

    /// Called after the action returned `Control::Rearm`: clears the
    /// running guard, returns the control token and re-checks the table.
    /// Returns true if the node must be submitted again.
    pub(crate) fn rearm(&self) -> bool {
        let mut t = self.table.lock();
        t.running = false;
        if t.pins[CONTROL].blocked {
            unblock_slot(&mut t, CONTROL);
        }
        try_fire(&mut t)
    }

    /// Terminal latch: no more firings, ever.
    pub(crate) fn mark_completed(&self) {
        let mut t = self.table.lock();
        t.completed = true;
        t.running = false;
    }

    /// Add permits to a gate pin. Returns true if the node must be submitted.
    pub(crate) fn gate_release(&self, pin: PinId, n: i64) -> Result<bool, GateError> {
        if n < 0 {
            return Err(GateError::InvalidPermits(n));
        }
        let mut t = self.table.lock();
        let slot = &mut t.pins[pin.0];
        let PinKind::Gate { permits } = &mut slot.kind else {
            return Err(GateError::InvalidPermits(n));
        };
        *permits = permits.saturating_add(n);
        if *permits > 0 && slot.blocked && !slot.completed {
            unblock_slot(&mut t, pin.0);
            return Ok(try_fire(&mut t));
        }
        Ok(false)
    }

    /// Take permits out of a gate pin. Never drives the count negative:
    /// over-acquisition is rejected with the available balance.
    pub(crate) fn gate_acquire(&self, pin: PinId, n: i64) -> Result<(), GateError> {
        if n <= 0 {
            return Err(GateError::InvalidPermits(n));
        }
        let mut t = self.table.lock();
        let slot = &mut t.pins[pin.0];
        let PinKind::Gate { permits } = &mut slot.kind else {
            return Err(GateError::InvalidPermits(n));
        };
        if *permits < n {
            return Err(GateError::Exhausted {
                requested: n,
                available: *permits,
            });
        }
        *permits -= n;
        if *permits <= 0 && !slot.blocked && !slot.completed {
            slot.blocked = true;
            t.blocked += 1;
        }
        Ok(())
    }

    /// Current permit balance of a gate pin.
    pub(crate) fn gate_permits(&self, pin: PinId) -> i64 {
        let t = self.table.lock();
        match t.pins[pin.0].kind {
            PinKind::Gate { permits } => permits,
            _ => 0,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.table.lock().running
    }
}

fn unblock_slot(t: &mut Table, idx: usize) {
    let slot = &mut t.pins[idx];
    if slot.blocked {
        slot.blocked = false;
        t.blocked -= 1;
    }
}

/// The single place where a firing decision is made. Exactly one caller
/// observes the transition to zero with `running == false`; it flips
/// `running`, consumes the control token plus one permit per gate pin,
/// and owns the duty to submit.
fn try_fire(t: &mut Table) -> bool {
    if t.blocked != 0 || t.running || t.completed {
        return false;
    }
    t.running = true;
    {
        let slot = &mut t.pins[CONTROL];
        slot.blocked = true;
    }
    t.blocked += 1;
    for slot in t.pins.iter_mut() {
        if slot.completed {
            continue;
        }
        if let PinKind::Gate { permits } = &mut slot.kind {
            debug_assert!(*permits > 0, "fired with an exhausted gate");
            *permits -= 1;
            if *permits <= 0 {
                slot.blocked = true;
                t.blocked += 1;
            }
        }
    }
    true
}
