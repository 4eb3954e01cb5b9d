use crate::error::Fault;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
struct State {
    done: bool,
    fault: Option<Fault>,
}

/// Terminal state of a node: a one-way latch plus the optional fault,
/// waitable by synchronous callers (the core itself never waits).
#[derive(Default)]
pub(crate) struct Completion {
    state: Mutex<State>,
    cond: Condvar,
}

impl Completion {
    /// Latch the terminal state. Only the first call wins; returns
    /// whether this call was the one that completed.
    pub(crate) fn complete(&self, fault: Option<Fault>) -> bool {
        let mut st = self.state.lock();
        if st.done {
            return false;
        }
        st.done = true;
        st.fault = fault;
        drop(st);
        self.cond.notify_all();
        true
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.state.lock().done
    }

    pub(crate) fn fault(&self) -> Option<Fault> {
        self.state.lock().fault.clone()
    }

    /// Block the calling thread until completion or timeout.
    /// Returns true if the node completed within the window.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut st = self.state.lock();
        while !st.done {
            if self.cond.wait_until(&mut st, deadline).timed_out() {
                break;
            }
        }
        st.done
    }
}
