use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation state. A state may hold a parent so that
/// cancelling the parent is observed by every descendant.
struct CancelState {
    cancelled: AtomicBool,
    parent: Option<Arc<CancelState>>,
}

impl CancelState {
    fn tripped(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        match &self.parent {
            Some(p) => p.tripped(),
            None => false,
        }
    }
}

/// Hierarchical cancellation token for executor shutdown.
///
/// Cloning is cheap; cancelling a parent token cancels all children.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// Create a new root token.
    pub fn new_root() -> Self {
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// Derive a child token linked to this one.
    pub fn new_child(&self) -> Self {
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                parent: Some(self.state.clone()),
            }),
        }
    }

    /// Trip this token (and, transitively, all children).
    #[inline]
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether this token or any ancestor has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state.tripped()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}
