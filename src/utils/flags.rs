use crossbeam::utils::CachePadded;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cheaply clonable boolean used to publish liveness across threads
/// (executor pool up/down, test probes). Cache-padded to avoid false
/// sharing with neighboring hot state.
#[derive(Clone)]
#[repr(transparent)]
pub struct StatusFlag(Arc<CachePadded<AtomicBool>>);

impl StatusFlag {
    #[inline]
    pub fn new(initial: bool) -> Self {
        Self(Arc::new(CachePadded::new(AtomicBool::new(initial))))
    }

    #[inline(always)]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn set(&self, v: bool) {
        self.0.store(v, Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn up(&self) {
        self.set(true);
    }

    #[inline(always)]
    pub fn down(&self) {
        self.set(false);
    }
}

impl fmt::Debug for StatusFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusFlag").field("value", &self.get()).finish()
    }
}
