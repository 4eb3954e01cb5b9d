use crate::error::PostError;
use crate::flow::InputPort;
use crate::node::Pin;
use parking_lot::Mutex;
use std::sync::Arc;

struct ScalarCore<T> {
    slot: Mutex<Option<T>>,
    pin: Pin,
}

/// One-shot typed input port.
///
/// The pin is blocked until the first `post`, then permanently ready:
/// the value is never cleared, so the node can fire any number of
/// cycles against the same parameter. A second post is a protocol
/// violation and hands the token back.
pub struct ScalarInput<T> {
    core: Arc<ScalarCore<T>>,
}

impl<T> Clone for ScalarInput<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: Send + 'static> ScalarInput<T> {
    pub(crate) fn new(pin: Pin) -> Self {
        Self {
            core: Arc::new(ScalarCore {
                slot: Mutex::new(None),
                pin,
            }),
        }
    }

    /// The stored value, once posted.
    pub fn current(&self) -> Option<T>
    where
        T: Clone,
    {
        self.core.slot.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.core.slot.lock().is_some()
    }
}

impl<T: Send + 'static> InputPort<T> for ScalarInput<T> {
    fn post(&self, value: T) -> Result<(), PostError<T>> {
        let fire = {
            let mut slot = self.core.slot.lock();
            if slot.is_some() {
                return Err(PostError::already_set(Some(value)));
            }
            *slot = Some(value);
            // one-shot: the pin never gates this node again
            self.core.pin.complete()
        };
        if fire {
            self.core.pin.fire();
        }
        Ok(())
    }
}
