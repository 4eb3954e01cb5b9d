use crate::error::{Fault, PostError, PushbackError};
use crate::flow::{InputPort, Subscriber};
use crate::node::Pin;
use crate::port::Subscription;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct StreamState<T> {
    current: Option<T>,
    queue: VecDeque<T>,
    pushback: bool,
    closing: bool,
    fault: Option<Fault>,
}

struct StreamCore<T> {
    st: Mutex<StreamState<T>>,
    pin: Pin,
}

/// FIFO stream input port.
///
/// The pin is unblocked exactly while a token is available in the
/// current slot, or permanently once the stream closed and drained so
/// the node can observe end-of-stream. Consumption is explicit via
/// [`StreamInput::take`]; a consumed token may be re-presented once via
/// [`StreamInput::push_back`] for partial-progress processing.
pub struct StreamInput<T> {
    core: Arc<StreamCore<T>>,
}

impl<T> Clone for StreamInput<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: Send + 'static> StreamInput<T> {
    pub(crate) fn new(pin: Pin) -> Self {
        Self {
            core: Arc::new(StreamCore {
                st: Mutex::new(StreamState {
                    current: None,
                    queue: VecDeque::new(),
                    pushback: false,
                    closing: false,
                    fault: None,
                }),
                pin,
            }),
        }
    }

    /// Consume the current token. Refills the slot from the queue; when
    /// both drain and the stream is closing, the pin latches unblocked
    /// so the node keeps firing until it reacts to [`Self::is_closed`].
    pub fn take(&self) -> Option<T> {
        let (value, fire) = {
            let mut st = self.core.st.lock();
            let value = st.current.take();
            st.pushback = false;
            st.current = st.queue.pop_front();
            let fire = if st.current.is_some() {
                false
            } else if st.closing {
                self.core.pin.complete()
            } else {
                self.core.pin.block();
                false
            };
            (value, fire)
        };
        if fire {
            self.core.pin.fire();
        }
        value
    }

    /// Re-present `value` as the current token for the next cycle.
    /// At most one pushback may be outstanding between consumptions; a
    /// second one is rejected with the token handed back.
    pub fn push_back(&self, value: T) -> Result<(), PushbackError<T>> {
        let fire = {
            let mut st = self.core.st.lock();
            if st.pushback {
                return Err(PushbackError { value });
            }
            st.pushback = true;
            if let Some(displaced) = st.current.take() {
                // a newer token already moved up; keep it right behind
                // the re-presented one so arrival order is preserved
                st.queue.push_front(displaced);
            }
            st.current = Some(value);
            self.core.pin.unblock()
        };
        if fire {
            self.core.pin.fire();
        }
        Ok(())
    }

    /// Peek at the current token without consuming it.
    pub fn current(&self) -> Option<T>
    where
        T: Clone,
    {
        self.core.st.lock().current.clone()
    }

    /// Request close. Latches; tokens already queued are still delivered.
    /// Idempotent, and posts after this are rejected.
    pub fn complete(&self) {
        self.finish(None)
    }

    /// Close with a terminal fault the consuming node can inspect.
    pub fn complete_with(&self, fault: Fault) {
        self.finish(Some(fault))
    }

    fn finish(&self, fault: Option<Fault>) {
        let fire = {
            let mut st = self.core.st.lock();
            if st.closing {
                return;
            }
            st.closing = true;
            st.fault = fault;
            if st.current.is_none() {
                self.core.pin.complete()
            } else {
                false
            }
        };
        if fire {
            self.core.pin.fire();
        }
    }

    /// End-of-stream: closed and fully drained. The node's action is
    /// expected to finalize (complete outputs, return `Control::Complete`)
    /// when it observes this.
    pub fn is_closed(&self) -> bool {
        let st = self.core.st.lock();
        st.closing && st.current.is_none()
    }

    /// Close was requested, though tokens may remain.
    pub fn is_closing(&self) -> bool {
        self.core.st.lock().closing
    }

    /// Terminal fault carried by an exceptional close, if any.
    pub fn fault(&self) -> Option<Fault> {
        self.core.st.lock().fault.clone()
    }

    /// Tokens currently buffered (current slot included).
    pub fn len(&self) -> usize {
        let st = self.core.st.lock();
        st.queue.len() + usize::from(st.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A bridge subscriber that feeds this input from a `StreamOutput`,
    /// replenishing demand in batches of `batch`.
    pub(crate) fn bridge(&self, batch: i64) -> InputBridge<T> {
        InputBridge {
            input: self.clone(),
            subscription: None,
            credits: 0,
            batch: batch.max(1),
        }
    }
}

impl<T: Send + 'static> InputPort<T> for StreamInput<T> {
    fn post(&self, value: T) -> Result<(), PostError<T>> {
        let fire = {
            let mut st = self.core.st.lock();
            if st.closing {
                return Err(PostError::closed(Some(value)));
            }
            if st.current.is_none() {
                st.current = Some(value);
                self.core.pin.unblock()
            } else {
                st.queue.push_back(value);
                false
            }
        };
        if fire {
            self.core.pin.fire();
        }
        Ok(())
    }
}

/// Subscriber gluing a publisher to a stream input, so pipelines of
/// nodes compose out of the same pub/sub protocol external consumers use.
pub(crate) struct InputBridge<T> {
    input: StreamInput<T>,
    subscription: Option<Subscription<T>>,
    credits: i64,
    batch: i64,
}

impl<T: Send + 'static> Subscriber<T> for InputBridge<T> {
    fn on_subscribe(&mut self, subscription: &Subscription<T>) {
        subscription.request(self.batch);
        self.credits = self.batch;
        self.subscription = Some(subscription.clone());
    }

    fn on_next(&mut self, token: T) {
        if self.input.post(token).is_err() {
            // downstream closed its input; stop the flow
            if let Some(sub) = &self.subscription {
                sub.cancel();
            }
            return;
        }
        self.credits -= 1;
        if self.credits <= 0 {
            if let Some(sub) = &self.subscription {
                sub.request(self.batch);
            }
            self.credits = self.batch;
        }
    }

    fn on_error(&mut self, fault: Fault) {
        self.input.complete_with(fault);
    }

    fn on_complete(&mut self) {
        self.input.complete();
    }
}
