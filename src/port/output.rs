use crate::error::{Fault, PostError, fault};
use crate::flow::{Publisher, Subscriber, TerminalSink};
use crate::port::StreamInput;
use crate::utils::panic_message;
use anyhow::anyhow;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

const CONNECT_BATCH: i64 = 32;

/// Where a subscription currently lives. A subscription being
/// dispatched to is in no list, which is what serializes its callbacks:
/// a concurrent matching pass cannot pick it until it is re-filed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Slot {
    /// Created but not yet filed (inside the lazy `on_subscribe` window).
    Unfiled,
    /// Zero demand: parked until a `request` arrives.
    Passive,
    /// Positive demand: eligible for token matching.
    Active,
    /// Popped by a matching pass; its callback may be running.
    Dispatching,
}

struct SubState<T> {
    subscriber: Option<Box<dyn Subscriber<T>>>,
    requested: i64,
    cancelled: bool,
    in_on_subscribe: bool,
    /// Fault recorded for a `request(n <= 0)` issued inside
    /// `on_subscribe`, delivered once the callback returns.
    deferred_reject: Option<Fault>,
    slot: Slot,
}

struct SubEntry<T> {
    st: Mutex<SubState<T>>,
}

struct QueueState<T> {
    /// Produced tokens not yet matched to demand.
    buffer: VecDeque<T>,
    active: VecDeque<Arc<SubEntry<T>>>,
    passive: Vec<Arc<SubEntry<T>>>,
    /// `complete()` seen; buffered tokens still drain first.
    closing: bool,
    /// Terminal state reached and every subscription notified.
    completed: bool,
    fault: Option<Fault>,
}

struct QueueCore<T> {
    st: Mutex<QueueState<T>>,
}

/// Per-consumer handle: the demand counter and cancellation flag of one
/// subscription. Cloneable; safe to use from any thread, including
/// re-entrantly from inside the subscriber's own callbacks.
pub struct Subscription<T> {
    queue: Arc<QueueCore<T>>,
    entry: Arc<SubEntry<T>>,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            entry: self.entry.clone(),
        }
    }
}

impl<T: Send + 'static> Subscription<T> {
    /// Grant `n` more units of demand. Saturates instead of overflowing.
    /// `n <= 0` is a protocol violation answered with `on_error` to this
    /// subscriber only, after which the subscription is dead.
    pub fn request(&self, n: i64) {
        let mut reject = None;
        let mut run_match = false;
        {
            let mut qs = self.queue.st.lock();
            let mut es = self.entry.st.lock();
            if es.cancelled {
                return;
            }
            if n <= 0 {
                es.cancelled = true;
                let cause = fault(anyhow!("non-positive request: {n}"));
                if es.in_on_subscribe {
                    // subscriber is exclusively borrowed by its own
                    // on_subscribe; deliver after it returns
                    es.deferred_reject = Some(cause);
                } else {
                    unfile(&mut qs, &self.entry, es.slot);
                    es.slot = Slot::Unfiled;
                    reject = es.subscriber.take().map(|s| (s, cause));
                }
            } else {
                let was_zero = es.requested == 0;
                es.requested = es.requested.saturating_add(n);
                if !es.in_on_subscribe && was_zero && es.slot == Slot::Passive {
                    unfile(&mut qs, &self.entry, Slot::Passive);
                    es.slot = Slot::Active;
                    qs.active.push_back(self.entry.clone());
                    run_match = true;
                }
                // Unfiled: subscribe() files by demand once on_subscribe
                // returns. Dispatching: the matching pass re-files.
            }
        }
        if let Some((subscriber, cause)) = reject {
            deliver_terminal(subscriber, Some(cause));
        }
        if run_match {
            matching_loop(&self.queue);
        }
    }

    /// Stop the flow. Idempotent; best-effort (a dispatch already in
    /// flight is not preempted). No terminal signal is delivered.
    pub fn cancel(&self) {
        let dropped = {
            let mut qs = self.queue.st.lock();
            let mut es = self.entry.st.lock();
            if es.cancelled {
                return;
            }
            es.cancelled = true;
            unfile(&mut qs, &self.entry, es.slot);
            es.slot = Slot::Unfiled;
            es.subscriber.take()
        };
        // subscriber dropped outside the locks
        drop(dropped);
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.st.lock().cancelled
    }
}

/// Demand-driven output port.
///
/// Tokens are buffered until a subscription with positive demand is
/// available; each token goes to exactly one subscription, in
/// production order. The queue's lock is never held across a subscriber
/// callback. Cloning shares the queue.
pub struct StreamOutput<T> {
    queue: Arc<QueueCore<T>>,
}

impl<T> Clone for StreamOutput<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<T: Send + 'static> Default for StreamOutput<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> StreamOutput<T> {
    /// A free-standing queue, not tied to any node. Node-owned ports are
    /// created through `Node::stream_output`.
    pub fn new() -> Self {
        Self {
            queue: Arc::new(QueueCore {
                st: Mutex::new(QueueState {
                    buffer: VecDeque::new(),
                    active: VecDeque::new(),
                    passive: Vec::new(),
                    closing: false,
                    completed: false,
                    fault: None,
                }),
            }),
        }
    }

    /// Publish one token. Rejected once the queue is closing.
    pub fn post(&self, token: T) -> Result<(), PostError<T>> {
        {
            let mut qs = self.queue.st.lock();
            if qs.closing {
                return Err(PostError::closed(Some(token)));
            }
            qs.buffer.push_back(token);
        }
        matching_loop(&self.queue);
        Ok(())
    }

    /// Complete normally. Buffered tokens drain first; then every
    /// subscription receives `on_complete` exactly once. Idempotent.
    pub fn complete(&self) {
        self.finish(None)
    }

    /// Complete exceptionally; subscriptions receive `on_error`.
    pub fn complete_with(&self, cause: Fault) {
        self.finish(Some(cause))
    }

    fn finish(&self, cause: Option<Fault>) {
        {
            let mut qs = self.queue.st.lock();
            if qs.closing {
                return;
            }
            qs.closing = true;
            qs.fault = cause;
        }
        matching_loop(&self.queue);
    }

    /// Feed a downstream node's stream input from this queue.
    pub fn connect(&self, input: &StreamInput<T>) {
        self.subscribe(input.bridge(CONNECT_BATCH));
    }

    /// Tokens buffered and not yet matched to demand.
    pub fn pending(&self) -> usize {
        self.queue.st.lock().buffer.len()
    }

    pub fn is_completed(&self) -> bool {
        self.queue.st.lock().completed
    }

    pub(crate) fn terminal_sink(&self) -> Arc<dyn TerminalSink> {
        self.queue.clone()
    }
}

impl<T: Send + 'static> Publisher<T> for StreamOutput<T> {
    /// Attach a subscriber. `on_subscribe` runs synchronously before the
    /// subscription is registered ("lazy" mode): demand requested inside
    /// it is recorded but matching is deferred until registration, so the
    /// first tokens cannot race the callback.
    fn subscribe<S: Subscriber<T>>(&self, subscriber: S) {
        let entry = Arc::new(SubEntry {
            st: Mutex::new(SubState {
                subscriber: None,
                requested: 0,
                cancelled: false,
                in_on_subscribe: true,
                deferred_reject: None,
                slot: Slot::Unfiled,
            }),
        });
        let subscription = Subscription {
            queue: self.queue.clone(),
            entry: entry.clone(),
        };

        let mut boxed: Box<dyn Subscriber<T>> = Box::new(subscriber);
        let panicked = catch_unwind(AssertUnwindSafe(|| boxed.on_subscribe(&subscription))).err();
        if let Some(payload) = panicked {
            tracing::error!("subscriber panicked in on_subscribe: {}", panic_message(payload));
            entry.st.lock().cancelled = true;
            return;
        }

        let (terminal, run_match) = {
            let qs = self.queue.st.lock();
            let mut es = entry.st.lock();
            es.in_on_subscribe = false;
            if let Some(cause) = es.deferred_reject.take() {
                (Some((boxed, Some(cause))), false)
            } else if es.cancelled {
                (None, false)
            } else if qs.completed {
                (Some((boxed, qs.fault.clone())), false)
            } else {
                es.subscriber = Some(boxed);
                let mut qs = qs;
                if es.requested > 0 {
                    es.slot = Slot::Active;
                    qs.active.push_back(entry.clone());
                    (None, true)
                } else {
                    es.slot = Slot::Passive;
                    qs.passive.push(entry.clone());
                    (None, false)
                }
            }
        };
        if let Some((subscriber, cause)) = terminal {
            deliver_terminal(subscriber, cause);
        }
        if run_match {
            matching_loop(&self.queue);
        }
    }
}

impl<T: Send + 'static> TerminalSink for QueueCore<T> {
    fn complete_from_node(&self, cause: Option<Fault>) {
        let run = {
            let mut qs = self.st.lock();
            if qs.closing {
                false
            } else {
                qs.closing = true;
                qs.fault = cause;
                true
            }
        };
        if run {
            // `self` is only reachable as Arc<QueueCore<T>>
            matching_loop_ref(self);
        }
    }
}

fn unfile<T>(qs: &mut QueueState<T>, entry: &Arc<SubEntry<T>>, slot: Slot) {
    match slot {
        Slot::Active => qs.active.retain(|e| !Arc::ptr_eq(e, entry)),
        Slot::Passive => qs.passive.retain(|e| !Arc::ptr_eq(e, entry)),
        Slot::Unfiled | Slot::Dispatching => {}
    }
}

/// One token/subscription pair picked under the queue lock.
enum Picked<T> {
    Dispatch {
        entry: Arc<SubEntry<T>>,
        subscriber: Box<dyn Subscriber<T>>,
        token: T,
    },
    Drain {
        cause: Option<Fault>,
        all: Vec<Arc<SubEntry<T>>>,
    },
    Idle,
}

fn matching_loop<T: Send + 'static>(queue: &Arc<QueueCore<T>>) {
    matching_loop_ref(queue.as_ref())
}

/// Matching pass: pair buffered tokens with active demand. Demand is
/// decremented before dispatch; the subscription is re-filed after its
/// callback returns. Runs until neither a match nor the terminal drain
/// applies. Safe to run concurrently from multiple producer threads.
fn matching_loop_ref<T: Send + 'static>(queue: &QueueCore<T>) {
    loop {
        let picked = {
            let mut qs = queue.st.lock();
            pick(&mut qs)
        };
        match picked {
            Picked::Idle => return,
            Picked::Drain { cause, all } => {
                for entry in all {
                    let taken = {
                        let mut es = entry.st.lock();
                        es.slot = Slot::Unfiled;
                        es.subscriber.take()
                    };
                    if let Some(subscriber) = taken {
                        deliver_terminal(subscriber, cause.clone());
                    }
                }
                return;
            }
            Picked::Dispatch {
                entry,
                mut subscriber,
                token,
            } => {
                let panicked =
                    catch_unwind(AssertUnwindSafe(|| subscriber.on_next(token))).err();
                refile(queue, entry, subscriber, panicked);
            }
        }
    }
}

fn pick<T>(qs: &mut QueueState<T>) -> Picked<T> {
    while !qs.buffer.is_empty() {
        let Some(entry) = qs.active.pop_front() else {
            break;
        };
        let mut es = entry.st.lock();
        // invariants: filed entries are live and have positive demand
        debug_assert!(!es.cancelled && es.requested > 0);
        es.requested -= 1;
        es.slot = Slot::Dispatching;
        let Some(subscriber) = es.subscriber.take() else {
            es.slot = Slot::Unfiled;
            continue;
        };
        drop(es);
        let Some(token) = qs.buffer.pop_front() else {
            // unreachable by the loop condition; restore and bail
            let mut es = entry.st.lock();
            es.requested += 1;
            es.slot = Slot::Active;
            es.subscriber = Some(subscriber);
            drop(es);
            qs.active.push_front(entry);
            break;
        };
        return Picked::Dispatch {
            entry,
            subscriber,
            token,
        };
    }
    if qs.closing && qs.buffer.is_empty() && !qs.completed {
        qs.completed = true;
        let all: Vec<_> = qs.active.drain(..).chain(qs.passive.drain(..)).collect();
        return Picked::Drain {
            cause: qs.fault.clone(),
            all,
        };
    }
    Picked::Idle
}

/// Put a subscription back after its `on_next` returned (or panicked).
fn refile<T: Send + 'static>(
    queue: &QueueCore<T>,
    entry: Arc<SubEntry<T>>,
    subscriber: Box<dyn Subscriber<T>>,
    panicked: Option<Box<dyn std::any::Any + Send>>,
) {
    if let Some(payload) = panicked {
        // a failing subscriber gets an on_error if it can take one,
        // then counts as cancelled; the queue itself is unaffected
        let msg = panic_message(payload);
        tracing::error!("subscriber panicked in on_next: {msg}");
        {
            let mut es = entry.st.lock();
            es.cancelled = true;
            es.slot = Slot::Unfiled;
        }
        deliver_terminal(subscriber, Some(fault(anyhow!("subscriber panicked: {msg}"))));
        return;
    }

    // dropped or terminal-notified outside the locks: a subscriber's
    // Drop may call back into this queue
    let mut dropped: Option<Box<dyn Subscriber<T>>> = None;
    let terminal = {
        let mut qs = queue.st.lock();
        let mut es = entry.st.lock();
        if es.cancelled {
            es.slot = Slot::Unfiled;
            dropped = Some(subscriber);
            None
        } else if qs.completed {
            // the terminal drain ran while this dispatch was in flight;
            // this subscription was in no list, so it is notified here
            es.slot = Slot::Unfiled;
            Some((subscriber, qs.fault.clone()))
        } else {
            es.subscriber = Some(subscriber);
            if es.requested > 0 {
                es.slot = Slot::Active;
                qs.active.push_back(entry.clone());
            } else {
                es.slot = Slot::Passive;
                qs.passive.push(entry.clone());
            }
            None
        }
    };
    drop(dropped);
    if let Some((subscriber, cause)) = terminal {
        deliver_terminal(subscriber, cause);
    }
}

/// Exactly-once terminal signal, with panic containment.
fn deliver_terminal<T: 'static>(mut subscriber: Box<dyn Subscriber<T>>, cause: Option<Fault>) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match cause {
        Some(f) => subscriber.on_error(f),
        None => subscriber.on_complete(),
    }));
    if let Err(payload) = outcome {
        tracing::error!(
            "subscriber panicked in terminal signal: {}",
            panic_message(payload)
        );
    }
}
