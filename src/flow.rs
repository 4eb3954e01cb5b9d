use crate::error::{Fault, PostError};
use crate::port::Subscription;

/// Consumer side of the demand-driven stream protocol.
///
/// Calls for a single subscription are strictly ordered and never
/// overlap; `on_next` is never delivered after `on_error`/`on_complete`.
/// `on_subscribe` runs before the subscription is registered, so a
/// `request` issued from inside it only records demand and cannot race
/// with token matching.
pub trait Subscriber<T>: Send + 'static {
    /// Receives the subscription handle. Request demand here (or keep a
    /// clone and request later); without demand no tokens are delivered.
    fn on_subscribe(&mut self, subscription: &Subscription<T>);

    /// One token, consuming one unit of previously requested demand.
    fn on_next(&mut self, token: T);

    /// Terminal error signal; no further calls follow.
    fn on_error(&mut self, fault: Fault);

    /// Terminal completion signal; no further calls follow.
    fn on_complete(&mut self);
}

/// Producer side: anything a [`Subscriber`] can be attached to.
pub trait Publisher<T: Send + 'static> {
    fn subscribe<S: Subscriber<T>>(&self, subscriber: S);
}

/// Common surface of the typed input ports (scalar one-shot and stream).
pub trait InputPort<T: Send + 'static> {
    /// Hand a token to the port. Rejections carry the token back.
    fn post(&self, value: T) -> Result<(), PostError<T>>;
}

/// Sink notified when the owning node reaches its terminal state.
/// Output ports register themselves here so a node failure propagates
/// downstream as `on_error`.
pub(crate) trait TerminalSink: Send + Sync {
    fn complete_from_node(&self, fault: Option<Fault>);
}
