pub use cancel::*;
pub use flags::*;

mod cancel;
mod flags;
pub mod logger;

/// Render a payload captured from a panicking task into a log-friendly string.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic (unknown type)".into())
}
