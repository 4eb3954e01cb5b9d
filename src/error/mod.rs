use std::sync::Arc;
use std::{error::Error, fmt};

const ERR_MSG_PORT_CLOSED: &str = "port is closed";
const ERR_MSG_ALREADY_SET: &str = "scalar port already holds a value";
const ERR_MSG_DOUBLE_PUSHBACK: &str = "pushback already pending";
const ERR_MSG_GATE_EXHAUSTED: &str = "not enough permits";
const ERR_MSG_BAD_PERMITS: &str = "invalid permit count";

/// Terminal error shared between a node's completion state and every
/// downstream subscriber.
pub type Fault = Arc<anyhow::Error>;

/// Wrap an [`anyhow::Error`] for fan-out delivery.
#[inline]
pub fn fault(err: anyhow::Error) -> Fault {
    Arc::new(err)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PostFailReason {
    /// The port saw `complete()` before this post.
    Closed,
    /// One-shot scalar port already holds its value.
    AlreadySet,
}

impl fmt::Display for PostFailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostFailReason::Closed => write!(f, "{ERR_MSG_PORT_CLOSED}"),
            PostFailReason::AlreadySet => write!(f, "{ERR_MSG_ALREADY_SET}"),
        }
    }
}

/// Rejected post. Carries the token back so the caller keeps ownership.
#[derive(Debug)]
pub struct PostError<T> {
    pub value: Option<T>,
    pub reason: PostFailReason,
}

impl<T> PostError<T> {
    pub fn closed(value: Option<T>) -> Self {
        Self {
            value,
            reason: PostFailReason::Closed,
        }
    }

    pub fn already_set(value: Option<T>) -> Self {
        Self {
            value,
            reason: PostFailReason::AlreadySet,
        }
    }

    /// Take the rejected token back out of the error.
    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

impl<T> fmt::Display for PostError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl<T: fmt::Debug> Error for PostError<T> {}

/// Rejected pushback: a previous pushback has not been consumed yet.
/// Carries the token back like [`PostError`].
#[derive(Debug)]
pub struct PushbackError<T> {
    pub value: T,
}

impl<T> fmt::Display for PushbackError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ERR_MSG_DOUBLE_PUSHBACK}")
    }
}

impl<T: fmt::Debug> Error for PushbackError<T> {}

/// Permit gate protocol violations.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GateError {
    /// `release` with a negative count, or `acquire` with a non-positive one.
    InvalidPermits(i64),
    /// `acquire` asked for more permits than the gate currently holds.
    /// The count never goes negative.
    Exhausted { requested: i64, available: i64 },
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::InvalidPermits(n) => write!(f, "{ERR_MSG_BAD_PERMITS}: {n}"),
            GateError::Exhausted {
                requested,
                available,
            } => {
                write!(
                    f,
                    "{ERR_MSG_GATE_EXHAUSTED}: requested {requested}, available {available}"
                )
            }
        }
    }
}

impl Error for GateError {}
