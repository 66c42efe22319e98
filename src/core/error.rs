use std::fmt;

use crate::transport::RtError;

/// Public status codes reported alongside every error.
pub mod codes {
    pub const SUCCESS: i32 = 0;
    pub const INVALID_PARAM: i32 = 100_000;
    pub const BAD_ALLOC: i32 = 200_000;
    pub const FEATURE_UNSUPPORTED: i32 = 200_006;
    pub const QUEUE_EMPTY: i32 = 207_013;
    pub const QUEUE_FULL: i32 = 207_014;
    pub const INTERNAL_ERROR: i32 = 500_000;
    pub const FAILURE: i32 = 500_003;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A required argument was missing, out of range or inconsistent.
    InvalidParam { param: &'static str, reason: String },
    /// The queue stayed full for the whole timeout.
    QueueFull { qid: u32 },
    /// The queue stayed empty for the whole timeout.
    QueueEmpty { qid: u32 },
    /// The operation has no meaning in the resolved environment.
    Unsupported { feature: &'static str },
    /// A transport primitive failed; `code` is passed through unchanged.
    Transport { api: &'static str, code: i32 },
    /// The broker answered with a non-zero status.
    Broker { op: &'static str, code: i32 },
    /// Destroy was refused because routes still reference the queue.
    RoutesStillBound { qid: u32, routes: usize },
    BadAlloc { what: &'static str },
    /// A precondition outside the caller's arguments did not hold.
    Failure(String),
    Internal(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

impl QueueError {
    pub fn invalid(param: &'static str, reason: impl Into<String>) -> Self {
        QueueError::InvalidParam {
            param,
            reason: reason.into(),
        }
    }

    pub fn transport(api: &'static str, err: RtError) -> Self {
        QueueError::Transport {
            api,
            code: err.code(),
        }
    }

    /// Maps a raw transport status, keeping full/empty distinguishable.
    pub fn from_rt(api: &'static str, qid: u32, err: RtError) -> Self {
        match err {
            RtError::QUEUE_FULL => QueueError::QueueFull { qid },
            RtError::QUEUE_EMPTY => QueueError::QueueEmpty { qid },
            other => QueueError::transport(api, other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            QueueError::InvalidParam { .. } => codes::INVALID_PARAM,
            QueueError::QueueFull { .. } => codes::QUEUE_FULL,
            QueueError::QueueEmpty { .. } => codes::QUEUE_EMPTY,
            QueueError::Unsupported { .. } => codes::FEATURE_UNSUPPORTED,
            QueueError::Transport { code, .. } => *code,
            QueueError::Broker { .. } => codes::FAILURE,
            QueueError::RoutesStillBound { .. } => codes::FAILURE,
            QueueError::BadAlloc { .. } => codes::BAD_ALLOC,
            QueueError::Failure(_) => codes::FAILURE,
            QueueError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Only full/empty outcomes may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::QueueFull { .. } | QueueError::QueueEmpty { .. })
    }
}

impl std::error::Error for QueueError {}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::InvalidParam { param, reason } => {
                write!(f, "Invalid parameter '{param}': {reason}")
            }
            QueueError::QueueFull { qid } => write!(f, "Queue {qid} is full"),
            QueueError::QueueEmpty { qid } => write!(f, "Queue {qid} is empty"),
            QueueError::Unsupported { feature } => {
                write!(f, "{feature} is not supported in this environment")
            }
            QueueError::Transport { api, code } => write!(f, "{api} failed with code {code}"),
            QueueError::Broker { op, code } => {
                write!(f, "Broker rejected {op} with status {code}")
            }
            QueueError::RoutesStillBound { qid, routes } => write!(
                f,
                "Queue {qid} still has {routes} bound route(s); unbind before destroying"
            ),
            QueueError::BadAlloc { what } => write!(f, "Failed to allocate {what}"),
            QueueError::Failure(msg) => write!(f, "Operation failed: {msg}"),
            QueueError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}
