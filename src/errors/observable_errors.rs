use std::{any::Any, sync::Arc};

use thiserror::Error;

/// Error value carried by the `error` channel of every observer.
///
/// Errors are reference counted so a single failure can be fanned out to all
/// observers of a multicast source without cloning the underlying error.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors raised by the observable machinery itself.
///
/// User errors travel through the `error` channel untouched; these variants
/// are produced when the core has to report something on its own behalf.
#[derive(Debug, Error)]
pub enum ObservableError {
    /// A production procedure or a user supplied transform panicked.
    #[error("producer failed: {0}")]
    Producer(String),

    /// A signal was pushed into a subscriber that already terminated or was
    /// unsubscribed.
    #[error("`{0}` signal rejected: subscriber already terminated")]
    SignalAfterTermination(&'static str),

    /// `retry` ran out of attempts. `source` is the last error observed.
    #[error("retry gave up after {attempts} attempt(s): {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: SharedError,
    },

    /// The sequence completed without emitting any value.
    #[error("sequence contains no elements")]
    NoElements,

    /// Plain message, handy for `Observable::throw_error`.
    #[error("{0}")]
    Message(String),
}

impl ObservableError {
    /// Converts a panic payload caught with `catch_unwind` into a
    /// `Producer` error.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        ObservableError::Producer(message)
    }

    /// Wraps `self` into a `SharedError` ready to be sent downstream.
    #[must_use]
    pub fn shared(self) -> SharedError {
        Arc::new(self)
    }
}
