//! Push-based reactive streams.
//!
//! `rxcore` delivers sequences of values from producers to observers. It covers
//! cold observables, hot multicast sources with bounded replay, and the error
//! recovery operators `catch`, `retry` and `retry_when`.
//!
//! - An [`Observable`] is a cold, restartable source: every subscription runs its
//!   production procedure again.
//! - A [`Subscriber`](subscribe::Subscriber) receives `next` values followed by at
//!   most one terminal signal, `error` or `complete`.
//! - A [`Subscription`](subscribe::Subscription) releases a delivery channel. The
//!   teardown returned by the producer runs exactly once, on release or on the
//!   first terminal signal.
//! - Subjects ([`Subject`], [`ReplaySubject`]) and [`Connectable`] observables are
//!   hot: one production is shared by every subscriber.
//! - Time based sources take an explicit [`scheduler`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rxcore::{Observable, ObservableError, ObservableExt, Subscribeable};
//!
//! Observable::range(0, 4)
//!     .map(|i| {
//!         if i == 2 {
//!             panic!("i is 2");
//!         }
//!         i
//!     })
//!     .catch(|_| Observable::from_iter(vec![9, 10]))
//!     .subscribe_with(
//!         |v| println!("{}", v),          // 0, 1, 9, 10
//!         |e| eprintln!("error: {}", e),
//!         || println!("completed"),
//!     );
//!
//! let exhausted = Observable::<i64>::throw_error(Arc::new(ObservableError::Message(
//!     "always fails".to_string(),
//! )))
//! .retry(3);
//! exhausted.subscribe_with(|_| (), |e| eprintln!("{}", e), || ());
//! ```
//!
//! # Concurrency
//!
//! Producers may emit from any thread; observer callbacks run on the producer's
//! thread. Calls into one subscriber are not serialized by the crate, so a
//! producer must not call the same subscriber from several threads at once.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod errors;
mod observable;
mod observer;
pub mod scheduler;
pub mod subjects;
mod subscription;

pub use errors::{ObservableError, SharedError};
pub use observable::multicast::Connectable;
pub use observable::*;
pub use observer::Observer;
pub use subjects::{BufSize, ReplaySubject, Subject};
pub use subscription::*;

pub use subscribe::{Subscribeable, Unsubscribeable};

/// Locks `m`, recovering the guard when a panicking observer poisoned it.
pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
