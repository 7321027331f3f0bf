//! Hot sources shared by many observers.
//!
//! `emitter_receiver` splits a subject in two. The emitter is an `Observer`,
//! so it can also be handed to another observable's `subscribe`. The receiver
//! is `Subscribeable` and converts into an `Observable` for operator chains.
//!
//! `Subject` forwards live values only. `ReplaySubject` additionally keeps a
//! bounded history that new subscribers receive before live values.
//!
//! Delivery never happens while the subject's internal lock is held, so an observer
//! may subscribe or unsubscribe from inside its own callbacks. Emitting into the
//! same subject from inside one of its observers is a re-entrancy hazard and is not
//! supported.

mod registry;
mod replay_subject;
mod subject;

pub use replay_subject::*;
pub use subject::*;
