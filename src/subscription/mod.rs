//! Observers built from closures and the handles that release them.
//!
//! `subscribe` holds `Subscriber`, `Subscription` and the teardown and join
//! handle enums producers return. `serial` holds the replaceable slot used by
//! the switching and retrying operators.
pub(crate) mod serial;
pub mod subscribe;
