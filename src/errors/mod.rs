//! Error types shared by observables, operators and subjects.
mod observable_errors;

pub use observable_errors::*;
