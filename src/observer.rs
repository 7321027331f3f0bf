use crate::errors::SharedError;

/// Sink side of a reactive sequence.
///
/// An observer receives any number of `next` calls followed by at most one
/// terminal call, either `error` or `complete`.
pub trait Observer {
    type NextFnType;

    fn next(&mut self, _: Self::NextFnType);
    fn complete(&mut self);
    fn error(&mut self, _: SharedError);
}
