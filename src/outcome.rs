//! Per-item outcomes delivered by a mapper.

use crate::Error;

/// The result of one worker invocation, delivered in completion order.
///
/// A failed invocation is tagged rather than dropped: the consumer can tell
/// "this item produced no value because it failed" apart from "this item is
/// still pending", and the original input is preserved for inspection or
/// retry. One failed item never terminates the overall sequence.
#[derive(Debug)]
pub enum Outcome<I, T> {
    /// The worker completed and produced a value.
    Success(T),
    /// The worker returned an error or panicked.
    Failed {
        /// The input item that failed.
        item: I,
        /// What went wrong.
        error: Error,
    },
}

impl<I, T> Outcome<I, T> {
    /// Returns `true` if the worker produced a value.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Returns `true` if the worker failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    /// Consume the outcome, returning the value if the worker succeeded.
    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Failed { .. } => None,
        }
    }

    /// Consume the outcome, returning the failed item and its error.
    pub fn failure(self) -> Option<(I, Error)> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failed { item, error } => Some((item, error)),
        }
    }

    /// Convert into a plain `Result`, discarding the failed item.
    pub fn into_result(self) -> crate::Result<T> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failed { error, .. } => Err(error),
        }
    }
}
