//! Tagged result of a guarded block.

use crate::Cancelled;

/// How the guarded block finished, as seen at scope exit.
///
/// The scope's exit decision is a function of this tag and whether the scope
/// itself fired. See [`DeadlineScope::exit`](crate::DeadlineScope::exit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// The block produced a value.
    Success(T),
    /// The block was cancelled at a suspension point.
    Cancelled(Cancelled),
    /// The block failed on its own.
    Failed(E),
}

impl<T, E> Outcome<T, E> {
    /// Tag a result without looking for cancellations: `Err` is always
    /// [`Outcome::Failed`].
    #[inline]
    pub fn from_result(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(e) => Self::Failed(e),
        }
    }

    /// Returns `true` for [`Outcome::Cancelled`].
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns `true` for [`Outcome::Success`].
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Error types that can carry a cancellation.
///
/// Implement this for the guarded block's error type so that
/// `Outcome::from(result)` can tell a cancellation apart from a real failure.
///
/// ```rust
/// use timebox::{CancelKind, Cancelled, Outcome};
///
/// #[derive(Debug)]
/// enum FetchError {
///     Cancelled,
///     NotFound,
/// }
///
/// impl From<Cancelled> for FetchError {
///     fn from(_: Cancelled) -> Self { FetchError::Cancelled }
/// }
///
/// impl CancelKind for FetchError {
///     fn is_cancellation(&self) -> bool {
///         matches!(self, FetchError::Cancelled)
///     }
/// }
///
/// let outcome: Outcome<(), FetchError> = Err(FetchError::Cancelled).into();
/// assert!(outcome.is_cancelled());
///
/// let outcome: Outcome<(), FetchError> = Err(FetchError::NotFound).into();
/// assert!(matches!(outcome, Outcome::Failed(FetchError::NotFound)));
/// ```
pub trait CancelKind {
    /// Returns `true` if this error is a cancellation.
    fn is_cancellation(&self) -> bool;
}

impl CancelKind for Cancelled {
    #[inline]
    fn is_cancellation(&self) -> bool {
        true
    }
}

impl<T, E: CancelKind> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(e) if e.is_cancellation() => Self::Cancelled(Cancelled),
            Err(e) => Self::Failed(e),
        }
    }
}
