//! Failure types produced by deadline scopes.
//!
//! - [`ScopeError`] - misuse of the scope lifecycle (wrong state, no task)
//! - [`Cancelled`] - the cancellation failure a guarded block reports
//! - [`Elapsed`] - the scope's own timeout failure
//! - [`Error`] - everything [`DeadlineScope::exit`](crate::DeadlineScope::exit)
//!   can return, including the guarded block's own failure

use core::convert::Infallible;
use core::fmt;
use std::error::Error as StdError;
use std::time::Instant;

use thiserror::Error;

use crate::ScopeState;

/// A lifecycle error: the operation is not valid right now.
///
/// These are programmer errors. They are always surfaced and never retried,
/// and the scope's observable state is unchanged when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum ScopeError {
    /// The operation requires a different lifecycle state.
    #[error("cannot {op} a deadline scope that is {state}")]
    InvalidState {
        /// Name of the rejected operation.
        op: &'static str,
        /// State the scope was in.
        state: ScopeState,
    },

    /// A deadline was set but the scope was entered outside any task, so
    /// there is nothing it could cancel.
    #[error("deadline scope must be entered from inside a task")]
    NoCurrentTask,
}

impl ScopeError {
    #[inline]
    pub(crate) fn invalid_state(op: &'static str, state: ScopeState) -> Self {
        Self::InvalidState { op, state }
    }

    /// Returns `true` if this is an invalid-state error.
    #[inline]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

/// The guarded block was cancelled at a suspension point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Error)]
#[error("task was cancelled")]
pub struct Cancelled;

/// The scope's deadline passed and the scope cancelled the guarded block.
///
/// When the cancellation was observed by the guarded block, it is kept as
/// the [`source`](std::error::Error::source) of this error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline elapsed")]
pub struct Elapsed {
    deadline: Instant,
    #[source]
    cause: Option<Cancelled>,
}

impl Elapsed {
    #[inline]
    pub(crate) fn new(deadline: Instant, cause: Option<Cancelled>) -> Self {
        Self { deadline, cause }
    }

    /// The deadline that fired.
    #[inline]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The cancellation this timeout replaced, if the guarded block saw it.
    #[inline]
    pub fn cause(&self) -> Option<&Cancelled> {
        self.cause.as_ref()
    }
}

/// Everything a scope exit can fail with.
///
/// `E` is the guarded block's own failure type. It is passed through
/// untouched in [`Error::Failed`], even when `E` is itself a timeout.
#[derive(Debug)]
pub enum Error<E = Infallible> {
    /// The scope was used in the wrong lifecycle state.
    Scope(ScopeError),
    /// The scope's deadline fired.
    Elapsed(Elapsed),
    /// The guarded block was cancelled by someone other than this scope.
    Cancelled(Cancelled),
    /// The guarded block failed on its own.
    Failed(E),
}

impl<E> Error<E> {
    /// Returns `true` if the scope timed out.
    #[inline]
    pub fn is_elapsed(&self) -> bool {
        matches!(self, Self::Elapsed(_))
    }

    /// Returns `true` if an unrelated cancellation passed through the scope.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the guarded block's own failure, if that is what this is.
    #[inline]
    pub fn into_failed(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the guarded block's failure type.
    pub fn map_failed<F>(self, f: impl FnOnce(E) -> F) -> Error<F> {
        match self {
            Self::Scope(e) => Error::Scope(e),
            Self::Elapsed(e) => Error::Elapsed(e),
            Self::Cancelled(e) => Error::Cancelled(e),
            Self::Failed(e) => Error::Failed(f(e)),
        }
    }
}

impl<E> From<ScopeError> for Error<E> {
    fn from(e: ScopeError) -> Self {
        Self::Scope(e)
    }
}

impl<E> From<Elapsed> for Error<E> {
    fn from(e: Elapsed) -> Self {
        Self::Elapsed(e)
    }
}

impl<E> From<Cancelled> for Error<E> {
    fn from(e: Cancelled) -> Self {
        Self::Cancelled(e)
    }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scope(e) => e.fmt(f),
            Self::Elapsed(e) => e.fmt(f),
            Self::Cancelled(e) => e.fmt(f),
            Self::Failed(e) => e.fmt(f),
        }
    }
}

impl<E: StdError + 'static> StdError for Error<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Scope(_) | Self::Cancelled(_) => None,
            Self::Elapsed(e) => e.source(),
            // transparent
            Self::Failed(e) => e.source(),
        }
    }
}
