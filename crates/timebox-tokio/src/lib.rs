//! # timebox-tokio
//!
//! Run [`timebox`] deadline scopes on tokio.
//!
//! ## When to Use
//!
//! Use this crate when a span of async work needs a deadline that can be
//! moved or dropped while the work runs, and when the caller must be able to
//! tell "my deadline fired" apart from "someone else cancelled me".
//!
//! ## Quick Reference
//!
//! ```rust
//! use std::time::Duration;
//! use timebox_tokio::{deadline_after, run, timeout};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // One-shot timeout
//! let res = timeout(Some(Duration::from_secs(5)), async {
//!     Ok::<_, std::io::Error>("done")
//! })
//! .await;
//! assert_eq!(res.unwrap(), "done");
//!
//! // A scope the guarded block can reschedule
//! let scope = deadline_after(Some(Duration::from_millis(10)));
//! let inner = scope.clone();
//! let res = run(&scope, async move {
//!     inner.reject()?; // no deadline any more
//!     tokio::time::sleep(Duration::from_millis(20)).await;
//!     Ok::<_, timebox::ScopeError>(())
//! })
//! .await;
//! assert!(res.is_ok());
//! assert!(!scope.is_expired());
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use core::convert::Infallible;
use std::future::Future;
use std::time::{Duration, Instant};

use timebox::{Cancelled, DeadlineScope, Error, Outcome};
use tracing::debug;

mod scheduler;
mod task;

pub use scheduler::TokioScheduler;
pub use task::{CancellableTask, TaskToken, spawn};

// Re-export core types for convenience
pub use timebox::{Elapsed, ScopeError, ScopeState};

/// A deadline scope bound to tokio.
pub type TokioDeadlineScope = DeadlineScope<TokioScheduler>;

/// Create a scope whose deadline is `delay` from now. `None` disables it.
#[inline]
pub fn deadline_after(delay: Option<Duration>) -> TokioDeadlineScope {
    DeadlineScope::after(TokioScheduler, delay)
}

/// Create a scope with an absolute deadline. `None` disables it.
///
/// Convert a `tokio::time::Instant` with
/// [`into_std`](tokio::time::Instant::into_std).
#[inline]
pub fn deadline_at(deadline: Option<Instant>) -> TokioDeadlineScope {
    DeadlineScope::at(TokioScheduler, deadline)
}

/// Run `future` as the guarded block of `scope`.
///
/// Enters the scope, drives the future until it finishes or its task is
/// cancelled, then exits the scope with the matching [`Outcome`]. See
/// [`DeadlineScope::exit`] for how the result is decided.
///
/// If the returned future is dropped before it completes, the scope is still
/// exited and its deadline disarmed.
///
/// # Errors
///
/// - [`Error::Elapsed`] if the scope's deadline cancelled the block
/// - [`Error::Cancelled`] if an enclosing task was cancelled
/// - [`Error::Failed`] with the block's own error
/// - [`Error::Scope`] if the scope was already entered
pub async fn run<F, T, E>(scope: &TokioDeadlineScope, future: F) -> Result<T, Error<E>>
where
    F: Future<Output = Result<T, E>>,
{
    let token = match TaskToken::current() {
        Some(parent) => parent.child(),
        None => TaskToken::new(),
    };
    let guarded = token.clone();

    token
        .install(async move {
            scope.enter()?;
            let exit = ExitGuard::new(scope);

            let outcome = tokio::select! {
                biased;
                () = guarded.cancelled() => Outcome::Cancelled(Cancelled),
                result = future => Outcome::from_result(result),
            };

            exit.disarm();
            scope.exit(outcome)
        })
        .await
}

/// Run `future` with a deadline `delay` from now. `None` means no deadline.
///
/// # Errors
///
/// See [`run`].
pub async fn timeout<F, T, E>(delay: Option<Duration>, future: F) -> Result<T, Error<E>>
where
    F: Future<Output = Result<T, E>>,
{
    run(&deadline_after(delay), future).await
}

/// Run `future` with an absolute deadline. `None` means no deadline.
///
/// # Errors
///
/// See [`run`].
pub async fn timeout_at<F, T, E>(deadline: Option<Instant>, future: F) -> Result<T, Error<E>>
where
    F: Future<Output = Result<T, E>>,
{
    run(&deadline_at(deadline), future).await
}

/// Exits the scope if [`run`] is dropped with the block still in flight.
struct ExitGuard<'a> {
    scope: Option<&'a TokioDeadlineScope>,
}

impl<'a> ExitGuard<'a> {
    #[inline]
    fn new(scope: &'a TokioDeadlineScope) -> Self {
        Self { scope: Some(scope) }
    }

    #[inline]
    fn disarm(mut self) {
        self.scope = None;
    }
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take() {
            debug!("guarded block dropped in flight, exiting scope");
            let _ = scope.exit::<(), Infallible>(Outcome::Cancelled(Cancelled));
        }
    }
}
