//! # timebox
//!
//! Reschedulable deadline scopes for cooperatively scheduled tasks.
//!
//! A [`DeadlineScope`] wraps a span of suspending work with a deadline. If the
//! work is still running when the deadline passes, the scope cancels the task
//! that entered it, and on exit turns that cancellation into an [`Elapsed`]
//! error. Cancellations and failures the scope did not cause pass through
//! unchanged.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use timebox::manual::ManualScheduler;
//! use timebox::{DeadlineScope, Outcome};
//!
//! let sched = ManualScheduler::new();
//! let task = sched.spawn_task();
//! sched.set_current(Some(task));
//!
//! let scope = DeadlineScope::after(sched.clone(), Some(Duration::from_secs(10)));
//! scope.enter().unwrap();
//!
//! // Finishes well before the deadline.
//! let block = sched.sleep(task, Duration::from_millis(100)).map(|()| "done");
//! assert_eq!(scope.exit(Outcome::from(block)).unwrap(), "done");
//! assert!(!scope.is_expired());
//! ```
//!
//! ## Rescheduling
//!
//! While the scope is active, a clone of it can move the deadline:
//!
//! - [`reschedule`](DeadlineScope::reschedule) / [`update`](DeadlineScope::update) -
//!   set a new absolute deadline
//! - [`shift`](DeadlineScope::shift) - push the deadline back
//! - [`reject`](DeadlineScope::reject) - remove it
//!
//! ## Schedulers
//!
//! Scopes do not reach for a global event loop. Each one takes a
//! [`Scheduler`] at construction. The `timebox-tokio` crate binds scopes to
//! tokio; [`manual::ManualScheduler`] is a deterministic virtual clock.
//!
//! ## Feature Flags
//!
//! - **`manual`** (default) - the [`manual`] virtual-clock scheduler

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod outcome;
mod scheduler;
mod scope;

#[cfg(feature = "manual")]
pub mod manual;

pub use error::{Cancelled, Elapsed, Error, ScopeError};
pub use outcome::{CancelKind, Outcome};
pub use scheduler::{Callback, Scheduler};
pub use scope::{DeadlineScope, ScopeState};
