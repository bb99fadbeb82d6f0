//! The deadline scope.
//!
//! [`DeadlineScope`] wraps a span of suspending work with a deadline. It is
//! used as a scoped resource: [`enter`](DeadlineScope::enter) before the
//! guarded block, [`exit`](DeadlineScope::exit) with the block's
//! [`Outcome`] after it.
//!
//! # Lifecycle
//!
//! ```text
//! Created --enter--> Active --exit--> Exited
//! ```
//!
//! While `Active` with a deadline, a callback is armed on the scheduler. If it
//! fires, the scope latches [`is_expired`](DeadlineScope::is_expired) and asks
//! the scheduler to cancel the task that entered the scope. The timeout
//! failure itself is produced later, by `exit`.
//!
//! # Example
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
//! let scope = DeadlineScope::after(sched.clone(), Some(Duration::from_millis(100)));
//! scope.enter().unwrap();
//!
//! // The guarded block suspends for ten seconds and gets cancelled.
//! let block = sched.sleep(task, Duration::from_secs(10));
//! let result = scope.exit(Outcome::from(block));
//!
//! assert!(result.unwrap_err().is_elapsed());
//! assert!(scope.is_expired());
//! ```

use core::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{Callback, Elapsed, Error, Outcome, Scheduler, ScopeError};

/// Lifecycle stage of a [`DeadlineScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeState {
    /// Constructed, not entered yet.
    Created,
    /// Entered; the guarded block is running.
    Active,
    /// Exited; the scope is inert and can only be inspected.
    Exited,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// A scheduled on-fire callback owned by the scope.
struct Armed<T> {
    timer: T,
    generation: u64,
    deadline: Instant,
}

struct Inner<S: Scheduler> {
    state: ScopeState,
    deadline: Option<Instant>,
    armed: Option<Armed<S::Timer>>,
    task: Option<S::Task>,
    /// Deadline that fired. Latched once, never cleared.
    fired: Option<Instant>,
    /// Receipt of the cancellation request the fire issued.
    request: Option<S::Request>,
    generation: u64,
}

struct Shared<S: Scheduler> {
    scheduler: S,
    inner: Mutex<Inner<S>>,
}

impl<S: Scheduler> Drop for Shared<S> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state == ScopeState::Active {
            warn!(deadline = ?inner.deadline, "deadline scope dropped while active");
        }
        if let Some(armed) = inner.armed.take() {
            self.scheduler.cancel_timer(armed.timer);
        }
    }
}

/// A reschedulable deadline around a span of suspending work.
///
/// Clones share the same scope, so the guarded block can keep a clone and
/// [`reschedule`](Self::reschedule), [`shift`](Self::shift) or
/// [`reject`](Self::reject) from the inside.
///
/// See the [module docs](self) for the lifecycle.
pub struct DeadlineScope<S: Scheduler> {
    shared: Arc<Shared<S>>,
}

impl<S: Scheduler> Clone for DeadlineScope<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Scheduler> DeadlineScope<S> {
    /// Create a scope whose deadline is `delay` from now.
    ///
    /// `None` creates a pass-through scope with no deadline. A zero delay
    /// still creates a real deadline: it fires on the first turn after
    /// entry. A delay too large to represent is treated as no deadline.
    pub fn after(scheduler: S, delay: Option<Duration>) -> Self {
        let deadline = delay.and_then(|d| scheduler.now().checked_add(d));
        Self::at(scheduler, deadline)
    }

    /// Create a scope with an absolute deadline. `None` disables the timer.
    pub fn at(scheduler: S, deadline: Option<Instant>) -> Self {
        Self {
            shared: Arc::new(Shared {
                scheduler,
                inner: Mutex::new(Inner {
                    state: ScopeState::Created,
                    deadline,
                    armed: None,
                    task: None,
                    fired: None,
                    request: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// The scheduler this scope runs on.
    #[inline]
    pub fn scheduler(&self) -> &S {
        &self.shared.scheduler
    }

    /// Enter the scope from the current task and arm the deadline.
    ///
    /// A deadline that has already passed is not fired here: the
    /// cancellation is deferred to the next scheduler turn, so a block that
    /// never suspends is unaffected.
    ///
    /// # Errors
    ///
    /// - [`ScopeError::InvalidState`] unless the scope is `Created`.
    /// - [`ScopeError::NoCurrentTask`] if a deadline is set and there is no
    ///   current task to cancel.
    pub fn enter(&self) -> Result<(), ScopeError> {
        let mut inner = self.shared.inner.lock();
        if inner.state != ScopeState::Created {
            return Err(ScopeError::invalid_state("enter", inner.state));
        }

        let task = self.shared.scheduler.current_task();
        if task.is_none() && inner.deadline.is_some() {
            return Err(ScopeError::NoCurrentTask);
        }

        inner.task = task;
        inner.state = ScopeState::Active;
        debug!(deadline = ?inner.deadline, "entered deadline scope");

        if let Some(deadline) = inner.deadline {
            self.arm(&mut inner, deadline);
        }
        Ok(())
    }

    /// Leave the scope, disarm the deadline and reconcile the outcome.
    ///
    /// | outcome       | scope fired | result                    |
    /// |---------------|-------------|---------------------------|
    /// | `Success(v)`  | no          | `Ok(v)`                   |
    /// | `Success(_)`  | yes         | `Err(Error::Elapsed)`     |
    /// | `Cancelled`   | yes         | `Err(Error::Elapsed)`     |
    /// | `Cancelled`   | no          | `Err(Error::Cancelled)`   |
    /// | `Failed(e)`   | either      | `Err(Error::Failed(e))`   |
    ///
    /// A cancellation the scope did not cause passes through unchanged, and
    /// so does the block's own failure even when it is itself a timeout.
    ///
    /// If the scope fired, its own cancellation request is withdrawn from
    /// the task when the block never observed it, whatever the outcome. This
    /// is what happens when the deadline fires in the same turn the block
    /// finishes. Requests issued by anyone else stay pending on the task.
    ///
    /// # Errors
    ///
    /// [`ScopeError::InvalidState`] (as [`Error::Scope`]) unless the scope is
    /// `Active`; see the table above for the rest.
    pub fn exit<T, E>(&self, outcome: Outcome<T, E>) -> Result<T, Error<E>> {
        let (fired, task, request) = {
            let mut inner = self.shared.inner.lock();
            if inner.state != ScopeState::Active {
                return Err(ScopeError::invalid_state("exit", inner.state).into());
            }
            if let Some(armed) = inner.armed.take() {
                trace!(generation = armed.generation, "disarming deadline");
                self.shared.scheduler.cancel_timer(armed.timer);
            }
            inner.state = ScopeState::Exited;
            (inner.fired, inner.task.take(), inner.request.take())
        };

        if let (Some(task), Some(request)) = (task.as_ref(), request) {
            self.shared.scheduler.uncancel_task(task, request);
        }

        let Some(deadline) = fired else {
            return match outcome {
                Outcome::Success(v) => Ok(v),
                Outcome::Cancelled(c) => {
                    debug!("cancellation from outside the scope passed through");
                    Err(Error::Cancelled(c))
                }
                Outcome::Failed(e) => Err(Error::Failed(e)),
            };
        };

        match outcome {
            Outcome::Cancelled(c) => {
                debug!(?deadline, "scope deadline cancelled the guarded block");
                Err(Elapsed::new(deadline, Some(c)).into())
            }
            Outcome::Success(_) => {
                debug!(?deadline, "deadline fired as the guarded block finished");
                Err(Elapsed::new(deadline, None).into())
            }
            Outcome::Failed(e) => Err(Error::Failed(e)),
        }
    }

    /// Move the deadline to `deadline`, or remove it with `None`.
    ///
    /// A deadline in the past fires on the next turn. Once the scope has
    /// fired, the new deadline is recorded but never re-armed.
    ///
    /// # Errors
    ///
    /// [`ScopeError::InvalidState`] unless the scope is `Active`.
    #[inline]
    pub fn reschedule(&self, deadline: Option<Instant>) -> Result<(), ScopeError> {
        self.retime("reschedule", |_, _| deadline)
    }

    /// Move the deadline to `deadline`. Same as `reschedule(Some(deadline))`.
    ///
    /// # Errors
    ///
    /// [`ScopeError::InvalidState`] unless the scope is `Active`.
    #[inline]
    pub fn update(&self, deadline: Instant) -> Result<(), ScopeError> {
        self.retime("update", |_, _| Some(deadline))
    }

    /// Push the deadline back by `delay`.
    ///
    /// Without a current deadline, sets a fresh one at `now + delay`.
    ///
    /// # Errors
    ///
    /// [`ScopeError::InvalidState`] unless the scope is `Active`.
    #[inline]
    pub fn shift(&self, delay: Duration) -> Result<(), ScopeError> {
        self.retime("shift", |current, now| {
            current.unwrap_or(now).checked_add(delay)
        })
    }

    /// Remove the deadline. The scope will not expire.
    ///
    /// # Errors
    ///
    /// [`ScopeError::InvalidState`] unless the scope is `Active`.
    #[inline]
    pub fn reject(&self) -> Result<(), ScopeError> {
        self.retime("reject", |_, _| None)
    }

    /// The current deadline, if any.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.shared.inner.lock().deadline
    }

    /// Time left until the deadline.
    ///
    /// `None` without a deadline, `Duration::ZERO` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        let deadline = self.deadline()?;
        Some(deadline.saturating_duration_since(self.shared.scheduler.now()))
    }

    /// Returns `true` if this scope's deadline fired and cancelled its task.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.shared.inner.lock().fired.is_some()
    }

    /// The scope's lifecycle stage.
    #[inline]
    pub fn state(&self) -> ScopeState {
        self.shared.inner.lock().state
    }

    fn retime(
        &self,
        op: &'static str,
        new_deadline: impl FnOnce(Option<Instant>, Instant) -> Option<Instant>,
    ) -> Result<(), ScopeError> {
        let mut inner = self.shared.inner.lock();
        if inner.state != ScopeState::Active {
            return Err(ScopeError::invalid_state(op, inner.state));
        }

        let deadline = new_deadline(inner.deadline, self.shared.scheduler.now());
        if deadline.is_some() && inner.task.is_none() {
            return Err(ScopeError::NoCurrentTask);
        }

        if let Some(armed) = inner.armed.take() {
            trace!(generation = armed.generation, op, "disarming deadline");
            self.shared.scheduler.cancel_timer(armed.timer);
        }
        inner.deadline = deadline;

        match deadline {
            Some(deadline) if inner.fired.is_none() => self.arm(&mut inner, deadline),
            Some(deadline) => debug!(?deadline, op, "scope already fired, not re-arming"),
            None => debug!(op, "deadline removed"),
        }
        Ok(())
    }

    fn arm(&self, inner: &mut Inner<S>, deadline: Instant) {
        inner.generation += 1;
        let generation = inner.generation;
        let shared = Arc::downgrade(&self.shared);
        let callback: Callback = Box::new(move || fire(&shared, generation));

        let scheduler = &self.shared.scheduler;
        let timer = if deadline <= scheduler.now() {
            debug!(?deadline, generation, "deadline already passed, cancelling on next turn");
            scheduler.call_soon(callback)
        } else {
            debug!(?deadline, generation, "armed deadline");
            scheduler.call_at(deadline, callback)
        };
        inner.armed = Some(Armed {
            timer,
            generation,
            deadline,
        });
    }
}

/// On-fire callback. Never panics and never fails.
fn fire<S: Scheduler>(shared: &Weak<Shared<S>>, generation: u64) {
    let Some(shared) = shared.upgrade() else {
        trace!(generation, "deadline fired after its scope was dropped");
        return;
    };

    let mut inner = shared.inner.lock();
    let live = inner.state == ScopeState::Active
        && inner.armed.as_ref().is_some_and(|a| a.generation == generation);
    if !live {
        trace!(generation, state = %inner.state, "stale deadline callback ignored");
        return;
    }

    let Some(armed) = inner.armed.take() else {
        return;
    };
    inner.fired = Some(armed.deadline);

    // Issued under the lock so exit observes either none or all of the fire.
    let Some(task) = inner.task.clone() else {
        return;
    };
    let request = shared.scheduler.cancel_task(&task);
    debug!(
        deadline = ?armed.deadline,
        generation,
        issued = request.is_some(),
        "deadline fired, cancelling task"
    );
    inner.request = request;
}

impl<S: Scheduler> fmt::Debug for DeadlineScope<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("DeadlineScope")
            .field("state", &inner.state)
            .field("deadline", &inner.deadline)
            .field("armed", &inner.armed.is_some())
            .field("expired", &inner.fired.is_some())
            .finish()
    }
}
