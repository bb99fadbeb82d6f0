//! [`Scheduler`] implementation on top of tokio.

use std::time::Instant;

use timebox::{Callback, Scheduler};
use tokio::task::AbortHandle;
use tracing::trace;

use crate::TaskToken;

/// Binds deadline scopes to the ambient tokio runtime.
///
/// - time is tokio's clock, so paused test time applies
/// - each deadline is a spawned timer task; disarming aborts it
/// - the current task is the innermost [`TaskToken`] installed by
///   [`run`](crate::run) or [`spawn`](crate::spawn)
///
/// A deadline at or before now fires when the timer task is first polled,
/// which is after the task that armed it yields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    type Timer = AbortHandle;
    type Task = TaskToken;
    type Request = ();

    #[inline]
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    /// # Panics
    ///
    /// Must be called from inside a tokio runtime.
    fn call_at(&self, when: Instant, callback: Callback) -> AbortHandle {
        let when = tokio::time::Instant::from_std(when);
        tokio::spawn(async move {
            tokio::time::sleep_until(when).await;
            callback();
        })
        .abort_handle()
    }

    fn cancel_timer(&self, timer: AbortHandle) {
        trace!("aborting deadline timer task");
        timer.abort();
    }

    fn current_task(&self) -> Option<TaskToken> {
        TaskToken::current()
    }

    // Tokens are per guarded block and die with it, so a request can never
    // outlive its scope; `uncancel_task` stays the default no-op.
    fn cancel_task(&self, task: &TaskToken) -> Option<()> {
        let fresh = !task.is_cancelled();
        task.cancel();
        fresh.then_some(())
    }
}
