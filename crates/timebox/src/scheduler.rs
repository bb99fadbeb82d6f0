//! The host scheduler capability a deadline scope depends on.

use std::time::Instant;

/// A deferred callback handed to [`Scheduler::call_at`].
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Host scheduler operations used by [`DeadlineScope`](crate::DeadlineScope).
///
/// Every scope takes its scheduler explicitly at construction. Implement
/// this trait to bind scopes to an event loop; `timebox-tokio` provides one
/// for tokio and [`ManualScheduler`](crate::manual::ManualScheduler) is a
/// virtual-clock implementation for tests.
///
/// # Contract
///
/// - [`call_at`](Self::call_at) must never run the callback before it
///   returns. A time at or before [`now`](Self::now) means "on the next
///   turn", not "right now".
/// - Callbacks run one at a time, never concurrently with another callback
///   of the same scope.
/// - [`cancel_timer`](Self::cancel_timer) on a timer that already ran is a
///   no-op.
pub trait Scheduler: Clone + Send + Sync + 'static {
    /// Handle of a scheduled callback.
    type Timer: Send + 'static;

    /// Identity of a cancellable task.
    type Task: Clone + Send + 'static;

    /// Receipt for one cancellation request, used to withdraw it.
    type Request: Send + 'static;

    /// Current time on the scheduler's monotonic clock.
    fn now(&self) -> Instant;

    /// Schedule `callback` to run at `when`.
    fn call_at(&self, when: Instant, callback: Callback) -> Self::Timer;

    /// Schedule `callback` to run on the next turn.
    #[inline]
    fn call_soon(&self, callback: Callback) -> Self::Timer {
        self.call_at(self.now(), callback)
    }

    /// Cancel a scheduled callback.
    fn cancel_timer(&self, timer: Self::Timer);

    /// The task currently executing, if any.
    fn current_task(&self) -> Option<Self::Task>;

    /// Request cancellation of `task`.
    ///
    /// The task observes the request at its next suspension point. Returns
    /// a receipt if a new request was issued, `None` if the task already
    /// had one outstanding.
    fn cancel_task(&self, task: &Self::Task) -> Option<Self::Request>;

    /// Withdraw `request` if `task` has not observed it yet.
    ///
    /// Only that request is withdrawn. A request already delivered, or one
    /// issued by anyone else, is left alone. Schedulers whose requests
    /// cannot outlive the scope that issued them may keep the default no-op.
    #[inline]
    fn uncancel_task(&self, task: &Self::Task, request: Self::Request) {
        let _ = (task, request);
    }
}
