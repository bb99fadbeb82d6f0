//! Cancellable task identity for the tokio binding.
//!
//! Tokio cannot inject a cancellation into an arbitrary running task, so the
//! binding gives every guarded block its own [`TaskToken`], installed in a
//! task-local while the block runs. Cancelling the token wakes the block at
//! its current suspension point. Tokens form a tree: an inner block's token
//! is a child of the enclosing one, so cancelling an outer task reaches every
//! scope inside it, while an inner scope's expiry stays inside.

use std::future::Future;

use timebox::Cancelled;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

tokio::task_local! {
    static CURRENT: TaskToken;
}

/// The cancellable identity of a task or guarded block.
///
/// Wraps a tokio-util [`CancellationToken`].
///
/// # Example
///
/// ```rust
/// use timebox_tokio::TaskToken;
///
/// let parent = TaskToken::new();
/// let child = parent.child();
///
/// parent.cancel();
/// assert!(child.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct TaskToken {
    token: CancellationToken,
}

impl TaskToken {
    /// Create a root token.
    #[inline]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// The token of the innermost guarded block or [`spawn`]ed task being
    /// polled right now.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Get the underlying CancellationToken.
    #[inline]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Unwrap into the underlying CancellationToken.
    #[inline]
    pub fn into_token(self) -> CancellationToken {
        self.token
    }

    /// Create a child token that is cancelled when this one is.
    #[inline]
    pub fn child(&self) -> Self {
        Self::new_from(self.token.child_token())
    }

    /// Request cancellation.
    #[inline]
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for cancellation.
    #[inline]
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Run `future` with this token as the current one.
    pub(crate) async fn install<F: Future>(self, future: F) -> F::Output {
        CURRENT.scope(self, future).await
    }

    #[inline]
    fn new_from(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl From<CancellationToken> for TaskToken {
    fn from(token: CancellationToken) -> Self {
        Self::new_from(token)
    }
}

impl From<TaskToken> for CancellationToken {
    fn from(task: TaskToken) -> Self {
        task.token
    }
}

impl std::fmt::Debug for TaskToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskToken")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// A spawned task that can be cancelled from outside.
///
/// Created by [`spawn`]. Cancelling it is an unrelated cancellation from the
/// point of view of every deadline scope inside the task: they pass it
/// through as [`timebox::Error::Cancelled`] instead of reporting a timeout.
#[derive(Debug)]
pub struct CancellableTask<T> {
    handle: JoinHandle<Result<T, Cancelled>>,
    token: TaskToken,
}

impl<T> CancellableTask<T> {
    /// Request cancellation of the task.
    pub fn cancel(&self) {
        debug!("cancelling spawned task");
        self.token.cancel();
    }

    /// The task's token.
    #[inline]
    pub fn token(&self) -> &TaskToken {
        &self.token
    }

    /// Wait for the task to finish.
    ///
    /// # Errors
    ///
    /// [`Cancelled`] if the task was cancelled before it produced a value.
    ///
    /// # Panics
    ///
    /// Resumes the task's panic, if it panicked.
    pub async fn join(self) -> Result<T, Cancelled> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(Cancelled),
        }
    }
}

/// Spawn `future` as a tokio task with its own [`TaskToken`].
///
/// Deadline scopes entered inside the task derive their tokens from this
/// one. The task finishes with `Err(Cancelled)` if it is cancelled while the
/// future is waiting outside any scope; inside a scope the scope reports the
/// cancellation and the future decides what to do with it.
///
/// # Panics
///
/// Must be called from inside a tokio runtime.
pub fn spawn<F>(future: F) -> CancellableTask<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let token = TaskToken::new();
    let watch = token.clone();
    let handle = tokio::spawn(token.clone().install(async move {
        tokio::select! {
            biased;
            out = future => Ok(out),
            () = watch.cancelled() => Err(Cancelled),
        }
    }));
    CancellableTask { handle, token }
}
