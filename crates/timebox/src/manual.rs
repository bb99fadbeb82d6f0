//! A virtual-clock scheduler for driving deadline scopes deterministically.
//!
//! [`ManualScheduler`] never looks at the wall clock. Time moves only when
//! the caller advances it, and callbacks run only inside [`turn`], so tests
//! can place a deadline firing exactly where they want it.
//!
//! Tasks are plain ids. A cancellation request stays pending on the task
//! until the task reaches a suspension point ([`checkpoint`] or [`sleep`]),
//! which then fails with [`Cancelled`]. Pending requests are delivered one
//! per suspension point, oldest first, and each can be withdrawn on its own
//! through the [`RequestId`] it was issued under.
//!
//! [`turn`]: ManualScheduler::turn
//! [`checkpoint`]: ManualScheduler::checkpoint
//! [`sleep`]: ManualScheduler::sleep
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use timebox::manual::ManualScheduler;
//! use timebox::Scheduler;
//!
//! let sched = ManualScheduler::new();
//! let task = sched.spawn_task();
//!
//! sched.call_at(sched.now() + Duration::from_secs(1), Box::new(move || {}));
//! assert_eq!(sched.advance(Duration::from_millis(999)), 0);
//! assert_eq!(sched.advance(Duration::from_millis(1)), 1);
//!
//! sched.cancel_task(&task);
//! assert!(sched.checkpoint(task).is_err());
//! assert!(sched.checkpoint(task).is_ok());
//! ```

use core::cmp::Ordering;
use core::fmt;
use std::collections::binary_heap::PeekMut;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use crate::{Callback, Cancelled, Scheduler};

/// Identity of a task on a [`ManualScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// Handle of a callback scheduled on a [`ManualScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Receipt for one cancellation request on a [`ManualScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

struct Entry {
    when: Instant,
    id: u64,
    callback: Callback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.id == other.id
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest deadline first, then scheduling order
        other
            .when
            .cmp(&self.when)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct Requests {
    /// Undelivered requests, oldest first.
    pending: VecDeque<RequestId>,
    issued: u32,
}

struct Clock {
    origin: Instant,
    elapsed: Duration,
    timers: BinaryHeap<Entry>,
    /// Ids of timers that are scheduled and not cancelled.
    live: HashSet<u64>,
    next_timer: u64,
    current: Option<TaskId>,
    next_task: u64,
    next_request: u64,
    requests: HashMap<TaskId, Requests>,
}

impl Clock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed
    }

    fn set_now(&mut self, at: Instant) {
        let elapsed = at.saturating_duration_since(self.origin);
        if elapsed > self.elapsed {
            self.elapsed = elapsed;
        }
    }

    fn next_due(&self) -> Option<Instant> {
        // Cancelled entries stay in the heap until popped; skip them here.
        self.timers
            .iter()
            .filter(|e| self.live.contains(&e.id))
            .map(|e| e.when)
            .min()
    }
}

/// A deterministic [`Scheduler`] with a virtual clock.
///
/// Clones share the same clock, timers and tasks.
#[derive(Clone)]
pub struct ManualScheduler {
    clock: Arc<Mutex<Clock>>,
}

impl ManualScheduler {
    /// Create a scheduler whose clock starts at the current instant.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Mutex::new(Clock {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
                timers: BinaryHeap::new(),
                live: HashSet::new(),
                next_timer: 0,
                current: None,
                next_task: 0,
                next_request: 0,
                requests: HashMap::new(),
            })),
        }
    }

    /// Virtual time elapsed since the scheduler was created.
    pub fn elapsed(&self) -> Duration {
        self.clock.lock().elapsed
    }

    /// Register a new task.
    pub fn spawn_task(&self) -> TaskId {
        let mut clock = self.clock.lock();
        let id = TaskId(clock.next_task);
        clock.next_task += 1;
        clock.requests.insert(id, Requests::default());
        id
    }

    /// Set the task reported by [`Scheduler::current_task`].
    pub fn set_current(&self, task: Option<TaskId>) {
        self.clock.lock().current = task;
    }

    /// Number of scheduled callbacks that have not run or been cancelled.
    pub fn pending_timers(&self) -> usize {
        self.clock.lock().live.len()
    }

    /// Cancellation requests `task` has not observed yet.
    pub fn pending_cancellations(&self, task: TaskId) -> u32 {
        self.clock
            .lock()
            .requests
            .get(&task)
            .map_or(0, |r| r.pending.len() as u32)
    }

    /// Total cancellation requests ever issued against `task`.
    pub fn cancel_requests(&self, task: TaskId) -> u32 {
        self.clock
            .lock()
            .requests
            .get(&task)
            .map_or(0, |r| r.issued)
    }

    /// Run one scheduler turn: every callback due at the current time.
    ///
    /// Callbacks scheduled while the turn runs wait for the next turn.
    /// Returns the number of callbacks run.
    pub fn turn(&self) -> usize {
        let due: SmallVec<[Callback; 4]> = {
            let mut guard = self.clock.lock();
            let clock = &mut *guard;
            let now = clock.now();
            let mut due = SmallVec::new();
            while let Some(top) = clock.timers.peek_mut() {
                if top.when > now {
                    break;
                }
                let entry = PeekMut::pop(top);
                if clock.live.remove(&entry.id) {
                    due.push(entry.callback);
                }
            }
            due
        };

        let ran = due.len();
        for callback in due {
            callback();
        }
        if ran > 0 {
            trace!(ran, "manual scheduler turn");
        }
        ran
    }

    /// Move the clock forward by `by`, running every callback that falls due
    /// on the way, in deadline order. Returns the number of callbacks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut ran = 0;
        loop {
            let next = self.clock.lock().next_due();
            match next {
                Some(at) if at <= target => {
                    self.clock.lock().set_now(at);
                    ran += self.turn();
                }
                _ => break,
            }
        }
        self.clock.lock().set_now(target);
        ran
    }

    /// A suspension point for `task`: yield for one turn, then observe any
    /// pending cancellation request.
    ///
    /// # Errors
    ///
    /// [`Cancelled`] if a cancellation request was pending.
    pub fn checkpoint(&self, task: TaskId) -> Result<(), Cancelled> {
        self.turn();
        self.deliver(task)
    }

    /// Suspend `task` for `duration` of virtual time.
    ///
    /// Wakes early with [`Cancelled`] as soon as a cancellation request for
    /// `task` is issued while it sleeps. A zero duration still yields once.
    ///
    /// # Errors
    ///
    /// [`Cancelled`] if the task was cancelled while suspended.
    pub fn sleep(&self, task: TaskId, duration: Duration) -> Result<(), Cancelled> {
        let target = self.now() + duration;
        loop {
            self.turn();
            self.deliver(task)?;

            let next = self.clock.lock().next_due();
            match next {
                Some(at) if at <= target => self.clock.lock().set_now(at),
                _ => break,
            }
        }
        self.clock.lock().set_now(target);
        self.checkpoint(task)
    }

    fn deliver(&self, task: TaskId) -> Result<(), Cancelled> {
        let mut clock = self.clock.lock();
        match clock.requests.get_mut(&task) {
            Some(r) => match r.pending.pop_front() {
                Some(request) => {
                    trace!(?task, ?request, "task observed cancellation");
                    Err(Cancelled)
                }
                None => Ok(()),
            },
            None => Ok(()),
        }
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    type Timer = TimerId;
    type Task = TaskId;
    type Request = RequestId;

    fn now(&self) -> Instant {
        self.clock.lock().now()
    }

    fn call_at(&self, when: Instant, callback: Callback) -> TimerId {
        let mut clock = self.clock.lock();
        let id = clock.next_timer;
        clock.next_timer += 1;
        clock.live.insert(id);
        clock.timers.push(Entry { when, id, callback });
        TimerId(id)
    }

    fn cancel_timer(&self, timer: TimerId) {
        self.clock.lock().live.remove(&timer.0);
    }

    fn current_task(&self) -> Option<TaskId> {
        self.clock.lock().current
    }

    fn cancel_task(&self, task: &TaskId) -> Option<RequestId> {
        let mut clock = self.clock.lock();
        let request = RequestId(clock.next_request);
        clock.next_request += 1;
        let requests = clock.requests.entry(*task).or_default();
        requests.pending.push_back(request);
        requests.issued += 1;
        Some(request)
    }

    fn uncancel_task(&self, task: &TaskId, request: RequestId) {
        if let Some(r) = self.clock.lock().requests.get_mut(task) {
            if let Some(pos) = r.pending.iter().position(|p| *p == request) {
                r.pending.remove(pos);
                trace!(?task, ?request, "cancellation request withdrawn");
            }
        }
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clock = self.clock.lock();
        f.debug_struct("ManualScheduler")
            .field("elapsed", &clock.elapsed)
            .field("pending_timers", &clock.live.len())
            .field("current", &clock.current)
            .finish()
    }
}
