//! Basic lifecycle tests: pass-through scopes, invalid states, inspection.
#![allow(unused_imports, dead_code)]

use std::time::Duration;

use timebox::manual::{ManualScheduler, TaskId};
use timebox::{Cancelled, DeadlineScope, Error, Outcome, Scheduler, ScopeError, ScopeState};

fn task_scheduler() -> (ManualScheduler, TaskId) {
    let sched = ManualScheduler::new();
    let task = sched.spawn_task();
    sched.set_current(Some(task));
    (sched, task)
}

#[derive(Debug, PartialEq)]
enum MockError {
    NotFound,
}

// ============================================================================
// No deadline
// ============================================================================

#[test]
fn no_deadline_success_passes_through() {
    let (sched, task) = task_scheduler();
    let scope = DeadlineScope::after(sched.clone(), None);
    scope.enter().unwrap();

    sched.sleep(task, Duration::from_secs(3600)).unwrap();

    let result = scope.exit::<_, MockError>(Outcome::Success("done"));
    assert_eq!(result.unwrap(), "done");
    assert!(!scope.is_expired());
}

#[test]
fn no_deadline_failure_passes_through() {
    let (sched, _) = task_scheduler();
    let scope = DeadlineScope::at(sched, None);
    scope.enter().unwrap();

    let result = scope.exit::<(), _>(Outcome::Failed(MockError::NotFound));
    assert_eq!(result.unwrap_err().into_failed(), Some(MockError::NotFound));
    assert!(!scope.is_expired());
}

#[test]
fn no_deadline_cancellation_passes_through() {
    let (sched, _) = task_scheduler();
    let scope = DeadlineScope::after(sched, None);
    scope.enter().unwrap();

    let result = scope.exit::<(), MockError>(Outcome::Cancelled(Cancelled));
    assert!(result.unwrap_err().is_cancelled());
    assert!(!scope.is_expired());
}

#[test]
fn no_deadline_schedules_nothing() {
    let (sched, task) = task_scheduler();
    let scope = DeadlineScope::after(sched.clone(), None);
    scope.enter().unwrap();
    assert_eq!(sched.pending_timers(), 0);
    scope.exit::<_, ()>(Outcome::Success(())).unwrap();
    assert_eq!(sched.cancel_requests(task), 0);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn lifecycle_states() {
    let (sched, _) = task_scheduler();
    let scope = DeadlineScope::after(sched, Some(Duration::from_secs(1)));
    assert_eq!(scope.state(), ScopeState::Created);

    scope.enter().unwrap();
    assert_eq!(scope.state(), ScopeState::Active);

    scope.exit::<_, ()>(Outcome::Success(())).unwrap();
    assert_eq!(scope.state(), ScopeState::Exited);
}

#[test]
fn exit_before_enter_fails() {
    let (sched, _) = task_scheduler();
    let scope = DeadlineScope::after(sched, Some(Duration::from_secs(1)));

    let err = scope.exit::<_, ()>(Outcome::Success(())).unwrap_err();
    assert!(matches!(
        err,
        Error::Scope(ScopeError::InvalidState {
            op: "exit",
            state: ScopeState::Created
        })
    ));
    assert_eq!(scope.state(), ScopeState::Created);
}

#[test]
fn exit_twice_fails() {
    let (sched, _) = task_scheduler();
    let scope = DeadlineScope::after(sched, None);
    scope.enter().unwrap();
    scope.exit::<_, ()>(Outcome::Success(())).unwrap();

    let err = scope.exit::<_, ()>(Outcome::Success(())).unwrap_err();
    assert!(matches!(err, Error::Scope(e) if e.is_invalid_state()));
}

#[test]
fn enter_after_exit_fails() {
    let (sched, _) = task_scheduler();
    let scope = DeadlineScope::after(sched, None);
    scope.enter().unwrap();
    scope.exit::<_, ()>(Outcome::Success(())).unwrap();

    assert!(scope.enter().unwrap_err().is_invalid_state());
}

#[test]
fn deadline_outside_task_is_runtime_error() {
    let sched = ManualScheduler::new();
    let scope = DeadlineScope::after(sched.clone(), Some(Duration::ZERO));

    assert_eq!(scope.enter(), Err(ScopeError::NoCurrentTask));
    assert_eq!(scope.state(), ScopeState::Created);

    // Entering from a task afterwards still works.
    let task = sched.spawn_task();
    sched.set_current(Some(task));
    scope.enter().unwrap();
}

// ============================================================================
// Inspection
// ============================================================================

#[test]
fn inspection_is_idempotent_after_exit() {
    let (sched, task) = task_scheduler();
    let scope = DeadlineScope::after(sched.clone(), Some(Duration::from_millis(10)));
    let deadline = scope.deadline();
    scope.enter().unwrap();

    let block = sched.sleep(task, Duration::from_secs(1));
    assert!(scope.exit(Outcome::from(block)).unwrap_err().is_elapsed());

    for _ in 0..3 {
        assert!(scope.is_expired());
        assert_eq!(scope.deadline(), deadline);
    }
}

#[test]
fn relative_deadline_is_measured_from_creation() {
    let (sched, _) = task_scheduler();
    let start = sched.now();
    let scope = DeadlineScope::after(sched, Some(Duration::from_millis(250)));
    assert_eq!(scope.deadline(), Some(start + Duration::from_millis(250)));
    assert_eq!(scope.remaining(), Some(Duration::from_millis(250)));
}

#[test]
fn remaining_saturates_at_zero() {
    let (sched, _) = task_scheduler();
    let scope = DeadlineScope::after(sched.clone(), Some(Duration::from_millis(10)));
    sched.advance(Duration::from_secs(1));
    assert_eq!(scope.remaining(), Some(Duration::ZERO));
}

#[test]
fn remaining_without_deadline_is_none() {
    let (sched, _) = task_scheduler();
    let scope = DeadlineScope::after(sched, None);
    assert_eq!(scope.remaining(), None);
}

#[test]
fn clones_share_state() {
    let (sched, _) = task_scheduler();
    let scope = DeadlineScope::after(sched, Some(Duration::from_secs(1)));
    let other = scope.clone();

    scope.enter().unwrap();
    assert_eq!(other.state(), ScopeState::Active);

    other.reject().unwrap();
    assert_eq!(scope.deadline(), None);
    assert_eq!(scope.scheduler().pending_timers(), 0);
}

#[test]
fn scope_reports_its_scheduler() {
    let (sched, task) = task_scheduler();
    let scope = DeadlineScope::after(sched.clone(), Some(Duration::from_secs(1)));
    scope.enter().unwrap();
    assert_eq!(scope.scheduler().pending_timers(), 1);
    assert_eq!(scope.scheduler().current_task(), Some(task));
}

#[test]
fn outcome_tags_block_results() {
    let (sched, task) = task_scheduler();
    let finished = Outcome::from(sched.sleep(task, Duration::from_millis(5)));
    assert!(finished.is_success());

    sched.cancel_task(&task);
    let cancelled = Outcome::from(sched.checkpoint(task));
    assert!(cancelled.is_cancelled());
    assert!(!cancelled.is_success());

    let failed: Outcome<(), MockError> = Outcome::from_result(Err(MockError::NotFound));
    assert!(!failed.is_success());
}
