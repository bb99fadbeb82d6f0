//! Moving, removing and inspecting deadlines while a scope is active.
#![allow(unused_imports, dead_code)]

use std::time::Duration;

use timebox::manual::{ManualScheduler, TaskId};
use timebox::{DeadlineScope, Error, Outcome, Scheduler, ScopeError, ScopeState};

fn task_scheduler() -> (ManualScheduler, TaskId) {
    let sched = ManualScheduler::new();
    let task = sched.spawn_task();
    sched.set_current(Some(task));
    (sched, task)
}

fn active_scope(sched: &ManualScheduler, delay: Option<Duration>) -> DeadlineScope<ManualScheduler> {
    let scope = DeadlineScope::after(sched.clone(), delay);
    scope.enter().unwrap();
    scope
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ============================================================================
// Reschedule law
// ============================================================================

#[test]
fn reschedule_sets_exact_deadline() {
    let (sched, _) = task_scheduler();
    let scope = active_scope(&sched, Some(ms(100)));

    let target = sched.now() + ms(700);
    scope.reschedule(Some(target)).unwrap();
    assert_eq!(scope.deadline(), Some(target));

    scope.reschedule(None).unwrap();
    assert_eq!(scope.deadline(), None);
    assert_eq!(sched.pending_timers(), 0);
}

#[test]
fn rescheduled_deadline_replaces_the_old_one() {
    let (sched, task) = task_scheduler();
    let scope = active_scope(&sched, Some(ms(100)));
    scope.reschedule(Some(sched.now() + ms(300))).unwrap();
    assert_eq!(sched.pending_timers(), 1);

    // The original deadline passes without effect.
    sched.sleep(task, ms(200)).unwrap();
    assert!(!scope.is_expired());

    let block = sched.sleep(task, ms(500));
    assert!(scope.exit(Outcome::from(block)).unwrap_err().is_elapsed());
    assert_eq!(sched.elapsed(), ms(300));
}

#[test]
fn earlier_deadline_fires_earlier() {
    let (sched, task) = task_scheduler();
    let scope = active_scope(&sched, Some(ms(1000)));
    scope.reschedule(Some(sched.now() + ms(10))).unwrap();

    let block = sched.sleep(task, ms(500));
    assert!(scope.exit(Outcome::from(block)).unwrap_err().is_elapsed());
    assert_eq!(sched.elapsed(), ms(10));
}

#[test]
fn update_is_reschedule_with_a_deadline() {
    let (sched, _) = task_scheduler();
    let scope = active_scope(&sched, None);

    let target = sched.now() + ms(40);
    scope.update(target).unwrap();
    assert_eq!(scope.deadline(), Some(target));
    assert_eq!(sched.pending_timers(), 1);
}

#[test]
fn shift_pushes_the_deadline_back() {
    let (sched, task) = task_scheduler();
    let scope = active_scope(&sched, Some(ms(100)));
    let before = scope.deadline().unwrap();

    sched.sleep(task, ms(60)).unwrap();
    scope.shift(ms(100)).unwrap();
    assert_eq!(scope.deadline(), Some(before + ms(100)));

    let block = sched.sleep(task, ms(500));
    assert!(scope.exit(Outcome::from(block)).unwrap_err().is_elapsed());
    assert_eq!(sched.elapsed(), ms(200));
}

#[test]
fn shift_without_deadline_starts_from_now() {
    let (sched, task) = task_scheduler();
    let scope = active_scope(&sched, None);

    sched.sleep(task, ms(30)).unwrap();
    scope.shift(ms(20)).unwrap();
    assert_eq!(scope.deadline(), Some(sched.now() + ms(20)));
}

#[test]
fn shift_overflow_removes_the_deadline() {
    let (sched, _) = task_scheduler();
    let scope = active_scope(&sched, Some(ms(10)));

    scope.shift(Duration::MAX).unwrap();
    assert_eq!(scope.deadline(), None);
    assert_eq!(sched.pending_timers(), 0);
}

#[test]
fn reject_clears_the_deadline() {
    let (sched, task) = task_scheduler();
    let scope = active_scope(&sched, Some(ms(10)));
    scope.reject().unwrap();
    assert_eq!(scope.deadline(), None);
    assert_eq!(scope.remaining(), None);

    let block = sched.sleep(task, ms(100));
    scope.exit(Outcome::from(block)).unwrap();
    assert!(!scope.is_expired());
    assert_eq!(sched.cancel_requests(task), 0);
}

// ============================================================================
// Deadlines in the past
// ============================================================================

#[test]
fn past_deadline_fires_on_next_turn() {
    let (sched, task) = task_scheduler();
    let scope = active_scope(&sched, Some(ms(100)));

    sched.sleep(task, ms(50)).unwrap();
    scope.reschedule(Some(sched.now() - ms(10))).unwrap();

    // Not synchronously.
    assert!(!scope.is_expired());
    assert_eq!(sched.cancel_requests(task), 0);

    assert_eq!(sched.turn(), 1);
    assert!(scope.is_expired());
    assert_eq!(sched.checkpoint(task), Err(timebox::Cancelled));
}

#[test]
fn deadline_equal_to_now_counts_as_past() {
    let (sched, task) = task_scheduler();
    let scope = active_scope(&sched, None);
    scope.update(sched.now()).unwrap();

    assert!(!scope.is_expired());
    assert!(sched.checkpoint(task).is_err());
    assert!(scope.is_expired());
}

// ============================================================================
// After the deadline fired
// ============================================================================

#[test]
fn reschedule_after_fire_is_recorded_not_rearmed() {
    let (sched, task) = task_scheduler();
    let scope = active_scope(&sched, Some(ms(5)));
    sched.advance(ms(10));
    assert!(scope.is_expired());

    let later = sched.now() + ms(100);
    scope.reschedule(Some(later)).unwrap();
    assert_eq!(scope.deadline(), Some(later));
    assert_eq!(sched.pending_timers(), 0);

    sched.advance(ms(200));
    assert_eq!(sched.cancel_requests(task), 1);
    assert!(scope.is_expired());
}

#[test]
fn reject_after_fire_does_not_clear_expiry() {
    let (sched, task) = task_scheduler();
    let scope = active_scope(&sched, Some(ms(5)));
    sched.advance(ms(10));

    scope.reject().unwrap();
    assert_eq!(scope.deadline(), None);
    assert!(scope.is_expired());

    let block = sched.checkpoint(task);
    assert!(scope.exit(Outcome::from(block)).unwrap_err().is_elapsed());
}

// ============================================================================
// Invalid states
// ============================================================================

#[test]
fn retiming_before_entry_is_invalid() {
    let (sched, _) = task_scheduler();
    let scope = DeadlineScope::after(sched.clone(), Some(ms(100)));
    let deadline = scope.deadline();

    let later = sched.now() + ms(500);
    assert!(scope.reschedule(Some(later)).unwrap_err().is_invalid_state());
    assert!(scope.update(later).unwrap_err().is_invalid_state());
    assert!(scope.shift(ms(1)).unwrap_err().is_invalid_state());
    assert!(scope.reject().unwrap_err().is_invalid_state());

    assert_eq!(scope.deadline(), deadline);
    assert_eq!(scope.state(), ScopeState::Created);
}

#[test]
fn retiming_after_exit_is_invalid() {
    let (sched, _) = task_scheduler();
    let scope = active_scope(&sched, Some(ms(100)));
    scope.exit::<_, ()>(Outcome::Success(())).unwrap();
    let deadline = scope.deadline();

    let err = scope.reschedule(None).unwrap_err();
    assert_eq!(
        err,
        ScopeError::InvalidState {
            op: "reschedule",
            state: ScopeState::Exited
        }
    );
    assert_eq!(
        err.to_string(),
        "cannot reschedule a deadline scope that is exited"
    );
    assert!(scope.shift(ms(1)).unwrap_err().is_invalid_state());
    assert!(scope.reject().unwrap_err().is_invalid_state());

    assert_eq!(scope.deadline(), deadline);
    assert_eq!(sched.pending_timers(), 0);
}

#[test]
fn setting_deadline_without_task_fails() {
    let sched = ManualScheduler::new();
    let scope = DeadlineScope::after(sched.clone(), None);
    scope.enter().unwrap();

    assert_eq!(scope.shift(ms(10)), Err(ScopeError::NoCurrentTask));
    assert_eq!(scope.deadline(), None);

    // Removing a deadline needs no task.
    scope.reject().unwrap();
}
