//! Task-validity invariants at their boundaries.

mod common;

use chrono::Duration;
use common::{t0, task_in_window};

#[test]
fn accepted_tasks_satisfy_the_window_invariants() {
    let max_pass = Duration::minutes(15);
    let task = task_in_window("A", 5, 15);
    assert!(task.is_valid_at(t0(), max_pass));

    let aos = task.aos_time().unwrap();
    let tca = task.parameters.tca.as_ref().unwrap().time;
    let los = task.los_time().unwrap();
    assert!(aos < tca && tca < los);
    assert!(los > t0());
    assert!(los - aos <= max_pass);
}

#[test]
fn exactly_max_pass_is_accepted_and_a_minute_more_is_not() {
    let max_pass = Duration::minutes(15);
    assert!(task_in_window("A", 0, 15).is_valid_at(t0(), max_pass));
    assert!(!task_in_window("A", 0, 16).is_valid_at(t0(), max_pass));
}

#[test]
fn los_must_be_in_the_future() {
    let max_pass = Duration::minutes(15);
    let task = task_in_window("A", -10, -1);
    assert!(!task.is_valid_at(t0(), max_pass));
    // The same window is fine when judged from before it closed.
    assert!(task.is_valid_at(t0() - Duration::minutes(5), max_pass));
}

#[test]
fn raising_the_cap_admits_longer_passes() {
    let task = task_in_window("A", 0, 20);
    assert!(!task.is_valid_at(t0(), Duration::minutes(15)));
    assert!(task.is_valid_at(t0(), Duration::minutes(25)));
}
