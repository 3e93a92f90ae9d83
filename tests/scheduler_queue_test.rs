//! Queue-maintenance invariants: dispatch order, overlap exclusion,
//! refresh replacement.

mod common;

use common::task_in_window;
use skywatch::scheduler::{merge_refreshed, tasks_overlap};

#[test]
fn merged_queue_is_aos_sorted_and_overlap_free() {
    let fresh = vec![
        task_in_window("E", 80, 88),
        task_in_window("A", 0, 8),
        task_in_window("C", 40, 48),
        task_in_window("B", 20, 28),
        task_in_window("D", 44, 52), // overlaps C
        task_in_window("F", 85, 93), // overlaps E
    ];
    let queue = merge_refreshed(Vec::new(), fresh);

    let sats: Vec<&str> = queue.iter().map(|t| t.parameters.sat_id.as_str()).collect();
    assert_eq!(sats, vec!["A", "B", "C", "E"]);
    for pair in queue.windows(2) {
        assert!(pair[0].aos_time().unwrap() <= pair[1].aos_time().unwrap());
        assert!(!tasks_overlap(&pair[0], &pair[1]));
    }
}

#[test]
fn first_scheduled_wins_on_overlap() {
    // A [00:00, 00:10] and B [00:05, 00:15] -> only A stays.
    let a = task_in_window("A", 0, 10);
    let b = task_in_window("B", 5, 15);
    let queue = merge_refreshed(Vec::new(), vec![a.clone(), b]);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].task_id, a.task_id);
}

#[test]
fn refresh_replaces_matching_and_keeps_the_rest() {
    let stale_a = task_in_window("A", 10, 18);
    let keeper = task_in_window("B", 30, 38);
    let fresh_a = task_in_window("A", 10, 18);

    let queue = merge_refreshed(vec![stale_a.clone(), keeper.clone()], vec![fresh_a.clone()]);
    assert_eq!(queue.len(), 2);
    // The refreshed twin won; the unrelated entry survived.
    assert!(queue.iter().any(|t| t.task_id == fresh_a.task_id));
    assert!(queue.iter().any(|t| t.task_id == keeper.task_id));
    assert!(queue.iter().all(|t| t.task_id != stale_a.task_id));
}

#[test]
fn between_refreshes_merging_nothing_changes_nothing() {
    let a = task_in_window("A", 10, 18);
    let b = task_in_window("B", 30, 38);
    let queue = merge_refreshed(vec![a.clone(), b.clone()], Vec::new());
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0].task_id, a.task_id);
    assert_eq!(queue[1].task_id, b.task_id);
}

#[test]
fn existing_head_beats_a_fresh_overlapper() {
    // A queued pass keeps its slot against a new task overlapping it.
    let queued = task_in_window("A", 10, 18);
    let intruder = task_in_window("B", 14, 22);
    let queue = merge_refreshed(vec![queued.clone()], vec![intruder]);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].task_id, queued.task_id);
}
