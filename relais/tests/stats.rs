use relais::stats::{StatisticsLedger, TaskId};
use std::time::Duration;

#[test]
fn test_task_transitions() {
    let stats = StatisticsLedger::new();
    let ti = TaskId::new("group", "task one");

    stats.add_pending(&ti);
    assert_eq!(stats.pending_tasks()["group"].len(), 1);
    assert!(stats.running_tasks().is_empty());

    stats.mark_running(&ti);
    assert!(stats.pending_tasks()["group"].is_empty());
    assert_eq!(stats.running_tasks()["group"].len(), 1);

    stats.mark_finished(&ti, true, Duration::from_millis(5));
    assert!(stats.running_tasks()["group"].is_empty());

    let totals = stats.total_time_spent();
    assert_eq!(totals["group"].completed(), 1);
    assert_eq!(totals["group"].failed(), 0);
    assert_eq!(totals["group"].total_time(), Duration::from_millis(5));
}

#[test]
fn test_failed_task_counted_separately() {
    let stats = StatisticsLedger::new();

    let ok = TaskId::new("group", "good");
    stats.add_pending(&ok);
    stats.mark_running(&ok);
    stats.mark_finished(&ok, true, Duration::from_millis(2));

    let bad = TaskId::new("group", "bad");
    stats.add_pending(&bad);
    stats.mark_running(&bad);
    stats.mark_finished(&bad, false, Duration::from_millis(3));

    let totals = stats.total_time_spent();
    assert_eq!(totals["group"].completed(), 1);
    assert_eq!(totals["group"].failed(), 1);
    assert_eq!(totals["group"].total_time(), Duration::from_millis(5));
}

#[test]
#[should_panic(expected = "no pending tasks for group")]
fn test_mark_running_without_pending_panics() {
    let stats = StatisticsLedger::new();
    let ti = TaskId::new("group", "never added");
    stats.mark_running(&ti);
}

#[test]
#[should_panic(expected = "task was not pending")]
fn test_identity_is_reference_based() {
    let stats = StatisticsLedger::new();

    let a = TaskId::new("group", "task");
    let b = TaskId::new("group", "task");

    // Equal fields, distinct tasks.
    stats.add_pending(&a);
    stats.mark_running(&b);
}

#[test]
#[should_panic(expected = "no running tasks for group")]
fn test_mark_finished_without_running_panics() {
    let stats = StatisticsLedger::new();
    let ti = TaskId::new("group", "skipped running");
    stats.add_pending(&ti);
    stats.mark_finished(&ti, true, Duration::from_millis(1));
}

#[test]
fn test_drop_pending_removes_the_task() {
    let stats = StatisticsLedger::new();
    let ti = TaskId::new("group", "rejected");

    stats.add_pending(&ti);
    stats.drop_pending(&ti);

    assert!(stats.pending_tasks()["group"].is_empty());
    assert!(stats.latest().is_empty());
    assert!(stats.total_time_spent().is_empty());
}

#[test]
fn test_latest_keeps_ten_most_recent() {
    let stats = StatisticsLedger::new();

    for i in 0..12u64 {
        let ti = TaskId::new("group", format!("task {i}"));
        stats.add_pending(&ti);
        stats.mark_running(&ti);
        stats.mark_finished(&ti, true, Duration::from_millis(i));
    }

    let latest = &stats.latest()["group"];
    assert_eq!(latest.len(), 10);

    // Oldest first; the first two completions were evicted.
    assert_eq!(latest[0].elapsed, Duration::from_millis(2));
    assert_eq!(latest[9].elapsed, Duration::from_millis(11));
}

#[test]
fn test_longest_sorted_descending() {
    let stats = StatisticsLedger::new();

    for ms in [5u64, 1, 9, 3] {
        let ti = TaskId::new("group", format!("task {ms}"));
        stats.add_pending(&ti);
        stats.mark_running(&ti);
        stats.mark_finished(&ti, true, Duration::from_millis(ms));
    }

    let longest = &stats.longest()["group"];
    let elapsed: Vec<u64> = longest.iter().map(|e| e.elapsed.as_millis() as u64).collect();
    assert_eq!(elapsed, vec![9, 5, 3, 1]);
}

#[test]
fn test_longest_keeps_ten_entries_and_ties_in_completion_order() {
    let stats = StatisticsLedger::new();

    let first_tie = TaskId::new("group", "first tie");
    stats.add_pending(&first_tie);
    stats.mark_running(&first_tie);
    stats.mark_finished(&first_tie, true, Duration::from_millis(7));

    let second_tie = TaskId::new("group", "second tie");
    stats.add_pending(&second_tie);
    stats.mark_running(&second_tie);
    stats.mark_finished(&second_tie, true, Duration::from_millis(7));

    {
        let longest = &stats.longest()["group"];
        assert_eq!(longest[0].task.description(), "first tie");
        assert_eq!(longest[1].task.description(), "second tie");
    }

    for ms in 10..20u64 {
        let ti = TaskId::new("group", format!("task {ms}"));
        stats.add_pending(&ti);
        stats.mark_running(&ti);
        stats.mark_finished(&ti, true, Duration::from_millis(ms));
    }

    // Ten slower completions pushed both ties out.
    let longest = &stats.longest()["group"];
    assert_eq!(longest.len(), 10);
    assert_eq!(longest[0].elapsed, Duration::from_millis(19));
    assert_eq!(longest[9].elapsed, Duration::from_millis(10));
}
