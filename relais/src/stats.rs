//! Task statistics registry.
//!
//! Every background and selector task is tracked through the transition
//! path `add_pending -> mark_running -> mark_finished`. The registry is
//! keyed by task group and keeps, per group:
//! - the pending and running task sets,
//! - the ten most recent completions (FIFO eviction),
//! - the ten longest completions (sorted by elapsed time),
//! - cumulative totals.
//!
//! Calling a transition out of order is a programming error and fails
//! loudly. All accessors return defensive copies.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MAX_LATEST: usize = 10;
const MAX_LONGEST: usize = 10;

/// Identifies a task for statistics aggregation.
///
/// Identity is reference based: two `TaskId`s with equal fields are still
/// distinct tasks. Always pass around the `Arc` handed out by
/// [`TaskId::new`].
pub struct TaskId {
    group_id: String,
    description: String,
}

impl TaskId {
    pub fn new(group_id: impl Into<String>, description: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            group_id: group_id.into(),
            description: description.into(),
        })
    }

    /// The group this task is aggregated under.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Human readable description of the task.
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// One finished task: identifier, success flag and elapsed time.
///
/// Created once when a task finishes and immutable thereafter.
#[derive(Clone)]
pub struct CompletionEntry {
    pub task: Arc<TaskId>,
    pub ok: bool,
    pub elapsed: Duration,
}

/// Cumulative totals for one task group.
#[derive(Clone, Default)]
pub struct TotalTimeSpent {
    completed: u64,
    failed: u64,
    total_time: Duration,
}

impl TotalTimeSpent {
    fn update(&mut self, entry: &CompletionEntry) {
        if entry.ok {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.total_time += entry.elapsed;
    }

    /// Number of tasks that finished successfully.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Number of tasks that finished with a failure.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Total time spent across all finished tasks.
    pub fn total_time(&self) -> Duration {
        self.total_time
    }
}

#[derive(Default)]
struct Ledger {
    pending: HashMap<String, Vec<Arc<TaskId>>>,
    running: HashMap<String, Vec<Arc<TaskId>>>,
    latest: HashMap<String, VecDeque<CompletionEntry>>,
    longest: HashMap<String, Vec<CompletionEntry>>,
    total: HashMap<String, TotalTimeSpent>,
}

impl Ledger {
    fn remove(
        tasks: &mut HashMap<String, Vec<Arc<TaskId>>>,
        ti: &Arc<TaskId>,
        state: &str,
    ) -> Arc<TaskId> {
        let list = tasks
            .get_mut(ti.group_id())
            .unwrap_or_else(|| panic!("no {state} tasks for group: {}", ti.group_id()));
        let position = list
            .iter()
            .position(|t| Arc::ptr_eq(t, ti))
            .unwrap_or_else(|| panic!("task was not {state}: {}", ti.description()));
        list.remove(position)
    }

    fn add_to_latest(&mut self, entry: CompletionEntry) {
        let list = self.latest.entry(entry.task.group_id().to_owned()).or_default();
        list.push_back(entry);
        if list.len() > MAX_LATEST {
            list.pop_front();
        }
    }

    fn add_to_longest(&mut self, entry: CompletionEntry) {
        let list = self.longest.entry(entry.task.group_id().to_owned()).or_default();

        // Strictly-greater insertion keeps ties in completion order.
        let position = list.iter().position(|e| entry.elapsed > e.elapsed);
        match position {
            Some(i) => {
                list.insert(i, entry);
                if list.len() > MAX_LONGEST {
                    list.pop();
                }
            }
            None if list.len() < MAX_LONGEST => list.push(entry),
            None => {}
        }
    }

    fn add_to_total(&mut self, entry: &CompletionEntry) {
        self.total
            .entry(entry.task.group_id().to_owned())
            .or_default()
            .update(entry);
    }
}

/// Thread-safe ledger of pending, running and completed tasks.
#[derive(Default)]
pub struct StatisticsLedger {
    inner: Mutex<Ledger>,
}

impl StatisticsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a task as pending.
    pub fn add_pending(&self, ti: &Arc<TaskId>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .pending
            .entry(ti.group_id().to_owned())
            .or_default()
            .push(ti.clone());
    }

    /// Moves a task from pending to running.
    ///
    /// # Panics
    ///
    /// Panics if the task was never recorded as pending; that indicates a
    /// broken transition sequence, not an environmental condition.
    pub fn mark_running(&self, ti: &Arc<TaskId>) {
        let mut inner = self.inner.lock().unwrap();
        let task = Ledger::remove(&mut inner.pending, ti, "pending");
        inner
            .running
            .entry(ti.group_id().to_owned())
            .or_default()
            .push(task);
    }

    /// Moves a task from running to finished, recording the outcome.
    ///
    /// # Panics
    ///
    /// Panics if the task was never recorded as running.
    pub fn mark_finished(&self, ti: &Arc<TaskId>, ok: bool, elapsed: Duration) {
        let mut inner = self.inner.lock().unwrap();
        let task = Ledger::remove(&mut inner.running, ti, "running");
        let entry = CompletionEntry { task, ok, elapsed };
        inner.add_to_latest(entry.clone());
        inner.add_to_longest(entry.clone());
        inner.add_to_total(&entry);
    }

    /// Removes a pending task that will never run (worker pool rejected
    /// it). No completion entry is recorded.
    ///
    /// # Panics
    ///
    /// Panics if the task was never recorded as pending.
    pub fn drop_pending(&self, ti: &Arc<TaskId>) {
        let mut inner = self.inner.lock().unwrap();
        Ledger::remove(&mut inner.pending, ti, "pending");
    }

    /// Pending tasks per group, as a snapshot.
    pub fn pending_tasks(&self) -> HashMap<String, Vec<Arc<TaskId>>> {
        self.inner.lock().unwrap().pending.clone()
    }

    /// Running tasks per group, as a snapshot.
    pub fn running_tasks(&self) -> HashMap<String, Vec<Arc<TaskId>>> {
        self.inner.lock().unwrap().running.clone()
    }

    /// The most recent completions per group, oldest first.
    pub fn latest(&self) -> HashMap<String, Vec<CompletionEntry>> {
        let inner = self.inner.lock().unwrap();
        inner
            .latest
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
            .collect()
    }

    /// The longest completions per group, sorted by elapsed time,
    /// descending.
    pub fn longest(&self) -> HashMap<String, Vec<CompletionEntry>> {
        self.inner.lock().unwrap().longest.clone()
    }

    /// Cumulative totals per group.
    pub fn total_time_spent(&self) -> HashMap<String, TotalTimeSpent> {
        self.inner.lock().unwrap().total.clone()
    }
}
