//! Combine test-level and task-level selections.
use std::collections::{BTreeMap, BTreeSet};

/// Which tests of a selected task should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestSelection {
    /// Only the given tests should run.
    TestSubset(BTreeSet<String>),
    /// The entire task should run.
    AllTests,
}

/// Selected tasks and the tests each should run, ordered by task name.
pub type TaskSelection = BTreeMap<String, TestSelection>;

/// Merge test-level and task-level selections.
///
/// A task selected at the task level runs all of its tests, even if some of its tests were
/// also selected individually.
///
/// # Arguments
///
/// * `test_level` - Map of tasks to the selected tests they own.
/// * `task_level` - Tasks selected as a whole.
///
/// # Returns
///
/// Selection of every task in either input.
pub fn merge_selections(
    test_level: BTreeMap<String, BTreeSet<String>>,
    task_level: &BTreeSet<String>,
) -> TaskSelection {
    let mut selection: TaskSelection = test_level
        .into_iter()
        .map(|(task, tests)| (task, TestSelection::TestSubset(tests)))
        .collect();
    for task in task_level {
        selection.insert(task.clone(), TestSelection::AllTests);
    }
    selection
}
