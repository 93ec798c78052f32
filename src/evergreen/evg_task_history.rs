//! Lookup the runtime history of evergreen tasks.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::evg_api::{EvgApiService, EvgTestStats};

const HOOK_DELIMITER: char = ':';

/// Runtime history of a test in evergreen.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRuntimeHistory {
    /// Normalized path of the test file.
    pub test_name: String,
    /// Average runtime of the test, including the hooks that ran with it.
    pub average_runtime: f64,
}

/// Runtime history of a task from evergreen.
#[derive(Debug, Clone)]
pub struct TaskRuntimeHistory {
    /// Name of task.
    pub task_name: String,
    /// Map of test base names to the runtime history for that test.
    pub test_map: HashMap<String, TestRuntimeHistory>,
}

impl TaskRuntimeHistory {
    /// Get the expected runtime of the given test file, if it has history.
    pub fn runtime_of(&self, test_file: &str) -> Option<f64> {
        self.test_map
            .get(&get_test_name(&normalize_test_file(test_file)))
            .map(|history| history.average_runtime)
    }
}

/// A service for querying task history from evergreen.
#[async_trait]
pub trait TaskHistoryService: Send + Sync {
    /// Get the test runtime history of the given task.
    ///
    /// # Arguments
    ///
    /// * `task` - Name of task to query.
    /// * `variant` - Name of build variant to query.
    ///
    /// # Returns
    ///
    /// The runtime history of tests belonging to the given task on the given build variant.
    async fn get_task_history(&self, task: &str, variant: &str) -> Result<TaskRuntimeHistory>;
}

/// An implementation of the task history service backed by evergreen test stats.
pub struct TaskHistoryServiceImpl {
    /// Client to query evergreen with.
    evg_api: Arc<dyn EvgApiService>,
    /// Evergreen project to query.
    evg_project: String,
}

impl TaskHistoryServiceImpl {
    /// Create a new instance of the task history service.
    ///
    /// # Arguments
    ///
    /// * `evg_api` - Evergreen API client.
    /// * `evg_project` - Evergreen project to query.
    pub fn new(evg_api: Arc<dyn EvgApiService>, evg_project: String) -> Self {
        Self {
            evg_api,
            evg_project,
        }
    }
}

#[async_trait]
impl TaskHistoryService for TaskHistoryServiceImpl {
    async fn get_task_history(&self, task: &str, variant: &str) -> Result<TaskRuntimeHistory> {
        let stats = self
            .evg_api
            .get_test_stats(&self.evg_project, task, variant)
            .await?;
        if stats.is_empty() {
            bail!("No test stats found for '{}' on '{}'", task, variant);
        }

        Ok(TaskRuntimeHistory {
            task_name: task.to_string(),
            test_map: build_test_map(&stats),
        })
    }
}

/// Convert the list of stats into a map of test names to test runtimes.
///
/// Hook entries are identified as `test:hook` and their runtime is added to the runtime of
/// the test they ran with.
fn build_test_map(stat_list: &[EvgTestStats]) -> HashMap<String, TestRuntimeHistory> {
    let mut test_map: HashMap<String, TestRuntimeHistory> = HashMap::new();
    let mut hook_runtimes: HashMap<String, f64> = HashMap::new();

    for stat in stat_list {
        let identifier = normalize_test_file(&stat.test_file);
        match identifier.split_once(HOOK_DELIMITER) {
            Some((test_name, _hook)) => {
                *hook_runtimes.entry(get_test_name(test_name)).or_default() +=
                    stat.avg_duration_pass;
            }
            None => {
                let entry = test_map
                    .entry(get_test_name(&identifier))
                    .or_insert_with(|| TestRuntimeHistory {
                        test_name: identifier.clone(),
                        average_runtime: 0.0,
                    });
                entry.average_runtime += stat.avg_duration_pass;
            }
        }
    }

    for (test_name, runtime) in hook_runtimes {
        if let Some(history) = test_map.get_mut(&test_name) {
            history.average_runtime += runtime;
        }
    }

    test_map
}

/// Normalize the given test file, converting windows path separators to unix style.
fn normalize_test_file(test_file: &str) -> String {
    test_file.replace('\\', "/")
}

/// Get the base name of the given test file.
///
/// # Arguments
///
/// * `test_file` - Relative path to test file.
///
/// # Returns
///
/// Base name of test file with extension removed.
pub fn get_test_name(test_file: &str) -> String {
    let base_name = test_file.rsplit('/').next().unwrap_or(test_file);
    base_name.trim_end_matches(".js").to_string()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::evergreen::evg_api::{EvgBuild, EvgManifest, EvgTaskStatus, EvgVersion};

    fn stat(test_file: &str, runtime: f64) -> EvgTestStats {
        EvgTestStats {
            test_file: test_file.to_string(),
            avg_duration_pass: runtime,
        }
    }

    struct MockEvgApi {
        stats: Vec<EvgTestStats>,
    }

    #[async_trait]
    impl EvgApiService for MockEvgApi {
        async fn get_version(&self, _version_id: &str) -> Result<EvgVersion> {
            todo!()
        }

        async fn get_manifest(&self, _project: &str, _revision: &str) -> Result<EvgManifest> {
            todo!()
        }

        async fn get_build_for_variant(
            &self,
            _version_id: &str,
            _build_variant: &str,
        ) -> Result<Option<EvgBuild>> {
            todo!()
        }

        async fn get_build_tasks(
            &self,
            _build_id: &str,
        ) -> Result<Vec<EvgTaskStatus>> {
            todo!()
        }

        async fn get_test_stats(
            &self,
            _project: &str,
            _task: &str,
            _variant: &str,
        ) -> Result<Vec<EvgTestStats>> {
            Ok(self.stats.clone())
        }
    }

    #[test]
    fn test_hook_runtimes_should_be_added_to_their_test() {
        let stats = vec![
            stat("jstests/core/add1.js", 10.0),
            stat("add1:CheckReplDBHash", 2.5),
            stat("jstests\\core\\add2.js", 4.0),
            stat("missing:ValidateCollections", 100.0),
        ];

        let test_map = build_test_map(&stats);

        assert_eq!(test_map.len(), 2);
        assert_eq!(test_map["add1"].average_runtime, 12.5);
        assert_eq!(test_map["add2"].test_name, "jstests/core/add2.js");
        assert_eq!(test_map["add2"].average_runtime, 4.0);
    }

    #[tokio::test]
    async fn test_task_history_should_lookup_runtime_by_test_file() {
        let service = TaskHistoryServiceImpl::new(
            Arc::new(MockEvgApi {
                stats: vec![stat("jstests/auth/auth3.js", 42.0)],
            }),
            "mongodb-mongo-master".to_string(),
        );

        let history = service.get_task_history("auth", "linux").await.unwrap();

        assert_eq!(history.runtime_of("jstests/auth/auth3.js"), Some(42.0));
        assert_eq!(history.runtime_of("jstests/auth/auth4.js"), None);
    }

    #[tokio::test]
    async fn test_task_history_with_no_stats_should_error() {
        let service = TaskHistoryServiceImpl::new(
            Arc::new(MockEvgApi { stats: vec![] }),
            "mongodb-mongo-master".to_string(),
        );

        assert!(service.get_task_history("auth", "linux").await.is_err());
    }

    // normalize test name tests.
    #[rstest]
    #[case("jstests\\core\\add1.js", "jstests/core/add1.js")]
    #[case("jstests/core/add1", "jstests/core/add1")]
    fn test_normalize_tests(#[case] test_file: &str, #[case] expected_name: &str) {
        assert_eq!(normalize_test_file(test_file), expected_name);
    }

    // get_test_name tests.
    #[rstest]
    #[case("jstests/core/add1.js", "add1")]
    #[case("jstests/core/add1", "add1")]
    #[case("add1.js", "add1")]
    fn test_get_test_name(#[case] test_file: &str, #[case] expected_name: &str) {
        assert_eq!(get_test_name(test_file), expected_name.to_string());
    }
}
