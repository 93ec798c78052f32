//! Map selected test files to the tasks of a build variant that run them.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use shrub_rs::models::task::EvgTask;
use tracing::{event, Level};

use super::{task_config::TaskConfigBuilder, task_filter::is_task_excluded};
use crate::{
    evergreen::evg_config_utils::{EvgConfigUtils, TaskKind},
    resmoke::resmoke_proxy::TestDiscovery,
};

/// A service for finding the tasks that run given test files.
pub trait TestTaskMapper: Sync + Send {
    /// Map the given tests to the tasks on the build variant whose suite contains them.
    ///
    /// # Arguments
    ///
    /// * `test_files` - Test files to map.
    /// * `catalog` - Task definitions available on the build variant.
    ///
    /// # Returns
    ///
    /// Map of task names to the given tests their suite contains.
    fn map_tests_to_tasks(
        &self,
        test_files: &BTreeSet<String>,
        catalog: &HashMap<String, EvgTask>,
    ) -> Result<BTreeMap<String, BTreeSet<String>>>;
}

/// Implementation of the test to task mapper using resmoke test discovery.
pub struct TestTaskMapperImpl {
    evg_config_utils: Arc<dyn EvgConfigUtils>,
    task_config_builder: Arc<dyn TaskConfigBuilder>,
    test_discovery: Arc<dyn TestDiscovery>,
    /// Tests belonging to each suite that has already been discovered.
    suite_cache: Mutex<HashMap<String, Arc<BTreeSet<String>>>>,
}

impl TestTaskMapperImpl {
    /// Create a new instance of the mapper.
    ///
    /// # Arguments
    ///
    /// * `evg_config_utils` - Utilities to interpret evergreen configuration.
    /// * `task_config_builder` - Service to find the suite a task runs.
    /// * `test_discovery` - Service to discover the tests of a suite.
    pub fn new(
        evg_config_utils: Arc<dyn EvgConfigUtils>,
        task_config_builder: Arc<dyn TaskConfigBuilder>,
        test_discovery: Arc<dyn TestDiscovery>,
    ) -> Self {
        Self {
            evg_config_utils,
            task_config_builder,
            test_discovery,
            suite_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get the tests of the given suite, discovering them the first time a suite is seen.
    fn suite_tests(&self, suite_name: &str) -> Result<Arc<BTreeSet<String>>> {
        let mut cache = self
            .suite_cache
            .lock()
            .map_err(|_| anyhow!("Suite cache lock poisoned"))?;
        if let Some(tests) = cache.get(suite_name) {
            return Ok(tests.clone());
        }

        let tests: Arc<BTreeSet<String>> = Arc::new(
            self.test_discovery
                .discover_tests(suite_name)?
                .into_iter()
                .collect(),
        );
        cache.insert(suite_name.to_string(), tests.clone());
        Ok(tests)
    }

    /// Determine if the given task runs tests that live in the repository.
    fn runs_repository_tests(&self, task_def: &EvgTask) -> bool {
        matches!(
            self.evg_config_utils.get_task_kind(task_def),
            Ok(TaskKind::GenerateResmoke) | Ok(TaskKind::RunTests)
        )
    }
}

impl TestTaskMapper for TestTaskMapperImpl {
    fn map_tests_to_tasks(
        &self,
        test_files: &BTreeSet<String>,
        catalog: &HashMap<String, EvgTask>,
    ) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let mut tests_by_task = BTreeMap::new();
        if test_files.is_empty() {
            return Ok(tests_by_task);
        }

        for (task_name, task_def) in catalog {
            if is_task_excluded(task_name) || !self.runs_repository_tests(task_def) {
                continue;
            }

            let suite_name = self.task_config_builder.find_suite_name(task_def)?;
            let suite_tests = self.suite_tests(&suite_name)?;
            let owned_tests: BTreeSet<String> =
                test_files.intersection(&suite_tests).cloned().collect();
            if !owned_tests.is_empty() {
                event!(
                    Level::DEBUG,
                    task_name = task_name.as_str(),
                    suite_name = suite_name.as_str(),
                    tests = owned_tests.len(),
                    "Task runs selected tests"
                );
                tests_by_task.insert(task_name.clone(), owned_tests);
            }
        }

        Ok(tests_by_task)
    }
}
