//! Service for generating the sub-suites of selected tasks.
//!
//! The tests of each selected task are divided into sub-suites that can run in parallel, using
//! the historic runtime of the tests when it is available. Each sub-suite gets a resmoke suite
//! file and an evergreen task to run it.
use std::{
    cmp::min,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use maplit::hashmap;
use shrub_rs::models::{
    commands::{fn_call, fn_call_with_params, EvgCommand},
    params::ParamValue,
    task::{EvgTask, TaskDependency},
};
use tracing::{event, warn, Level};

use crate::{
    evergreen::{
        evg_config_utils::TaskKind,
        evg_task_history::{TaskHistoryService, TaskRuntimeHistory},
    },
    evergreen_names::{
        CONFIGURE_EVG_API_CREDS, DO_SETUP, FUZZER_PARAMETERS, GEN_TASK_CONFIG_LOCATION,
        NPM_COMMAND, NUM_FUZZER_FILES, RESMOKE_ARGS, RUN_FUZZER, RUN_GENERATED_TESTS,
        S3_BUCKET_TASK_NAME, SETUP_JSTESTFUZZ, SUITE_NAME,
    },
    resmoke::resmoke_proxy::TestDiscovery,
    selected_tests::task_config::EvgTaskConfig,
    utils::{fs_service::FsService, task_name::name_generated_task},
};

use super::generated_suite::GeneratedSuite;

/// Directory generated suite files are placed in on the evergreen host.
pub const GENERATED_CONFIG_DIR: &str = "generated_resmoke_config";
const DEFAULT_NPM_COMMAND: &str = "jstestfuzz";
const DEFAULT_NUM_FUZZER_FILES: &str = "1";

/// Representation of generated sub-suite.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubSuite {
    /// Index value of generated suite, None for the misc suite.
    pub index: Option<usize>,
    /// List of tests belonging to sub-suite.
    pub test_list: Vec<String>,
    /// List of tests that should be excluded from sub-suite.
    pub exclude_test_list: Option<Vec<String>>,
}

/// Generated sub-tasks and suite files of a selected task.
#[derive(Clone, Debug, Default)]
pub struct GeneratedSelectedSuite {
    /// Name of display task to create.
    pub display_name: String,
    /// Tasks running each sub-suite.
    pub sub_tasks: Vec<EvgTask>,
    /// Map of suite file names to file contents.
    pub suite_files: BTreeMap<String, String>,
}

impl GeneratedSuite for GeneratedSelectedSuite {
    fn display_name(&self) -> String {
        self.display_name.clone()
    }

    fn sub_tasks(&self) -> Vec<EvgTask> {
        self.sub_tasks.clone()
    }
}

/// A service for generating the sub-suites of selected tasks.
#[async_trait]
pub trait SubSuiteGenerator: Sync + Send {
    /// Generate sub-tasks and suite files for the given selected task.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration of the selected task.
    ///
    /// # Returns
    ///
    /// The generated sub-tasks and suite files.
    async fn generate_sub_suites(&self, config: &EvgTaskConfig) -> Result<GeneratedSelectedSuite>;
}

/// Implementation of the sub-suite generator.
pub struct SubSuiteGeneratorImpl {
    /// Service to query task runtime history.
    task_history_service: Arc<dyn TaskHistoryService>,
    /// Test discovery service.
    test_discovery: Arc<dyn TestDiscovery>,
    /// Service to interact with file system.
    fs_service: Arc<dyn FsService>,
    /// Disable evergreen task-history queries and use task splitting fallback.
    use_task_split_fallback: bool,
}

impl SubSuiteGeneratorImpl {
    /// Create a new instance of the generator.
    ///
    /// # Arguments
    ///
    /// * `task_history_service` - Service to query task runtime history.
    /// * `test_discovery` - Service to query the tests and configuration of suites.
    /// * `fs_service` - Service to work with the file system.
    /// * `use_task_split_fallback` - Always split tasks evenly without runtime history.
    pub fn new(
        task_history_service: Arc<dyn TaskHistoryService>,
        test_discovery: Arc<dyn TestDiscovery>,
        fs_service: Arc<dyn FsService>,
        use_task_split_fallback: bool,
    ) -> Self {
        Self {
            task_history_service,
            test_discovery,
            fs_service,
            use_task_split_fallback,
        }
    }

    /// Get the list of tests to split for the given task.
    fn get_test_list(&self, config: &EvgTaskConfig) -> Result<Vec<String>> {
        if let Some(selected_tests) = &config.selected_tests_to_run {
            return Ok(selected_tests.clone());
        }

        Ok(self
            .test_discovery
            .discover_tests(config.suite_name())?
            .into_iter()
            .filter(|s| self.fs_service.file_exists(s))
            .collect())
    }

    /// Divide the tests of the given task into sub-suites.
    async fn create_sub_suites(&self, config: &EvgTaskConfig) -> Result<Vec<SubSuite>> {
        let test_list = self.get_test_list(config)?;

        let splits = if test_list.is_empty() {
            vec![]
        } else if self.use_task_split_fallback {
            split_tests_evenly(&test_list, config.fallback_num_sub_suites)
        } else {
            let task_history = self
                .task_history_service
                .get_task_history(config.display_name(), &config.build_variant)
                .await;
            match task_history {
                Ok(task_history) => {
                    split_tests_by_runtime(&test_list, config.max_sub_suites, &task_history)
                }
                Err(err) => {
                    warn!(
                        build_variant = config.build_variant.as_str(),
                        task_name = config.task_name.as_str(),
                        error = err.to_string().as_str(),
                        "Could not get task history from evergreen",
                    );
                    split_tests_evenly(&test_list, config.fallback_num_sub_suites)
                }
            }
        };

        let mut sub_suites: Vec<SubSuite> = splits
            .into_iter()
            .enumerate()
            .map(|(index, test_list)| SubSuite {
                index: Some(index),
                test_list,
                exclude_test_list: None,
            })
            .collect();

        if config.selected_tests_to_run.is_none() {
            let split_tests = sub_suites
                .iter()
                .flat_map(|s| s.test_list.iter().cloned())
                .collect();
            sub_suites.push(SubSuite {
                index: None,
                test_list: vec![],
                exclude_test_list: Some(split_tests),
            });
        }

        Ok(sub_suites)
    }

    /// Build the suite file for each sub-suite.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration of the selected task.
    /// * `named_sub_suites` - Sub-suites and the names of the tasks running them.
    ///
    /// # Returns
    ///
    /// Map of suite file names to file contents.
    fn build_suite_files(
        &self,
        config: &EvgTaskConfig,
        named_sub_suites: &[(String, SubSuite)],
    ) -> Result<BTreeMap<String, String>> {
        let origin_suite = config.suite_name();
        let suite_config = self.test_discovery.get_suite_config(origin_suite)?;

        named_sub_suites
            .iter()
            .map(|(name, sub_suite)| {
                let sub_suite_config = match &sub_suite.exclude_test_list {
                    Some(exclude_tests) => suite_config.with_new_tests(None, Some(exclude_tests)),
                    None => suite_config.with_new_tests(Some(&sub_suite.test_list), None),
                };
                Ok((
                    format!("{}.yml", name),
                    sub_suite_config.to_generated_yaml(origin_suite)?,
                ))
            })
            .collect()
    }

    /// Generate the sub-suites of a resmoke task.
    async fn generate_resmoke_sub_suites(
        &self,
        config: &EvgTaskConfig,
    ) -> Result<GeneratedSelectedSuite> {
        let sub_suites = self.create_sub_suites(config).await?;
        let total = sub_suites.iter().filter(|s| s.index.is_some()).count();
        let named_sub_suites: Vec<(String, SubSuite)> = sub_suites
            .into_iter()
            .map(|s| {
                let name = name_generated_task(
                    config.display_name(),
                    s.index,
                    total,
                    Some(&config.build_variant),
                );
                (name, s)
            })
            .collect();

        event!(
            Level::INFO,
            task_name = config.task_name.as_str(),
            sub_suites = named_sub_suites.len(),
            "Generated sub-suites"
        );

        let suite_files = self.build_suite_files(config, &named_sub_suites)?;
        let sub_tasks = named_sub_suites
            .iter()
            .map(|(name, _)| build_resmoke_sub_task(config, name))
            .collect();

        Ok(GeneratedSelectedSuite {
            display_name: build_display_name(config),
            sub_tasks,
            suite_files,
        })
    }
}

#[async_trait]
impl SubSuiteGenerator for SubSuiteGeneratorImpl {
    async fn generate_sub_suites(&self, config: &EvgTaskConfig) -> Result<GeneratedSelectedSuite> {
        match config.task_kind {
            TaskKind::GenerateFuzzer => Ok(GeneratedSelectedSuite {
                display_name: build_display_name(config),
                sub_tasks: vec![build_fuzzer_sub_task(config)],
                suite_files: BTreeMap::new(),
            }),
            TaskKind::GenerateResmoke | TaskKind::RunTests => {
                self.generate_resmoke_sub_suites(config).await
            }
        }
    }
}

/// Name of the display task grouping the sub-tasks of the given task.
fn build_display_name(config: &EvgTaskConfig) -> String {
    format!(
        "{}{}",
        config.display_name(),
        config.display_task_suffix.as_deref().unwrap_or("")
    )
}

/// Split the given tests evenly into the requested number of sub-suites.
///
/// # Arguments
///
/// * `test_list` - Tests to split.
/// * `num_sub_suites` - Number of sub-suites requested.
///
/// # Returns
///
/// Tests of each sub-suite, never more sub-suites than tests.
fn split_tests_evenly(test_list: &[String], num_sub_suites: usize) -> Vec<Vec<String>> {
    if test_list.is_empty() {
        return vec![];
    }

    let n = min(test_list.len(), num_sub_suites.max(1));
    let len = test_list.len();
    let (quo, rem) = (len / n, len % n);
    let split = (quo + 1) * rem;
    test_list[..split]
        .chunks(quo + 1)
        .chain(test_list[split..].chunks(quo))
        .map(|tests| tests.to_vec())
        .collect()
}

/// Split the given tests into sub-suites of similar total historic runtime.
///
/// Tests are assigned longest first to the sub-suite with the least runtime. Tests without
/// history are spread round-robin afterwards.
///
/// # Arguments
///
/// * `test_list` - Tests to split.
/// * `max_sub_suites` - Maximum number of sub-suites to create.
/// * `task_stats` - Historic runtimes of the tests.
///
/// # Returns
///
/// Tests of each sub-suite.
fn split_tests_by_runtime(
    test_list: &[String],
    max_sub_suites: usize,
    task_stats: &TaskRuntimeHistory,
) -> Vec<Vec<String>> {
    let num_sub_suites = min(max_sub_suites.max(1), test_list.len());
    let mut running_tests = vec![vec![]; num_sub_suites];
    let mut running_runtimes = vec![0.0; num_sub_suites];
    let mut left_tests = vec![];

    for test in sort_tests_by_runtime(test_list, task_stats) {
        match task_stats.runtime_of(&test) {
            Some(runtime) => {
                let min_idx = get_min_index(&running_runtimes);
                running_runtimes[min_idx] += runtime;
                running_tests[min_idx].push(test);
            }
            None => left_tests.push(test),
        }
    }

    let min_idx = get_min_index(&running_runtimes);
    for (i, test) in left_tests.into_iter().enumerate() {
        running_tests[(min_idx + i) % num_sub_suites].push(test);
    }

    running_tests.retain(|tests| !tests.is_empty());
    running_tests
}

/// Sort tests by historic runtime descending, tests without history last.
fn sort_tests_by_runtime(test_list: &[String], task_stats: &TaskRuntimeHistory) -> Vec<String> {
    let mut sorted_test_list = test_list.to_vec();
    sorted_test_list.sort_by(|test_a, test_b| {
        let runtime_a = task_stats.runtime_of(test_a).unwrap_or(0.0);
        let runtime_b = task_stats.runtime_of(test_b).unwrap_or(0.0);
        runtime_b
            .partial_cmp(&runtime_a)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted_test_list
}

/// Get the index of sub suite with the least total runtime of tests.
fn get_min_index(running_runtimes: &[f64]) -> usize {
    let mut min_idx = 0;
    for (i, value) in running_runtimes.iter().enumerate() {
        if value < &running_runtimes[min_idx] {
            min_idx = i;
        }
    }
    min_idx
}

/// Build the vars shared by all 'run generated tests' calls of the given task.
fn build_base_run_vars(config: &EvgTaskConfig) -> HashMap<String, ParamValue> {
    let mut run_test_vars: HashMap<String, ParamValue> = config
        .pass_through_vars
        .iter()
        .map(|(k, v)| (k.clone(), ParamValue::from(v.as_str())))
        .collect();
    run_test_vars.extend(hashmap! {
        GEN_TASK_CONFIG_LOCATION.to_string() => ParamValue::from(config.generating_task.config_location.as_str()),
        S3_BUCKET_TASK_NAME.to_string() => ParamValue::from(config.s3_bucket_task_name.as_str()),
    });
    run_test_vars
}

/// Build the dependencies of the generated sub-tasks.
fn build_dependencies(config: &EvgTaskConfig) -> Option<Vec<TaskDependency>> {
    if config.dependencies.is_empty() {
        None
    } else {
        Some(
            config
                .dependencies
                .iter()
                .map(|d| TaskDependency {
                    name: d.to_string(),
                    variant: None,
                })
                .collect(),
        )
    }
}

/// Build a shrub task to execute a resmoke sub-suite.
///
/// # Arguments
///
/// * `config` - Configuration of the selected task.
/// * `name` - Name of the sub-task, also the name of its suite file.
fn build_resmoke_sub_task(config: &EvgTaskConfig, name: &str) -> EvgTask {
    let resmoke_args = format!(
        "--originSuite={} {}",
        config.suite_name(),
        config.origin_resmoke_args
    );
    let suite_file = format!("{}/{}.yml", GENERATED_CONFIG_DIR, name);
    let mut run_test_vars = build_base_run_vars(config);
    run_test_vars.extend(hashmap! {
        RESMOKE_ARGS.to_string() => ParamValue::from(resmoke_args.trim_end()),
        SUITE_NAME.to_string() => ParamValue::from(suite_file.as_str()),
    });

    EvgTask {
        name: name.to_string(),
        commands: Some(resmoke_commands(run_test_vars)),
        depends_on: build_dependencies(config),
        ..Default::default()
    }
}

/// Build a shrub task to generate and execute fuzzer tests.
fn build_fuzzer_sub_task(config: &EvgTaskConfig) -> EvgTask {
    let mut run_test_vars = build_base_run_vars(config);
    let npm_command = run_test_vars
        .remove(NPM_COMMAND)
        .unwrap_or_else(|| ParamValue::from(DEFAULT_NPM_COMMAND));
    let num_files = config
        .pass_through_vars
        .get(NUM_FUZZER_FILES)
        .map(|v| v.as_str())
        .unwrap_or(DEFAULT_NUM_FUZZER_FILES);
    let jstestfuzz_vars = config
        .pass_through_vars
        .get(FUZZER_PARAMETERS)
        .map(|v| v.as_str())
        .unwrap_or("");
    run_test_vars.remove(NUM_FUZZER_FILES);
    run_test_vars.remove(FUZZER_PARAMETERS);
    run_test_vars.extend(hashmap! {
        RESMOKE_ARGS.to_string() => ParamValue::from(config.origin_resmoke_args.as_str()),
        SUITE_NAME.to_string() => ParamValue::from(config.suite_name()),
    });

    let fuzzer_vars = hashmap! {
        NPM_COMMAND.to_string() => npm_command,
        FUZZER_PARAMETERS.to_string() => ParamValue::String(
            format!("--numGeneratedFiles {} {}", num_files, jstestfuzz_vars).trim_end().to_string()
        ),
    };

    EvgTask {
        name: name_generated_task(
            config.display_name(),
            Some(0),
            1,
            Some(&config.build_variant),
        ),
        commands: Some(vec![
            fn_call(DO_SETUP),
            fn_call(CONFIGURE_EVG_API_CREDS),
            fn_call(SETUP_JSTESTFUZZ),
            fn_call_with_params(RUN_FUZZER, fuzzer_vars),
            fn_call_with_params(RUN_GENERATED_TESTS, run_test_vars),
        ]),
        depends_on: build_dependencies(config),
        ..Default::default()
    }
}

/// Create a list of commands to run a resmoke sub-suite in evergreen.
fn resmoke_commands(run_test_vars: HashMap<String, ParamValue>) -> Vec<EvgCommand> {
    vec![
        fn_call(DO_SETUP),
        fn_call(CONFIGURE_EVG_API_CREDS),
        fn_call_with_params(RUN_GENERATED_TESTS, run_test_vars),
    ]
}
