//! Build the configuration overrides of a selected task.
use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use shrub_rs::models::task::EvgTask;

use super::task_selection::TestSelection;
use crate::{
    evergreen::{
        evg_config_utils::{EvgConfigUtils, TaskKind},
        evg_expansions::EvgExpansions,
    },
    evergreen_names::{FALLBACK_NUM_SUB_SUITES, IS_FUZZER, MAX_SUB_SUITES, RESMOKE_ARGS, SUITE_NAME},
    utils::task_name::remove_gen_suffix,
};

/// Value of `s3_bucket_task_name` for all selected tasks.
pub const SELECTED_TESTS_BUCKET_TASK: &str = "selected_tests";
const DEFAULT_NUM_SUB_SUITES: usize = 5;

lazy_static! {
    static ref SUITES_ARG: Regex = Regex::new(r"--suites(?:=|\s+)(?P<suite>\S+)").unwrap();
}

/// Split the `--suites` argument out of the given resmoke arguments.
///
/// # Arguments
///
/// * `resmoke_args` - Resmoke arguments to parse.
///
/// # Returns
///
/// The suite named by the first `--suites` argument, if any, and the remaining arguments.
pub fn extract_suite_arg(resmoke_args: &str) -> (Option<String>, String) {
    let suite = SUITES_ARG
        .captures(resmoke_args)
        .and_then(|caps| caps.name("suite"))
        .map(|m| m.as_str().to_string());
    let remaining = SUITES_ARG.replace_all(resmoke_args, "");
    (suite, remaining.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Details of the task generating the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratingTaskInfo {
    /// Name of the generating task.
    pub task_name: String,
    /// Build variant of the generating task.
    pub build_variant: String,
    /// Build ID of the generating task.
    pub build_id: String,
    /// Location the generated configuration is stored.
    pub config_location: String,
}

impl From<&EvgExpansions> for GeneratingTaskInfo {
    fn from(expansions: &EvgExpansions) -> Self {
        Self {
            task_name: expansions.task_name.clone(),
            build_variant: expansions.build_variant.clone(),
            build_id: expansions.build_id.clone(),
            config_location: expansions.config_location(),
        }
    }
}

/// Configuration overrides for generating the sub-suites of a selected task.
#[derive(Debug, Clone, PartialEq)]
pub struct EvgTaskConfig {
    /// Name of the task on the build variant.
    pub task_name: String,
    /// Build variant the task is selected from.
    pub build_variant: String,
    /// Kind of the task.
    pub task_kind: TaskKind,
    /// Resmoke arguments with the suite removed and the selected tests appended.
    pub resmoke_args: String,
    /// Resmoke arguments with the suite removed.
    pub origin_resmoke_args: String,
    /// Suite the task runs, if configured.
    pub suite: Option<String>,
    /// Number of sub-suites to create without runtime history.
    pub fallback_num_sub_suites: usize,
    /// Maximum number of sub-suites to create with runtime history.
    pub max_sub_suites: usize,
    /// Tests to run when only part of the task is selected.
    pub selected_tests_to_run: Option<Vec<String>>,
    /// Suffix to add to the display task name.
    pub display_task_suffix: Option<String>,
    /// Tasks the generated sub-tasks depend on.
    pub dependencies: Vec<String>,
    /// Details of the task generating the configuration.
    pub generating_task: GeneratingTaskInfo,
    /// Bucket task name results are published under.
    pub s3_bucket_task_name: String,
    /// Other vars of the task passed on to the generated sub-tasks.
    pub pass_through_vars: BTreeMap<String, String>,
}

impl EvgTaskConfig {
    /// Name of the task with any `_gen` suffix removed.
    pub fn display_name(&self) -> &str {
        remove_gen_suffix(&self.task_name)
    }

    /// Name of the resmoke suite the task runs.
    pub fn suite_name(&self) -> &str {
        self.suite.as_deref().unwrap_or_else(|| self.display_name())
    }
}

/// A service for building the configuration of selected tasks.
pub trait TaskConfigBuilder: Sync + Send {
    /// Build the configuration for a selected task.
    ///
    /// # Arguments
    ///
    /// * `task_name` - Name of the task on the build variant.
    /// * `selection` - Tests of the task that were selected.
    /// * `task_def` - Definition of the task.
    /// * `build_variant` - Build variant the task was selected from.
    ///
    /// # Returns
    ///
    /// Configuration of the task, an error if the task does not run tests.
    fn build_task_config(
        &self,
        task_name: &str,
        selection: &TestSelection,
        task_def: &EvgTask,
        build_variant: &str,
    ) -> Result<EvgTaskConfig>;

    /// Find the name of the resmoke suite the given task runs.
    ///
    /// The `--suites` argument takes precedence over the `suite` var, which takes precedence
    /// over the task name.
    fn find_suite_name(&self, task_def: &EvgTask) -> Result<String>;
}

/// Implementation of the task configuration builder.
pub struct TaskConfigBuilderImpl {
    evg_config_utils: Arc<dyn EvgConfigUtils>,
    generating_task: GeneratingTaskInfo,
}

impl TaskConfigBuilderImpl {
    /// Create a new instance of the builder.
    ///
    /// # Arguments
    ///
    /// * `evg_config_utils` - Utilities to interpret evergreen configuration.
    /// * `generating_task` - Details of the task generating the configuration.
    pub fn new(
        evg_config_utils: Arc<dyn EvgConfigUtils>,
        generating_task: GeneratingTaskInfo,
    ) -> Self {
        Self {
            evg_config_utils,
            generating_task,
        }
    }

    /// Get the vars of the function the given kind of task is configured by.
    fn get_task_vars(&self, task_def: &EvgTask, kind: TaskKind) -> BTreeMap<String, String> {
        self.evg_config_utils
            .get_func_vars(task_def, kind.source_function(task_def))
            .into_iter()
            .collect()
    }

    /// Get the dependencies of the task, excluding the generating task.
    fn get_dependencies(&self, task_def: &EvgTask) -> Vec<String> {
        let generating_task = remove_gen_suffix(&self.generating_task.task_name);
        self.evg_config_utils
            .get_task_dependencies(task_def)
            .into_iter()
            .filter(|d| remove_gen_suffix(d) != generating_task)
            .collect()
    }
}

impl TaskConfigBuilder for TaskConfigBuilderImpl {
    fn build_task_config(
        &self,
        task_name: &str,
        selection: &TestSelection,
        task_def: &EvgTask,
        build_variant: &str,
    ) -> Result<EvgTaskConfig> {
        let task_kind = self.evg_config_utils.get_task_kind(task_def)?;
        let mut vars = self.get_task_vars(task_def, task_kind);

        let (suite_arg, origin_resmoke_args) =
            extract_suite_arg(&vars.remove(RESMOKE_ARGS).unwrap_or_default());
        let suite_var = vars.remove(SUITE_NAME);
        let suite = suite_arg.or(suite_var);
        vars.remove(IS_FUZZER);
        let fallback_var = parse_count(vars.remove(FALLBACK_NUM_SUB_SUITES));
        let max_sub_suites_var = parse_count(vars.remove(MAX_SUB_SUITES));

        let (fallback_num_sub_suites, max_sub_suites, display_task_suffix) = match task_kind {
            TaskKind::GenerateResmoke => (
                fallback_var.unwrap_or(DEFAULT_NUM_SUB_SUITES),
                max_sub_suites_var.unwrap_or(DEFAULT_NUM_SUB_SUITES),
                None,
            ),
            TaskKind::GenerateFuzzer => (1, 1, None),
            TaskKind::RunTests => (
                1,
                max_sub_suites_var.unwrap_or(DEFAULT_NUM_SUB_SUITES),
                Some(format!("_{}", build_variant)),
            ),
        };

        let (resmoke_args, selected_tests_to_run) = match selection {
            TestSelection::TestSubset(tests) => {
                let tests: Vec<String> = tests.iter().cloned().collect();
                let args = if origin_resmoke_args.is_empty() {
                    tests.join(" ")
                } else {
                    format!("{} {}", origin_resmoke_args, tests.join(" "))
                };
                (args, Some(tests))
            }
            TestSelection::AllTests => (origin_resmoke_args.clone(), None),
        };

        Ok(EvgTaskConfig {
            task_name: task_name.to_string(),
            build_variant: build_variant.to_string(),
            task_kind,
            resmoke_args,
            origin_resmoke_args,
            suite,
            fallback_num_sub_suites,
            max_sub_suites,
            selected_tests_to_run,
            display_task_suffix,
            dependencies: self.get_dependencies(task_def),
            generating_task: self.generating_task.clone(),
            s3_bucket_task_name: SELECTED_TESTS_BUCKET_TASK.to_string(),
            pass_through_vars: vars,
        })
    }

    fn find_suite_name(&self, task_def: &EvgTask) -> Result<String> {
        let task_kind = self.evg_config_utils.get_task_kind(task_def)?;
        let vars = self.get_task_vars(task_def, task_kind);
        let suite_arg = vars
            .get(RESMOKE_ARGS)
            .and_then(|args| extract_suite_arg(args).0);
        Ok(suite_arg.unwrap_or_else(|| {
            self.evg_config_utils
                .find_suite_name(task_def)
                .to_string()
        }))
    }
}

/// Parse a positive count from an optional var.
fn parse_count(value: Option<String>) -> Option<usize> {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|count| *count > 0)
}
