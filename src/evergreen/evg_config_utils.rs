use std::collections::HashMap;

use anyhow::{bail, Result};
use shrub_rs::models::commands::EvgCommand::Function;
use shrub_rs::models::params::ParamValue;
use shrub_rs::models::{commands::FunctionCall, task::EvgTask, variant::BuildVariant};

use crate::evergreen_names::{
    GENERATE_FUZZER_TASKS, GENERATE_RESMOKE_TASKS, IS_FUZZER, RUN_TESTS, SUITE_NAME,
};
use crate::utils::task_name::remove_gen_suffix;

/// How a task definition executes its tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Task generates resmoke sub-tasks via 'generate resmoke tasks'.
    GenerateResmoke,
    /// Task generates fuzzer sub-tasks.
    GenerateFuzzer,
    /// Task runs resmoke directly via 'run tests'.
    RunTests,
}

impl TaskKind {
    /// Name of the function holding the vars for this kind of task.
    pub fn source_function(&self, task: &EvgTask) -> &'static str {
        match self {
            TaskKind::GenerateResmoke => GENERATE_RESMOKE_TASKS,
            TaskKind::GenerateFuzzer => {
                if find_func(task, GENERATE_FUZZER_TASKS).is_some() {
                    GENERATE_FUZZER_TASKS
                } else {
                    GENERATE_RESMOKE_TASKS
                }
            }
            TaskKind::RunTests => RUN_TESTS,
        }
    }
}

pub trait EvgConfigUtils: Sync + Send {
    /// Determine how the given task executes its tests.
    ///
    /// # Arguments
    ///
    /// * `task` - Evergreen task to check.
    ///
    /// # Returns
    ///
    /// Kind of the task, an `Error` if the task does not run tests.
    fn get_task_kind(&self, task: &EvgTask) -> Result<TaskKind>;

    /// Determine if the given evergreen task a fuzzer task.
    fn is_task_fuzzer(&self, task: &EvgTask) -> bool;

    /// Find the name of the resmoke suite the given task executes.
    ///
    /// # Arguments
    ///
    /// * `task` - Evergreen task to check.
    ///
    /// # Returns
    ///
    /// Name of task the given resmoke suite executes.
    fn find_suite_name<'a>(&self, task: &'a EvgTask) -> &'a str;

    /// Get the names of the tasks the given task depends on.
    fn get_task_dependencies(&self, task: &EvgTask) -> Vec<String>;

    /// Get all the vars passed to the given function in the given task.
    ///
    /// # Arguments
    ///
    /// * `task` - Shrub task to query.
    /// * `func_name` - Name of function to query.
    ///
    /// # Returns
    ///
    /// Map of var names to values with all values converted to strings.
    fn get_func_vars(&self, task: &EvgTask, func_name: &str) -> HashMap<String, String>;

    /// Lookup the specified expansion in the given build variant.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of expansion to query.
    /// * `build_variant` - Build Variant to query.
    ///
    /// # Returns
    ///
    /// Value of expansion if it exists.
    fn lookup_build_variant_expansion(
        &self,
        name: &str,
        build_variant: &BuildVariant,
    ) -> Option<String>;

    /// Lookup the specified expansion in the given build variant and split it by whitespace.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of expansion to query.
    /// * `build_variant` - Build Variant to query.
    ///
    /// # Returns
    ///
    /// List of values of the expansion, empty if it does not exist.
    fn lookup_and_split_by_whitespace_build_variant_expansion(
        &self,
        name: &str,
        build_variant: &BuildVariant,
    ) -> Vec<String>;
}

/// Service for utilities to help interpret evergreen configuration.
pub struct EvgConfigUtilsImpl {}

impl EvgConfigUtilsImpl {
    /// Create a new instance of the EvgConfigUtilsImpl.
    pub fn new() -> Self {
        Self {}
    }
}

impl EvgConfigUtils for EvgConfigUtilsImpl {
    fn get_task_kind(&self, task: &EvgTask) -> Result<TaskKind> {
        if self.is_task_fuzzer(task) {
            Ok(TaskKind::GenerateFuzzer)
        } else if find_func(task, GENERATE_RESMOKE_TASKS).is_some() {
            Ok(TaskKind::GenerateResmoke)
        } else if find_func(task, RUN_TESTS).is_some() {
            Ok(TaskKind::RunTests)
        } else {
            bail!("Task '{}' does not run resmoke tests", task.name)
        }
    }

    fn is_task_fuzzer(&self, task: &EvgTask) -> bool {
        if find_func(task, GENERATE_FUZZER_TASKS).is_some() {
            return true;
        }
        self.get_func_vars(task, GENERATE_RESMOKE_TASKS)
            .get(IS_FUZZER)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    fn find_suite_name<'a>(&self, task: &'a EvgTask) -> &'a str {
        let suite = [GENERATE_RESMOKE_TASKS, GENERATE_FUZZER_TASKS, RUN_TESTS]
            .iter()
            .filter_map(|f| find_func(task, f))
            .find_map(|func| match func.vars.as_ref()?.get(SUITE_NAME) {
                Some(ParamValue::String(value)) => Some(value.as_str()),
                _ => None,
            });
        suite.unwrap_or_else(|| remove_gen_suffix(&task.name))
    }

    fn get_task_dependencies(&self, task: &EvgTask) -> Vec<String> {
        task.depends_on
            .as_ref()
            .map(|deps| deps.iter().map(|d| d.name.to_string()).collect())
            .unwrap_or_default()
    }

    fn get_func_vars(&self, task: &EvgTask, func_name: &str) -> HashMap<String, String> {
        find_func(task, func_name)
            .and_then(|func| func.vars.as_ref())
            .map(|vars| {
                vars.iter()
                    .map(|(k, v)| (k.to_string(), param_to_string(v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lookup_build_variant_expansion(
        &self,
        name: &str,
        build_variant: &BuildVariant,
    ) -> Option<String> {
        build_variant
            .expansions
            .as_ref()
            .and_then(|expansions| expansions.get(name))
            .map(|v| v.to_string())
    }

    fn lookup_and_split_by_whitespace_build_variant_expansion(
        &self,
        name: &str,
        build_variant: &BuildVariant,
    ) -> Vec<String> {
        self.lookup_build_variant_expansion(name, build_variant)
            .unwrap_or_default()
            .split_whitespace()
            .map(|s| s.to_string())
            .collect()
    }
}

/// Get the shrub function call with the given name in the given task.
///
/// # Arguments
///
/// * `task` - Shrub task to query.
/// * `func_name` - Name of function to find.
///
/// # Returns
///
/// Function call to the named function.
fn find_func<'a>(task: &'a EvgTask, func_name: &str) -> Option<&'a FunctionCall> {
    task.commands.as_ref()?.iter().find_map(|c| match c {
        Function(func) if func.func == func_name => Some(func),
        _ => None,
    })
}

/// Convert a function parameter to its string representation.
fn param_to_string(value: &ParamValue) -> String {
    match value {
        ParamValue::String(value) => value.clone(),
        other => match serde_json::to_value(other) {
            Ok(serde_json::Value::String(value)) => value,
            Ok(value) => value.to_string(),
            Err(_) => String::new(),
        },
    }
}
