//! Resolve correlated task names against a build variant and drop excluded tasks.
use std::collections::{BTreeSet, HashMap, HashSet};

use lazy_static::lazy_static;
use shrub_rs::models::task::EvgTask;
use tracing::{event, Level};

use super::selected_tests_service::TaskMapping;
use crate::utils::task_name::{add_gen_suffix, remove_gen_suffix};

lazy_static! {
    /// Base names of tasks that are never selected.
    static ref EXCLUDED_TASKS: HashSet<&'static str> = HashSet::from([
        // compile
        "compile",
        "compile_all",
        "compile_all_run_unittests_TG",
        "compile_core_tools",
        "compile_dist_test",
        "compile_libfuzzertests",
        "compile_without_package",
        "archive_dist_test_debug",
        "scons_compile_cache",
        // lint
        "lint",
        "lint_clang_format",
        "lint_cpplint",
        "lint_errorcodes",
        "lint_eslint",
        "lint_fuzzer_sanity_all",
        "lint_fuzzer_sanity_patch",
        "lint_pylinters",
        "lint_yaml",
        "lint_shellscripts",
        // publish and package
        "package",
        "push",
        "publish_packages",
        "test_packages",
        "selected_tests",
        "burn_in_tests",
        "burn_in_tags",
        // fuzzers
        "aggregation_fuzzer",
        "aggregation_expression_multiversion_fuzzer",
        "aggregation_optimization_fuzzer",
        "aggregation_wildcard_fuzzer",
        "initial_sync_fuzzer",
        "jstestfuzz",
        "jstestfuzz_concurrent",
        "jstestfuzz_concurrent_replication",
        "jstestfuzz_concurrent_sharded",
        "jstestfuzz_interrupt",
        "jstestfuzz_replication",
        "jstestfuzz_sharded",
        "libfuzzertests",
        "query_fuzzer",
        "rollback_fuzzer",
        "update_fuzzer",
        // concurrency
        "concurrency",
        "concurrency_replication",
        "concurrency_replication_causal_consistency",
        "concurrency_sharded_replication",
        "concurrency_sharded_replication_with_balancer",
        "concurrency_simultaneous",
        "concurrency_simultaneous_replication",
        // native unit tests
        "benchmarks",
        "benchmarks_orphaned",
        "dbtest",
        "integration_tests_replset",
        "integration_tests_sharded",
        "integration_tests_standalone",
        "unittest_shell_hang_analyzer",
        "unittests",
    ]);
}

/// Determine if the given task is excluded from selection.
///
/// # Arguments
///
/// * `task_name` - Name of task to check, with or without the `_gen` suffix.
pub fn is_task_excluded(task_name: &str) -> bool {
    EXCLUDED_TASKS.contains(remove_gen_suffix(task_name))
}

/// Resolve a task name returned by the selected-tests service against a build variant catalog.
///
/// # Arguments
///
/// * `task_name` - Name of task to resolve.
/// * `catalog` - Task definitions available on the build variant.
///
/// # Returns
///
/// Name of the task in the catalog, trying the `_gen` version if the plain name is absent.
pub fn resolve_task_name(task_name: &str, catalog: &HashMap<String, EvgTask>) -> Option<String> {
    if catalog.contains_key(task_name) {
        return Some(task_name.to_string());
    }
    let gen_name = add_gen_suffix(task_name);
    if catalog.contains_key(&gen_name) {
        return Some(gen_name);
    }
    None
}

/// Select the tasks from the given mappings that exist on the build variant and are not excluded.
///
/// # Arguments
///
/// * `mappings` - Correlations returned by the selected-tests service.
/// * `catalog` - Task definitions available on the build variant.
///
/// # Returns
///
/// Set of resolved task names.
pub fn select_tasks(
    mappings: &[TaskMapping],
    catalog: &HashMap<String, EvgTask>,
) -> BTreeSet<String> {
    mappings
        .iter()
        .flat_map(|m| m.tasks.iter())
        .filter_map(|task| {
            let resolved = resolve_task_name(&task.name, catalog);
            if resolved.is_none() {
                event!(
                    Level::DEBUG,
                    task_name = task.name.as_str(),
                    "Task not found on build variant"
                );
            }
            resolved
        })
        .filter(|task_name| !is_task_excluded(task_name))
        .collect()
}

#[cfg(test)]
mod tests {
    use maplit::hashmap;
    use rstest::rstest;

    use super::*;
    use crate::selected_tests::selected_tests_service::TaskEntry;

    fn build_catalog(task_names: &[&str]) -> HashMap<String, EvgTask> {
        task_names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    EvgTask {
                        name: name.to_string(),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    fn mapping(task_names: &[&str]) -> TaskMapping {
        TaskMapping {
            source_file: "src/file1.cpp".to_string(),
            tasks: task_names
                .iter()
                .map(|name| TaskEntry {
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    #[rstest]
    #[case("compile", true)]
    #[case("jstestfuzz_gen", true)]
    #[case("jstestfuzz", true)]
    #[case("auth_gen", false)]
    #[case("auth", false)]
    fn test_is_task_excluded(#[case] task_name: &str, #[case] expected: bool) {
        assert_eq!(is_task_excluded(task_name), expected);
    }

    #[test]
    fn test_resolve_task_name_should_fallback_to_gen_suffix() {
        let catalog = build_catalog(&["foo_gen", "bar"]);

        assert_eq!(resolve_task_name("foo", &catalog), Some("foo_gen".to_string()));
        assert_eq!(resolve_task_name("bar", &catalog), Some("bar".to_string()));
        assert_eq!(resolve_task_name("baz", &catalog), None);
    }

    #[test]
    fn test_resolve_task_name_should_prefer_exact_match() {
        let catalog = hashmap! {
            "foo".to_string() => EvgTask::default(),
            "foo_gen".to_string() => EvgTask::default(),
        };

        assert_eq!(resolve_task_name("foo", &catalog), Some("foo".to_string()));
    }

    #[test]
    fn test_select_tasks_should_resolve_and_exclude() {
        let catalog = build_catalog(&["auth_gen", "jsCore", "jstestfuzz_gen", "compile"]);
        let mappings = vec![
            mapping(&["auth", "jsCore", "missing"]),
            mapping(&["jstestfuzz", "compile", "auth"]),
        ];

        let selected = select_tasks(&mappings, &catalog);

        assert_eq!(
            selected,
            BTreeSet::from(["auth_gen".to_string(), "jsCore".to_string()])
        );
    }

    #[test]
    fn test_select_tasks_with_no_mappings_should_be_empty() {
        let catalog = build_catalog(&["auth_gen"]);

        assert!(select_tasks(&[], &catalog).is_empty());
    }
}
