//! Utilities for working with task names.

const GEN_SUFFIX: &str = "_gen";

/// Generate a name for a generated task.
///
/// # Arguments
///
/// * `display_name` - Name of parent task being generated.
/// * `sub_task_index` - Index of sub-task being named.
/// * `total_tasks` - Total number of sub-tasks generated for this parent task.
/// * `build_variant` - Build variant the task will run on.
pub fn name_generated_task(
    display_name: &str,
    sub_task_index: Option<usize>,
    total_tasks: usize,
    build_variant: Option<&str>,
) -> String {
    let suffix = if let Some(build_variant) = build_variant {
        format!("_{}", build_variant)
    } else {
        "".to_string()
    };

    if let Some(index) = sub_task_index {
        let alignment = (total_tasks as f64).log10().ceil() as usize;
        format!(
            "{}_{:0fill$}{}",
            display_name,
            index,
            suffix,
            fill = alignment
        )
    } else {
        format!("{}_misc{}", display_name, suffix)
    }
}

/// Remove the '_gen' from end of the given task name if it exists.
///
/// # Arguments
///
/// * `task_name` - Name of task.
///
/// # Returns
///
/// Name of task with `_gen` stripped off.
pub fn remove_gen_suffix(task_name: &str) -> &str {
    task_name.strip_suffix(GEN_SUFFIX).unwrap_or(task_name)
}

/// Add the '_gen' suffix to the given task name.
pub fn add_gen_suffix(task_name: &str) -> String {
    format!("{}{}", task_name, GEN_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case("task", Some(0), 10, None, "task_0")]
    #[case("task", Some(0), 10, Some("linux"), "task_0_linux")]
    #[case("task", Some(42), 1001, None, "task_0042")]
    #[case("task", Some(42), 1001, Some("linux"), "task_0042_linux")]
    #[case("task", None, 1001, None, "task_misc")]
    #[case("task", None, 1001, Some("linux"), "task_misc_linux")]
    #[case("task", None, 0, None, "task_misc")]
    #[case("task", Some(0), 1, Some("linux"), "task_0_linux")]
    fn test_name_generated_task(
        #[case] name: &str,
        #[case] index: Option<usize>,
        #[case] total: usize,
        #[case] build_variant: Option<&str>,
        #[case] expected: &str,
    ) {
        let task_name = name_generated_task(name, index, total, build_variant);

        assert_eq!(task_name, expected);
    }

    #[rstest]
    #[case("task_name", "task_name")]
    #[case("task_name_gen", "task_name")]
    #[case("task_name_", "task_name_")]
    fn test_remove_gen_suffix(#[case] original_task: &str, #[case] expected_task: &str) {
        assert_eq!(remove_gen_suffix(original_task), expected_task);
    }

    #[test]
    fn test_add_gen_suffix() {
        assert_eq!(add_gen_suffix("auth"), "auth_gen");
    }
}
