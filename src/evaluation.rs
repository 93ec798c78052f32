//! Evaluate how well task selection would have caught failures in past versions.
use std::collections::{BTreeSet, HashSet};

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::{event, warn, Level};

use crate::{
    evergreen::evg_api::EvgTaskStatus,
    evergreen_names::{SELECTED_TESTS_BUILD_VARIANTS, SELECTED_TESTS_VARIANT},
    find_selection_signals,
    selected_tests::task_filter::is_task_excluded,
    utils::task_name::remove_gen_suffix,
    Dependencies,
};

/// Outcome of evaluating selection against one build of a version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    /// Evergreen version evaluated.
    pub version_id: String,
    /// Build variant evaluated.
    pub build_variant: String,
    /// Tasks that failed in the build.
    pub failed_tasks: BTreeSet<String>,
    /// Tasks selection would have run for the changes of the version.
    pub tasks_that_would_have_run: BTreeSet<String>,
    /// Fraction of failed tasks selection would have run, None without failures.
    pub captured_ratio: Option<f64>,
}

/// Determine how many failed tasks of past versions selection would have run.
///
/// # Arguments
///
/// * `deps` - Service dependencies.
/// * `version_ids` - Evergreen versions to evaluate.
/// * `build_variants` - Build variants to evaluate, the variants configured on the
///   selected-tests build variant if empty.
/// * `threshold` - Minimum correlation for tests and tasks to be selected.
///
/// # Returns
///
/// Result of each version and build variant evaluated.
pub async fn evaluate_selected_tests(
    deps: &Dependencies,
    version_ids: &[String],
    build_variants: &[String],
    threshold: f64,
) -> Result<Vec<EvaluationResult>> {
    let build_variants = if build_variants.is_empty() {
        default_build_variants(deps)?
    } else {
        build_variants.to_vec()
    };

    let mut results = vec![];
    for version_id in version_ids {
        let version = deps.evg_api.get_version(version_id).await?;
        let manifest = deps
            .evg_api
            .get_manifest(&version.project, &version.revision)
            .await?;
        let changed_files = deps
            .git_service
            .find_changed_files_in_commit(&version.revision, &manifest.module_revisions())?;
        event!(
            Level::DEBUG,
            version_id = version_id.as_str(),
            changed_files = format!("{:?}", changed_files).as_str(),
            "Found changed files"
        );

        for build_variant in &build_variants {
            if let Some(result) = evaluate_build_variant(
                deps,
                version_id,
                &changed_files,
                build_variant,
                threshold,
            )
            .await?
            {
                event!(
                    Level::INFO,
                    version_id = version_id.as_str(),
                    build_variant = build_variant.as_str(),
                    failed_tasks = result.failed_tasks.len(),
                    captured_ratio = result.captured_ratio.unwrap_or_default(),
                    "Evaluated build"
                );
                results.push(result);
            }
        }
    }

    Ok(results)
}

/// Evaluate selection against the build of a version on one build variant.
///
/// Returns None if the version has no build for the build variant.
async fn evaluate_build_variant(
    deps: &Dependencies,
    version_id: &str,
    changed_files: &HashSet<String>,
    build_variant: &str,
    threshold: f64,
) -> Result<Option<EvaluationResult>> {
    let build = match deps
        .evg_api
        .get_build_for_variant(version_id, build_variant)
        .await?
    {
        Some(build) => build,
        None => {
            warn!(version_id, build_variant, "No build found for build variant");
            return Ok(None);
        }
    };

    let failed_tasks = find_failed_tasks(&deps.evg_api.get_build_tasks(&build.id).await?);
    let catalog = deps
        .evg_config_service
        .get_variant_task_catalog(build_variant)?;
    let signals = find_selection_signals(deps, changed_files, &catalog, threshold).await?;
    let tasks_that_would_have_run: BTreeSet<String> = signals
        .all_tasks()
        .iter()
        .map(|t| remove_gen_suffix(t).to_string())
        .collect();
    let captured_ratio = captured_ratio(&failed_tasks, &tasks_that_would_have_run);

    Ok(Some(EvaluationResult {
        version_id: version_id.to_string(),
        build_variant: build_variant.to_string(),
        failed_tasks,
        tasks_that_would_have_run,
        captured_ratio,
    }))
}

/// Build variants selection runs against, as configured on the selected-tests build variant.
fn default_build_variants(deps: &Dependencies) -> Result<Vec<String>> {
    let build_variant_map = deps.evg_config_service.get_build_variant_map();
    let build_variants = build_variant_map
        .get(SELECTED_TESTS_VARIANT)
        .map(|bv| {
            deps.evg_config_utils
                .lookup_and_split_by_whitespace_build_variant_expansion(
                    SELECTED_TESTS_BUILD_VARIANTS,
                    bv,
                )
        })
        .unwrap_or_default();

    if build_variants.is_empty() {
        bail!(
            "No build variants given and '{}' has no '{}' expansion",
            SELECTED_TESTS_VARIANT,
            SELECTED_TESTS_BUILD_VARIANTS
        );
    }
    Ok(build_variants)
}

/// Get the base names of failed tasks that are not excluded from selection.
fn find_failed_tasks(tasks: &[EvgTaskStatus]) -> BTreeSet<String> {
    tasks
        .iter()
        .filter(|t| t.is_failed())
        .map(|t| remove_gen_suffix(&t.display_name).to_string())
        .filter(|t| !is_task_excluded(t))
        .collect()
}

/// Fraction of failed tasks that would have run, None if nothing failed.
fn captured_ratio(
    failed_tasks: &BTreeSet<String>,
    tasks_that_would_have_run: &BTreeSet<String>,
) -> Option<f64> {
    if failed_tasks.is_empty() {
        return None;
    }

    let captured = failed_tasks.intersection(tasks_that_would_have_run).count();
    Some(captured as f64 / failed_tasks.len() as f64)
}

#[cfg(test)]
mod tests {
    use maplit::btreeset;
    use rstest::rstest;

    use super::*;

    fn task_status(display_name: &str, status: &str) -> EvgTaskStatus {
        EvgTaskStatus {
            task_id: format!("{}_id", display_name),
            display_name: display_name.to_string(),
            status: status.to_string(),
        }
    }

    #[test]
    fn test_failed_tasks_should_be_normalized_and_filtered() {
        let tasks = vec![
            task_status("auth_gen", "failed"),
            task_status("jsCore", "Failed"),
            task_status("sharding", "success"),
            task_status("compile_dist_test", "failed"),
        ];

        let failed_tasks = find_failed_tasks(&tasks);

        assert_eq!(
            failed_tasks,
            btreeset! {"auth".to_string(), "jsCore".to_string()}
        );
    }

    #[rstest]
    #[case(vec!["auth", "jsCore"], vec!["auth"], Some(0.5))]
    #[case(vec!["auth"], vec!["auth", "jsCore"], Some(1.0))]
    #[case(vec!["auth"], vec![], Some(0.0))]
    #[case(vec![], vec!["auth"], None)]
    fn test_captured_ratio(
        #[case] failed: Vec<&str>,
        #[case] would_run: Vec<&str>,
        #[case] expected: Option<f64>,
    ) {
        let failed: BTreeSet<String> = failed.iter().map(|t| t.to_string()).collect();
        let would_run: BTreeSet<String> = would_run.iter().map(|t| t.to_string()).collect();

        assert_eq!(captured_ratio(&failed, &would_run), expected);
    }
}
