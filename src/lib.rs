//! Entry point into the selected tests generation logic.
//!
//! This code will ask the selected-tests service which tests and tasks are related to the
//! files changed in a patch build, and create task definitions to run only those tests and
//! tasks on a build variant. The generated tasks are added to the build variant with a
//! 'generate.tasks' configuration file.
#![cfg_attr(feature = "strict", deny(missing_docs))]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use evergreen::{
    evg_api::{build_retryable_client, EvgApiClient, EvgApiService, EvgAuthConfig},
    evg_config::{EvgConfigService, EvgProjectConfig},
    evg_config_utils::{EvgConfigUtils, EvgConfigUtilsImpl},
    evg_task_history::TaskHistoryServiceImpl,
};
use resmoke::resmoke_proxy::ResmokeProxy;
use selected_tests::{
    selected_tests_service::{SelectedTestsClient, SelectedTestsConfig, SelectedTestsService},
    task_config::{TaskConfigBuilder, TaskConfigBuilderImpl},
    task_filter::select_tasks,
    task_selection::merge_selections,
    test_file_filter::select_test_files,
    test_task_mapping::{TestTaskMapper, TestTaskMapperImpl},
};
use services::config_emitter::{ConfigEmitter, ConfigEmitterImpl};
use shrub_rs::models::task::EvgTask;
use task_types::selected_sub_suites::{SubSuiteGenerator, SubSuiteGeneratorImpl};
use tracing::{event, Level};
use utils::{
    fs_service::FsServiceImpl,
    git_service::{GitService, GitServiceImpl},
};

pub use evaluation::{evaluate_selected_tests, EvaluationResult};
pub use evergreen::evg_expansions::EvgExpansions;
pub use selected_tests::task_config::GeneratingTaskInfo;

mod evaluation;
mod evergreen;
mod evergreen_names;
mod resmoke;
mod selected_tests;
mod services;
mod task_types;
mod utils;

/// Default correlation threshold for the selected-tests service.
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Information about the Evergreen project being run against.
pub struct ProjectInfo {
    /// Path to the evergreen project configuration yaml.
    pub evg_project_location: PathBuf,

    /// Evergreen project being run.
    pub evg_project: String,
}

impl ProjectInfo {
    /// Create a new ProjectInfo struct.
    ///
    /// # Arguments
    ///
    /// * `evg_project_location` - Path to the evergreen project configuration yaml.
    /// * `evg_project` - Evergreen project being run.
    ///
    /// # Returns
    ///
    /// Instance of ProjectInfo with provided info.
    pub fn new<P: AsRef<Path>>(evg_project_location: P, evg_project: &str) -> Self {
        Self {
            evg_project_location: evg_project_location.as_ref().to_path_buf(),
            evg_project: evg_project.to_string(),
        }
    }

    /// Get the project configuration for this project.
    pub fn get_project_config(&self) -> Result<EvgProjectConfig> {
        EvgProjectConfig::new(&self.evg_project_location)
    }
}

/// Configuration required to execute task selection.
pub struct ExecutionConfiguration<'a> {
    /// Information about the project being generated under.
    pub project_info: &'a ProjectInfo,
    /// Path to the evergreen API authentication file.
    pub evg_auth_file: &'a Path,
    /// Path to the selected-tests service configuration file.
    pub selected_tests_config_file: &'a Path,
    /// Root of the git repository to inspect.
    pub repo_root: &'a Path,
    /// Should task splitting use the fallback method by default.
    pub use_task_split_fallback: bool,
    /// Command to execute resmoke.
    pub resmoke_command: &'a str,
    /// Task generating the configuration.
    pub generating_task: GeneratingTaskInfo,
}

/// Collection of services needed to execution.
#[derive(Clone)]
pub struct Dependencies {
    evg_config_service: Arc<dyn EvgConfigService>,
    evg_config_utils: Arc<dyn EvgConfigUtils>,
    evg_api: Arc<dyn EvgApiService>,
    git_service: Arc<dyn GitService>,
    selected_tests_service: Arc<dyn SelectedTestsService>,
    test_task_mapper: Arc<dyn TestTaskMapper>,
    task_config_builder: Arc<dyn TaskConfigBuilder>,
    sub_suite_generator: Arc<dyn SubSuiteGenerator>,
    config_emitter: Arc<dyn ConfigEmitter>,
}

impl Dependencies {
    /// Create a new set of dependency instances.
    ///
    /// # Arguments
    ///
    /// * `execution_config` - Information about how generation to take place.
    ///
    /// # Returns
    ///
    /// A set of dependencies to run against.
    pub fn new(execution_config: ExecutionConfiguration) -> Result<Self> {
        let project_info = execution_config.project_info;
        let fs_service = Arc::new(FsServiceImpl::new());
        let discovery_service = Arc::new(ResmokeProxy::new(execution_config.resmoke_command));
        let evg_config_service = Arc::new(project_info.get_project_config()?);
        let evg_config_utils = Arc::new(EvgConfigUtilsImpl::new());
        let git_service = Arc::new(GitServiceImpl::new(
            execution_config.repo_root,
            &evg_config_service.get_module_dirs(),
        )?);

        let evg_auth = EvgAuthConfig::from_yaml_file(execution_config.evg_auth_file)?;
        let evg_api = Arc::new(EvgApiClient::new(build_retryable_client(), evg_auth));
        let selected_tests_service = Arc::new(SelectedTestsClient::new(
            SelectedTestsConfig::from_yaml_file(execution_config.selected_tests_config_file)?,
            &project_info.evg_project,
        )?);

        let task_config_builder = Arc::new(TaskConfigBuilderImpl::new(
            evg_config_utils.clone(),
            execution_config.generating_task,
        ));
        let test_task_mapper = Arc::new(TestTaskMapperImpl::new(
            evg_config_utils.clone(),
            task_config_builder.clone(),
            discovery_service.clone(),
        ));
        let task_history_service = Arc::new(TaskHistoryServiceImpl::new(
            evg_api.clone(),
            project_info.evg_project.clone(),
        ));
        let sub_suite_generator = Arc::new(SubSuiteGeneratorImpl::new(
            task_history_service,
            discovery_service,
            fs_service.clone(),
            execution_config.use_task_split_fallback,
        ));
        let config_emitter = Arc::new(ConfigEmitterImpl::new(fs_service));

        Ok(Self {
            evg_config_service,
            evg_config_utils,
            evg_api,
            git_service,
            selected_tests_service,
            test_task_mapper,
            task_config_builder,
            sub_suite_generator,
            config_emitter,
        })
    }
}

/// Tasks related to a set of changed files on a build variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSignals {
    /// Tasks owning related test files, with the related tests they own.
    pub test_level: BTreeMap<String, BTreeSet<String>>,
    /// Tasks related as a whole.
    pub task_level: BTreeSet<String>,
}

impl SelectionSignals {
    /// Names of all tasks selected by either signal.
    pub fn all_tasks(&self) -> BTreeSet<String> {
        self.test_level
            .keys()
            .chain(self.task_level.iter())
            .cloned()
            .collect()
    }
}

/// Query the selected-tests service for the tests and tasks related to the changed files.
///
/// # Arguments
///
/// * `deps` - Service dependencies.
/// * `changed_files` - Files changed in the patch.
/// * `catalog` - Task definitions available on the build variant.
/// * `threshold` - Minimum correlation for tests and tasks to be selected.
///
/// # Returns
///
/// Test-level and task-level selections on the build variant.
async fn find_selection_signals(
    deps: &Dependencies,
    changed_files: &HashSet<String>,
    catalog: &HashMap<String, EvgTask>,
    threshold: f64,
) -> Result<SelectionSignals> {
    let test_mappings = deps
        .selected_tests_service
        .get_test_mappings(threshold, changed_files)
        .await?;
    let related_tests = select_test_files(&test_mappings, deps.git_service.as_ref())?;
    event!(
        Level::DEBUG,
        related_tests = format!("{:?}", related_tests).as_str(),
        "Related test files found"
    );
    let test_level = if related_tests.is_empty() {
        BTreeMap::new()
    } else {
        deps.test_task_mapper
            .map_tests_to_tasks(&related_tests, catalog)?
    };

    let task_mappings = deps
        .selected_tests_service
        .get_task_mappings(threshold, changed_files)
        .await?;
    let task_level = select_tasks(&task_mappings, catalog);
    event!(
        Level::DEBUG,
        related_tasks = format!("{:?}", task_level).as_str(),
        "Related tasks found"
    );

    Ok(SelectionSignals {
        test_level,
        task_level,
    })
}

/// Create the configuration to run the tests and tasks related to the given changed files.
///
/// # Arguments
///
/// * `deps` - Dependencies needed to perform generation.
/// * `changed_files` - Files changed in the patch.
/// * `build_variant` - Build variant to select tasks from.
/// * `threshold` - Minimum correlation for tests and tasks to be selected.
///
/// # Returns
///
/// Map of file names to file contents, always containing the 'generate.tasks' configuration.
pub async fn generate_selected_tests_config(
    deps: &Dependencies,
    changed_files: &HashSet<String>,
    build_variant: &str,
    threshold: f64,
) -> Result<BTreeMap<String, String>> {
    let catalog = deps
        .evg_config_service
        .get_variant_task_catalog(build_variant)?;
    let signals = find_selection_signals(deps, changed_files, &catalog, threshold).await?;
    let selection = merge_selections(signals.test_level, &signals.task_level);
    event!(
        Level::INFO,
        build_variant,
        selected_tasks = selection.len(),
        "Selected tasks"
    );

    let mut generated_suites = vec![];
    for (task_name, test_selection) in &selection {
        let task_def = catalog
            .get(task_name)
            .ok_or_else(|| anyhow!("Task '{}' not found on '{}'", task_name, build_variant))?;
        let task_config = deps.task_config_builder.build_task_config(
            task_name,
            test_selection,
            task_def,
            build_variant,
        )?;
        generated_suites.push(
            deps.sub_suite_generator
                .generate_sub_suites(&task_config)
                .await?,
        );
    }

    deps.config_emitter.assemble(build_variant, &generated_suites)
}

/// Select tests for the changes in the working tree and write the generated configuration.
///
/// # Arguments
///
/// * `deps` - Dependencies needed to perform generation.
/// * `build_variant` - Build variant to select tasks from.
/// * `threshold` - Minimum correlation for tests and tasks to be selected.
/// * `target_directory` - Directory to store generated configuration.
pub async fn generate_configuration(
    deps: &Dependencies,
    build_variant: &str,
    threshold: f64,
    target_directory: &Path,
) -> Result<()> {
    let changed_files = deps.git_service.find_changed_files()?;
    event!(
        Level::DEBUG,
        changed_files = format!("{:?}", changed_files).as_str(),
        "Found changed files"
    );

    let files =
        generate_selected_tests_config(deps, &changed_files, build_variant, threshold).await?;
    deps.config_emitter.write(target_directory, &files)
}
