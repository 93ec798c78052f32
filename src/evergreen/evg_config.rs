use anyhow::{bail, Result};
use std::{collections::HashMap, path::Path, process::Command};

use shrub_rs::models::{project::EvgProject, task::EvgTask, variant::BuildVariant};

pub trait EvgConfigService: Sync + Send {
    /// Get a map of build variant names to build variant definitions.
    fn get_build_variant_map(&self) -> HashMap<String, &BuildVariant>;

    /// Get the task definitions of all tasks configured to run on the given build variant.
    ///
    /// # Arguments
    ///
    /// * `build_variant` - Name of build variant to query.
    ///
    /// # Returns
    ///
    /// Map of task names to task definitions, an error if the build variant does not exist.
    fn get_variant_task_catalog(&self, build_variant: &str) -> Result<HashMap<String, EvgTask>>;

    /// Get the directories of all modules in the project.
    fn get_module_dirs(&self) -> Vec<String>;
}

/// Items needed to implement an evergreen configuration service.
pub struct EvgProjectConfig {
    /// Shrub representation of the evg project.
    evg_project: EvgProject,
}

impl EvgProjectConfig {
    /// Create a new instance of an EvgConfigService.
    ///
    /// # Parameters
    ///
    /// * `evg_project_location` - Path to evergreen project configuration to load.
    pub fn new(evg_project_location: &Path) -> Result<Self> {
        let evg_project = get_project_config(evg_project_location)?;
        Ok(Self { evg_project })
    }

    /// Create a new instance from an already parsed project.
    pub fn from_project(evg_project: EvgProject) -> Self {
        Self { evg_project }
    }
}

impl EvgConfigService for EvgProjectConfig {
    fn get_build_variant_map(&self) -> HashMap<String, &BuildVariant> {
        self.evg_project.build_variant_map()
    }

    fn get_variant_task_catalog(&self, build_variant: &str) -> Result<HashMap<String, EvgTask>> {
        let build_variant_map = self.get_build_variant_map();
        let variant = match build_variant_map.get(build_variant) {
            Some(variant) => variant,
            None => bail!(
                "Build variant '{}' not found in evergreen project configuration",
                build_variant
            ),
        };

        let task_def_map = self.evg_project.task_def_map();
        Ok(variant
            .tasks
            .iter()
            .filter_map(|task_ref| {
                task_def_map
                    .get(&task_ref.name)
                    .map(|task_def| (task_ref.name.clone(), (*task_def).clone()))
            })
            .collect())
    }

    fn get_module_dirs(&self) -> Vec<String> {
        self.evg_project
            .modules
            .as_ref()
            .map(|modules| {
                modules
                    .iter()
                    .map(|module| format!("{}/{}", &module.prefix, module.name))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Evaluate the evergreen configuration and load it into a shrub project.
///
/// # Arguments
///
/// * `location` - Path to file containing evergreen configuration to load.
///
/// # Returns
///
/// Shrub representation of evergreen configuration.
fn get_project_config(location: &Path) -> Result<EvgProject> {
    let location = match location.to_str() {
        Some(location) => location,
        None => bail!("Invalid evergreen project location: {}", location.display()),
    };
    let evg_config_yaml = Command::new("evergreen")
        .args(["evaluate", location])
        .output()?;
    if !evg_config_yaml.status.success() {
        bail!(
            "Failed to evaluate evergreen project '{}': {}",
            location,
            String::from_utf8_lossy(&evg_config_yaml.stderr)
        );
    }
    match EvgProject::from_yaml_str(std::str::from_utf8(&evg_config_yaml.stdout)?) {
        Ok(evg_project) => Ok(evg_project),
        Err(err) => bail!("Could not parse evergreen project '{}': {}", location, err),
    }
}

#[cfg(test)]
mod tests {
    use shrub_rs::models::task::TaskRef;

    use super::*;

    fn task_ref(name: &str) -> TaskRef {
        EvgTask {
            name: name.to_string(),
            ..Default::default()
        }
        .get_reference(None, None)
    }

    fn build_project() -> EvgProject {
        EvgProject {
            buildvariants: vec![BuildVariant {
                name: "enterprise-rhel".to_string(),
                tasks: vec![
                    task_ref("auth_gen"),
                    task_ref("jsCore"),
                    task_ref("task_group_only"),
                ],
                ..Default::default()
            }],
            tasks: vec![
                EvgTask {
                    name: "auth_gen".to_string(),
                    ..Default::default()
                },
                EvgTask {
                    name: "jsCore".to_string(),
                    ..Default::default()
                },
                EvgTask {
                    name: "not_on_variant".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_variant_task_catalog_should_only_include_defined_tasks_on_variant() {
        let config = EvgProjectConfig::from_project(build_project());

        let catalog = config.get_variant_task_catalog("enterprise-rhel").unwrap();

        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains_key("auth_gen"));
        assert!(catalog.contains_key("jsCore"));
    }

    #[test]
    fn test_variant_task_catalog_for_unknown_variant_should_error() {
        let config = EvgProjectConfig::from_project(build_project());

        assert!(config.get_variant_task_catalog("unknown").is_err());
    }

    #[test]
    fn test_module_dirs_with_no_modules_should_be_empty() {
        let config = EvgProjectConfig::from_project(build_project());

        assert!(config.get_module_dirs().is_empty());
    }
}
