//! Expansions of the evergreen task generating the selected tests configuration.
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use tracing::error;

use crate::utils::task_name::remove_gen_suffix;

/// Expansions from evergreen to determine settings for how task should be generated.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EvgExpansions {
    /// Evergreen project being run.
    pub project: String,
    /// Git revision being run against.
    pub revision: String,
    /// Name of the generating task.
    pub task_name: String,
    /// Build variant the generating task runs on.
    pub build_variant: String,
    /// ID of the build the generating task belongs to.
    pub build_id: String,
}

impl EvgExpansions {
    /// Read evergreen expansions from the given yaml file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to YAML file to read.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)?;

        let expansions: Result<Self, serde_yaml::Error> = serde_yaml::from_str(&contents);
        if expansions.is_err() {
            error!(
                file = path.as_ref().display().to_string(),
                contents = &contents,
                "Failed to parse yaml for EvgExpansions from file",
            );
        }

        Ok(expansions?)
    }

    /// File to store generated configuration under.
    pub fn config_location(&self) -> String {
        format!(
            "{}/{}/generate_tasks/{}_gen-{}.tgz",
            self.project,
            self.revision,
            remove_gen_suffix(&self.task_name),
            self.build_id
        )
    }
}
