//! Assemble and write the generated configuration files.
use std::{collections::BTreeMap, path::Path, sync::Arc};

use anyhow::{bail, Result};
use shrub_rs::models::{project::EvgProject, variant::BuildVariant};
use tracing::{event, Level};

use crate::{
    task_types::{generated_suite::GeneratedSuite, selected_sub_suites::GeneratedSelectedSuite},
    utils::fs_service::FsService,
};

/// Name of the file holding the generate.tasks configuration.
pub const SELECTED_TESTS_CONFIG_FILE: &str = "selected_tests_config.json";

/// A service for emitting generated configuration.
pub trait ConfigEmitter: Sync + Send {
    /// Assemble the generated files for the given generated suites.
    ///
    /// # Arguments
    ///
    /// * `build_variant` - Build variant the generated tasks should run on.
    /// * `generated_suites` - Generated sub-tasks and suite files of each selected task.
    ///
    /// # Returns
    ///
    /// Map of file names to file contents, always containing the evergreen configuration.
    fn assemble(
        &self,
        build_variant: &str,
        generated_suites: &[GeneratedSelectedSuite],
    ) -> Result<BTreeMap<String, String>>;

    /// Write the given files to the target directory.
    ///
    /// # Arguments
    ///
    /// * `target_directory` - Directory to write files to, created if missing.
    /// * `files` - Map of file names to file contents.
    fn write(&self, target_directory: &Path, files: &BTreeMap<String, String>) -> Result<()>;
}

/// Implementation of the config emitter.
pub struct ConfigEmitterImpl {
    fs_service: Arc<dyn FsService>,
}

impl ConfigEmitterImpl {
    /// Create a new instance of the config emitter.
    ///
    /// # Arguments
    ///
    /// * `fs_service` - Service to write to the file system.
    pub fn new(fs_service: Arc<dyn FsService>) -> Self {
        Self { fs_service }
    }
}

impl ConfigEmitter for ConfigEmitterImpl {
    fn assemble(
        &self,
        build_variant: &str,
        generated_suites: &[GeneratedSelectedSuite],
    ) -> Result<BTreeMap<String, String>> {
        let mut files = BTreeMap::new();
        let evg_project = build_evg_project(build_variant, generated_suites);
        files.insert(
            SELECTED_TESTS_CONFIG_FILE.to_string(),
            serde_json::to_string_pretty(&evg_project)?,
        );

        for generated_suite in generated_suites {
            for (file_name, contents) in &generated_suite.suite_files {
                if files.insert(file_name.clone(), contents.clone()).is_some() {
                    bail!("Generated file '{}' was created more than once", file_name);
                }
            }
        }

        Ok(files)
    }

    fn write(&self, target_directory: &Path, files: &BTreeMap<String, String>) -> Result<()> {
        for (file_name, contents) in files {
            self.fs_service
                .write_file(&target_directory.join(file_name), contents)?;
        }
        event!(
            Level::INFO,
            target_directory = target_directory.display().to_string().as_str(),
            files = files.len(),
            "Wrote generated configuration"
        );
        Ok(())
    }
}

/// Build the generate.tasks project for the given generated suites.
///
/// With nothing generated, the project has no tasks or build variants.
fn build_evg_project(
    build_variant: &str,
    generated_suites: &[GeneratedSelectedSuite],
) -> EvgProject {
    let generated_suites: Vec<&GeneratedSelectedSuite> = generated_suites
        .iter()
        .filter(|g| !g.sub_tasks.is_empty())
        .collect();
    if generated_suites.is_empty() {
        return EvgProject::default();
    }

    let tasks = generated_suites
        .iter()
        .flat_map(|g| g.sub_tasks())
        .collect();
    let gen_build_variant = BuildVariant {
        name: build_variant.to_string(),
        tasks: generated_suites
            .iter()
            .flat_map(|g| g.build_task_refs())
            .collect(),
        display_tasks: Some(
            generated_suites
                .iter()
                .map(|g| g.build_display_task())
                .collect(),
        ),
        ..Default::default()
    };

    EvgProject {
        buildvariants: vec![gen_build_variant],
        tasks,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Mutex};

    use maplit::btreemap;
    use shrub_rs::models::task::EvgTask;

    use super::*;

    struct MockFsService {
        written: Mutex<Vec<PathBuf>>,
    }

    impl FsService for MockFsService {
        fn file_exists(&self, _path: &str) -> bool {
            todo!()
        }

        fn write_file(&self, path: &Path, _contents: &str) -> Result<()> {
            self.written.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    fn build_emitter() -> (ConfigEmitterImpl, Arc<MockFsService>) {
        let fs_service = Arc::new(MockFsService {
            written: Mutex::new(vec![]),
        });
        (ConfigEmitterImpl::new(fs_service.clone()), fs_service)
    }

    fn generated_suite(display_name: &str, sub_tasks: &[&str]) -> GeneratedSelectedSuite {
        GeneratedSelectedSuite {
            display_name: display_name.to_string(),
            sub_tasks: sub_tasks
                .iter()
                .map(|name| EvgTask {
                    name: name.to_string(),
                    ..Default::default()
                })
                .collect(),
            suite_files: sub_tasks
                .iter()
                .map(|name| (format!("{}.yml", name), format!("# {}", name)))
                .collect(),
        }
    }

    #[test]
    fn test_nothing_selected_should_emit_empty_project() {
        let (emitter, _) = build_emitter();

        let files = emitter.assemble("linux", &[]).unwrap();

        assert_eq!(files.len(), 1);
        let project: serde_json::Value =
            serde_json::from_str(&files[SELECTED_TESTS_CONFIG_FILE]).unwrap();
        let tasks = project.get("tasks");
        assert!(tasks.is_none() || tasks.unwrap().as_array().unwrap().is_empty());
    }

    #[test]
    fn test_generated_suites_should_be_added_to_build_variant() {
        let (emitter, _) = build_emitter();
        let generated = vec![
            generated_suite("auth", &["auth_0_linux", "auth_1_linux"]),
            generated_suite("jsCore_linux", &["jsCore_0_linux"]),
        ];

        let files = emitter.assemble("linux", &generated).unwrap();

        assert_eq!(files.len(), 4);
        assert!(files.contains_key("auth_1_linux.yml"));
        let project: serde_json::Value =
            serde_json::from_str(&files[SELECTED_TESTS_CONFIG_FILE]).unwrap();
        assert_eq!(project["tasks"].as_array().unwrap().len(), 3);
        let build_variant = &project["buildvariants"][0];
        assert_eq!(build_variant["name"], "linux");
        assert_eq!(build_variant["tasks"].as_array().unwrap().len(), 3);
        assert_eq!(build_variant["display_tasks"][1]["name"], "jsCore_linux");
    }

    #[test]
    fn test_duplicate_suite_files_should_error() {
        let (emitter, _) = build_emitter();
        let generated = vec![
            generated_suite("auth", &["auth_0_linux"]),
            generated_suite("auth", &["auth_0_linux"]),
        ];

        assert!(emitter.assemble("linux", &generated).is_err());
    }

    #[test]
    fn test_write_should_place_files_in_target_directory() {
        let (emitter, fs_service) = build_emitter();
        let files = btreemap! {
            "a.yml".to_string() => "a".to_string(),
            SELECTED_TESTS_CONFIG_FILE.to_string() => "{}".to_string(),
        };

        emitter.write(Path::new("generated"), &files).unwrap();

        assert_eq!(
            *fs_service.written.lock().unwrap(),
            vec![
                PathBuf::from("generated/a.yml"),
                PathBuf::from("generated/selected_tests_config.json"),
            ]
        );
    }
}
