//! Filter correlated test files down to the ones that can actually run.
use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use tracing::{event, Level};

use super::selected_tests_service::TestMapping;
use crate::utils::git_service::GitService;

const TEST_DIRECTORY: &str = "jstests";
const TEST_EXTENSION: &str = "js";

/// Determine if the given path follows the naming convention of a test file.
///
/// # Arguments
///
/// * `path` - Repository relative path to check.
///
/// # Returns
///
/// true if the path is a javascript file under a `jstests` directory.
pub fn is_test_file(path: &str) -> bool {
    let path = Path::new(path);
    let has_extension = path
        .extension()
        .map(|ext| ext == TEST_EXTENSION)
        .unwrap_or(false);
    let in_test_dir = path
        .parent()
        .map(|parent| parent.iter().any(|component| component == TEST_DIRECTORY))
        .unwrap_or(false);
    has_extension && in_test_dir
}

/// Select the test files from the given mappings that are tests and still exist at HEAD.
///
/// # Arguments
///
/// * `mappings` - Correlations returned by the selected-tests service.
/// * `git_service` - Service to check file existence in the repository.
///
/// # Returns
///
/// Deduplicated set of test files.
pub fn select_test_files(
    mappings: &[TestMapping],
    git_service: &dyn GitService,
) -> Result<BTreeSet<String>> {
    let mut selected = BTreeSet::new();
    let candidates: BTreeSet<&str> = mappings
        .iter()
        .flat_map(|m| m.test_files.iter().map(|t| t.name.as_str()))
        .collect();

    for test_file in candidates {
        if !is_test_file(test_file) {
            event!(Level::DEBUG, test_file, "Ignoring file that is not a test");
            continue;
        }
        if !git_service.file_exists_at_head(test_file)? {
            event!(Level::DEBUG, test_file, "Ignoring test that does not exist at HEAD");
            continue;
        }
        selected.insert(test_file.to_string());
    }

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use maplit::hashset;
    use rstest::rstest;

    use super::*;
    use crate::selected_tests::selected_tests_service::TestFileEntry;

    struct MockGitService {
        files_at_head: HashSet<String>,
    }

    impl GitService for MockGitService {
        fn find_changed_files(&self) -> Result<HashSet<String>> {
            todo!()
        }

        fn find_changed_files_in_commit(
            &self,
            _revision: &str,
            _module_revisions: &HashMap<String, String>,
        ) -> Result<HashSet<String>> {
            todo!()
        }

        fn file_exists_at_head(&self, file_path: &str) -> Result<bool> {
            Ok(self.files_at_head.contains(file_path))
        }
    }

    fn mapping(source_file: &str, test_files: &[&str]) -> TestMapping {
        TestMapping {
            source_file: source_file.to_string(),
            test_files: test_files
                .iter()
                .map(|t| TestFileEntry {
                    name: t.to_string(),
                })
                .collect(),
        }
    }

    #[rstest]
    #[case("jstests/a.js", true)]
    #[case("jstests/auth/auth3.js", true)]
    #[case("src/mongo/db/modules/enterprise/jstests/audit/audit.js", true)]
    #[case("jstests/libs/fixture.py", false)]
    #[case("src/mongo/db/a.js", false)]
    #[case("jstests.js", false)]
    fn test_is_test_file(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_test_file(path), expected);
    }

    #[test]
    fn test_existing_test_file_should_be_selected() {
        let git_service = MockGitService {
            files_at_head: hashset! {"jstests/a.js".to_string()},
        };
        let mappings = vec![mapping("src/file1.cpp", &["jstests/a.js"])];

        let selected = select_test_files(&mappings, &git_service).unwrap();

        assert_eq!(selected, BTreeSet::from(["jstests/a.js".to_string()]));
    }

    #[test]
    fn test_deleted_and_non_test_files_should_be_filtered() {
        let git_service = MockGitService {
            files_at_head: hashset! {
                "jstests/a.js".to_string(),
                "buildscripts/resmoke.py".to_string(),
            },
        };
        let mappings = vec![
            mapping("src/file1.cpp", &["jstests/a.js", "jstests/deleted.js"]),
            mapping("src/file2.cpp", &["jstests/a.js", "buildscripts/resmoke.py"]),
        ];

        let selected = select_test_files(&mappings, &git_service).unwrap();

        assert_eq!(selected, BTreeSet::from(["jstests/a.js".to_string()]));
    }

    #[test]
    fn test_empty_mappings_should_select_nothing() {
        let git_service = MockGitService {
            files_at_head: hashset! {"jstests/a.js".to_string()},
        };

        let selected = select_test_files(&[], &git_service).unwrap();

        assert!(selected.is_empty());
    }
}
