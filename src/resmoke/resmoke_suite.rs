//! Representation of a resmoke suite file.

use std::{collections::HashSet, str::FromStr};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_yaml::{Error, Value};

const GENERATED_FILE_HEADER: &str =
    "# DO NOT EDIT THIS FILE. All manual edits will be lost.\n# This file was generated by mongo-selected-tests from\n";

#[derive(Serialize, Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TestRoot {
    /// The path to a file containing the list of root tests.
    Root { root: String },
    /// A list of root tests.
    Roots { roots: Vec<String> },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResmokeSelector {
    /// A str or dict representing a tag matching expression that the tags of the
    /// selected tests must not match. Incompatible with 'include_tags'.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_tags: Option<String>,
    /// A list of paths or glob patterns the tests must not be included in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_files: Option<Vec<String>>,
    /// A list of tags. No selected tests can have any of them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_with_any_tags: Option<HashSet<String>>,
    /// A list of tags. All selected tests must have at least one them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_with_any_tags: Option<Vec<String>>,
    /// A list of paths or glob patterns the tests must be included in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_files: Option<Vec<String>>,
    /// A str or dict representing a tag matching expression that the tags of the
    /// selected tests must match. Incompatible with 'exclude_tags'.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_tags: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub test_root: Option<TestRoot>,
    /// Filename of a tag file associating tests to tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_file: Option<String>,
}

/// Configuration of a resmoke test suite.
///
/// Only the selector is interpreted, the executor is carried over to generated suites as is.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResmokeSuiteConfig {
    pub test_kind: String,
    pub selector: ResmokeSelector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<Value>,
}

impl FromStr for ResmokeSuiteConfig {
    type Err = Error;

    /// Read Resmoke suite configuration from the given string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s)
    }
}

impl ResmokeSuiteConfig {
    /// Create a new resmoke suite configuration based on this one but running certain tests.
    ///
    /// # Arguments
    ///
    /// * `run_tests` - When provided, the new configuration should only run these tests.
    /// * `exclude_tests` - When provided, the new configuration should exclude these tests.
    ///
    /// # Returns
    ///
    /// New resmoke configuration with a selector based on provided parameters.
    pub fn with_new_tests(
        &self,
        run_tests: Option<&[String]>,
        exclude_tests: Option<&[String]>,
    ) -> Self {
        let mut config = self.clone();
        if let Some(exclude_tests) = exclude_tests {
            let excluded = config.selector.exclude_files.get_or_insert_with(Vec::new);
            excluded.extend(exclude_tests.iter().cloned());
        } else if let Some(run_tests) = run_tests {
            config.selector.exclude_files = None;
            config.selector.test_root = Some(TestRoot::Roots {
                roots: run_tests.to_vec(),
            });
        }
        config
    }

    /// Render this configuration as the contents of a generated suite file.
    ///
    /// # Arguments
    ///
    /// * `origin_suite` - Name of the suite this configuration was generated from.
    pub fn to_generated_yaml(&self, origin_suite: &str) -> Result<String> {
        Ok(format!(
            "{}# {}.\n{}",
            GENERATED_FILE_HEADER,
            origin_suite,
            serde_yaml::to_string(self)?
        ))
    }
}
