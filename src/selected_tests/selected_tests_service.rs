//! Client for the selected-tests correlation service.
use std::{collections::HashSet, path::Path, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::{
    cookie::Jar,
    header::{ACCEPT, CONTENT_TYPE},
    Url,
};
use serde::Deserialize;
use tracing::{error, event, Level};

const JSON_CONTENT: &str = "application/json";

/// Connection information for the selected-tests service.
#[derive(Debug, Deserialize, Clone)]
pub struct SelectedTestsConfig {
    /// Root URL of the service.
    pub url: String,
    /// User to authenticate as.
    pub auth_user: String,
    /// Token to authenticate with.
    pub auth_token: String,
}

impl SelectedTestsConfig {
    /// Read the selected-tests configuration from the given yaml file.
    ///
    /// # Arguments
    ///
    /// * `location` - Path to YAML file to read.
    pub fn from_yaml_file<P: AsRef<Path>>(location: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&location)?;

        let config: Result<Self, serde_yaml::Error> = serde_yaml::from_str(&contents);
        if config.is_err() {
            error!(
                file = location.as_ref().display().to_string(),
                "Failed to parse yaml for SelectedTestsConfig from file",
            );
        }

        Ok(config?)
    }
}

/// A test file correlated with a changed source file.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TestFileEntry {
    /// Path of the test file.
    pub name: String,
}

/// Test files correlated with a single changed source file.
#[derive(Debug, Deserialize, Clone)]
pub struct TestMapping {
    /// Changed source file.
    pub source_file: String,
    /// Test files correlated with the source file.
    pub test_files: Vec<TestFileEntry>,
}

/// A task correlated with a changed source file.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    /// Name of the task.
    pub name: String,
}

/// Tasks correlated with a single changed source file.
#[derive(Debug, Deserialize, Clone)]
pub struct TaskMapping {
    /// Changed source file.
    pub source_file: String,
    /// Tasks correlated with the source file.
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
struct TestMappingsResponse {
    test_mappings: Vec<TestMapping>,
}

#[derive(Debug, Deserialize)]
struct TaskMappingsResponse {
    task_mappings: Vec<TaskMapping>,
}

/// A service for querying correlations between source files and tests or tasks.
#[async_trait]
pub trait SelectedTestsService: Sync + Send {
    /// Get test files related to the given changed files.
    ///
    /// # Arguments
    ///
    /// * `threshold` - Minimum correlation for a test file to be returned.
    /// * `changed_files` - Set of changed source files.
    ///
    /// # Returns
    ///
    /// Mappings of changed source files to related test files.
    async fn get_test_mappings(
        &self,
        threshold: f64,
        changed_files: &HashSet<String>,
    ) -> Result<Vec<TestMapping>>;

    /// Get tasks related to the given changed files.
    ///
    /// # Arguments
    ///
    /// * `threshold` - Minimum correlation for a task to be returned.
    /// * `changed_files` - Set of changed source files.
    ///
    /// # Returns
    ///
    /// Mappings of changed source files to related tasks.
    async fn get_task_mappings(
        &self,
        threshold: f64,
        changed_files: &HashSet<String>,
    ) -> Result<Vec<TaskMapping>>;
}

/// Http client for the selected-tests service.
pub struct SelectedTestsClient {
    client: reqwest::Client,
    config: SelectedTestsConfig,
    /// Evergreen project correlations are queried for.
    project: String,
}

impl SelectedTestsClient {
    /// Create a new selected-tests client.
    ///
    /// The credentials are sent as the `auth_user` and `auth_token` cookies.
    ///
    /// # Arguments
    ///
    /// * `config` - Connection information for the service.
    /// * `project` - Evergreen project to query correlations for.
    pub fn new(config: SelectedTestsConfig, project: &str) -> Result<Self> {
        let jar = build_auth_jar(&config)?;
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::new(jar))
            .build()?;
        Ok(Self {
            client,
            config,
            project: project.to_string(),
        })
    }

    /// Build the url of the given mapping endpoint.
    fn endpoint(&self, mapping_kind: &str) -> String {
        format!(
            "{}/projects/{}/{}",
            self.config.url.trim_end_matches('/'),
            self.project,
            mapping_kind
        )
    }

    /// Query the given mapping endpoint for the changed files.
    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        mapping_kind: &str,
        threshold: f64,
        changed_files: &HashSet<String>,
    ) -> Result<T> {
        let url = self.endpoint(mapping_kind);
        event!(
            Level::DEBUG,
            url = url.as_str(),
            changed_files = changed_files.len(),
            "Querying selected-tests service"
        );
        let response = self
            .client
            .get(&url)
            .header(CONTENT_TYPE, JSON_CONTENT)
            .header(ACCEPT, JSON_CONTENT)
            .query(&build_query(threshold, changed_files))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

/// Build a cookie jar holding the service credentials.
fn build_auth_jar(config: &SelectedTestsConfig) -> Result<Jar> {
    let url = Url::parse(&config.url)?;
    let jar = Jar::default();
    for (name, value) in [
        ("auth_user", &config.auth_user),
        ("auth_token", &config.auth_token),
    ] {
        if !is_valid_cookie_value(value) {
            bail!("Invalid characters in selected-tests credential '{}'", name);
        }
        jar.add_cookie_str(&format!("{}={}; Path=/", name, value), &url);
    }
    Ok(jar)
}

/// Check a cookie value only holds characters allowed by RFC 6265.
fn is_valid_cookie_value(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_graphic() && !matches!(c, '"' | ',' | ';' | '\\'))
}

#[async_trait]
impl SelectedTestsService for SelectedTestsClient {
    async fn get_test_mappings(
        &self,
        threshold: f64,
        changed_files: &HashSet<String>,
    ) -> Result<Vec<TestMapping>> {
        let response: TestMappingsResponse = self
            .query("test-mappings", threshold, changed_files)
            .await?;
        Ok(response.test_mappings)
    }

    async fn get_task_mappings(
        &self,
        threshold: f64,
        changed_files: &HashSet<String>,
    ) -> Result<Vec<TaskMapping>> {
        let response: TaskMappingsResponse = self
            .query("task-mappings", threshold, changed_files)
            .await?;
        Ok(response.task_mappings)
    }
}

/// Build the query parameters for a mapping request.
///
/// Changed files are sorted so identical change sets produce identical requests.
fn build_query(threshold: f64, changed_files: &HashSet<String>) -> Vec<(&'static str, String)> {
    let mut files: Vec<&str> = changed_files.iter().map(|f| f.as_str()).collect();
    files.sort_unstable();
    vec![
        ("threshold", threshold.to_string()),
        ("changed_files", files.join(",")),
    ]
}
