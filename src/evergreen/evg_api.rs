//! Client for the evergreen REST API.
use std::{collections::HashMap, path::Path};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{
    header::{HeaderMap, LINK},
    Response,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{error, event, Level};

const MAX_RETRIES: u32 = 3;
const TEST_STATS_LOOKBACK_DAYS: i64 = 14;
const MAINLINE_REQUESTER: &str = "mainline";

lazy_static! {
    static ref NEXT_PAGE_LINK: Regex = Regex::new(r#"<([^>]+)>;\s*rel="next""#).unwrap();
}

/// Credentials and location of the evergreen API.
#[derive(Debug, Deserialize, Clone)]
pub struct EvgAuthConfig {
    /// User to authenticate as.
    pub user: String,
    /// API key of user.
    pub api_key: String,
    /// Root URL of the evergreen API.
    pub api_server_host: String,
}

impl EvgAuthConfig {
    /// Read the evergreen authentication configuration from the given yaml file.
    ///
    /// A leading `~` in the path is expanded to the user's home directory.
    ///
    /// # Arguments
    ///
    /// * `location` - Path to YAML file to read.
    pub fn from_yaml_file(location: &Path) -> Result<Self> {
        let location = match location.to_str() {
            Some(location) => shellexpand::tilde(location).to_string(),
            None => bail!("Invalid evergreen auth location: {}", location.display()),
        };
        let contents = std::fs::read_to_string(&location)?;

        let auth_config: Result<Self, serde_yaml::Error> = serde_yaml::from_str(&contents);
        if auth_config.is_err() {
            error!(
                file = location.as_str(),
                "Failed to parse yaml for EvgAuthConfig from file",
            );
        }

        Ok(auth_config?)
    }
}

/// An evergreen version.
#[derive(Debug, Deserialize, Clone)]
pub struct EvgVersion {
    /// ID of the version.
    pub version_id: String,
    /// Git revision the version was created from.
    pub revision: String,
    /// Evergreen project the version belongs to.
    pub project: String,
}

/// Revisions of the repositories a version was built from.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EvgManifest {
    /// Modules of the project, keyed by module name.
    #[serde(default)]
    pub modules: Option<HashMap<String, EvgManifestModule>>,
}

/// A module repository in a manifest.
#[derive(Debug, Deserialize, Clone)]
pub struct EvgManifestModule {
    /// Git revision of the module.
    pub revision: String,
}

impl EvgManifest {
    /// Get the revision of each module keyed by module name.
    pub fn module_revisions(&self) -> HashMap<String, String> {
        self.modules
            .iter()
            .flatten()
            .map(|(name, module)| (name.clone(), module.revision.clone()))
            .collect()
    }
}

/// An evergreen build.
#[derive(Debug, Deserialize, Clone)]
pub struct EvgBuild {
    /// ID of the build.
    #[serde(rename = "_id")]
    pub id: String,
    /// Build variant the build ran on.
    pub build_variant: String,
}

/// An evergreen task execution.
#[derive(Debug, Deserialize, Clone)]
pub struct EvgTaskStatus {
    /// ID of the task.
    pub task_id: String,
    /// Name of the task.
    pub display_name: String,
    /// Status of the task execution.
    pub status: String,
}

impl EvgTaskStatus {
    /// Did the task execution fail.
    pub fn is_failed(&self) -> bool {
        self.status.to_lowercase() == "failed"
    }
}

/// Historic statistics of a test in evergreen.
#[derive(Debug, Deserialize, Clone)]
pub struct EvgTestStats {
    /// Name of test file, or `test:hook` for hooks.
    pub test_file: String,
    /// Average duration of passed executions in seconds.
    pub avg_duration_pass: f64,
}

/// A service for querying the evergreen API.
#[async_trait]
pub trait EvgApiService: Sync + Send {
    /// Get the version with the given ID.
    async fn get_version(&self, version_id: &str) -> Result<EvgVersion>;

    /// Get the manifest of module revisions for a revision of a project.
    ///
    /// # Arguments
    ///
    /// * `project` - Evergreen project the revision belongs to.
    /// * `revision` - Git revision of the project.
    async fn get_manifest(&self, project: &str, revision: &str) -> Result<EvgManifest>;

    /// Get the build of the given version that ran on the given build variant.
    ///
    /// # Arguments
    ///
    /// * `version_id` - ID of version to query.
    /// * `build_variant` - Build variant to find.
    ///
    /// # Returns
    ///
    /// Build that ran on the build variant, None if the version has no such build.
    async fn get_build_for_variant(
        &self,
        version_id: &str,
        build_variant: &str,
    ) -> Result<Option<EvgBuild>>;

    /// Get all the tasks of the given build.
    async fn get_build_tasks(&self, build_id: &str) -> Result<Vec<EvgTaskStatus>>;

    /// Get the recent mainline test statistics of a task on a build variant.
    ///
    /// # Arguments
    ///
    /// * `project` - Evergreen project to query.
    /// * `task` - Name of task to query.
    /// * `variant` - Name of build variant to query.
    ///
    /// # Returns
    ///
    /// Statistics of all tests and hooks the task ran.
    async fn get_test_stats(
        &self,
        project: &str,
        task: &str,
        variant: &str,
    ) -> Result<Vec<EvgTestStats>>;
}

/// Build a http client that retries transient failures.
pub fn build_retryable_client() -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
    ClientBuilder::new(reqwest::Client::new())
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

/// Implementation of the evergreen API service.
pub struct EvgApiClient {
    client: ClientWithMiddleware,
    auth: EvgAuthConfig,
}

impl EvgApiClient {
    /// Create a new evergreen API client.
    ///
    /// # Arguments
    ///
    /// * `client` - Http client to make requests with.
    /// * `auth` - Credentials and location of the evergreen API.
    pub fn new(client: ClientWithMiddleware, auth: EvgAuthConfig) -> Self {
        Self { client, auth }
    }

    /// Build the full url of the given REST v2 endpoint.
    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/rest/v2/{}",
            self.auth.api_server_host.trim_end_matches('/'),
            path
        )
    }

    /// Issue an authenticated GET request against the given url.
    async fn send(&self, url: &str, query: &[(&str, String)]) -> Result<Response> {
        event!(Level::DEBUG, url, "Querying evergreen API");
        Ok(self
            .client
            .get(url)
            .header("Api-User", &self.auth.user)
            .header("Api-Key", &self.auth.api_key)
            .query(query)
            .send()
            .await?
            .error_for_status()?)
    }

    /// Issue an authenticated GET request and parse the JSON response.
    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self.send(&self.endpoint(path), query).await?;
        Ok(response.json::<T>().await?)
    }

    /// Issue an authenticated GET request and collect the items of every page of the response.
    ///
    /// Pages after the first are found through the `rel="next"` entry of the `Link` header.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut items = vec![];
        let mut response = self.send(&self.endpoint(path), query).await?;
        loop {
            let next_page = next_page_link(response.headers());
            items.extend(response.json::<Vec<T>>().await?);
            match next_page {
                Some(url) => response = self.send(&url, &[]).await?,
                None => break,
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl EvgApiService for EvgApiClient {
    async fn get_version(&self, version_id: &str) -> Result<EvgVersion> {
        self.get(&format!("versions/{}", version_id), &[]).await
    }

    async fn get_manifest(&self, project: &str, revision: &str) -> Result<EvgManifest> {
        let url = format!(
            "{}/plugin/manifest/get/{}/{}",
            self.auth.api_server_host.trim_end_matches('/'),
            project,
            revision
        );
        let response = self.send(&url, &[]).await?;
        Ok(response.json::<EvgManifest>().await?)
    }

    async fn get_build_for_variant(
        &self,
        version_id: &str,
        build_variant: &str,
    ) -> Result<Option<EvgBuild>> {
        let builds: Vec<EvgBuild> = self
            .get_all_pages(&format!("versions/{}/builds", version_id), &[])
            .await?;
        Ok(builds
            .into_iter()
            .find(|build| build.build_variant == build_variant))
    }

    async fn get_build_tasks(&self, build_id: &str) -> Result<Vec<EvgTaskStatus>> {
        self.get_all_pages(&format!("builds/{}/tasks", build_id), &[])
            .await
    }

    async fn get_test_stats(
        &self,
        project: &str,
        task: &str,
        variant: &str,
    ) -> Result<Vec<EvgTestStats>> {
        let (after_date, before_date) = test_stats_window(Utc::now().date_naive());
        let query = [
            ("after_date", after_date),
            ("before_date", before_date),
            ("group_num_days", TEST_STATS_LOOKBACK_DAYS.to_string()),
            ("requesters", MAINLINE_REQUESTER.to_string()),
            ("tasks", task.to_string()),
            ("variants", variant.to_string()),
        ];
        self.get_all_pages(&format!("projects/{}/test_stats", project), &query)
            .await
    }
}

/// Find the url of the next page of a paginated response.
fn next_page_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| {
            NEXT_PAGE_LINK
                .captures(value)
                .map(|captures| captures[1].to_string())
        })
}

/// Get the date window to query test stats for, ending on the given day.
fn test_stats_window(today: NaiveDate) -> (String, String) {
    let after_date = today - Duration::days(TEST_STATS_LOOKBACK_DAYS);
    (
        after_date.format("%Y-%m-%d").to_string(),
        today.format("%Y-%m-%d").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;
    use tempdir::TempDir;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    fn auth_for(api_server_host: &str) -> EvgAuthConfig {
        EvgAuthConfig {
            user: "user".to_string(),
            api_key: "key".to_string(),
            api_server_host: api_server_host.to_string(),
        }
    }

    fn local_client(api_server_host: &str) -> EvgApiClient {
        let client = ClientBuilder::new(reqwest::Client::builder().no_proxy().build().unwrap())
            .build();
        EvgApiClient::new(client, auth_for(api_server_host))
    }

    fn http_response(body: &str, next_page: Option<&str>) -> String {
        let link = next_page
            .map(|url| format!("Link: <{}>; rel=\"next\"\r\n", url))
            .unwrap_or_default();
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
            body.len(),
            link,
            body
        )
    }

    /// Answer one connection per response and return the request line of each request.
    async fn serve(listener: TcpListener, responses: Vec<String>) -> Vec<String> {
        let mut request_lines = vec![];
        for response in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = vec![];
            let mut buffer = [0; 1024];
            loop {
                let read = stream.read(&mut buffer).await.unwrap();
                request.extend_from_slice(&buffer[..read]);
                if read == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let request = String::from_utf8_lossy(&request).to_string();
            request_lines.push(request.lines().next().unwrap_or_default().to_string());
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        }
        request_lines
    }

    #[tokio::test]
    async fn test_build_tasks_should_be_read_from_every_page() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        let next_page = format!("{}/rest/v2/builds/build_1/tasks?start_at=task_2&limit=1", host);
        let server = tokio::spawn(serve(
            listener,
            vec![
                http_response(
                    r#"[{"task_id": "task_1", "display_name": "auth", "status": "failed"}]"#,
                    Some(&next_page),
                ),
                http_response(
                    r#"[{"task_id": "task_2", "display_name": "jsCore", "status": "success"}]"#,
                    None,
                ),
            ],
        ));
        let client = local_client(&host);

        let tasks = client.get_build_tasks("build_1").await.unwrap();
        let request_lines = server.await.unwrap();

        let names: Vec<&str> = tasks.iter().map(|t| t.display_name.as_str()).collect();
        assert_eq!(names, vec!["auth", "jsCore"]);
        assert_eq!(
            request_lines,
            vec![
                "GET /rest/v2/builds/build_1/tasks HTTP/1.1",
                "GET /rest/v2/builds/build_1/tasks?start_at=task_2&limit=1 HTTP/1.1",
            ]
        );
    }

    #[tokio::test]
    async fn test_manifest_should_provide_module_revisions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve(
            listener,
            vec![http_response(
                r#"{"id": "manifest_1", "modules": {"enterprise": {"repo": "mongo-enterprise-modules", "revision": "def456"}}}"#,
                None,
            )],
        ));
        let client = local_client(&host);

        let manifest = client
            .get_manifest("mongodb-mongo-master", "abc123")
            .await
            .unwrap();
        let request_lines = server.await.unwrap();

        assert_eq!(
            manifest.module_revisions().get("enterprise"),
            Some(&"def456".to_string())
        );
        assert_eq!(
            request_lines,
            vec!["GET /plugin/manifest/get/mongodb-mongo-master/abc123 HTTP/1.1"]
        );
    }

    #[test]
    fn test_next_page_link_should_only_follow_next() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                r#"<https://evg.example.com/rest/v2/builds/b/tasks?start_at=a>; rel="prev", <https://evg.example.com/rest/v2/builds/b/tasks?start_at=z>; rel="next""#,
            ),
        );

        assert_eq!(
            next_page_link(&headers),
            Some("https://evg.example.com/rest/v2/builds/b/tasks?start_at=z".to_string())
        );
        assert_eq!(next_page_link(&HeaderMap::new()), None);
    }

    #[test]
    fn test_manifest_without_modules_should_have_no_module_revisions() {
        let manifest: EvgManifest = serde_json::from_str(r#"{"id": "manifest_1"}"#).unwrap();

        assert!(manifest.module_revisions().is_empty());
    }

    #[test]
    fn test_auth_config_should_be_read_from_file() {
        let tmp_dir = TempDir::new("evg_auth").unwrap();
        let path = tmp_dir.path().join(".evergreen.yml");
        std::fs::write(
            &path,
            "user: my.user\napi_key: abc123\napi_server_host: https://evergreen.mongodb.com/api\n",
        )
        .unwrap();

        let auth = EvgAuthConfig::from_yaml_file(&path).unwrap();

        assert_eq!(auth.user, "my.user");
        assert_eq!(auth.api_key, "abc123");
    }

    #[test]
    fn test_auth_config_missing_key_should_error() {
        let tmp_dir = TempDir::new("evg_auth").unwrap();
        let path = tmp_dir.path().join(".evergreen.yml");
        std::fs::write(&path, "user: my.user\n").unwrap();

        assert!(EvgAuthConfig::from_yaml_file(&path).is_err());
    }

    #[test]
    fn test_endpoint_should_not_duplicate_slashes() {
        let client = EvgApiClient::new(
            build_retryable_client(),
            auth_for("https://evergreen.mongodb.com/api/"),
        );

        assert_eq!(
            client.endpoint("versions/v1"),
            "https://evergreen.mongodb.com/api/rest/v2/versions/v1"
        );
    }

    #[test]
    fn test_test_stats_window_should_look_back_two_weeks() {
        let today = NaiveDate::from_ymd_opt(2022, 3, 10).unwrap();

        let (after_date, before_date) = test_stats_window(today);

        assert_eq!(after_date, "2022-02-24");
        assert_eq!(before_date, "2022-03-10");
    }

    #[test]
    fn test_task_status_failure_should_ignore_case() {
        let task = EvgTaskStatus {
            task_id: "task_1".to_string(),
            display_name: "auth".to_string(),
            status: "Failed".to_string(),
        };

        assert!(task.is_failed());
    }
}
