use std::{str::FromStr, time::Instant};

use anyhow::Result;
use cmd_lib::run_fun;
use serde::Deserialize;
use tracing::{event, Level};

use super::resmoke_suite::ResmokeSuiteConfig;

/// Interface for discovering details about test suites.
pub trait TestDiscovery: Send + Sync {
    /// Get a list of tests that belong to the given suite.
    ///
    /// # Arguments
    ///
    /// * `suite_name` - Name of test suite to query.
    ///
    /// # Returns
    ///
    /// A list of tests belonging to given suite.
    fn discover_tests(&self, suite_name: &str) -> Result<Vec<String>>;

    /// Get the configuration for the given suite.
    ///
    /// # Arguments
    ///
    /// * `suite_name` - Name of test suite to query.
    ///
    /// # Return
    ///
    /// Resmoke configuration for the given suite.
    fn get_suite_config(&self, suite_name: &str) -> Result<ResmokeSuiteConfig>;
}

/// Implementation of `TestDiscovery` that queries details from resmoke.
#[derive(Debug, Clone)]
pub struct ResmokeProxy {
    /// Primary command to invoke resmoke (usually `python`).
    resmoke_cmd: String,
    /// Script and leading arguments to invoke resmoke.
    resmoke_script: Vec<String>,
}

impl ResmokeProxy {
    /// Create a new `ResmokeProxy` instance.
    ///
    /// # Arguments
    ///
    /// * `resmoke_cmd` - Command to invoke resmoke.
    pub fn new(resmoke_cmd: &str) -> Self {
        let mut cmd_parts = resmoke_cmd.split_whitespace().map(|s| s.to_string());
        let cmd = cmd_parts.next().unwrap_or_default();
        Self {
            resmoke_cmd: cmd,
            resmoke_script: cmd_parts.collect(),
        }
    }
}

/// Details about tests comprising a test suite.
#[derive(Debug, Deserialize)]
struct TestDiscoveryOutput {
    /// Name of tests comprising suite.
    pub tests: Vec<String>,
}

impl TestDiscovery for ResmokeProxy {
    fn discover_tests(&self, suite_name: &str) -> Result<Vec<String>> {
        let cmd = &self.resmoke_cmd;
        let script = &self.resmoke_script;
        let start = Instant::now();
        let cmd_output = run_fun!(
            $cmd $[script] test-discovery --suite $suite_name
        )?;
        event!(
            Level::INFO,
            suite_name,
            duration_ms = start.elapsed().as_millis() as u64,
            "Resmoke test discovery finished"
        );

        parse_test_discovery(&cmd_output)
    }

    fn get_suite_config(&self, suite_name: &str) -> Result<ResmokeSuiteConfig> {
        let cmd = &self.resmoke_cmd;
        let script = &self.resmoke_script;
        let cmd_output = run_fun!(
            $cmd $[script] suiteconfig --suite $suite_name
        )?;
        Ok(ResmokeSuiteConfig::from_str(&cmd_output)?)
    }
}

/// Parse the output of resmoke's test-discovery into a list of test files.
fn parse_test_discovery(output: &str) -> Result<Vec<String>> {
    let output: TestDiscoveryOutput = serde_yaml::from_str(output)?;
    Ok(output.tests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resmoke_command_should_be_split_into_cmd_and_script() {
        let proxy = ResmokeProxy::new("python3  buildscripts/resmoke.py");

        assert_eq!(proxy.resmoke_cmd, "python3");
        assert_eq!(proxy.resmoke_script, vec!["buildscripts/resmoke.py"]);
    }

    #[test]
    fn test_test_discovery_output_should_be_parsed() {
        let output = "
suite_name: auth
tests:
  - jstests/auth/auth1.js
  - jstests/auth/auth3.js
";

        let tests = parse_test_discovery(output).unwrap();

        assert_eq!(tests, vec!["jstests/auth/auth1.js", "jstests/auth/auth3.js"]);
    }
}
