//! Names referencing items in the mongodb/mongo etc/evergreen.yml.

// Functions to setup tasks
/// Function setup authentication to evergreen API.
pub const CONFIGURE_EVG_API_CREDS: &str = "configure evergreen api credentials";
/// Function to setup a resmoke task.
pub const DO_SETUP: &str = "do setup";

// Functions for running generated tasks.
/// Function to setup fuzzer.
pub const SETUP_JSTESTFUZZ: &str = "setup jstestfuzz";
/// Function to generated fuzzer tests.
pub const RUN_FUZZER: &str = "run jstestfuzz";
/// Function to run generated tasks.
pub const RUN_GENERATED_TESTS: &str = "run generated tests";

// Functions used by task definitions.
/// Function to generate resmoke tasks.
pub const GENERATE_RESMOKE_TASKS: &str = "generate resmoke tasks";
/// Function to generate fuzzer tasks.
pub const GENERATE_FUZZER_TASKS: &str = "generate fuzzer tasks";
/// Function to run resmoke tests directly.
pub const RUN_TESTS: &str = "run tests";

// Build variants
/// Build variant that runs selected tests.
pub const SELECTED_TESTS_VARIANT: &str = "selected-tests";

// Vars
/// Variable that indicates a task is a fuzzer.
pub const IS_FUZZER: &str = "is_jstestfuzz";

// Parameters
/// Arguments to pass to resmoke command.
pub const RESMOKE_ARGS: &str = "resmoke_args";
/// Name of suite being executed.
pub const SUITE_NAME: &str = "suite";
/// Location where generation task configuration is stored in S3.
pub const GEN_TASK_CONFIG_LOCATION: &str = "gen_task_config_location";
/// Number of sub-suites to split into when no runtime history is available.
pub const FALLBACK_NUM_SUB_SUITES: &str = "fallback_num_sub_suites";
/// Maximum number of sub-suites to split into when runtime history is available.
pub const MAX_SUB_SUITES: &str = "max_sub_suites";
/// Bucket used when publishing results of the generated tasks.
pub const S3_BUCKET_TASK_NAME: &str = "s3_bucket_task_name";

// Fuzzer parameters.
/// Name of npm command to run.
pub const NPM_COMMAND: &str = "npm_command";
/// Parameters to pass to fuzzer command.
pub const FUZZER_PARAMETERS: &str = "jstestfuzz_vars";
/// Number of files the fuzzer should generate.
pub const NUM_FUZZER_FILES: &str = "num_files";

// Build Variant expansions.
/// Build variants the selected-tests variant selects tasks from.
pub const SELECTED_TESTS_BUILD_VARIANTS: &str = "selected_tests_buildvariants";
