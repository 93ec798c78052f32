use std::{path::PathBuf, process::exit, time::Instant};

use anyhow::Result;
use clap::Parser;
use mongo_selected_tests::{
    generate_configuration, Dependencies, EvgExpansions, ExecutionConfiguration,
    GeneratingTaskInfo, ProjectInfo, DEFAULT_THRESHOLD,
};
use tracing::{event, Level};
use tracing_subscriber::fmt::format;

const DEFAULT_EVG_AUTH_FILE: &str = "~/.evergreen.yml";
const DEFAULT_EVG_PROJECT_FILE: &str = "etc/evergreen.yml";
const DEFAULT_RESMOKE_COMMAND: &str = "python buildscripts/resmoke.py";
const DEFAULT_TARGET_DIRECTORY: &str = "generated_resmoke_config";

/// Select the tests and tasks related to the changes in a patch build.
#[derive(Parser, Debug)]
struct Args {
    /// Show debug logs.
    #[arg(long)]
    verbose: bool,

    /// File with information on how to authenticate against the evergreen API.
    #[arg(long, default_value = DEFAULT_EVG_AUTH_FILE)]
    evg_api_config: PathBuf,

    /// File with the url and credentials of the selected-tests service.
    #[arg(long)]
    selected_tests_config: PathBuf,

    /// Build variant to select tasks from.
    #[arg(long)]
    build_variant: String,

    /// File containing expansions of the task running the selection.
    #[arg(long)]
    expansion_file: PathBuf,

    /// File containing evergreen project configuration.
    #[arg(long, default_value = DEFAULT_EVG_PROJECT_FILE)]
    evg_project_file: PathBuf,

    /// Directory to write generated configuration files.
    #[arg(long, default_value = DEFAULT_TARGET_DIRECTORY)]
    target_directory: PathBuf,

    /// Command to invoke resmoke.
    #[arg(long, default_value = DEFAULT_RESMOKE_COMMAND)]
    resmoke_command: String,

    /// Minimum correlation for tests and tasks to be selected.
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f64,

    /// Disable evergreen task-history queries and use task splitting fallback.
    #[arg(long)]
    use_task_split_fallback: bool,

    /// Root of the git repository to find changes in.
    #[arg(long, default_value = ".")]
    repo_root: PathBuf,
}

/// Configure logging for the command execution.
fn configure_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let format = format::json();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .event_format(format)
        .finish();

    tracing::subscriber::set_global_default(subscriber).unwrap();
}

async fn run(args: &Args) -> Result<()> {
    let evg_expansions = EvgExpansions::from_yaml_file(&args.expansion_file)?;
    let project_info = ProjectInfo::new(&args.evg_project_file, &evg_expansions.project);
    let execution_config = ExecutionConfiguration {
        project_info: &project_info,
        evg_auth_file: &args.evg_api_config,
        selected_tests_config_file: &args.selected_tests_config,
        repo_root: &args.repo_root,
        use_task_split_fallback: args.use_task_split_fallback,
        resmoke_command: &args.resmoke_command,
        generating_task: GeneratingTaskInfo::from(&evg_expansions),
    };
    let deps = Dependencies::new(execution_config)?;

    generate_configuration(
        &deps,
        &args.build_variant,
        args.threshold,
        &args.target_directory,
    )
    .await
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    configure_logging(args.verbose);

    let start = Instant::now();
    let result = run(&args).await;
    event!(
        Level::INFO,
        duration_secs = start.elapsed().as_secs(),
        "selection completed"
    );
    if let Err(err) = result {
        eprintln!("Error encountered during execution: {:?}", err);
        exit(1);
    }
}
