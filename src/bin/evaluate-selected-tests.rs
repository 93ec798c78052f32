use std::{path::PathBuf, process::exit};

use anyhow::Result;
use clap::Parser;
use mongo_selected_tests::{
    evaluate_selected_tests, Dependencies, EvaluationResult, ExecutionConfiguration,
    GeneratingTaskInfo, ProjectInfo, DEFAULT_THRESHOLD,
};
use tracing::{event, Level};
use tracing_subscriber::fmt::format;

/// Measure how many failed tasks of past versions task selection would have run.
#[derive(Parser, Debug)]
struct Args {
    /// Show debug logs.
    #[arg(long)]
    verbose: bool,

    /// File with information on how to authenticate against the evergreen API.
    #[arg(long, default_value = "~/.evergreen.yml")]
    evg_api_config: PathBuf,

    /// File with the url and credentials of the selected-tests service.
    #[arg(long)]
    selected_tests_config: PathBuf,

    /// File containing evergreen project configuration.
    #[arg(long, default_value = "etc/evergreen.yml")]
    evg_project_file: PathBuf,

    /// Evergreen project the versions belong to.
    #[arg(long, default_value = "mongodb-mongo-master")]
    project: String,

    /// Evergreen version to evaluate, may be repeated.
    #[arg(long = "version-id", required = true)]
    version_ids: Vec<String>,

    /// Build variant to evaluate, may be repeated. Defaults to the build variants selected
    /// tests runs against.
    #[arg(long = "build-variant")]
    build_variants: Vec<String>,

    /// Command to invoke resmoke.
    #[arg(long, default_value = "python buildscripts/resmoke.py")]
    resmoke_command: String,

    /// Minimum correlation for tests and tasks to be selected.
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f64,

    /// Root of the git repository the versions were built from.
    #[arg(long, default_value = ".")]
    repo_root: PathBuf,
}

/// Configure logging for the command execution.
fn configure_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .event_format(format::json())
        .finish();

    tracing::subscriber::set_global_default(subscriber).unwrap();
}

async fn run(args: &Args) -> Result<Vec<EvaluationResult>> {
    let project_info = ProjectInfo::new(&args.evg_project_file, &args.project);
    let execution_config = ExecutionConfiguration {
        project_info: &project_info,
        evg_auth_file: &args.evg_api_config,
        selected_tests_config_file: &args.selected_tests_config,
        repo_root: &args.repo_root,
        use_task_split_fallback: true,
        resmoke_command: &args.resmoke_command,
        generating_task: GeneratingTaskInfo::default(),
    };
    let deps = Dependencies::new(execution_config)?;

    evaluate_selected_tests(
        &deps,
        &args.version_ids,
        &args.build_variants,
        args.threshold,
    )
    .await
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    configure_logging(args.verbose);

    match run(&args).await {
        Ok(results) => {
            event!(Level::INFO, evaluated = results.len(), "evaluation completed");
            match serde_json::to_string_pretty(&results) {
                Ok(output) => println!("{}", output),
                Err(err) => {
                    eprintln!("Error encountered writing results: {:?}", err);
                    exit(1);
                }
            }
        }
        Err(err) => {
            eprintln!("Error encountered during execution: {:?}", err);
            exit(1);
        }
    }
}
