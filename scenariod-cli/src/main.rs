use std::process;

use scenariod::{Config, ScenarioMetrics};
use scenariod_cli::cli::Cli;
use scenariod_cli::exit_codes::{EXIT_ERROR, EXIT_SUCCESS};
use scenariod_cli::{list, run};
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    // RUST_LOG, when set, takes precedence over the verbosity flags
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(cli.log_level()).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(EXIT_ERROR);
        }
    };
    cli.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        process::exit(EXIT_ERROR);
    }

    if cli.list {
        let registry = run::build_registry(&config, Arc::new(ScenarioMetrics::new()));
        let code = match list::run_list_command(&registry, cli.format) {
            Ok(()) => EXIT_SUCCESS,
            Err(e) => {
                tracing::error!("List error: {}", e);
                EXIT_ERROR
            }
        };
        process::exit(code);
    }

    let Some(requested) = cli.scenario.clone() else {
        eprintln!("No scenario specified. Use --scenario <name>, --scenario all or --list");
        process::exit(EXIT_ERROR);
    };

    tracing::info!("Starting scenario controller");
    let code = match run::run_scenarios(&cli, config, &requested).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            EXIT_ERROR
        }
    };
    process::exit(code);
}
