use anyhow::{Context, Result};
use colored::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::exit_codes::{EXIT_ERROR, EXIT_SUCCESS, EXIT_WARNING};
use crate::interactive::spawn_stdin_reader;
use crate::signal_handler::cancel_on_signal;
use scenariod::{
    CatalogOptions, Config, MetricsServer, Orchestrator, OrchestratorSettings, ProxyError,
    RunOutcome, ScenarioMetrics, ScenarioRegistry, Selection, SequenceReport, ToxiproxyClient,
};

/// Build the standard catalogue for `config`
pub fn build_registry(config: &Config, metrics: Arc<ScenarioMetrics>) -> ScenarioRegistry {
    ScenarioRegistry::builtin(metrics, &CatalogOptions::from(config))
}

/// Check the requested selection before touching the control plane
///
/// Returns the name interactive mode starts from.
pub fn validate_selection(registry: &ScenarioRegistry, requested: &str) -> Result<String> {
    match Selection::parse(requested) {
        Selection::All => registry
            .sorted()
            .first()
            .map(|s| s.name().to_string())
            .context("No scenarios registered"),
        Selection::Named(name) => {
            registry.get(&name)?;
            Ok(name)
        }
    }
}

/// Set up proxies and run the selected scenarios, returning the exit code
pub async fn run_scenarios(cli: &Cli, config: Config, requested: &str) -> Result<i32> {
    let metrics = Arc::new(ScenarioMetrics::new());
    let registry = build_registry(&config, metrics.clone());

    let first = match validate_selection(&registry, requested) {
        Ok(first) => first,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            eprintln!("Use --list to see available scenarios");
            return Ok(EXIT_ERROR);
        }
    };
    let names: BTreeSet<String> = registry.list().into_iter().collect();

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    let server_cancel = CancellationToken::new();
    if cli.no_metrics {
        tracing::info!("Metrics endpoint disabled");
    } else {
        let server = MetricsServer::bind(&config.metrics_addr, metrics.clone())
            .await
            .with_context(|| format!("Failed to bind metrics endpoint {}", config.metrics_addr))?;
        tracing::info!("Metrics: http://{}/metrics", server.local_addr()?);
        tokio::spawn(server.serve(server_cancel.clone()));
    }

    tracing::info!("Initializing toxiproxy at {}", config.toxiproxy_url);
    let client = ToxiproxyClient::new(&config.toxiproxy_url);
    let proxies = match client
        .setup(&config.proxies, config.ready_timeout, &cancel)
        .await
    {
        Ok(proxies) => proxies,
        Err(ProxyError::Cancelled) => {
            server_cancel.cancel();
            return Ok(EXIT_SUCCESS);
        }
        Err(e) => {
            server_cancel.cancel();
            eprintln!("{} setting up toxiproxy: {}", "Error".red().bold(), e);
            eprintln!("Make sure toxiproxy is running at {}", config.toxiproxy_url);
            return Ok(EXIT_ERROR);
        }
    };

    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        proxies,
        metrics,
        OrchestratorSettings::from(&config),
    );

    let repeat = cli.repeat();
    let outcome = if cli.interactive {
        let switches = spawn_stdin_reader(names, cancel.clone());
        orchestrator
            .run_interactive(&first, repeat, switches, &cancel)
            .await
    } else {
        orchestrator
            .run(&Selection::parse(requested), repeat, &cancel)
            .await
    };

    let report = orchestrator.cleanup().await;
    if !report.is_clean() {
        for problem in &report.problems {
            tracing::warn!(
                "Final cleanup: {} {} failed: {}",
                problem.proxy,
                problem.operation,
                problem.error
            );
        }
    }
    server_cancel.cancel();
    tracing::info!("Scenario controller shutting down");

    let report = outcome?;
    print_summary(&report);
    Ok(if report.has_failures() {
        EXIT_WARNING
    } else {
        EXIT_SUCCESS
    })
}

fn print_summary(report: &SequenceReport) {
    if report.runs.is_empty() {
        return;
    }

    println!();
    for run in &report.runs {
        let status = match &run.outcome {
            RunOutcome::Succeeded => "ok".green(),
            RunOutcome::Failed(_) => "failed".red(),
            RunOutcome::Cancelled => "cancelled".yellow(),
        };
        println!(
            "  [{}] {:<40} pass {:<3} {:>6}s",
            status,
            run.scenario,
            run.pass,
            run.elapsed.as_secs()
        );
        if let RunOutcome::Failed(reason) = &run.outcome {
            println!("        {}", reason.dimmed());
        }
    }
    println!(
        "{} succeeded, {} failed, {} cancelled{}",
        report.succeeded().to_string().green(),
        report.failed().to_string().red(),
        report.cancelled().to_string().yellow(),
        if report.interrupted { " (interrupted)" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ScenarioRegistry {
        build_registry(&Config::default(), Arc::new(ScenarioMetrics::new()))
    }

    #[test]
    fn test_all_starts_with_first_sorted() {
        let registry = registry();
        let first = validate_selection(&registry, "all").unwrap();
        assert_eq!(first, registry.sorted()[0].name());
    }

    #[test]
    fn test_named_selection_must_exist() {
        let registry = registry();
        assert_eq!(
            validate_selection(&registry, "flapping-node").unwrap(),
            "flapping-node"
        );
        let err = validate_selection(&registry, "no-such-scenario").unwrap_err();
        assert!(err.to_string().contains("no-such-scenario"));
    }

    #[test]
    fn test_registry_uses_configured_sweep() {
        let config = Config {
            latency_sweep_ms: 125,
            ..Config::default()
        };
        let registry = build_registry(&config, Arc::new(ScenarioMetrics::new()));
        assert!(registry.contains("latency-125ms-5s"));
    }
}
