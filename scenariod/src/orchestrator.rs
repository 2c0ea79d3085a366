//! Sequencing of scenario runs
//!
//! The orchestrator runs scenarios one at a time against a shared proxy set.
//! After every run, whatever its outcome, it resets the proxies so the next
//! scenario starts clean. Failures are logged and the sequence moves on;
//! cancelling the token handed to [`Orchestrator::run`] stops it at once.
//!
//! In interactive mode a switch request cancels the running scenario through
//! a child token, waits for it to return, cleans up, and only then starts the
//! requested one. At no point are two scenarios running.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::metrics::{MetricsSink, RunStatus};
use crate::proxy::{cleanup_proxies, CleanupReport, ProxyHandle};
use crate::scenario::{wait_or_cancel, Scenario, ScenarioRegistry};

/// Which scenarios to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every registered scenario, in name order
    All,
    /// A single scenario
    Named(String),
}

impl Selection {
    /// `"all"` selects everything, anything else is a scenario name
    pub fn parse(value: &str) -> Self {
        if value == "all" {
            Selection::All
        } else {
            Selection::Named(value.to_string())
        }
    }
}

/// How many passes over the selection to make
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// A single pass
    Once,
    /// Exactly this many passes
    Times(usize),
    /// Until cancelled
    Forever,
}

impl Repeat {
    /// Whether another pass follows `completed` finished passes
    pub fn allows_another(&self, completed: usize) -> bool {
        match self {
            Repeat::Once => false,
            Repeat::Times(n) => completed < *n,
            Repeat::Forever => true,
        }
    }
}

/// Pauses used between runs
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Between two scenarios of one pass
    pub pause_between_scenarios: Duration,
    /// Between two passes
    pub pause_between_passes: Duration,
    /// After a live switch, before the next scenario starts
    pub switch_pause: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            pause_between_scenarios: Duration::from_secs(5),
            pause_between_passes: Duration::from_secs(10),
            switch_pause: Duration::from_millis(500),
        }
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            pause_between_scenarios: config.pause_between_scenarios,
            pause_between_passes: config.pause_between_passes,
            switch_pause: config.switch_pause,
        }
    }
}

/// How one scenario run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// All steps completed
    Succeeded,
    /// Stopped on an error, with its message
    Failed(String),
    /// Stopped by cancellation or a switch
    Cancelled,
}

/// Record of one scenario run
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    /// Scenario name
    pub scenario: String,
    /// 1-based pass (or, interactively, run) number
    pub pass: usize,
    /// How it ended
    pub outcome: RunOutcome,
    /// Wall time spent in `run`
    pub elapsed: Duration,
}

/// Summary of an orchestrated sequence
#[derive(Debug, Clone, Default)]
pub struct SequenceReport {
    /// Runs in execution order
    pub runs: Vec<ScenarioRun>,
    /// Passes that ran to the end
    pub passes_completed: usize,
    /// Whether cancellation cut the sequence short
    pub interrupted: bool,
}

impl SequenceReport {
    fn count(&self, predicate: impl Fn(&RunOutcome) -> bool) -> usize {
        self.runs.iter().filter(|r| predicate(&r.outcome)).count()
    }

    /// Runs that succeeded
    pub fn succeeded(&self) -> usize {
        self.count(|o| *o == RunOutcome::Succeeded)
    }

    /// Runs that failed
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::Failed(_)))
    }

    /// Runs that were cancelled
    pub fn cancelled(&self) -> usize {
        self.count(|o| *o == RunOutcome::Cancelled)
    }

    /// Whether any run failed
    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

enum Pause {
    Elapsed,
    Switched(Arc<dyn Scenario>),
    Cancelled,
}

/// Receives live switch requests by scenario name
struct Switches {
    rx: mpsc::Receiver<String>,
    open: bool,
}

impl Switches {
    /// Next request naming a registered scenario
    ///
    /// Unknown names are skipped. Never resolves once the sender is gone.
    async fn next(&mut self, registry: &ScenarioRegistry) -> Arc<dyn Scenario> {
        while self.open {
            match self.rx.recv().await {
                Some(name) => match registry.get(&name) {
                    Ok(scenario) => return scenario,
                    Err(e) => tracing::warn!("Ignoring switch request: {}", e),
                },
                None => self.open = false,
            }
        }
        std::future::pending().await
    }
}

/// Runs scenarios from a registry against a proxy set
pub struct Orchestrator {
    registry: Arc<ScenarioRegistry>,
    proxies: Vec<ProxyHandle>,
    metrics: Arc<dyn MetricsSink>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(
        registry: Arc<ScenarioRegistry>,
        proxies: Vec<ProxyHandle>,
        metrics: Arc<dyn MetricsSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            proxies,
            metrics,
            settings,
        }
    }

    /// The registry scenarios are drawn from
    pub fn registry(&self) -> &ScenarioRegistry {
        &self.registry
    }

    /// Scenarios a selection refers to, in execution order
    pub fn resolve(&self, selection: &Selection) -> Result<Vec<Arc<dyn Scenario>>> {
        match selection {
            Selection::All => Ok(self.registry.sorted()),
            Selection::Named(name) => Ok(vec![self.registry.get(name)?]),
        }
    }

    /// Remove every fault from every proxy
    pub async fn cleanup(&self) -> CleanupReport {
        cleanup_proxies(&self.proxies).await
    }

    /// Resolve `selection` and run it `repeat` times
    pub async fn run(
        &self,
        selection: &Selection,
        repeat: Repeat,
        cancel: &CancellationToken,
    ) -> Result<SequenceReport> {
        let scenarios = self.resolve(selection)?;
        Ok(self.run_sequence(&scenarios, repeat, cancel).await)
    }

    /// Run `scenarios` in order, `repeat` times
    pub async fn run_sequence(
        &self,
        scenarios: &[Arc<dyn Scenario>],
        repeat: Repeat,
        cancel: &CancellationToken,
    ) -> SequenceReport {
        let mut report = SequenceReport::default();
        if scenarios.is_empty() {
            tracing::warn!("No scenarios to run");
            return report;
        }

        let mut pass = 0;
        'passes: loop {
            pass += 1;
            tracing::info!("Starting pass {} over {} scenarios", pass, scenarios.len());

            for (i, scenario) in scenarios.iter().enumerate() {
                let run = self.run_one(scenario.as_ref(), pass, cancel).await;
                let cancelled = run.outcome == RunOutcome::Cancelled;
                report.runs.push(run);
                if cancelled {
                    report.interrupted = true;
                    break 'passes;
                }

                if i + 1 < scenarios.len() {
                    let pause = self.settings.pause_between_scenarios;
                    tracing::info!("Pausing {:?} before next scenario", pause);
                    if wait_or_cancel(cancel, pause).await.is_err() {
                        report.interrupted = true;
                        break 'passes;
                    }
                }
            }

            report.passes_completed += 1;
            if !repeat.allows_another(report.passes_completed) {
                break;
            }

            let pause = self.settings.pause_between_passes;
            tracing::info!("Pass {} complete, pausing {:?}", pass, pause);
            if wait_or_cancel(cancel, pause).await.is_err() {
                report.interrupted = true;
                break;
            }
        }

        tracing::info!(
            "Sequence finished: {} succeeded, {} failed, {} cancelled",
            report.succeeded(),
            report.failed(),
            report.cancelled()
        );
        report
    }

    /// Run `initial` repeatedly, switching to whatever `switches` names
    ///
    /// Repetition counting restarts after every switch. Returns when `repeat`
    /// is exhausted for the current scenario or `cancel` fires.
    pub async fn run_interactive(
        &self,
        initial: &str,
        repeat: Repeat,
        switches: mpsc::Receiver<String>,
        cancel: &CancellationToken,
    ) -> Result<SequenceReport> {
        let mut current = self.registry.get(initial)?;
        let mut switches = Switches {
            rx: switches,
            open: true,
        };
        let mut report = SequenceReport::default();
        let mut run_count = 1;

        loop {
            let child = cancel.child_token();
            let (run, switched_to) = self
                .run_switchable(current.as_ref(), run_count, &child, &mut switches)
                .await;
            let cancelled = run.outcome == RunOutcome::Cancelled;
            report.runs.push(run);

            if let Some(next) = switched_to {
                tracing::info!("Switched from {} to {}", current.name(), next.name());
                current = next;
                run_count = 1;
                if wait_or_cancel(cancel, self.settings.switch_pause).await.is_err() {
                    report.interrupted = true;
                    break;
                }
                continue;
            }

            if cancelled {
                report.interrupted = true;
                break;
            }

            report.passes_completed += 1;
            if !repeat.allows_another(run_count) {
                tracing::info!("All {} runs of {} complete", run_count, current.name());
                break;
            }

            match self
                .pause_or_switch(self.settings.pause_between_scenarios, cancel, &mut switches)
                .await
            {
                Pause::Elapsed => run_count += 1,
                Pause::Switched(next) => {
                    tracing::info!("Switched from {} to {}", current.name(), next.name());
                    current = next;
                    run_count = 1;
                }
                Pause::Cancelled => {
                    report.interrupted = true;
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn run_one(
        &self,
        scenario: &dyn Scenario,
        pass: usize,
        cancel: &CancellationToken,
    ) -> ScenarioRun {
        tracing::info!(
            scenario = scenario.name(),
            "Starting run {}: {}",
            pass,
            scenario.description()
        );
        let started = Instant::now();
        let result = scenario.run(cancel, &self.proxies).await;
        self.finish(scenario, pass, result, started.elapsed()).await
    }

    /// Run once, cancelling early if a valid switch request arrives
    async fn run_switchable(
        &self,
        scenario: &dyn Scenario,
        run_count: usize,
        child: &CancellationToken,
        switches: &mut Switches,
    ) -> (ScenarioRun, Option<Arc<dyn Scenario>>) {
        tracing::info!(
            scenario = scenario.name(),
            "Starting run {}: {}",
            run_count,
            scenario.description()
        );
        let started = Instant::now();
        let run = scenario.run(child, &self.proxies);
        tokio::pin!(run);

        let (result, next) = tokio::select! {
            result = &mut run => (result, None),
            next = switches.next(&self.registry) => {
                tracing::info!(scenario = scenario.name(), "Switch requested, cancelling");
                child.cancel();
                (run.await, Some(next))
            }
        };

        let run = self.finish(scenario, run_count, result, started.elapsed()).await;
        (run, next)
    }

    async fn pause_or_switch(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
        switches: &mut Switches,
    ) -> Pause {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Pause::Cancelled,
            next = switches.next(&self.registry) => Pause::Switched(next),
            _ = tokio::time::sleep(duration) => Pause::Elapsed,
        }
    }

    /// Record the outcome, reset the proxies and build the run record
    async fn finish(
        &self,
        scenario: &dyn Scenario,
        pass: usize,
        result: Result<()>,
        elapsed: Duration,
    ) -> ScenarioRun {
        let outcome = match result {
            Ok(()) => {
                tracing::info!(scenario = scenario.name(), "Run {} complete", pass);
                RunOutcome::Succeeded
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(scenario = scenario.name(), "Run {} cancelled", pass);
                RunOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!(scenario = scenario.name(), "Run {} failed: {}", pass, e);
                RunOutcome::Failed(e.to_string())
            }
        };

        if !scenario.reports_outcome() {
            match outcome {
                RunOutcome::Succeeded => {
                    self.metrics.record_run(scenario.name(), RunStatus::Success)
                }
                RunOutcome::Failed(_) => {
                    self.metrics.record_run(scenario.name(), RunStatus::Failed)
                }
                RunOutcome::Cancelled => {}
            }
        }

        self.cleanup().await;

        ScenarioRun {
            scenario: scenario.name().to_string(),
            pass,
            outcome,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_parse() {
        assert_eq!(Selection::parse("all"), Selection::All);
        assert_eq!(
            Selection::parse("latency"),
            Selection::Named("latency".to_string())
        );
    }

    #[test]
    fn test_repeat_allows_another() {
        assert!(!Repeat::Once.allows_another(1));
        assert!(Repeat::Times(3).allows_another(2));
        assert!(!Repeat::Times(3).allows_another(3));
        assert!(Repeat::Forever.allows_another(1_000));
    }

    #[test]
    fn test_report_counts() {
        let run = |outcome| ScenarioRun {
            scenario: "s".into(),
            pass: 1,
            outcome,
            elapsed: Duration::ZERO,
        };
        let report = SequenceReport {
            runs: vec![
                run(RunOutcome::Succeeded),
                run(RunOutcome::Failed("x".into())),
                run(RunOutcome::Cancelled),
                run(RunOutcome::Succeeded),
            ],
            passes_completed: 1,
            interrupted: true,
        };
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.cancelled(), 1);
        assert!(report.has_failures());
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config {
            switch_pause: Duration::from_millis(5),
            ..Config::default()
        };
        let settings = OrchestratorSettings::from(&config);
        assert_eq!(settings.switch_pause, Duration::from_millis(5));
        assert_eq!(settings.pause_between_scenarios, Duration::from_secs(5));
    }
}
