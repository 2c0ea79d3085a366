//! Three-phase scenario execution
//!
//! Every run walks `Idle → Stabilization → Testing → Recovery → Idle`. The
//! fault lives only in the testing phase: a [`Perturbation`] is applied when
//! testing starts and removed when it ends, including when the run is
//! cancelled mid-test. Whatever way `run` exits, the scenario's phase metric
//! goes back to idle and the active flag is cleared.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{require_proxies, wait_or_cancel, Phase, Scenario};
use crate::error::Result;
use crate::metrics::{MetricsSink, RunStatus};
use crate::proxy::{cleanup_proxies, ProxyHandle};

/// A reversible fault
///
/// Implementations keep the handles of what `apply` created so `remove` can
/// undo exactly that. `remove` must succeed as a no-op when nothing is
/// active, including when `apply` never ran or failed part-way.
#[async_trait]
pub trait Perturbation: Send + Sync {
    /// Fewest proxies `apply` can work with
    fn min_proxies(&self) -> usize {
        1
    }

    /// Inject the fault
    async fn apply(&self, scenario: &str, proxies: &[ProxyHandle]) -> Result<()>;

    /// Undo whatever `apply` injected
    async fn remove(&self, scenario: &str) -> Result<()>;
}

/// Definition of a phased scenario
pub struct PhasedScenarioConfig {
    /// Unique scenario name
    pub name: String,
    /// Human description
    pub description: String,
    /// Baseline period before the fault
    pub stabilization: Duration,
    /// How long the fault is held
    pub testing: Duration,
    /// Settling period after the fault
    pub recovery: Duration,
    /// The fault itself
    pub perturbation: Box<dyn Perturbation>,
}

impl PhasedScenarioConfig {
    /// Default stabilization period
    pub const DEFAULT_STABILIZATION: Duration = Duration::from_secs(30);
    /// Default recovery period
    pub const DEFAULT_RECOVERY: Duration = Duration::from_secs(60);

    /// New config with default stabilization and recovery periods
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        testing: Duration,
        perturbation: impl Perturbation + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            stabilization: Self::DEFAULT_STABILIZATION,
            testing,
            recovery: Self::DEFAULT_RECOVERY,
            perturbation: Box::new(perturbation),
        }
    }

    /// Override the stabilization period
    pub fn with_stabilization(mut self, duration: Duration) -> Self {
        self.stabilization = duration;
        self
    }

    /// Override the recovery period
    pub fn with_recovery(mut self, duration: Duration) -> Self {
        self.recovery = duration;
        self
    }
}

/// Scenario running a [`Perturbation`] through the three phases
pub struct PhasedScenario {
    name: String,
    description: String,
    stabilization: Duration,
    testing: Duration,
    recovery: Duration,
    perturbation: Box<dyn Perturbation>,
    metrics: Arc<dyn MetricsSink>,
}

impl PhasedScenario {
    /// Build a scenario reporting to `metrics`
    pub fn new(config: PhasedScenarioConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            name: config.name,
            description: config.description,
            stabilization: config.stabilization,
            testing: config.testing,
            recovery: config.recovery,
            perturbation: config.perturbation,
            metrics,
        }
    }

    /// Configured duration of a phase; zero for idle
    pub fn duration(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Idle => Duration::ZERO,
            Phase::Stabilization => self.stabilization,
            Phase::Testing => self.testing,
            Phase::Recovery => self.recovery,
        }
    }

    /// Sum of the three phase durations
    pub fn total_duration(&self) -> Duration {
        Phase::TIMED.iter().map(|p| self.duration(*p)).sum()
    }

    fn enter(&self, phase: Phase) {
        tracing::info!(
            scenario = %self.name,
            phase = %phase,
            "Phase {} ({:?})",
            phase.gauge_value(),
            self.duration(phase)
        );
        self.metrics.set_phase(&self.name, phase);
    }

    fn fail(&self) {
        self.metrics.record_run(&self.name, RunStatus::Failed);
    }
}

/// Resets phase and active flag however the run ends, including when the
/// future is dropped
struct IdleOnExit<'a> {
    scenario: &'a str,
    metrics: &'a dyn MetricsSink,
}

impl Drop for IdleOnExit<'_> {
    fn drop(&mut self) {
        self.metrics.set_scenario_active(false);
        self.metrics.set_phase(self.scenario, Phase::Idle);
    }
}

#[async_trait]
impl Scenario for PhasedScenario {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn reports_outcome(&self) -> bool {
        true
    }

    async fn run(&self, cancel: &CancellationToken, proxies: &[ProxyHandle]) -> Result<()> {
        if let Err(e) = require_proxies(&self.name, proxies, self.perturbation.min_proxies()) {
            tracing::error!(scenario = %self.name, "{}", e);
            self.fail();
            return Err(e);
        }

        tracing::info!(scenario = %self.name, "Starting 3-phase execution");
        cleanup_proxies(proxies).await;
        for proxy in proxies {
            self.metrics.clear_faults(proxy.name());
        }

        self.metrics.set_scenario_active(true);
        for phase in Phase::TIMED {
            self.metrics
                .set_phase_duration(&self.name, phase, self.duration(phase));
        }
        let _idle = IdleOnExit {
            scenario: &self.name,
            metrics: self.metrics.as_ref(),
        };

        self.enter(Phase::Stabilization);
        wait_or_cancel(cancel, self.stabilization).await?;

        self.enter(Phase::Testing);
        if let Err(e) = self.perturbation.apply(&self.name, proxies).await {
            tracing::error!(scenario = %self.name, "Failed to apply perturbation: {}", e);
            self.fail();
            return Err(e);
        }

        if let Err(e) = wait_or_cancel(cancel, self.testing).await {
            if let Err(remove_err) = self.perturbation.remove(&self.name).await {
                tracing::warn!(
                    scenario = %self.name,
                    "Failed to remove perturbation after cancellation: {}",
                    remove_err
                );
            }
            return Err(e);
        }

        tracing::info!(scenario = %self.name, "Removing perturbation");
        if let Err(e) = self.perturbation.remove(&self.name).await {
            tracing::error!(scenario = %self.name, "Failed to remove perturbation: {}", e);
            self.fail();
            return Err(e);
        }

        let report = cleanup_proxies(proxies).await;
        if !report.is_clean() {
            tracing::warn!(
                scenario = %self.name,
                "Cleanup before recovery left {} problems",
                report.problems.len()
            );
        }

        self.enter(Phase::Recovery);
        wait_or_cancel(cancel, self.recovery).await?;

        tracing::info!(scenario = %self.name, "Complete");
        self.metrics.record_run(&self.name, RunStatus::Success);
        Ok(())
    }
}
