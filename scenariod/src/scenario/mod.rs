//! Scenario abstraction
//!
//! A [`Scenario`] is a named unit of fault injection with one blocking entry
//! point, [`Scenario::run`], that lasts for the scenario's whole duration and
//! returns early with [`ScenarioError::Cancelled`] when its token fires.
//!
//! Scenarios come in two shapes:
//! - fixed-pattern scenarios ([`fixed`]) that script their own timeline
//! - [`PhasedScenario`]s built by the families in [`families`], which share
//!   one stabilization → testing → recovery state machine
//!
//! A scenario value must not be run concurrently with itself.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Result, ScenarioError};
use crate::proxy::ProxyHandle;

pub mod families;
pub mod fixed;
mod phase;
pub mod phased;
pub mod registry;

pub use families::{LatencyFamily, MultiFailureFamily, PacketLossFamily};
pub use phase::Phase;
pub use phased::{Perturbation, PhasedScenario, PhasedScenarioConfig};
pub use registry::ScenarioRegistry;

/// A named, describable unit of fault injection
#[async_trait]
pub trait Scenario: Send + Sync {
    /// Unique name, used for selection and as a metrics label
    fn name(&self) -> &str;

    /// One-line human description
    fn description(&self) -> &str;

    /// Whether `run` records its own outcome in the metrics sink
    fn reports_outcome(&self) -> bool {
        false
    }

    /// Execute the scenario against `proxies`
    ///
    /// Returns `Err(ScenarioError::Cancelled)` when `cancel` fires first.
    async fn run(&self, cancel: &CancellationToken, proxies: &[ProxyHandle]) -> Result<()>;
}

/// Produces a group of related scenarios
pub trait ScenarioFamily {
    /// Build every scenario of the family
    fn scenarios(&self) -> Vec<Arc<dyn Scenario>>;
}

/// Knobs for building the standard catalogue
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    /// Latency applied by the latency sweep, in milliseconds
    pub latency_sweep_ms: u64,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            latency_sweep_ms: crate::config::DEFAULT_LATENCY_SWEEP_MS,
        }
    }
}

impl From<&Config> for CatalogOptions {
    fn from(config: &Config) -> Self {
        Self {
            latency_sweep_ms: config.latency_sweep_ms,
        }
    }
}

/// Sleep for `duration`, or fail with `Cancelled` as soon as `cancel` fires
///
/// Cancellation wins if both are ready.
pub async fn wait_or_cancel(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScenarioError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Fail with `Precondition` when fewer than `required` proxies are supplied
pub fn require_proxies(scenario: &str, proxies: &[ProxyHandle], required: usize) -> Result<()> {
    if proxies.len() < required {
        return Err(ScenarioError::Precondition {
            scenario: scenario.to_string(),
            required,
            actual: proxies.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::MockProxy;

    #[tokio::test(start_paused = true)]
    async fn test_wait_completes() {
        let cancel = CancellationToken::new();
        assert!(wait_or_cancel(&cancel, Duration::from_secs(60)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = wait_or_cancel(&cancel, Duration::ZERO).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_require_proxies() {
        let proxies: Vec<ProxyHandle> = vec![Arc::new(MockProxy::new("a"))];
        assert!(require_proxies("x", &proxies, 1).is_ok());
        assert!(matches!(
            require_proxies("x", &proxies, 3),
            Err(ScenarioError::Precondition { required: 3, actual: 1, .. })
        ));
    }
}
