//! Parameterized scenario families
//!
//! Each family expands into several [`PhasedScenario`]s that differ in one
//! parameter: loss rate, how long latency is held, or how many nodes fail.
//! Every generated scenario owns its own [`ToxicPerturbation`], so no fault
//! handle is ever shared between siblings.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::phased::{Perturbation, PhasedScenario, PhasedScenarioConfig};
use super::{Scenario, ScenarioFamily};
use crate::error::{ProxyResultExt, Result, ScenarioError};
use crate::metrics::{FaultType, MetricsSink};
use crate::proxy::{ProxyHandle, ToxicSpec};

/// Loss rates covered by [`PacketLossFamily`]
pub const PACKET_LOSS_RATES: [f64; 6] = [0.02, 0.05, 0.10, 0.20, 0.50, 1.0];

/// Testing durations covered by [`LatencyFamily`]
pub const LATENCY_WINDOWS: [Duration; 6] = [
    Duration::from_millis(100),
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(40),
    Duration::from_secs(120),
];

/// Latency added on each node by the multi-node latency scenario
pub const MULTI_FAILURE_LATENCY_MS: u64 = 500;

const SWEEP_TESTING: Duration = Duration::from_secs(60);

/// Compact duration label: `100ms`, `5s`, `2m`, `1m30s`
///
/// Falls back to milliseconds when the value is not a whole second.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 || d.subsec_millis() != 0 {
        format!("{}ms", d.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}m{}s", secs / 60, secs % 60)
    }
}

#[derive(Debug)]
struct ActiveFault {
    proxy: ProxyHandle,
    toxic: String,
}

#[derive(Debug, Default)]
struct FaultSlot {
    active: Vec<ActiveFault>,
}

/// Adds one toxic to each of the first `targets` proxies and removes exactly
/// those toxics again
pub struct ToxicPerturbation {
    spec: ToxicSpec,
    fault: FaultType,
    value: f64,
    targets: usize,
    min_proxies: usize,
    metrics: Arc<dyn MetricsSink>,
    slot: Mutex<FaultSlot>,
}

impl ToxicPerturbation {
    /// Fault on `proxies[0]` only
    pub fn single(
        spec: ToxicSpec,
        fault: FaultType,
        value: f64,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            spec,
            fault,
            value,
            targets: 1,
            min_proxies: 1,
            metrics,
            slot: Mutex::new(FaultSlot::default()),
        }
    }

    /// Fault on `proxies[0..targets]`, requiring at least `min_proxies`
    pub fn multi(
        spec: ToxicSpec,
        fault: FaultType,
        value: f64,
        targets: usize,
        min_proxies: usize,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            targets,
            min_proxies: min_proxies.max(targets),
            ..Self::single(spec, fault, value, metrics)
        }
    }

    fn slot(&self) -> MutexGuard<'_, FaultSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Names of proxies currently carrying this fault
    pub fn affected(&self) -> Vec<String> {
        self.slot()
            .active
            .iter()
            .map(|f| f.proxy.name().to_string())
            .collect()
    }
}

#[async_trait]
impl Perturbation for ToxicPerturbation {
    fn min_proxies(&self) -> usize {
        self.min_proxies
    }

    async fn apply(&self, scenario: &str, proxies: &[ProxyHandle]) -> Result<()> {
        if proxies.len() < self.min_proxies {
            return Err(ScenarioError::Precondition {
                scenario: scenario.to_string(),
                required: self.min_proxies,
                actual: proxies.len(),
            });
        }

        // Leftovers from an earlier run were wiped by the pre-run cleanup
        self.slot().active.clear();

        let targets = &proxies[..self.targets];
        tracing::info!(
            scenario,
            "Applying {} ({}={}) to {:?}",
            self.fault.as_str(),
            self.fault.param(),
            self.value,
            targets.iter().map(|p| p.name()).collect::<Vec<_>>()
        );

        for proxy in targets {
            let toxic = proxy
                .add_toxic(&self.spec)
                .await
                .on_proxy(proxy.name(), "add toxic")?;
            self.slot().active.push(ActiveFault {
                proxy: proxy.clone(),
                toxic: toxic.name,
            });
            self.metrics.set_toxic_active(proxy.name(), self.fault, true);
            self.metrics
                .set_toxic_value(proxy.name(), self.fault, self.fault.param(), self.value);
        }

        Ok(())
    }

    async fn remove(&self, scenario: &str) -> Result<()> {
        let active = std::mem::take(&mut self.slot().active);
        if active.is_empty() {
            return Ok(());
        }

        tracing::info!(
            scenario,
            "Removing {} from {:?}",
            self.fault.as_str(),
            active.iter().map(|f| f.proxy.name()).collect::<Vec<_>>()
        );

        let mut first_error = None;
        let mut remaining = Vec::new();
        for fault in active {
            match fault.proxy.remove_toxic(&fault.toxic).await {
                Ok(()) => {
                    self.metrics
                        .set_toxic_active(fault.proxy.name(), self.fault, false);
                    self.metrics.set_toxic_value(
                        fault.proxy.name(),
                        self.fault,
                        self.fault.param(),
                        0.0,
                    );
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error =
                            Some(ScenarioError::proxy(fault.proxy.name(), "remove toxic", e));
                    }
                    remaining.push(fault);
                }
            }
        }

        self.slot().active.extend(remaining);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Packet loss sweep on a single node
#[derive(Clone)]
pub struct PacketLossFamily {
    metrics: Arc<dyn MetricsSink>,
}

impl PacketLossFamily {
    /// Family reporting to `metrics`
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics }
    }

    /// Build the scenario for one loss rate
    pub fn scenario(&self, rate: f64) -> PhasedScenario {
        let pct = rate * 100.0;
        let perturbation = ToxicPerturbation::single(
            ToxicSpec::packet_loss(rate),
            FaultType::PacketLoss,
            rate,
            self.metrics.clone(),
        );
        PhasedScenario::new(
            PhasedScenarioConfig::new(
                format!("packet-loss-{pct:.0}-pct"),
                format!("{pct:.0}% packet loss on single server for 1 minute"),
                SWEEP_TESTING,
                perturbation,
            ),
            self.metrics.clone(),
        )
    }
}

impl ScenarioFamily for PacketLossFamily {
    fn scenarios(&self) -> Vec<Arc<dyn Scenario>> {
        PACKET_LOSS_RATES
            .iter()
            .map(|rate| Arc::new(self.scenario(*rate)) as Arc<dyn Scenario>)
            .collect()
    }
}

/// Fixed latency on a single node, held for increasing windows
#[derive(Clone)]
pub struct LatencyFamily {
    latency_ms: u64,
    metrics: Arc<dyn MetricsSink>,
}

impl LatencyFamily {
    /// Family adding `latency_ms` of delay
    pub fn new(latency_ms: u64, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { latency_ms, metrics }
    }

    /// Build the scenario holding latency for `window`
    pub fn scenario(&self, window: Duration) -> PhasedScenario {
        let label = format_duration(window);
        let perturbation = ToxicPerturbation::single(
            ToxicSpec::latency(self.latency_ms, 0),
            FaultType::Latency,
            self.latency_ms as f64,
            self.metrics.clone(),
        );
        PhasedScenario::new(
            PhasedScenarioConfig::new(
                format!("latency-{}ms-{}", self.latency_ms, label),
                format!("+{}ms latency on single server for {}", self.latency_ms, label),
                window,
                perturbation,
            ),
            self.metrics.clone(),
        )
    }
}

impl ScenarioFamily for LatencyFamily {
    fn scenarios(&self) -> Vec<Arc<dyn Scenario>> {
        LATENCY_WINDOWS
            .iter()
            .map(|window| Arc::new(self.scenario(*window)) as Arc<dyn Scenario>)
            .collect()
    }
}

/// Faults on two of three nodes at once
#[derive(Clone)]
pub struct MultiFailureFamily {
    metrics: Arc<dyn MetricsSink>,
}

impl MultiFailureFamily {
    /// Family reporting to `metrics`
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics }
    }

    /// Total packet loss on `proxies[0]` and `proxies[1]`
    pub fn packet_loss(&self) -> PhasedScenario {
        let perturbation = ToxicPerturbation::multi(
            ToxicSpec::packet_loss(1.0),
            FaultType::PacketLoss,
            1.0,
            2,
            3,
            self.metrics.clone(),
        );
        PhasedScenario::new(
            PhasedScenarioConfig::new(
                "multi-failure-2-servers-packet-loss",
                "100% packet loss on 2 out of 3 servers simultaneously for 1 minute",
                SWEEP_TESTING,
                perturbation,
            ),
            self.metrics.clone(),
        )
    }

    /// Added latency on `proxies[0]` and `proxies[1]`
    pub fn latency(&self) -> PhasedScenario {
        let perturbation = ToxicPerturbation::multi(
            ToxicSpec::latency(MULTI_FAILURE_LATENCY_MS, 0),
            FaultType::Latency,
            MULTI_FAILURE_LATENCY_MS as f64,
            2,
            3,
            self.metrics.clone(),
        );
        PhasedScenario::new(
            PhasedScenarioConfig::new(
                "multi-failure-2-servers-latency",
                format!(
                    "+{}ms latency on 2 out of 3 servers simultaneously for 1 minute",
                    MULTI_FAILURE_LATENCY_MS
                ),
                SWEEP_TESTING,
                perturbation,
            ),
            self.metrics.clone(),
        )
    }
}

impl ScenarioFamily for MultiFailureFamily {
    fn scenarios(&self) -> Vec<Arc<dyn Scenario>> {
        vec![Arc::new(self.packet_loss()), Arc::new(self.latency())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{NoopMetrics, ScenarioMetrics};
    use crate::proxy::{MockProxy, ProxyCall};
    use proptest::prelude::*;

    fn noop() -> Arc<dyn MetricsSink> {
        Arc::new(NoopMetrics)
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(100)), "100ms");
        assert_eq!(format_duration(Duration::from_secs(1)), "1s");
        assert_eq!(format_duration(Duration::from_secs(40)), "40s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
    }

    #[test]
    fn test_packet_loss_names() {
        let names: Vec<String> = PacketLossFamily::new(noop())
            .scenarios()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "packet-loss-2-pct",
                "packet-loss-5-pct",
                "packet-loss-10-pct",
                "packet-loss-20-pct",
                "packet-loss-50-pct",
                "packet-loss-100-pct",
            ]
        );
    }

    #[test]
    fn test_latency_names_and_windows() {
        let family = LatencyFamily::new(200, noop());
        let names: Vec<String> = family
            .scenarios()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "latency-200ms-100ms",
                "latency-200ms-1s",
                "latency-200ms-5s",
                "latency-200ms-10s",
                "latency-200ms-40s",
                "latency-200ms-2m",
            ]
        );
        let s = family.scenario(Duration::from_secs(40));
        assert_eq!(s.description(), "+200ms latency on single server for 40s");
        assert_eq!(s.duration(crate::scenario::Phase::Testing), Duration::from_secs(40));
    }

    #[test]
    fn test_multi_failure_catalogue() {
        let scenarios = MultiFailureFamily::new(noop()).scenarios();
        assert_eq!(scenarios.len(), 2);
        assert_eq!(scenarios[0].name(), "multi-failure-2-servers-packet-loss");
        assert_eq!(scenarios[1].name(), "multi-failure-2-servers-latency");
    }

    #[tokio::test]
    async fn test_remove_without_apply_is_noop() {
        let p = ToxicPerturbation::single(
            ToxicSpec::packet_loss(0.1),
            FaultType::PacketLoss,
            0.1,
            noop(),
        );
        assert!(p.remove("x").await.is_ok());
    }

    #[tokio::test]
    async fn test_apply_and_remove_track_metrics() {
        let metrics = Arc::new(ScenarioMetrics::new());
        let p = ToxicPerturbation::single(
            ToxicSpec::packet_loss(0.5),
            FaultType::PacketLoss,
            0.5,
            metrics.clone(),
        );
        let proxy = Arc::new(MockProxy::new("m1"));
        let proxies: Vec<ProxyHandle> = vec![proxy.clone(), Arc::new(MockProxy::new("m2"))];

        p.apply("x", &proxies).await.unwrap();
        assert_eq!(p.affected(), vec!["m1".to_string()]);
        assert_eq!(proxy.active_toxics().len(), 1);
        assert!(metrics.toxic_active("m1", FaultType::PacketLoss));
        assert_eq!(metrics.toxic_value("m1", FaultType::PacketLoss, "rate"), Some(0.5));

        p.remove("x").await.unwrap();
        assert!(p.affected().is_empty());
        assert!(proxy.active_toxics().is_empty());
        assert!(!metrics.toxic_active("m1", FaultType::PacketLoss));
        assert_eq!(metrics.toxic_value("m1", FaultType::PacketLoss, "rate"), Some(0.0));
    }

    #[tokio::test]
    async fn test_failed_remove_keeps_handle_for_retry() {
        let p =
            ToxicPerturbation::single(ToxicSpec::latency(10, 0), FaultType::Latency, 10.0, noop());
        let proxy = Arc::new(MockProxy::new("m1"));
        let proxies: Vec<ProxyHandle> = vec![proxy.clone()];

        p.apply("x", &proxies).await.unwrap();
        proxy.fail_remove_toxic(true);
        assert!(p.remove("x").await.is_err());
        assert_eq!(p.affected(), vec!["m1".to_string()]);

        proxy.fail_remove_toxic(false);
        p.remove("x").await.unwrap();
        assert!(proxy.active_toxics().is_empty());
        assert_eq!(
            proxy.count_calls(|c| matches!(c, ProxyCall::RemoveToxic(_))),
            2
        );
    }

    #[tokio::test]
    async fn test_multi_apply_stops_at_first_failure() {
        let p = ToxicPerturbation::multi(
            ToxicSpec::packet_loss(1.0),
            FaultType::PacketLoss,
            1.0,
            2,
            3,
            noop(),
        );
        let a = Arc::new(MockProxy::new("a"));
        let b = Arc::new(MockProxy::new("b"));
        let c = Arc::new(MockProxy::new("c"));
        b.fail_add_toxic(true);
        let proxies: Vec<ProxyHandle> = vec![a.clone(), b.clone(), c.clone()];

        let err = p.apply("x", &proxies).await.unwrap_err();
        assert!(err.to_string().contains("'b'"));
        assert_eq!(a.active_toxics().len(), 1);
        assert!(c.calls().is_empty());

        // The part that did get applied can still be removed
        p.remove("x").await.unwrap();
        assert!(a.active_toxics().is_empty());
    }

    proptest! {
        #[test]
        fn prop_packet_loss_name_matches_description(pct in 1u32..=100) {
            let rate = f64::from(pct) / 100.0;
            let s = PacketLossFamily::new(noop()).scenario(rate);
            prop_assert_eq!(s.name(), format!("packet-loss-{pct}-pct"));
            let expected = format!("{pct}% packet loss");
            prop_assert!(s.description().starts_with(&expected));
        }
    }
}
