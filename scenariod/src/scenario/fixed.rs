//! Fixed-pattern scenarios
//!
//! These script their own timeline instead of going through
//! [`PhasedScenario`](super::PhasedScenario). They leave faults in place when
//! cancelled; the orchestrator's cleanup after every run restores the proxies.
//! They do not report outcomes themselves.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{require_proxies, wait_or_cancel, Scenario};
use crate::error::{ProxyResultExt, Result};
use crate::proxy::{ProxyHandle, ToxicSpec};

/// Disable `targets`, hold, re-enable, then wait out `recovery`
async fn outage(
    scenario: &str,
    cancel: &CancellationToken,
    targets: &[ProxyHandle],
    down: Duration,
    recovery: Duration,
) -> Result<()> {
    for proxy in targets {
        tracing::info!(scenario, proxy = proxy.name(), "Disabling node");
        proxy.disable().await.on_proxy(proxy.name(), "disable")?;
    }
    wait_or_cancel(cancel, down).await?;

    for proxy in targets {
        tracing::info!(scenario, proxy = proxy.name(), "Re-enabling node");
        proxy.enable().await.on_proxy(proxy.name(), "enable")?;
    }
    tracing::info!(scenario, "Allowing {:?} recovery time", recovery);
    wait_or_cancel(cancel, recovery).await
}

/// Add `spec` to each of `targets`, hold, remove, then wait out `recovery`
async fn hold_toxic(
    scenario: &str,
    cancel: &CancellationToken,
    targets: &[ProxyHandle],
    spec: &ToxicSpec,
    hold: Duration,
    recovery: Duration,
) -> Result<()> {
    let mut added = Vec::with_capacity(targets.len());
    for proxy in targets {
        let toxic = proxy.add_toxic(spec).await.on_proxy(proxy.name(), "add toxic")?;
        tracing::info!(scenario, proxy = proxy.name(), toxic = %toxic.name, "Toxic added");
        added.push((proxy, toxic.name));
    }
    wait_or_cancel(cancel, hold).await?;

    for (proxy, toxic) in added {
        proxy
            .remove_toxic(&toxic)
            .await
            .on_proxy(proxy.name(), "remove toxic")?;
    }
    tracing::info!(scenario, "Allowing {:?} recovery time", recovery);
    wait_or_cancel(cancel, recovery).await
}

/// One of three nodes goes down
#[derive(Debug, Clone)]
pub struct SingleNodeFailure {
    /// How long the node stays down
    pub down: Duration,
    /// Wait after re-enabling
    pub recovery: Duration,
}

impl Default for SingleNodeFailure {
    fn default() -> Self {
        Self {
            down: Duration::from_secs(15),
            recovery: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl Scenario for SingleNodeFailure {
    fn name(&self) -> &str {
        "single-node-failure"
    }

    fn description(&self) -> &str {
        "Single node failure (1 of 3) for 15s - simulates partial availability"
    }

    async fn run(&self, cancel: &CancellationToken, proxies: &[ProxyHandle]) -> Result<()> {
        require_proxies(self.name(), proxies, 3)?;
        outage(self.name(), cancel, &proxies[..1], self.down, self.recovery).await
    }
}

/// Two of three nodes go down, losing quorum
#[derive(Debug, Clone)]
pub struct MajorityNodeFailure {
    /// How long the nodes stay down
    pub down: Duration,
    /// Wait after re-enabling
    pub recovery: Duration,
}

impl Default for MajorityNodeFailure {
    fn default() -> Self {
        Self {
            down: Duration::from_secs(10),
            recovery: Duration::from_secs(15),
        }
    }
}

#[async_trait]
impl Scenario for MajorityNodeFailure {
    fn name(&self) -> &str {
        "majority-node-failure"
    }

    fn description(&self) -> &str {
        "Majority node failure (2 of 3) for 10s - simulates quorum loss"
    }

    async fn run(&self, cancel: &CancellationToken, proxies: &[ProxyHandle]) -> Result<()> {
        require_proxies(self.name(), proxies, 3)?;
        outage(self.name(), cancel, &proxies[..2], self.down, self.recovery).await
    }
}

/// The first node goes down and up repeatedly
#[derive(Debug, Clone)]
pub struct FlappingNode {
    /// Number of down/up cycles
    pub cycles: usize,
    /// Time down per cycle
    pub down: Duration,
    /// Time up per cycle
    pub up: Duration,
    /// Wait after the last cycle
    pub recovery: Duration,
}

impl Default for FlappingNode {
    fn default() -> Self {
        Self {
            cycles: 5,
            down: Duration::from_secs(10),
            up: Duration::from_secs(10),
            recovery: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl Scenario for FlappingNode {
    fn name(&self) -> &str {
        "flapping-node"
    }

    fn description(&self) -> &str {
        "Node flapping (up/down every 10s) - simulates unstable node"
    }

    async fn run(&self, cancel: &CancellationToken, proxies: &[ProxyHandle]) -> Result<()> {
        require_proxies(self.name(), proxies, 1)?;
        let proxy = &proxies[0];
        tracing::info!(
            scenario = self.name(),
            proxy = proxy.name(),
            "Flapping for {} cycles",
            self.cycles
        );

        for cycle in 1..=self.cycles {
            tracing::debug!(scenario = self.name(), "Cycle {}/{}: down", cycle, self.cycles);
            proxy.disable().await.on_proxy(proxy.name(), "disable")?;
            wait_or_cancel(cancel, self.down).await?;

            tracing::debug!(scenario = self.name(), "Cycle {}/{}: up", cycle, self.cycles);
            proxy.enable().await.on_proxy(proxy.name(), "enable")?;
            wait_or_cancel(cancel, self.up).await?;
        }

        wait_or_cancel(cancel, self.recovery).await
    }
}

/// A 100ms timeout toxic on the first node
#[derive(Debug, Clone)]
pub struct BriefPacketDrop {
    /// Timeout toxic value in milliseconds
    pub timeout_ms: u64,
    /// How long the toxic stays attached
    pub hold: Duration,
    /// Wait after removing it
    pub recovery: Duration,
}

impl Default for BriefPacketDrop {
    fn default() -> Self {
        Self {
            timeout_ms: 100,
            hold: Duration::from_secs(5),
            recovery: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl Scenario for BriefPacketDrop {
    fn name(&self) -> &str {
        "brief-packet-drop"
    }

    fn description(&self) -> &str {
        "Brief packet drop (100ms) on one node - simulates transient network glitch"
    }

    async fn run(&self, cancel: &CancellationToken, proxies: &[ProxyHandle]) -> Result<()> {
        require_proxies(self.name(), proxies, 1)?;
        let spec = ToxicSpec::timeout(self.timeout_ms).named("brief_timeout");
        hold_toxic(self.name(), cancel, &proxies[..1], &spec, self.hold, self.recovery).await
    }
}

/// The first node is fully partitioned
#[derive(Debug, Clone)]
pub struct TotalPacketDrop {
    /// How long the node stays disabled
    pub down: Duration,
    /// Wait after re-enabling
    pub recovery: Duration,
}

impl Default for TotalPacketDrop {
    fn default() -> Self {
        Self {
            down: Duration::from_secs(10),
            recovery: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl Scenario for TotalPacketDrop {
    fn name(&self) -> &str {
        "total-packet-drop"
    }

    fn description(&self) -> &str {
        "Total packet drop (10s) on one node - simulates complete network partition"
    }

    async fn run(&self, cancel: &CancellationToken, proxies: &[ProxyHandle]) -> Result<()> {
        require_proxies(self.name(), proxies, 1)?;
        outage(self.name(), cancel, &proxies[..1], self.down, self.recovery).await
    }
}

/// 5% packet loss on every node
#[derive(Debug, Clone)]
pub struct ConstantPacketLoss {
    /// Loss rate applied as toxicity
    pub rate: f64,
    /// How long loss is held
    pub hold: Duration,
    /// Wait after removing it
    pub recovery: Duration,
}

impl Default for ConstantPacketLoss {
    fn default() -> Self {
        Self {
            rate: 0.05,
            hold: Duration::from_secs(20),
            recovery: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl Scenario for ConstantPacketLoss {
    fn name(&self) -> &str {
        "packet-loss"
    }

    fn description(&self) -> &str {
        "5% packet loss on all nodes - simulates degraded network quality"
    }

    async fn run(&self, cancel: &CancellationToken, proxies: &[ProxyHandle]) -> Result<()> {
        let spec = ToxicSpec::packet_loss(self.rate).named("packet_loss");
        hold_toxic(self.name(), cancel, proxies, &spec, self.hold, self.recovery).await
    }
}

/// 500ms ± 50ms latency on every node
#[derive(Debug, Clone)]
pub struct ConstantLatency {
    /// Added latency in milliseconds
    pub latency_ms: u64,
    /// Jitter in milliseconds
    pub jitter_ms: u64,
    /// How long latency is held
    pub hold: Duration,
    /// Wait after removing it
    pub recovery: Duration,
}

impl Default for ConstantLatency {
    fn default() -> Self {
        Self {
            latency_ms: 500,
            jitter_ms: 50,
            hold: Duration::from_secs(30),
            recovery: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl Scenario for ConstantLatency {
    fn name(&self) -> &str {
        "latency"
    }

    fn description(&self) -> &str {
        "500ms latency (+/- 50ms jitter) on all nodes - simulates slow network"
    }

    async fn run(&self, cancel: &CancellationToken, proxies: &[ProxyHandle]) -> Result<()> {
        let spec = ToxicSpec::latency(self.latency_ms, self.jitter_ms).named("high_latency");
        hold_toxic(self.name(), cancel, proxies, &spec, self.hold, self.recovery).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScenarioError;
    use crate::proxy::{MockProxy, ProxyCall};
    use std::sync::Arc;

    fn mocks(n: usize) -> (Vec<Arc<MockProxy>>, Vec<ProxyHandle>) {
        let mocks: Vec<Arc<MockProxy>> = (0..n)
            .map(|i| Arc::new(MockProxy::new(format!("memcache{}", i + 1))))
            .collect();
        let handles = mocks.iter().map(|m| m.clone() as ProxyHandle).collect();
        (mocks, handles)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_node_failure_needs_three() {
        let (mocks, handles) = mocks(2);
        let err = SingleNodeFailure::default()
            .run(&CancellationToken::new(), &handles)
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Precondition { required: 3, actual: 2, .. }));
        assert!(mocks.iter().all(|m| m.calls().is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_majority_failure_disables_first_two() {
        let (mocks, handles) = mocks(3);
        MajorityNodeFailure::default()
            .run(&CancellationToken::new(), &handles)
            .await
            .unwrap();
        for m in &mocks[..2] {
            assert_eq!(m.calls(), vec![ProxyCall::Disable, ProxyCall::Enable]);
        }
        assert!(mocks[2].calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_cycles() {
        let (mocks, handles) = mocks(1);
        FlappingNode::default()
            .run(&CancellationToken::new(), &handles)
            .await
            .unwrap();
        assert_eq!(mocks[0].count_calls(|c| *c == ProxyCall::Disable), 5);
        assert_eq!(mocks[0].count_calls(|c| *c == ProxyCall::Enable), 5);
        assert!(mocks[0].is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_outage_leaves_node_down() {
        let (mocks, handles) = mocks(1);
        let cancel = CancellationToken::new();
        let scenario = TotalPacketDrop::default();

        let run = scenario.run(&cancel, &handles);
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => panic!("finished early"),
            _ = tokio::time::sleep(Duration::from_secs(1)) => cancel.cancel(),
        }
        assert!(run.await.unwrap_err().is_cancelled());
        assert!(!mocks[0].is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_brief_packet_drop_names_toxic() {
        let (mocks, handles) = mocks(2);
        BriefPacketDrop::default()
            .run(&CancellationToken::new(), &handles)
            .await
            .unwrap();
        assert_eq!(
            mocks[0].calls(),
            vec![
                ProxyCall::AddToxic("brief_timeout".into()),
                ProxyCall::RemoveToxic("brief_timeout".into()),
            ]
        );
        assert!(mocks[1].calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_constant_latency_hits_every_node() {
        let (mocks, handles) = mocks(3);
        ConstantLatency::default()
            .run(&CancellationToken::new(), &handles)
            .await
            .unwrap();
        for m in &mocks {
            assert_eq!(m.count_calls(|c| matches!(c, ProxyCall::AddToxic(_))), 1);
            assert!(m.active_toxics().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_constant_packet_loss_without_proxies_just_waits() {
        let start = tokio::time::Instant::now();
        ConstantPacketLoss::default()
            .run(&CancellationToken::new(), &[])
            .await
            .unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(25) && elapsed < Duration::from_secs(26));
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_failure_names_proxy() {
        let (mocks, handles) = mocks(3);
        mocks[0].fail_disable(true);
        let err = SingleNodeFailure::default()
            .run(&CancellationToken::new(), &handles)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'memcache1'"));
        assert!(!err.is_cancelled());
    }
}
