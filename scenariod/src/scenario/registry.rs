//! Name → scenario lookup
//!
//! Built once at startup and read-only afterwards; the orchestrator receives
//! it behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use super::families::{LatencyFamily, MultiFailureFamily, PacketLossFamily};
use super::fixed::{
    BriefPacketDrop, ConstantLatency, ConstantPacketLoss, FlappingNode, MajorityNodeFailure,
    SingleNodeFailure, TotalPacketDrop,
};
use super::{CatalogOptions, Scenario, ScenarioFamily};
use crate::error::{Result, ScenarioError};
use crate::metrics::MetricsSink;

/// Registry of scenarios keyed by name
#[derive(Default)]
pub struct ScenarioRegistry {
    scenarios: HashMap<String, Arc<dyn Scenario>>,
}

impl ScenarioRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard catalogue: every fixed-pattern scenario plus the
    /// packet-loss, latency and multi-node families
    pub fn builtin(metrics: Arc<dyn MetricsSink>, options: &CatalogOptions) -> Self {
        let mut registry = Self::new();

        registry.register(SingleNodeFailure::default());
        registry.register(MajorityNodeFailure::default());
        registry.register(FlappingNode::default());
        registry.register(BriefPacketDrop::default());
        registry.register(TotalPacketDrop::default());
        registry.register(ConstantPacketLoss::default());
        registry.register(ConstantLatency::default());

        registry.register_family(&PacketLossFamily::new(metrics.clone()));
        registry.register_family(&LatencyFamily::new(options.latency_sweep_ms, metrics.clone()));
        registry.register_family(&MultiFailureFamily::new(metrics));

        tracing::debug!("Registered {} scenarios", registry.len());
        registry
    }

    /// Register a scenario, replacing any with the same name
    pub fn register<S: Scenario + 'static>(&mut self, scenario: S) {
        self.register_arc(Arc::new(scenario));
    }

    /// Register an already shared scenario, replacing any with the same name
    pub fn register_arc(&mut self, scenario: Arc<dyn Scenario>) {
        let name = scenario.name().to_string();
        if self.scenarios.insert(name.clone(), scenario).is_some() {
            tracing::debug!("Scenario {} re-registered", name);
        }
    }

    /// Register every scenario a family produces
    pub fn register_family(&mut self, family: &dyn ScenarioFamily) {
        for scenario in family.scenarios() {
            self.register_arc(scenario);
        }
    }

    /// Look up a scenario by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Scenario>> {
        self.scenarios
            .get(name)
            .cloned()
            .ok_or_else(|| ScenarioError::NotFound(name.to_string()))
    }

    /// Whether a scenario with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.scenarios.contains_key(name)
    }

    /// Every scenario, keyed by name
    pub fn all(&self) -> &HashMap<String, Arc<dyn Scenario>> {
        &self.scenarios
    }

    /// Scenario names in arbitrary order
    pub fn list(&self) -> Vec<String> {
        self.scenarios.keys().cloned().collect()
    }

    /// Scenarios ordered by name
    pub fn sorted(&self) -> Vec<Arc<dyn Scenario>> {
        let mut scenarios: Vec<Arc<dyn Scenario>> = self.scenarios.values().cloned().collect();
        scenarios.sort_by(|a, b| a.name().cmp(b.name()));
        scenarios
    }

    /// Number of registered scenarios
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}
