//! Proxy control plane abstraction
//!
//! A [`Proxy`] is one named traffic proxy that can be enabled, disabled and
//! have toxics attached. Scenarios only ever see `&[ProxyHandle]`, so tests
//! drive them with [`MockProxy`] while production uses [`ToxiproxyProxy`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::ProxyError;

mod mock;
mod toxiproxy;

pub use mock::{MockProxy, ProxyCall};
pub use toxiproxy::{ToxiproxyClient, ToxiproxyProxy};

/// Kind of toxic understood by Toxiproxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToxicKind {
    /// Adds delay to the stream
    Latency,
    /// Limits throughput; with rate 0 every affected chunk is dropped
    Bandwidth,
    /// Stops all data and closes the connection after a timeout
    Timeout,
    /// Any toxic type this crate does not model
    #[serde(other)]
    Unknown,
}

impl ToxicKind {
    /// Wire name of the toxic type
    pub fn as_str(&self) -> &'static str {
        match self {
            ToxicKind::Latency => "latency",
            ToxicKind::Bandwidth => "bandwidth",
            ToxicKind::Timeout => "timeout",
            ToxicKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ToxicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of traffic a toxic applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    /// Client to server
    Upstream,
    /// Server to client
    Downstream,
}

impl StreamDirection {
    /// Wire name of the direction
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamDirection::Upstream => "upstream",
            StreamDirection::Downstream => "downstream",
        }
    }
}

/// Request to attach a toxic to a proxy
///
/// An empty `name` lets the control plane assign `<type>_<stream>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToxicSpec {
    /// Toxic name, unique per proxy
    pub name: String,
    /// Toxic type
    #[serde(rename = "type")]
    pub kind: ToxicKind,
    /// Direction the toxic applies to
    pub stream: StreamDirection,
    /// Probability in `[0, 1]` that the toxic applies to a connection
    pub toxicity: f32,
    /// Type-specific parameters
    pub attributes: Map<String, Value>,
}

impl ToxicSpec {
    /// Latency toxic applied to every connection
    pub fn latency(latency_ms: u64, jitter_ms: u64) -> Self {
        let mut attributes = Map::new();
        attributes.insert("latency".to_string(), Value::from(latency_ms));
        attributes.insert("jitter".to_string(), Value::from(jitter_ms));
        Self {
            name: String::new(),
            kind: ToxicKind::Latency,
            stream: StreamDirection::Downstream,
            toxicity: 1.0,
            attributes,
        }
    }

    /// Packet loss modeled as a zero-rate bandwidth toxic
    ///
    /// `rate` becomes the toxicity: the probability a connection is fully
    /// stalled, not a per-packet drop ratio.
    pub fn packet_loss(rate: f64) -> Self {
        let mut attributes = Map::new();
        attributes.insert("rate".to_string(), Value::from(0));
        Self {
            name: String::new(),
            kind: ToxicKind::Bandwidth,
            stream: StreamDirection::Downstream,
            toxicity: rate as f32,
            attributes,
        }
    }

    /// Timeout toxic applied to every connection
    pub fn timeout(timeout_ms: u64) -> Self {
        let mut attributes = Map::new();
        attributes.insert("timeout".to_string(), Value::from(timeout_ms));
        Self {
            name: String::new(),
            kind: ToxicKind::Timeout,
            stream: StreamDirection::Downstream,
            toxicity: 1.0,
            attributes,
        }
    }

    /// Set an explicit toxic name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the stream direction
    pub fn on_stream(mut self, stream: StreamDirection) -> Self {
        self.stream = stream;
        self
    }

    /// The name the control plane will store this toxic under
    pub fn effective_name(&self) -> String {
        if self.name.is_empty() {
            format!("{}_{}", self.kind, self.stream.as_str())
        } else {
            self.name.clone()
        }
    }
}

/// A toxic currently attached to a proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toxic {
    /// Toxic name
    pub name: String,
    /// Toxic type
    #[serde(rename = "type")]
    pub kind: ToxicKind,
    /// Direction the toxic applies to
    pub stream: StreamDirection,
    /// Probability the toxic applies
    #[serde(default = "full_toxicity")]
    pub toxicity: f32,
    /// Type-specific parameters
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

fn full_toxicity() -> f32 {
    1.0
}

impl From<&ToxicSpec> for Toxic {
    fn from(spec: &ToxicSpec) -> Self {
        Self {
            name: spec.effective_name(),
            kind: spec.kind,
            stream: spec.stream,
            toxicity: spec.toxicity,
            attributes: spec.attributes.clone(),
        }
    }
}

/// One named traffic proxy
#[async_trait]
pub trait Proxy: Send + Sync + fmt::Debug {
    /// Proxy name, used in logs and as the metrics `server` label
    fn name(&self) -> &str;

    /// Let traffic flow again
    async fn enable(&self) -> Result<(), ProxyError>;

    /// Refuse all traffic
    async fn disable(&self) -> Result<(), ProxyError>;

    /// Attach a toxic and return it as stored by the control plane
    async fn add_toxic(&self, spec: &ToxicSpec) -> Result<Toxic, ProxyError>;

    /// Detach a toxic by name
    async fn remove_toxic(&self, name: &str) -> Result<(), ProxyError>;

    /// All toxics currently attached
    async fn toxics(&self) -> Result<Vec<Toxic>, ProxyError>;
}

/// Shared handle to a proxy
pub type ProxyHandle = Arc<dyn Proxy>;

/// A problem encountered while resetting proxies
#[derive(Debug)]
pub struct CleanupProblem {
    /// Proxy the failing call targeted
    pub proxy: String,
    /// What was being attempted
    pub operation: String,
    /// The error
    pub error: ProxyError,
}

/// Result of [`cleanup_proxies`]
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Number of toxics removed
    pub toxics_removed: usize,
    /// Failures, in the order they happened
    pub problems: Vec<CleanupProblem>,
}

impl CleanupReport {
    /// True when every call succeeded
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Remove every toxic from every proxy and enable them all
///
/// Keeps going past failures so one broken proxy does not leave the rest
/// faulted. Safe to call any number of times.
pub async fn cleanup_proxies(proxies: &[ProxyHandle]) -> CleanupReport {
    let mut report = CleanupReport::default();

    for proxy in proxies {
        match proxy.toxics().await {
            Ok(toxics) => {
                for toxic in toxics {
                    match proxy.remove_toxic(&toxic.name).await {
                        Ok(()) => report.toxics_removed += 1,
                        Err(error) => report.problems.push(CleanupProblem {
                            proxy: proxy.name().to_string(),
                            operation: format!("remove toxic {}", toxic.name),
                            error,
                        }),
                    }
                }
            }
            Err(error) => report.problems.push(CleanupProblem {
                proxy: proxy.name().to_string(),
                operation: "list toxics".to_string(),
                error,
            }),
        }

        if let Err(error) = proxy.enable().await {
            report.problems.push(CleanupProblem {
                proxy: proxy.name().to_string(),
                operation: "enable".to_string(),
                error,
            });
        }
    }

    for problem in &report.problems {
        tracing::warn!(
            "Cleanup: failed to {} on {}: {}",
            problem.operation,
            problem.proxy,
            problem.error
        );
    }
    tracing::debug!(
        "Cleanup removed {} toxics across {} proxies",
        report.toxics_removed,
        proxies.len()
    );

    report
}
