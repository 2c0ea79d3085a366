//! # scenariod
//!
//! Failure-injection scenario orchestration for services fronted by
//! [Toxiproxy](https://github.com/Shopify/toxiproxy).
//!
//! ## Features
//!
//! - **Scenarios**: named, describable units of fault injection (node outages,
//!   flapping, packet loss, added latency)
//! - **Phased execution**: stabilization → testing → recovery with clean
//!   cancellation and fault removal
//! - **Scenario families**: parameter sweeps over loss rates, latency windows
//!   and multi-node failures
//! - **Orchestration**: run one scenario, all of them, loop forever, or switch
//!   scenarios live while guaranteeing only one touches the proxies at a time
//! - **Metrics**: phase and fault state exported in Prometheus text format
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scenariod::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<()> {
//! let config = Config::load(None)?;
//! let metrics = Arc::new(ScenarioMetrics::new());
//! let registry = ScenarioRegistry::builtin(metrics.clone(), &CatalogOptions::from(&config));
//!
//! let client = ToxiproxyClient::new(&config.toxiproxy_url);
//! let cancel = CancellationToken::new();
//! let proxies = client
//!     .setup(&config.proxies, config.ready_timeout, &cancel)
//!     .await
//!     .map_err(|e| ScenarioError::Other(e.to_string()))?;
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(registry),
//!     proxies,
//!     metrics,
//!     OrchestratorSettings::from(&config),
//! );
//! let report = orchestrator
//!     .run(&Selection::parse("packet-loss-10-pct"), Repeat::Once, &cancel)
//!     .await?;
//! println!("{} succeeded", report.succeeded());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Error types used throughout the library
pub mod error;

/// Configuration loading from defaults, environment and YAML
pub mod config;

/// Proxy control plane abstraction and implementations
pub mod proxy;

/// Scenario telemetry sink and Prometheus exporter
pub mod metrics;

/// Scenario abstraction, phased execution, families and registry
pub mod scenario;

/// Sequencing of scenario runs with cancellation and live switching
pub mod orchestrator;

pub use config::{Config, ConfigError, ProxyDefinition};
pub use error::{ProxyError, Result, ScenarioError};
pub use metrics::{MetricsServer, MetricsSink, NoopMetrics, RunStatus, ScenarioMetrics};
pub use orchestrator::{
    Orchestrator, OrchestratorSettings, Repeat, RunOutcome, ScenarioRun, Selection,
    SequenceReport,
};
pub use proxy::{Proxy, ProxyHandle, Toxic, ToxicSpec, ToxiproxyClient};
pub use scenario::{
    CatalogOptions, Phase, PhasedScenario, PhasedScenarioConfig, Scenario, ScenarioRegistry,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        CatalogOptions, Config, MetricsSink, Orchestrator, OrchestratorSettings, Phase,
        PhasedScenario, PhasedScenarioConfig, Proxy, ProxyHandle, Repeat, Result, RunOutcome,
        Scenario, ScenarioError, ScenarioMetrics, ScenarioRegistry, Selection, SequenceReport,
        ToxicSpec, ToxiproxyClient,
    };
}
