//! Scenario telemetry
//!
//! Scenarios report through the [`MetricsSink`] trait. Setters are
//! fire-and-forget; a sink must never make a scenario fail. [`ScenarioMetrics`]
//! keeps the latest values in memory and renders them in the Prometheus text
//! exposition format, and [`MetricsServer`] serves that over HTTP.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::scenario::Phase;

mod server;

pub use server::MetricsServer;

/// Outcome label for `scenario_runs_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The run completed all phases
    Success,
    /// The run stopped on an error
    Failed,
}

impl RunStatus {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

/// Fault category reported per proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    /// Zero-rate bandwidth toxic
    PacketLoss,
    /// Latency toxic
    Latency,
}

impl FaultType {
    /// Every fault type, for resetting
    pub const ALL: [FaultType; 2] = [FaultType::PacketLoss, FaultType::Latency];

    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultType::PacketLoss => "packet_loss",
            FaultType::Latency => "latency",
        }
    }

    /// Name of the numeric parameter exported for this fault
    pub fn param(&self) -> &'static str {
        match self {
            FaultType::PacketLoss => "rate",
            FaultType::Latency => "latency_ms",
        }
    }
}

/// Receiver of scenario telemetry
pub trait MetricsSink: Send + Sync {
    /// Current phase of a scenario
    fn set_phase(&self, scenario: &str, phase: Phase);

    /// Configured duration of one phase of a scenario
    fn set_phase_duration(&self, scenario: &str, phase: Phase, duration: Duration);

    /// Count a finished run
    fn record_run(&self, scenario: &str, status: RunStatus);

    /// Whether any scenario is running
    fn set_scenario_active(&self, active: bool);

    /// Whether a fault is applied on a proxy
    fn set_toxic_active(&self, server: &str, fault: FaultType, active: bool);

    /// Numeric parameter of a fault on a proxy
    fn set_toxic_value(&self, server: &str, fault: FaultType, param: &str, value: f64);

    /// Zero every fault flag and value for a proxy
    fn clear_faults(&self, server: &str) {
        for fault in FaultType::ALL {
            self.set_toxic_active(server, fault, false);
            self.set_toxic_value(server, fault, fault.param(), 0.0);
        }
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_phase(&self, _scenario: &str, _phase: Phase) {}
    fn set_phase_duration(&self, _scenario: &str, _phase: Phase, _duration: Duration) {}
    fn record_run(&self, _scenario: &str, _status: RunStatus) {}
    fn set_scenario_active(&self, _active: bool) {}
    fn set_toxic_active(&self, _server: &str, _fault: FaultType, _active: bool) {}
    fn set_toxic_value(&self, _server: &str, _fault: FaultType, _param: &str, _value: f64) {}
}

/// In-memory metrics store with Prometheus rendering
#[derive(Debug, Default)]
pub struct ScenarioMetrics {
    phases: DashMap<String, Phase>,
    phase_durations: DashMap<(String, Phase), f64>,
    runs: DashMap<(String, RunStatus), u64>,
    last_run: DashMap<String, DateTime<Utc>>,
    active: AtomicBool,
    toxic_active: DashMap<(String, FaultType), bool>,
    toxic_values: DashMap<(String, FaultType, String), f64>,
}

impl ScenarioMetrics {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase of a scenario, idle if never reported
    pub fn phase(&self, scenario: &str) -> Phase {
        self.phases.get(scenario).map(|p| *p).unwrap_or(Phase::Idle)
    }

    /// Number of runs recorded with `status`
    pub fn runs(&self, scenario: &str, status: RunStatus) -> u64 {
        self.runs
            .get(&(scenario.to_string(), status))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// When the scenario last finished a run
    pub fn last_run(&self, scenario: &str) -> Option<DateTime<Utc>> {
        self.last_run.get(scenario).map(|v| *v)
    }

    /// Whether a scenario is running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether a fault is flagged active on a proxy
    pub fn toxic_active(&self, server: &str, fault: FaultType) -> bool {
        self.toxic_active
            .get(&(server.to_string(), fault))
            .map(|v| *v)
            .unwrap_or(false)
    }

    /// Numeric fault parameter on a proxy
    pub fn toxic_value(&self, server: &str, fault: FaultType, param: &str) -> Option<f64> {
        self.toxic_values
            .get(&(server.to_string(), fault, param.to_string()))
            .map(|v| *v)
    }

    /// Render in the Prometheus text exposition format, series sorted by labels
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(2048);

        out.push_str(
            "# HELP scenario_phase Current phase (0=idle, 1=stabilization, 2=testing, 3=recovery)\n\
             # TYPE scenario_phase gauge\n",
        );
        let mut phases: Vec<(String, u8)> = self
            .phases
            .iter()
            .map(|e| (e.key().clone(), e.value().gauge_value()))
            .collect();
        phases.sort();
        for (scenario, value) in phases {
            let _ = writeln!(
                out,
                "scenario_phase{{scenario=\"{}\"}} {}",
                escape_label(&scenario),
                value
            );
        }

        out.push_str(
            "# HELP scenario_phase_duration_seconds Configured duration of each phase\n\
             # TYPE scenario_phase_duration_seconds gauge\n",
        );
        let mut durations: Vec<((String, Phase), f64)> = self
            .phase_durations
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        durations.sort_by(|a, b| a.0.cmp(&b.0));
        for ((scenario, phase), seconds) in durations {
            let _ = writeln!(
                out,
                "scenario_phase_duration_seconds{{scenario=\"{}\",phase=\"{}\"}} {}",
                escape_label(&scenario),
                phase,
                seconds
            );
        }

        out.push_str(
            "# HELP scenario_runs_total Completed scenario runs by outcome\n\
             # TYPE scenario_runs_total counter\n",
        );
        let mut runs: Vec<((String, RunStatus), u64)> = self
            .runs
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        runs.sort();
        for ((scenario, status), count) in runs {
            let _ = writeln!(
                out,
                "scenario_runs_total{{scenario=\"{}\",status=\"{}\"}} {}",
                escape_label(&scenario),
                status.as_str(),
                count
            );
        }

        out.push_str(
            "# HELP scenario_last_run_timestamp_seconds Unix time of the last finished run\n\
             # TYPE scenario_last_run_timestamp_seconds gauge\n",
        );
        let mut last_runs: Vec<(String, DateTime<Utc>)> = self
            .last_run
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        last_runs.sort();
        for (scenario, at) in last_runs {
            let _ = writeln!(
                out,
                "scenario_last_run_timestamp_seconds{{scenario=\"{}\"}} {}",
                escape_label(&scenario),
                at.timestamp_millis() as f64 / 1000.0
            );
        }

        let _ = write!(
            out,
            "# HELP scenario_active Whether a scenario is running\n\
             # TYPE scenario_active gauge\n\
             scenario_active {}\n",
            u8::from(self.is_active())
        );

        out.push_str(
            "# HELP toxiproxy_toxic_active Whether a fault is applied on a proxy\n\
             # TYPE toxiproxy_toxic_active gauge\n",
        );
        let mut active: Vec<((String, FaultType), bool)> = self
            .toxic_active
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        active.sort();
        for ((server, fault), on) in active {
            let _ = writeln!(
                out,
                "toxiproxy_toxic_active{{server=\"{}\",type=\"{}\"}} {}",
                escape_label(&server),
                fault.as_str(),
                u8::from(on)
            );
        }

        out.push_str(
            "# HELP toxiproxy_toxic_value Numeric fault parameter on a proxy\n\
             # TYPE toxiproxy_toxic_value gauge\n",
        );
        let mut values: Vec<((String, FaultType, String), f64)> = self
            .toxic_values
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        for ((server, fault, param), value) in values {
            let _ = writeln!(
                out,
                "toxiproxy_toxic_value{{server=\"{}\",type=\"{}\",param=\"{}\"}} {}",
                escape_label(&server),
                fault.as_str(),
                escape_label(&param),
                value
            );
        }

        out
    }
}

impl MetricsSink for ScenarioMetrics {
    fn set_phase(&self, scenario: &str, phase: Phase) {
        self.phases.insert(scenario.to_string(), phase);
    }

    fn set_phase_duration(&self, scenario: &str, phase: Phase, duration: Duration) {
        self.phase_durations
            .insert((scenario.to_string(), phase), duration.as_secs_f64());
    }

    fn record_run(&self, scenario: &str, status: RunStatus) {
        *self
            .runs
            .entry((scenario.to_string(), status))
            .or_insert(0) += 1;
        self.last_run.insert(scenario.to_string(), Utc::now());
    }

    fn set_scenario_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    fn set_toxic_active(&self, server: &str, fault: FaultType, active: bool) {
        self.toxic_active.insert((server.to_string(), fault), active);
    }

    fn set_toxic_value(&self, server: &str, fault: FaultType, param: &str, value: f64) {
        self.toxic_values
            .insert((server.to_string(), fault, param.to_string()), value);
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_every_family() {
        let metrics = ScenarioMetrics::new();
        metrics.set_phase("latency", Phase::Testing);
        metrics.set_phase_duration("latency", Phase::Testing, Duration::from_secs(60));
        metrics.record_run("latency", RunStatus::Success);
        metrics.set_scenario_active(true);
        metrics.set_toxic_active("memcache1", FaultType::Latency, true);
        metrics.set_toxic_value("memcache1", FaultType::Latency, "latency_ms", 200.0);

        let output = metrics.render();
        assert!(output.contains("# TYPE scenario_phase gauge"));
        assert!(output.contains("scenario_phase{scenario=\"latency\"} 2"));
        let duration_line =
            "scenario_phase_duration_seconds{scenario=\"latency\",phase=\"testing\"} 60";
        assert!(output.contains(duration_line));
        assert!(output.contains("# TYPE scenario_runs_total counter"));
        assert!(output.contains("scenario_runs_total{scenario=\"latency\",status=\"success\"} 1"));
        assert!(output.contains("scenario_active 1"));
        assert!(output.contains("toxiproxy_toxic_active{server=\"memcache1\",type=\"latency\"} 1"));
        assert!(output.contains(
            "toxiproxy_toxic_value{server=\"memcache1\",type=\"latency\",param=\"latency_ms\"} 200"
        ));
    }

    #[test]
    fn test_render_sorts_series() {
        let metrics = ScenarioMetrics::new();
        metrics.set_phase("b", Phase::Idle);
        metrics.set_phase("a", Phase::Idle);
        let output = metrics.render();
        let a = output.find("scenario=\"a\"").unwrap();
        let b = output.find("scenario=\"b\"").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_record_run_counts_and_stamps() {
        let metrics = ScenarioMetrics::new();
        assert!(metrics.last_run("x").is_none());
        metrics.record_run("x", RunStatus::Failed);
        metrics.record_run("x", RunStatus::Failed);
        assert_eq!(metrics.runs("x", RunStatus::Failed), 2);
        assert_eq!(metrics.runs("x", RunStatus::Success), 0);
        assert!(metrics.last_run("x").is_some());
    }

    #[test]
    fn test_clear_faults_zeroes_both_types() {
        let metrics = ScenarioMetrics::new();
        metrics.set_toxic_active("p", FaultType::PacketLoss, true);
        metrics.set_toxic_value("p", FaultType::PacketLoss, "rate", 0.5);
        metrics.clear_faults("p");
        assert!(!metrics.toxic_active("p", FaultType::PacketLoss));
        assert!(!metrics.toxic_active("p", FaultType::Latency));
        assert_eq!(metrics.toxic_value("p", FaultType::PacketLoss, "rate"), Some(0.0));
        assert_eq!(metrics.toxic_value("p", FaultType::Latency, "latency_ms"), Some(0.0));
    }

    #[test]
    fn test_label_values_are_escaped() {
        assert_eq!(escape_label("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }

    #[test]
    fn test_render_last_run_timestamp() {
        let metrics = ScenarioMetrics::new();
        let output = metrics.render();
        assert!(output.contains("# TYPE scenario_last_run_timestamp_seconds gauge"));
        assert!(!output.contains("scenario_last_run_timestamp_seconds{"));

        let before = Utc::now().timestamp();
        metrics.record_run("flapping-node", RunStatus::Success);
        let output = metrics.render();
        let prefix = "scenario_last_run_timestamp_seconds{scenario=\"flapping-node\"} ";
        let line = output.lines().find(|l| l.starts_with(prefix)).unwrap();
        let stamp: f64 = line[prefix.len()..].parse().unwrap();
        assert!(stamp >= before as f64);
        assert!(stamp < (Utc::now().timestamp() + 1) as f64);
    }
}
