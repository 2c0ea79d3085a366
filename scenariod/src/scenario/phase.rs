use serde::Serialize;
use std::fmt;

/// Execution phase of a phased scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Not running
    Idle,
    /// Baseline traffic before the fault
    Stabilization,
    /// Fault applied
    Testing,
    /// Fault removed, system settling
    Recovery,
}

impl Phase {
    /// Phases that carry a configured duration, in execution order
    pub const TIMED: [Phase; 3] = [Phase::Stabilization, Phase::Testing, Phase::Recovery];

    /// Label used in metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Stabilization => "stabilization",
            Phase::Testing => "testing",
            Phase::Recovery => "recovery",
        }
    }

    /// Gauge encoding: idle=0, stabilization=1, testing=2, recovery=3
    pub fn gauge_value(&self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Stabilization => 1,
            Phase::Testing => 2,
            Phase::Recovery => 3,
        }
    }

    /// The phase that follows this one in a complete run
    pub fn next(&self) -> Phase {
        match self {
            Phase::Idle => Phase::Stabilization,
            Phase::Stabilization => Phase::Testing,
            Phase::Testing => Phase::Recovery,
            Phase::Recovery => Phase::Idle,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
