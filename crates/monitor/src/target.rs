use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a monitored target, assigned once at creation
pub type TargetId = Uuid;

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected_statuses() -> BTreeSet<u16> {
    BTreeSet::from([200, 201, 204])
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_interval_s() -> u64 {
    60
}

fn default_retries() -> u32 {
    2
}

fn default_backoff_s() -> f64 {
    0.5
}

fn default_enabled() -> bool {
    true
}

fn default_severity() -> String {
    "HIGH".to_string()
}

/// User supplied configuration of a target, everything except its id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Human readable label
    pub name: String,

    /// Absolute http(s) URL to probe
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Status codes that count as a healthy response
    #[serde(default = "default_expected_statuses")]
    pub expected_statuses: BTreeSet<u16>,

    /// Network timeout of a single attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Seconds between two check cycles
    #[serde(default = "default_interval_s")]
    pub interval_s: u64,

    /// Additional attempts after the first one fails at the transport level
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay before the first retry, doubled for every following one
    #[serde(default = "default_backoff_s")]
    pub backoff_s: f64,

    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,

    /// Disabled targets are never scheduled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Advisory label, not interpreted by the engine
    #[serde(default = "default_severity")]
    pub severity: String,
}

impl TargetSpec {
    /// Create a spec with default probing parameters
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: default_method(),
            expected_statuses: default_expected_statuses(),
            timeout_ms: default_timeout_ms(),
            interval_s: default_interval_s(),
            retries: default_retries(),
            backoff_s: default_backoff_s(),
            headers: None,
            enabled: default_enabled(),
            severity: default_severity(),
        }
    }
}

/// A monitored endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,

    #[serde(flatten)]
    pub spec: TargetSpec,
}

impl Target {
    /// Create a target with a freshly generated id
    pub fn from_spec(spec: TargetSpec) -> Self {
        Self { id: Uuid::new_v4(), spec }
    }

    /// Rebuild a target under an existing id, used when its configuration is replaced
    pub fn with_id(id: TargetId, spec: TargetSpec) -> Self {
        Self { id, spec }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.spec.interval_s)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.spec.timeout_ms)
    }

    /// Delay before the first retry. Values too large for a `Duration` saturate;
    /// NaN and negative values collapse to zero.
    pub fn initial_backoff(&self) -> Duration {
        match Duration::try_from_secs_f64(self.spec.backoff_s) {
            Ok(delay) => delay,
            Err(_) if self.spec.backoff_s > 0.0 => Duration::MAX,
            Err(_) => Duration::ZERO,
        }
    }

    /// Whether a received status code counts as healthy
    pub fn accepts(&self, status: u16) -> bool {
        self.spec.expected_statuses.contains(&status)
    }
}

/// Result of one full check cycle for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub target_id: TargetId,

    /// Completion time of the cycle
    pub checked_at: DateTime<Utc>,

    pub ok: bool,

    /// Absent when every attempt failed before a response arrived
    pub status: Option<u16>,

    /// Wall-clock duration of the whole cycle, retries and backoff included
    pub latency_ms: u64,

    /// Last transport failure, only set when no response was received
    pub error: Option<String>,
}
