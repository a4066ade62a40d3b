//! Validated, immutable run configuration.
//!
//! Built once from the raw file/preset configuration by
//! [`Config::into_plan`](crate::cli::config::Config::into_plan) and never
//! mutated afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::config::TargetConfig;
use crate::engine::classify::AcceptanceRule;
use crate::engine::request::{Endpoint, RequestBuilder};
use crate::error::ConfigError;
use crate::stats::Threshold;

pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_THRESHOLD_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// How a scenario generates traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Executor {
    /// Open workload: `rate` arrivals per `time_unit`, independent of latency.
    ConstantArrivalRate {
        rate: u64,
        time_unit: Duration,
        pre_allocated_vus: usize,
        max_vus: usize,
    },
    /// Closed workload: `vus` users looping with a fixed pacing delay.
    ClosedWorkload { vus: usize, pacing: Duration },
}

impl Executor {
    pub const ARRIVAL_RATE_NAMES: &'static [&'static str] = &["constant-arrival-rate"];
    pub const CLOSED_NAMES: &'static [&'static str] =
        &["constant-vus", "closed-workload", "per-vu-iterations"];

    pub fn name(&self) -> &'static str {
        match self {
            Executor::ConstantArrivalRate { .. } => "constant-arrival-rate",
            Executor::ClosedWorkload { .. } => "constant-vus",
        }
    }

    /// Upper bound on concurrently existing virtual users.
    pub fn max_vus(&self) -> usize {
        match self {
            Executor::ConstantArrivalRate { max_vus, .. } => *max_vus,
            Executor::ClosedWorkload { vus, .. } => *vus,
        }
    }

    /// Inter-arrival interval, for rate mode.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Executor::ConstantArrivalRate {
                rate, time_unit, ..
            } => Some(time_unit.div_f64(*rate as f64)),
            Executor::ClosedWorkload { .. } => None,
        }
    }
}

/// When a scenario stops issuing work. At least one bound is set.
///
/// In rate mode `iterations` bounds total arrivals (drops included); in
/// closed mode it bounds iterations per virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopCondition {
    pub duration: Option<Duration>,
    pub iterations: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: Arc<str>,
    pub executor: Executor,
    pub stop: StopCondition,
    pub start_time: Duration,
    pub graceful_stop: Duration,
    pub request_timeout: Duration,
    pub acceptance: AcceptanceRule,
    pub requests: Arc<RequestBuilder>,
    pub key_prefix: String,
}

impl Scenario {
    pub fn endpoint(&self) -> Endpoint {
        self.requests.endpoint()
    }

    /// Check the numeric invariants of a scenario.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scenario = self.name.to_string();
        let not_positive = |field: &'static str| ConfigError::NotPositive {
            scenario: scenario.clone(),
            field,
        };

        match &self.executor {
            Executor::ConstantArrivalRate {
                rate,
                time_unit,
                pre_allocated_vus,
                max_vus,
            } => {
                if *rate == 0 {
                    return Err(not_positive("rate"));
                }
                if time_unit.is_zero() {
                    return Err(not_positive("time_unit"));
                }
                if *max_vus == 0 {
                    return Err(not_positive("max_vus"));
                }
                if pre_allocated_vus > max_vus {
                    return Err(ConfigError::PoolBounds {
                        scenario,
                        pre_allocated: *pre_allocated_vus,
                        max: *max_vus,
                    });
                }
            }
            Executor::ClosedWorkload { vus, .. } => {
                if *vus == 0 {
                    return Err(not_positive("vus"));
                }
            }
        }

        match self.stop {
            StopCondition {
                duration: None,
                iterations: None,
            } => Err(ConfigError::MissingField {
                scenario,
                field: "duration",
            }),
            StopCondition {
                duration: Some(d), ..
            } if d.is_zero() => Err(not_positive("duration")),
            StopCondition {
                iterations: Some(0),
                ..
            } => Err(not_positive("iterations")),
            _ => Ok(()),
        }
    }
}

/// Everything a run needs, validated.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub scenarios: Vec<Scenario>,
    pub thresholds: Vec<Threshold>,
    pub target: TargetConfig,
    pub threshold_check_interval: Duration,
}

impl RunPlan {
    pub fn new(
        scenarios: Vec<Scenario>,
        thresholds: Vec<Threshold>,
        target: TargetConfig,
        threshold_check_interval: Duration,
    ) -> Result<Self, ConfigError> {
        if scenarios.is_empty() {
            return Err(ConfigError::NoScenarios);
        }
        if threshold_check_interval.is_zero() {
            return Err(ConfigError::NotPositive {
                scenario: String::new(),
                field: "threshold_check_interval",
            });
        }

        let mut prefixes: BTreeMap<&str, &str> = BTreeMap::new();
        for scenario in &scenarios {
            scenario.validate()?;
            if let Some(first) = prefixes.insert(&scenario.key_prefix, &scenario.name) {
                return Err(ConfigError::DuplicateKeyPrefix {
                    prefix: scenario.key_prefix.clone(),
                    first: first.to_string(),
                    second: scenario.name.to_string(),
                });
            }
        }

        let mut ids = BTreeSet::new();
        for threshold in &thresholds {
            if !ids.insert(threshold.id.as_str()) {
                return Err(ConfigError::DuplicateThreshold(threshold.id.clone()));
            }
            if let Some(name) = &threshold.scenario {
                if !scenarios.iter().any(|s| &*s.name == name.as_str()) {
                    let (metric, expression) =
                        threshold.id.split_once(": ").unwrap_or((threshold.id.as_str(), ""));
                    return Err(ConfigError::InvalidThreshold {
                        metric: metric.to_string(),
                        expression: expression.to_string(),
                        reason: format!("unknown scenario `{}`", name),
                    });
                }
            }
        }

        Ok(Self {
            scenarios,
            thresholds,
            target,
            threshold_check_interval,
        })
    }

    /// Largest number of virtual users that may exist at once across scenarios.
    pub fn max_vus(&self) -> usize {
        self.scenarios.iter().map(|s| s.executor.max_vus()).sum()
    }
}
