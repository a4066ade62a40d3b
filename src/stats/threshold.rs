//! Pass/fail predicates over aggregated run metrics.
//!
//! Expressions follow the familiar `<aggregation> <op> <value>` form, e.g.
//! `rate<0.01` on `http_req_failed` or `p(99) < 200` on `http_req_duration`.
//! A metric key may be narrowed to one scenario: `http_req_failed{scenario:sustained}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{ScenarioStats, StatsAggregator};
use crate::error::ConfigError;
use crate::utils::as_millis_f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Share of completed requests that failed (rejected or transport error).
    HttpReqFailed,
    /// Request latency in milliseconds.
    HttpReqDuration,
    /// Completed requests.
    HttpReqs,
    /// Completed iterations.
    Iterations,
    /// Arrivals dropped at the pool ceiling.
    DroppedIterations,
    /// Share of completed requests that were accepted.
    Checks,
}

impl MetricKind {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "http_req_failed" => Some(Self::HttpReqFailed),
            "http_req_duration" => Some(Self::HttpReqDuration),
            "http_reqs" => Some(Self::HttpReqs),
            "iterations" => Some(Self::Iterations),
            "dropped_iterations" => Some(Self::DroppedIterations),
            "checks" => Some(Self::Checks),
            _ => None,
        }
    }

    fn supports(self, aggregation: Aggregation) -> bool {
        use Aggregation::*;
        match self {
            Self::HttpReqFailed | Self::Checks => aggregation == Rate,
            Self::HttpReqDuration => {
                matches!(aggregation, Avg | Min | Max | Med | Percentile(_))
            }
            Self::HttpReqs | Self::Iterations | Self::DroppedIterations => {
                matches!(aggregation, Count | Rate)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in 0..=100.
    Percentile(f64),
}

impl Aggregation {
    fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        match s {
            "rate" => return Some(Self::Rate),
            "count" => return Some(Self::Count),
            "avg" => return Some(Self::Avg),
            "min" => return Some(Self::Min),
            "max" => return Some(Self::Max),
            "med" => return Some(Self::Med),
            _ => {}
        }
        let digits = s
            .strip_prefix("p(")
            .and_then(|rest| rest.strip_suffix(')'))
            .or_else(|| s.strip_prefix('p'))?;
        let p: f64 = digits.trim().parse().ok()?;
        (0.0..=100.0).contains(&p).then_some(Self::Percentile(p))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn apply(self, actual: f64, expected: f64) -> bool {
        match self {
            Self::Lt => actual < expected,
            Self::Le => actual <= expected,
            Self::Gt => actual > expected,
            Self::Ge => actual >= expected,
            Self::Eq => (actual - expected).abs() < f64::EPSILON,
            Self::Ne => (actual - expected).abs() >= f64::EPSILON,
        }
    }
}

/// Split `lhs <op> rhs` at the first comparison operator.
fn split_expression(expr: &str) -> Option<(&str, Comparison, &str)> {
    let start = expr.find(['<', '>', '=', '!'])?;
    let rest = &expr[start..];
    let (op, len) = if rest.starts_with("<=") {
        (Comparison::Le, 2)
    } else if rest.starts_with(">=") {
        (Comparison::Ge, 2)
    } else if rest.starts_with("==") {
        (Comparison::Eq, 2)
    } else if rest.starts_with("!=") {
        (Comparison::Ne, 2)
    } else if rest.starts_with('<') {
        (Comparison::Lt, 1)
    } else if rest.starts_with('>') {
        (Comparison::Gt, 1)
    } else {
        return None;
    };
    Some((&expr[..start], op, &rest[len..]))
}

/// Split `metric{scenario:name}` into the metric name and optional scenario.
fn split_metric_key(key: &str) -> Option<(&str, Option<&str>)> {
    let key = key.trim();
    match key.split_once('{') {
        None => Some((key, None)),
        Some((metric, selector)) => {
            let selector = selector.strip_suffix('}')?;
            let (tag, value) = selector.split_once(':')?;
            if tag.trim() != "scenario" || value.trim().is_empty() {
                return None;
            }
            Some((metric.trim(), Some(value.trim())))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub id: String,
    pub metric: MetricKind,
    pub scenario: Option<String>,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub value: f64,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
}

impl Threshold {
    pub fn parse(metric_key: &str, expression: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidThreshold {
            metric: metric_key.to_string(),
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let (metric_name, scenario) =
            split_metric_key(metric_key).ok_or_else(|| invalid("malformed metric selector"))?;
        let metric = MetricKind::parse(metric_name).ok_or_else(|| invalid("unknown metric"))?;
        let (lhs, comparison, rhs) =
            split_expression(expression).ok_or_else(|| invalid("missing comparison operator"))?;
        let aggregation = Aggregation::parse(lhs).ok_or_else(|| invalid("unknown aggregation"))?;
        if !metric.supports(aggregation) {
            return Err(invalid("aggregation not supported for this metric"));
        }
        let value: f64 = rhs
            .trim()
            .parse()
            .map_err(|_| invalid("threshold value is not a number"))?;

        Ok(Self {
            id: format!("{}: {}", metric_key.trim(), expression.trim()),
            metric,
            scenario: scenario.map(str::to_string),
            aggregation,
            comparison,
            value,
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        })
    }

    /// Abort the run as soon as this threshold fails, once `delay` has elapsed.
    pub fn abort_on_fail(mut self, delay: Duration) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }

    fn measure(&self, stats: &ScenarioStats, elapsed: Duration) -> f64 {
        let per_sec = |n: u64| {
            let secs = elapsed.as_secs_f64();
            if secs > 0.0 {
                n as f64 / secs
            } else {
                0.0
            }
        };
        match (self.metric, self.aggregation) {
            (MetricKind::HttpReqFailed, _) => stats.failure_rate(),
            (MetricKind::Checks, _) => {
                if stats.completed() == 0 {
                    0.0
                } else {
                    1.0 - stats.failure_rate()
                }
            }
            (MetricKind::HttpReqDuration, aggregation) => as_millis_f64(match aggregation {
                Aggregation::Avg => stats.avg_latency(),
                Aggregation::Min => stats.min_duration.unwrap_or_default(),
                Aggregation::Max => stats.max_duration,
                Aggregation::Med => stats.latency_at(0.5),
                Aggregation::Percentile(p) => stats.latency_at(p / 100.0),
                Aggregation::Rate | Aggregation::Count => Duration::ZERO,
            }),
            (MetricKind::HttpReqs | MetricKind::Iterations, Aggregation::Rate) => {
                per_sec(stats.completed())
            }
            (MetricKind::HttpReqs | MetricKind::Iterations, _) => stats.completed() as f64,
            (MetricKind::DroppedIterations, Aggregation::Rate) => per_sec(stats.dropped),
            (MetricKind::DroppedIterations, _) => stats.dropped as f64,
        }
    }

    /// Evaluate against the merged statistics. Pure: the same statistics and
    /// elapsed time always give the same result.
    pub fn evaluate(&self, stats: &StatsAggregator, elapsed: Duration) -> ThresholdResult {
        let selected = stats.select(self.scenario.as_deref());
        let actual = self.measure(&selected, elapsed);
        ThresholdResult {
            actual,
            passed: self.comparison.apply(actual, self.value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdResult {
    pub actual: f64,
    pub passed: bool,
}

/// Evaluate every threshold, keyed by threshold id.
pub fn evaluate_all(
    thresholds: &[Threshold],
    stats: &StatsAggregator,
    elapsed: Duration,
) -> BTreeMap<String, ThresholdResult> {
    thresholds
        .iter()
        .map(|t| (t.id.clone(), t.evaluate(stats, elapsed)))
        .collect()
}
