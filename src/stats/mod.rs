use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::engine::classify::Outcome;

pub mod threshold;

pub use threshold::{Threshold, ThresholdResult};

/// Upper bound of the latency histograms, in microseconds (one hour).
const HISTOGRAM_MAX_MICROS: u64 = 60 * 60 * 1000 * 1000;

fn latency_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_MICROS, 2)
        .expect("constant histogram bounds are valid")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RequestTimings {
    pub duration: Duration,
    pub request_size: usize,
    pub response_size: usize,
}

/// One immutable sample on the metrics stream.
#[derive(Debug, Clone)]
pub enum Metric {
    /// A classified response (or transport failure) for one iteration.
    Request {
        scenario: Arc<str>,
        status: Option<u16>,
        outcome: Outcome,
        timings: RequestTimings,
    },
    /// An arrival that found the pool at its ceiling.
    Dropped { scenario: Arc<str> },
    /// Iterations abandoned after the graceful-stop window.
    Interrupted { scenario: Arc<str>, count: u64 },
    /// Pool size after a change in membership.
    VirtualUsers { scenario: Arc<str>, active: usize },
}

impl Metric {
    fn scenario(&self) -> &str {
        match self {
            Metric::Request { scenario, .. }
            | Metric::Dropped { scenario }
            | Metric::Interrupted { scenario, .. }
            | Metric::VirtualUsers { scenario, .. } => &**scenario,
        }
    }
}

/// Running statistics for one scenario. Mergeable, so shards can be combined
/// in any order with the same result.
#[derive(Clone)]
pub struct ScenarioStats {
    pub accepted: u64,
    pub rejected: u64,
    pub errored: u64,
    pub dropped: u64,
    pub interrupted: u64,
    pub peak_vus: usize,
    pub status_codes: BTreeMap<u16, u64>,
    pub errors: BTreeMap<String, u64>,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Duration,
    pub histogram: Histogram<u64>,
    pub data_sent: u64,
    pub data_received: u64,
}

impl Default for ScenarioStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioStats {
    pub fn new() -> Self {
        Self {
            accepted: 0,
            rejected: 0,
            errored: 0,
            dropped: 0,
            interrupted: 0,
            peak_vus: 0,
            status_codes: BTreeMap::new(),
            errors: BTreeMap::new(),
            total_duration: Duration::ZERO,
            min_duration: None,
            max_duration: Duration::ZERO,
            histogram: latency_histogram(),
            data_sent: 0,
            data_received: 0,
        }
    }

    /// Completed requests: accepted + rejected + errored.
    pub fn completed(&self) -> u64 {
        self.accepted + self.rejected + self.errored
    }

    /// Failed share of completed requests. Transport errors count as failures.
    pub fn failure_rate(&self) -> f64 {
        let total = self.completed();
        if total == 0 {
            0.0
        } else {
            (self.rejected + self.errored) as f64 / total as f64
        }
    }

    pub fn avg_latency(&self) -> Duration {
        match self.completed() {
            0 => Duration::ZERO,
            n => self.total_duration.div_f64(n as f64),
        }
    }

    /// Latency at quantile `q` (0.0..=1.0).
    pub fn latency_at(&self, q: f64) -> Duration {
        if self.histogram.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_micros(self.histogram.value_at_quantile(q))
    }

    fn add(&mut self, metric: Metric) {
        match metric {
            Metric::Request {
                status,
                outcome,
                timings,
                ..
            } => {
                match &outcome {
                    Outcome::Accepted => self.accepted += 1,
                    Outcome::Rejected => self.rejected += 1,
                    Outcome::TransportError(tag) => {
                        self.errored += 1;
                        *self.errors.entry((*tag).to_string()).or_insert(0) += 1;
                    }
                }
                if let Some(code) = status {
                    *self.status_codes.entry(code).or_insert(0) += 1;
                }

                self.total_duration += timings.duration;
                if self.min_duration.is_none_or(|min| timings.duration < min) {
                    self.min_duration = Some(timings.duration);
                }
                if timings.duration > self.max_duration {
                    self.max_duration = timings.duration;
                }
                let micros = (timings.duration.as_micros() as u64).clamp(1, HISTOGRAM_MAX_MICROS);
                let _ = self.histogram.record(micros);

                self.data_sent += timings.request_size as u64;
                self.data_received += timings.response_size as u64;
            }
            Metric::Dropped { .. } => self.dropped += 1,
            Metric::Interrupted { count, .. } => self.interrupted += count,
            Metric::VirtualUsers { active, .. } => self.peak_vus = self.peak_vus.max(active),
        }
    }

    pub fn merge(&mut self, other: &ScenarioStats) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.errored += other.errored;
        self.dropped += other.dropped;
        self.interrupted += other.interrupted;
        self.peak_vus = self.peak_vus.max(other.peak_vus);
        for (code, count) in &other.status_codes {
            *self.status_codes.entry(*code).or_insert(0) += count;
        }
        for (err, count) in &other.errors {
            *self.errors.entry(err.clone()).or_insert(0) += count;
        }
        self.total_duration += other.total_duration;
        if let Some(other_min) = other.min_duration {
            if self.min_duration.is_none_or(|min| other_min < min) {
                self.min_duration = Some(other_min);
            }
        }
        self.max_duration = self.max_duration.max(other.max_duration);
        self.histogram.add(&other.histogram).ok();
        self.data_sent += other.data_sent;
        self.data_received += other.data_received;
    }
}

/// Per-scenario statistics for one shard, or the merge of all shards.
#[derive(Clone, Default)]
pub struct StatsAggregator {
    pub scenarios: BTreeMap<String, ScenarioStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, metric: Metric) {
        match self.scenarios.get_mut(metric.scenario()) {
            Some(stats) => stats.add(metric),
            None => {
                let name = metric.scenario().to_string();
                let mut stats = ScenarioStats::new();
                stats.add(metric);
                self.scenarios.insert(name, stats);
            }
        }
    }

    pub fn merge(&mut self, other: &StatsAggregator) {
        for (name, stats) in &other.scenarios {
            self.scenarios.entry(name.clone()).or_default().merge(stats);
        }
    }

    /// Statistics across every scenario.
    pub fn totals(&self) -> ScenarioStats {
        let mut totals = ScenarioStats::new();
        for stats in self.scenarios.values() {
            totals.merge(stats);
        }
        // Peak VUs of concurrent scenarios add up.
        totals.peak_vus = self.scenarios.values().map(|s| s.peak_vus).sum();
        totals
    }

    /// Statistics for one scenario, or the totals when `scenario` is `None`.
    /// An unknown scenario yields empty statistics.
    pub fn select(&self, scenario: Option<&str>) -> ScenarioStats {
        match scenario {
            Some(name) => self.scenarios.get(name).cloned().unwrap_or_default(),
            None => self.totals(),
        }
    }
}

/// Sharded aggregator for reduced lock contention at high throughput.
/// Shards are merged at evaluation time.
pub struct ShardedAggregator {
    shards: Vec<RwLock<StatsAggregator>>,
}

impl ShardedAggregator {
    pub fn new(num_shards: usize) -> Self {
        let shards = (0..num_shards.max(1))
            .map(|_| RwLock::new(StatsAggregator::new()))
            .collect();
        Self { shards }
    }

    pub fn add(&self, shard: usize, metric: Metric) {
        self.shards[shard % self.shards.len()].write().add(metric);
    }

    pub fn merge(&self) -> StatsAggregator {
        let mut merged = StatsAggregator::new();
        for shard in &self.shards {
            merged.merge(&shard.read());
        }
        merged
    }
}

/// Append-only metrics stream. Producers clone the sender and never
/// coordinate; consumer threads drain the channel into the shards.
pub struct MetricsSink {
    tx: Sender<Metric>,
    aggregator: Arc<ShardedAggregator>,
    consumers: Vec<JoinHandle<()>>,
}

impl MetricsSink {
    /// Start `num_consumers` consumer threads, one shard each.
    pub fn start(num_consumers: usize) -> Self {
        let num_consumers = num_consumers.max(1);
        let aggregator = Arc::new(ShardedAggregator::new(num_consumers));
        let (tx, rx): (Sender<Metric>, Receiver<Metric>) = crossbeam_channel::unbounded();

        let consumers = (0..num_consumers)
            .map(|shard| {
                let rx = rx.clone();
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    while let Ok(metric) = rx.recv() {
                        aggregator.add(shard, metric);
                    }
                })
            })
            .collect();

        Self {
            tx,
            aggregator,
            consumers,
        }
    }

    /// One consumer per two cores, at least two.
    pub fn start_default() -> Self {
        Self::start((num_cpus::get() / 2).max(2))
    }

    pub fn sender(&self) -> Sender<Metric> {
        self.tx.clone()
    }

    /// Merge of everything consumed so far. Samples still queued are not included.
    pub fn snapshot(&self) -> StatsAggregator {
        self.aggregator.merge()
    }

    /// Close the stream, wait for the consumers to drain it, and merge.
    /// Blocks until every other sender has been dropped.
    pub fn finish(self) -> StatsAggregator {
        let MetricsSink {
            tx,
            aggregator,
            consumers,
        } = self;
        drop(tx);
        for consumer in consumers {
            let _ = consumer.join();
        }
        aggregator.merge()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub med_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScenarioReport {
    pub total: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub errored: u64,
    pub dropped: u64,
    pub interrupted: u64,
    pub failure_rate: f64,
    pub iterations_per_sec: f64,
    pub peak_vus: usize,
    pub status_codes: BTreeMap<u16, u64>,
    pub errors: BTreeMap<String, u64>,
    pub latency: LatencySummary,
    pub data_sent: u64,
    pub data_received: u64,
}

impl ScenarioReport {
    pub fn from_stats(stats: &ScenarioStats, elapsed: Duration) -> Self {
        let ms = crate::utils::as_millis_f64;
        let secs = elapsed.as_secs_f64();
        Self {
            total: stats.completed(),
            accepted: stats.accepted,
            rejected: stats.rejected,
            errored: stats.errored,
            dropped: stats.dropped,
            interrupted: stats.interrupted,
            failure_rate: stats.failure_rate(),
            iterations_per_sec: if secs > 0.0 {
                stats.completed() as f64 / secs
            } else {
                0.0
            },
            peak_vus: stats.peak_vus,
            status_codes: stats.status_codes.clone(),
            errors: stats.errors.clone(),
            latency: LatencySummary {
                min_ms: ms(stats.min_duration.unwrap_or_default()),
                max_ms: ms(stats.max_duration),
                avg_ms: ms(stats.avg_latency()),
                med_ms: ms(stats.latency_at(0.5)),
                p90_ms: ms(stats.latency_at(0.9)),
                p95_ms: ms(stats.latency_at(0.95)),
                p99_ms: ms(stats.latency_at(0.99)),
            },
            data_sent: stats.data_sent,
            data_received: stats.data_received,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Final result of a run. Read-only once assembled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub verdict: Verdict,
    pub aborted_by_threshold: Option<String>,
    pub aborted_externally: bool,
    pub totals: ScenarioReport,
    pub scenarios: BTreeMap<String, ScenarioReport>,
    pub thresholds: BTreeMap<String, ThresholdResult>,
}

impl RunReport {
    pub fn assemble(
        stats: &StatsAggregator,
        thresholds: BTreeMap<String, ThresholdResult>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let verdict = if thresholds.values().all(|t| t.passed) {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        let finished_at = started_at
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            started_at,
            finished_at,
            elapsed_secs: elapsed.as_secs_f64(),
            verdict,
            aborted_by_threshold: None,
            aborted_externally: false,
            totals: ScenarioReport::from_stats(&stats.totals(), elapsed),
            scenarios: stats
                .scenarios
                .iter()
                .map(|(name, s)| (name.clone(), ScenarioReport::from_stats(s, elapsed)))
                .collect(),
            thresholds,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn print_summary(&self) {
        println!("\n--- Run Summary ---");
        println!("Elapsed:        {:.1}s", self.elapsed_secs);

        for (name, s) in &self.scenarios {
            println!("\nScenario: {}", name);
            print_scenario(s);
        }

        if self.scenarios.len() > 1 {
            println!("\nAll scenarios:");
            print_scenario(&self.totals);
        }

        if !self.thresholds.is_empty() {
            println!("\nThresholds:");
            for (id, result) in &self.thresholds {
                let mark = if result.passed { "✓" } else { "✗" };
                println!("  {} {} (actual: {:.4})", mark, id, result.actual);
            }
        }

        if let Some(id) = &self.aborted_by_threshold {
            println!("\nRun aborted early: threshold `{}` failed", id);
        }
        if self.aborted_externally {
            println!("\nRun stopped by external abort");
        }

        let verdict = match self.verdict {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        };
        println!("\nVerdict: {}", verdict);
        println!("-------------------\n");
    }
}

fn print_scenario(s: &ScenarioReport) {
    println!("  Requests:     {} ({:.1}/s)", s.total, s.iterations_per_sec);
    println!(
        "  Accepted:     {}   Rejected: {}   Errored: {}",
        s.accepted, s.rejected, s.errored
    );
    println!(
        "  Dropped:      {}   Interrupted: {}",
        s.dropped, s.interrupted
    );
    println!("  Failure rate: {:.2}%", s.failure_rate * 100.0);
    println!("  Peak VUs:     {}", s.peak_vus);
    println!(
        "  Latency:      avg={:.2}ms med={:.2}ms p90={:.2}ms p95={:.2}ms p99={:.2}ms max={:.2}ms",
        s.latency.avg_ms,
        s.latency.med_ms,
        s.latency.p90_ms,
        s.latency.p95_ms,
        s.latency.p99_ms,
        s.latency.max_ms
    );
    if !s.status_codes.is_empty() {
        let codes: Vec<String> = s
            .status_codes
            .iter()
            .map(|(code, count)| format!("{}={}", code, count))
            .collect();
        println!("  Status codes: {}", codes.join(" "));
    }
    if !s.errors.is_empty() {
        let errors: Vec<String> = s
            .errors
            .iter()
            .map(|(tag, count)| format!("{}={}", tag, count))
            .collect();
        println!("  Errors:       {}", errors.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(scenario: &str, status: Option<u16>, outcome: Outcome, ms: u64) -> Metric {
        Metric::Request {
            scenario: Arc::from(scenario),
            status,
            outcome,
            timings: RequestTimings {
                duration: Duration::from_millis(ms),
                request_size: 100,
                response_size: 50,
            },
        }
    }

    #[test]
    fn test_aggregator_math() {
        let mut agg = StatsAggregator::new();
        agg.add(request("a", Some(202), Outcome::Accepted, 100));
        agg.add(request("a", Some(409), Outcome::Accepted, 200));

        let stats = agg.select(Some("a"));
        assert_eq!(stats.completed(), 2);
        assert_eq!(stats.total_duration, Duration::from_millis(300));
        assert_eq!(stats.min_duration, Some(Duration::from_millis(100)));
        assert_eq!(stats.max_duration, Duration::from_millis(200));
        assert_eq!(stats.status_codes[&202], 1);
        assert_eq!(stats.status_codes[&409], 1);
        assert_eq!(stats.data_sent, 200);
    }

    #[test]
    fn test_failure_rate_counts_transport_errors() {
        let mut agg = StatsAggregator::new();
        agg.add(request("a", Some(202), Outcome::Accepted, 5));
        agg.add(request("a", Some(500), Outcome::Rejected, 5));
        agg.add(request("a", None, Outcome::TransportError("timeout"), 5));
        agg.add(request("a", Some(202), Outcome::Accepted, 5));

        let stats = agg.totals();
        assert_eq!(stats.errored, 1);
        assert_eq!(stats.errors["timeout"], 1);
        assert!((stats.failure_rate() - 0.5).abs() < f64::EPSILON);
        assert!(!stats.status_codes.contains_key(&0));
    }

    #[test]
    fn test_drops_do_not_affect_failure_rate() {
        let mut agg = StatsAggregator::new();
        agg.add(request("a", Some(202), Outcome::Accepted, 5));
        agg.add(Metric::Dropped {
            scenario: Arc::from("a"),
        });
        let stats = agg.totals();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.failure_rate(), 0.0);
    }

    #[test]
    fn test_histogram_percentiles() {
        let mut agg = StatsAggregator::new();
        for i in 1..=100 {
            agg.add(request("a", Some(201), Outcome::Accepted, i));
        }
        let stats = agg.totals();
        let p50 = stats.latency_at(0.5).as_micros() as u64;
        assert!((49000..=51000).contains(&p50), "P50 was {}", p50);
        let p99 = stats.latency_at(0.99).as_micros() as u64;
        assert!((98000..=100000).contains(&p99), "P99 was {}", p99);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let samples: Vec<Metric> = (1..=50)
            .map(|i| {
                if i % 5 == 0 {
                    request("a", Some(500), Outcome::Rejected, i)
                } else {
                    request("b", Some(202), Outcome::Accepted, i * 2)
                }
            })
            .collect();

        let forward = ShardedAggregator::new(4);
        for (i, m) in samples.iter().enumerate() {
            forward.add(i, m.clone());
        }
        let backward = ShardedAggregator::new(3);
        for (i, m) in samples.iter().rev().enumerate() {
            backward.add(i, m.clone());
        }

        let f = ScenarioReport::from_stats(&forward.merge().totals(), Duration::from_secs(1));
        let b = ScenarioReport::from_stats(&backward.merge().totals(), Duration::from_secs(1));
        assert_eq!(f, b);
        assert_eq!(f.total, 50);
        assert_eq!(f.rejected, 10);
    }

    #[test]
    fn test_peak_vus_tracks_maximum() {
        let mut agg = StatsAggregator::new();
        for active in [1, 5, 3] {
            agg.add(Metric::VirtualUsers {
                scenario: Arc::from("a"),
                active,
            });
        }
        agg.add(Metric::VirtualUsers {
            scenario: Arc::from("b"),
            active: 2,
        });
        assert_eq!(agg.select(Some("a")).peak_vus, 5);
        assert_eq!(agg.totals().peak_vus, 7);
    }

    #[test]
    fn test_sink_drains_all_producers() {
        let sink = MetricsSink::start(3);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tx = sink.sender();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        tx.send(request("a", Some(202), Outcome::Accepted, 1)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = sink.finish();
        assert_eq!(stats.totals().accepted, 1000);
    }

    #[test]
    fn test_report_empty() {
        let report = RunReport::assemble(
            &StatsAggregator::new(),
            BTreeMap::new(),
            Utc::now(),
            Duration::from_secs(1),
        );
        assert!(report.passed());
        assert_eq!(report.totals.total, 0);
        assert_eq!(report.totals.latency.p99_ms, 0.0);
        let json = report.to_json();
        assert!(json.contains("\"verdict\": \"pass\""));
    }
}
