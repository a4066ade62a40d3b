use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::engine::control::ControlState;
use crate::engine::http_client::Transport;
use crate::engine::scenario::RunPlan;
use crate::engine::scheduler::{ArrivalScheduler, SchedulerSummary};
use crate::error::RunError;
use crate::stats::{threshold, MetricsSink, RunReport, Verdict};

pub mod classify;
pub mod control;
pub mod http_client;
pub mod pool;
pub mod request;
pub mod scenario;
pub mod scheduler;

/// Owns one run: starts every scenario, watches abort thresholds, drains,
/// evaluates and assembles the report.
pub struct Engine<T: Transport> {
    plan: RunPlan,
    transport: Arc<T>,
    control: Arc<ControlState>,
}

impl<T: Transport> Engine<T> {
    pub fn new(plan: RunPlan, transport: T) -> Self {
        Self {
            plan,
            transport: Arc::new(transport),
            control: Arc::new(ControlState::new()),
        }
    }

    /// Handle for stopping the run from outside (signal handler, tests).
    pub fn control(&self) -> Arc<ControlState> {
        self.control.clone()
    }

    /// A failed threshold is an `Ok` report with a failing verdict. `Err` means
    /// the harness itself broke, e.g. a virtual user panicked.
    pub async fn run(self) -> Result<RunReport, RunError> {
        let Engine {
            plan,
            transport,
            control,
        } = self;
        let started_at = Utc::now();
        let start = Instant::now();
        let sink = MetricsSink::start_default();

        let mut scenarios: JoinSet<(Arc<str>, SchedulerSummary)> = JoinSet::new();
        for scenario in plan.scenarios {
            let scenario = Arc::new(scenario);
            let scheduler =
                ArrivalScheduler::new(scenario.clone(), transport.clone(), sink.sender(), &control);
            let control = control.clone();
            scenarios.spawn(async move {
                if !scenario.start_time.is_zero() {
                    tracing::info!(
                        scenario = %scenario.name,
                        delay_ms = scenario.start_time.as_millis() as u64,
                        "delaying scenario start"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(scenario.start_time) => {}
                        _ = control.stopped() => {}
                    }
                }
                // A stopped run still goes through the scheduler so the
                // pool is set up and retired the same way.
                (scenario.name.clone(), scheduler.run().await)
            });
        }

        let watched: Vec<_> = plan
            .thresholds
            .iter()
            .filter(|t| t.abort_on_fail)
            .cloned()
            .collect();
        let mut checks = tokio::time::interval(plan.threshold_check_interval);
        checks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut aborted_by: Option<String> = None;
        // First harness fault seen; the run is stopped and reported as an error.
        let mut fault: Option<RunError> = None;

        loop {
            tokio::select! {
                joined = scenarios.join_next() => match joined {
                    None => break,
                    Some(Ok((name, summary))) => {
                        tracing::debug!(scenario = %name, ?summary, "scheduler finished");
                        if summary.panicked > 0 {
                            tracing::error!(
                                scenario = %name,
                                panicked = summary.panicked,
                                "virtual users panicked, stopping run"
                            );
                            if fault.is_none() {
                                fault = Some(RunError::Worker {
                                    scenario: name.to_string(),
                                    panicked: summary.panicked,
                                });
                            }
                            control.stop();
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "scenario task failed, stopping run");
                        if fault.is_none() {
                            fault = Some(RunError::ScenarioTask(e.to_string()));
                        }
                        control.stop();
                    }
                },
                _ = checks.tick(), if !watched.is_empty() && aborted_by.is_none() => {
                    let elapsed = start.elapsed();
                    let snapshot = sink.snapshot();
                    for t in watched.iter().filter(|t| elapsed >= t.delay_abort_eval) {
                        let result = t.evaluate(&snapshot, elapsed);
                        if !result.passed {
                            tracing::warn!(
                                threshold = %t.id,
                                actual = result.actual,
                                "threshold failed, aborting run"
                            );
                            aborted_by = Some(t.id.clone());
                            control.stop();
                            break;
                        }
                    }
                }
            }
        }

        let elapsed = start.elapsed();
        let stats = tokio::task::spawn_blocking(move || sink.finish())
            .await
            .map_err(|e| RunError::Aggregation(e.to_string()))?;
        if let Some(fault) = fault {
            return Err(fault);
        }

        let results = threshold::evaluate_all(&plan.thresholds, &stats, elapsed);
        let mut report = RunReport::assemble(&stats, results, started_at, elapsed);
        report.aborted_externally = aborted_by.is_none() && control.is_stopped();
        if aborted_by.is_some() {
            report.verdict = Verdict::Fail;
        }
        report.aborted_by_threshold = aborted_by;

        tracing::info!(
            verdict = ?report.verdict,
            elapsed_ms = elapsed.as_millis() as u64,
            requests = report.totals.total,
            "run complete"
        );
        Ok(report)
    }
}

/// Idle connections to keep per host, sized to the largest possible pool.
pub fn connection_pool_size(plan: &RunPlan) -> usize {
    plan.max_vus().clamp(64, 20_000)
}
