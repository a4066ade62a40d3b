//! Arrival scheduling: open (constant arrival rate) and closed workloads.

use crossbeam_channel::Sender;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::engine::classify::ResponseClassifier;
use crate::engine::control::ControlState;
use crate::engine::http_client::Transport;
use crate::engine::pool::{IterationRunner, VirtualUserPool};
use crate::engine::scenario::{Executor, Scenario};
use crate::stats::Metric;

/// Log every this many dropped arrivals after the first.
const DROP_LOG_EVERY: u64 = 1000;

/// What one scenario did, as seen by its scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub dispatched: u64,
    pub dropped: u64,
    pub interrupted: u64,
    /// Virtual users that died by panicking. Non-zero means a harness fault.
    pub panicked: u64,
    pub peak_vus: usize,
    pub elapsed: Duration,
}

/// Drives one scenario's pool until its stop condition or the stop signal.
pub struct ArrivalScheduler<T: Transport> {
    scenario: Arc<Scenario>,
    pool: VirtualUserPool<T>,
    metrics: Sender<Metric>,
    stop: Arc<ControlState>,
}

impl<T: Transport> ArrivalScheduler<T> {
    /// `global` is the run-wide stop signal; the scheduler derives its own
    /// child signal from it so it can also stop on its own.
    pub fn new(
        scenario: Arc<Scenario>,
        transport: Arc<T>,
        metrics: Sender<Metric>,
        global: &Arc<ControlState>,
    ) -> Self {
        let classifier = ResponseClassifier::new(
            scenario.name.clone(),
            scenario.acceptance.clone(),
            metrics.clone(),
        );
        let runner = IterationRunner::new(
            transport,
            scenario.requests.clone(),
            classifier,
            scenario.request_timeout,
        );
        let stop = Arc::new(ControlState::child(global));
        let pool = VirtualUserPool::new(
            scenario.name.clone(),
            runner,
            metrics.clone(),
            scenario.executor.max_vus(),
            stop.clone(),
        );
        Self {
            pool,
            metrics,
            stop,
            scenario,
        }
    }

    pub async fn run(self) -> SchedulerSummary {
        let executor = self.scenario.executor.clone();
        match executor {
            Executor::ConstantArrivalRate {
                rate,
                time_unit,
                pre_allocated_vus,
                ..
            } => self.run_arrival_rate(rate, time_unit, pre_allocated_vus).await,
            Executor::ClosedWorkload { vus, pacing } => self.run_closed(vus, pacing).await,
        }
    }

    async fn run_arrival_rate(
        mut self,
        rate: u64,
        time_unit: Duration,
        pre_allocated_vus: usize,
    ) -> SchedulerSummary {
        let name = self.scenario.name.clone();
        let budget = self.scenario.stop.iterations;
        let duration = self.scenario.stop.duration;

        self.pool.warm_up(pre_allocated_vus);
        tracing::info!(
            scenario = %name,
            rate,
            time_unit_ms = time_unit.as_millis() as u64,
            interval_us = self
                .scenario
                .executor
                .interval()
                .map_or(0, |i| i.as_micros() as u64),
            pre_allocated_vus,
            max_vus = self.pool_max(),
            "starting constant-arrival-rate scenario"
        );

        // Arrival k is due at k * time_unit / rate after start.
        let per_sec = rate as f64 / time_unit.as_secs_f64();
        let start = Instant::now();
        let deadline = duration.map(|d| start + d);
        let mut arrivals: u64 = 0;
        let mut summary = SchedulerSummary::default();

        'arrivals: loop {
            if self.stop.is_stopped() {
                break;
            }
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                break;
            }

            let due = (now.duration_since(start).as_secs_f64() * per_sec).floor() as u64 + 1;
            while arrivals < due {
                if budget.is_some_and(|b| arrivals >= b) {
                    break 'arrivals;
                }
                arrivals += 1;
                if self.pool.try_dispatch() {
                    summary.dispatched += 1;
                } else {
                    summary.dropped += 1;
                    let _ = self.metrics.send(Metric::Dropped {
                        scenario: name.clone(),
                    });
                    if summary.dropped == 1 || summary.dropped % DROP_LOG_EVERY == 0 {
                        tracing::warn!(
                            scenario = %name,
                            dropped = summary.dropped,
                            vus = self.pool.len(),
                            "pool at ceiling, dropping arrivals"
                        );
                    }
                }
            }
            if budget.is_some_and(|b| arrivals >= b) {
                break;
            }

            let mut next = start + Duration::from_secs_f64(arrivals as f64 / per_sec);
            if let Some(d) = deadline {
                next = next.min(d);
            }
            tokio::select! {
                _ = tokio::time::sleep_until(next) => {}
                _ = self.stop.stopped() => break,
            }
        }

        self.finish(start, summary).await
    }

    async fn run_closed(mut self, vus: usize, pacing: Duration) -> SchedulerSummary {
        let name = self.scenario.name.clone();
        let per_vu = self.scenario.stop.iterations;
        tracing::info!(
            scenario = %name,
            vus,
            pacing_ms = pacing.as_millis() as u64,
            "starting closed-workload scenario"
        );

        let start = Instant::now();
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        for _ in 0..vus {
            self.pool
                .spawn_looping(self.stop.clone(), pacing, per_vu, done_tx.clone());
        }
        drop(done_tx);

        let deadline = self.scenario.stop.duration.map(|d| start + d);
        tokio::select! {
            _ = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending::<()>().await,
                }
            } => {}
            _ = self.stop.stopped() => {}
            // Every user hit its iteration limit.
            _ = done_rx.recv() => {}
        }

        self.finish(start, SchedulerSummary::default()).await
    }

    fn pool_max(&self) -> usize {
        self.scenario.executor.max_vus()
    }

    async fn finish(self, start: Instant, mut summary: SchedulerSummary) -> SchedulerSummary {
        let ArrivalScheduler {
            scenario,
            pool,
            stop,
            ..
        } = self;
        stop.stop();

        summary.peak_vus = pool.len();
        let started = pool.started_counter();
        let retired = pool.retire(scenario.graceful_stop).await;
        summary.interrupted = retired.interrupted;
        summary.panicked = retired.panicked;
        if let Executor::ClosedWorkload { .. } = scenario.executor {
            summary.dispatched = started.load(Ordering::Relaxed);
        }
        summary.elapsed = start.elapsed();

        tracing::info!(
            scenario = %scenario.name,
            dispatched = summary.dispatched,
            dropped = summary.dropped,
            interrupted = summary.interrupted,
            panicked = summary.panicked,
            peak_vus = summary.peak_vus,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "scenario complete"
        );
        summary
    }
}
