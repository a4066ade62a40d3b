use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::engine::classify::{Outcome, ResponseClassifier};
use crate::engine::control::ControlState;
use crate::engine::http_client::Transport;
use crate::engine::request::RequestBuilder;
use crate::error::TransportError;
use crate::stats::Metric;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VuState {
    Idle = 0,
    Executing = 1,
    Retiring = 2,
}

impl VuState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => VuState::Executing,
            2 => VuState::Retiring,
            _ => VuState::Idle,
        }
    }
}

/// Executes one iteration: build, send under the request deadline, classify.
pub struct IterationRunner<T: Transport> {
    transport: Arc<T>,
    requests: Arc<RequestBuilder>,
    classifier: Arc<ResponseClassifier>,
    request_timeout: Duration,
}

impl<T: Transport> Clone for IterationRunner<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            requests: self.requests.clone(),
            classifier: self.classifier.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

impl<T: Transport> IterationRunner<T> {
    pub fn new(
        transport: Arc<T>,
        requests: Arc<RequestBuilder>,
        classifier: ResponseClassifier,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            requests,
            classifier: Arc::new(classifier),
            request_timeout,
        }
    }

    pub async fn run(&self, vu: usize, iteration: u64) -> Outcome {
        let request = self.requests.build(vu, iteration);
        let start = Instant::now();
        let exchange =
            match tokio::time::timeout(self.request_timeout, self.transport.send(request)).await {
                Ok(exchange) => exchange,
                Err(_) => Err(TransportError::Timeout),
            };
        self.classifier.classify(exchange, start.elapsed())
    }
}

/// Pool-side handle of one virtual user. The task behind it is the only
/// writer of its iteration counter; the pool only reads its state.
pub struct VirtualUser {
    pub index: usize,
    state: Arc<AtomicU8>,
    dispatch: Option<mpsc::Sender<()>>,
    handle: JoinHandle<()>,
}

impl VirtualUser {
    #[cfg(test)]
    pub(crate) fn state(&self) -> VuState {
        VuState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Lives on a virtual user's task stack. If the task unwinds, the owning
/// scenario is stopped so the fault surfaces instead of turning into drops.
struct PanicGuard {
    scenario: Arc<str>,
    index: usize,
    stop: Arc<ControlState>,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(
                scenario = %self.scenario,
                vu = self.index,
                "virtual user panicked, stopping scenario"
            );
            self.stop.stop();
        }
    }
}

/// What `retire` observed while joining the pool's users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Retired {
    /// Still executing when the graceful stop expired.
    pub interrupted: u64,
    /// Ended by a panic instead of returning.
    pub panicked: u64,
}

/// Bounded set of virtual users for one scenario.
///
/// Membership changes (spawn, retire) only happen through `&mut self`, so the
/// scheduler that owns the pool is their single writer.
pub struct VirtualUserPool<T: Transport> {
    scenario: Arc<str>,
    runner: IterationRunner<T>,
    metrics: Sender<Metric>,
    max: usize,
    members: Vec<VirtualUser>,
    idle_tx: mpsc::UnboundedSender<usize>,
    idle_rx: mpsc::UnboundedReceiver<usize>,
    started: Arc<AtomicU64>,
    stop: Arc<ControlState>,
}

impl<T: Transport> VirtualUserPool<T> {
    /// `stop` is the scenario's stop signal; a panicking user fires it.
    pub fn new(
        scenario: Arc<str>,
        runner: IterationRunner<T>,
        metrics: Sender<Metric>,
        max: usize,
        stop: Arc<ControlState>,
    ) -> Self {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        Self {
            scenario,
            runner,
            metrics,
            max,
            members: Vec::with_capacity(max.min(4096)),
            idle_tx,
            idle_rx,
            started: Arc::new(AtomicU64::new(0)),
            stop,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn started_counter(&self) -> Arc<AtomicU64> {
        self.started.clone()
    }

    #[cfg(test)]
    pub(crate) fn started_iterations(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn members(&self) -> &[VirtualUser] {
        &self.members
    }

    fn guard(&self, index: usize) -> PanicGuard {
        PanicGuard {
            scenario: self.scenario.clone(),
            index,
            stop: self.stop.clone(),
        }
    }

    fn next_index(&self) -> usize {
        // Indices start at 1 and are never reused.
        self.members.len() + 1
    }

    fn record_size(&self) {
        let _ = self.metrics.send(Metric::VirtualUsers {
            scenario: self.scenario.clone(),
            active: self.members.len(),
        });
    }

    /// Spawn up to `count` dispatch-driven users that start out idle.
    pub fn warm_up(&mut self, count: usize) {
        let count = count.min(self.max.saturating_sub(self.members.len()));
        for _ in 0..count {
            let index = self.spawn_dispatched();
            let _ = self.idle_tx.send(index);
        }
        if count > 0 {
            self.record_size();
        }
    }

    fn spawn_dispatched(&mut self) -> usize {
        let index = self.next_index();
        let state = Arc::new(AtomicU8::new(VuState::Idle as u8));
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel::<()>(1);
        let runner = self.runner.clone();
        let idle_tx = self.idle_tx.clone();
        let started = self.started.clone();
        let vu_state = state.clone();
        let guard = self.guard(index);

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let mut iteration: u64 = 0;
            while dispatch_rx.recv().await.is_some() {
                vu_state.store(VuState::Executing as u8, Ordering::Release);
                started.fetch_add(1, Ordering::Relaxed);
                runner.run(index, iteration).await;
                iteration += 1;
                vu_state.store(VuState::Idle as u8, Ordering::Release);
                if idle_tx.send(index).is_err() {
                    break;
                }
            }
            vu_state.store(VuState::Retiring as u8, Ordering::Release);
        });

        self.members.push(VirtualUser {
            index,
            state,
            dispatch: Some(dispatch_tx),
            handle,
        });
        index
    }

    /// Hand one iteration to an idle user, growing the pool if allowed.
    /// Returns `false` when the pool is at its ceiling and nobody is idle.
    pub fn try_dispatch(&mut self) -> bool {
        let index = match self.idle_rx.try_recv() {
            Ok(index) => index,
            Err(_) if self.members.len() < self.max => {
                let index = self.spawn_dispatched();
                self.record_size();
                tracing::debug!(scenario = %self.scenario, vus = self.members.len(), "pool grew");
                index
            }
            Err(_) => return false,
        };
        // An idle user's single-slot channel is always empty.
        match self.members[index - 1].dispatch.as_ref() {
            Some(tx) => tx.try_send(()).is_ok(),
            None => false,
        }
    }

    /// Spawn a closed-workload user that loops on its own until `stop` fires
    /// or it has run `iterations` times. `done` is dropped when it exits.
    pub fn spawn_looping(
        &mut self,
        stop: Arc<ControlState>,
        pacing: Duration,
        iterations: Option<u64>,
        done: mpsc::Sender<()>,
    ) -> Option<usize> {
        if self.members.len() >= self.max {
            return None;
        }
        let index = self.next_index();
        let state = Arc::new(AtomicU8::new(VuState::Idle as u8));
        let runner = self.runner.clone();
        let started = self.started.clone();
        let vu_state = state.clone();
        let guard = self.guard(index);

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let _done = done;
            let mut iteration: u64 = 0;
            while !stop.is_stopped() {
                vu_state.store(VuState::Executing as u8, Ordering::Release);
                started.fetch_add(1, Ordering::Relaxed);
                runner.run(index, iteration).await;
                iteration += 1;
                vu_state.store(VuState::Idle as u8, Ordering::Release);

                if iterations.is_some_and(|max| iteration >= max) {
                    break;
                }
                if !pacing.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(pacing) => {}
                        _ = stop.stopped() => break,
                    }
                }
            }
            vu_state.store(VuState::Retiring as u8, Ordering::Release);
        });

        self.members.push(VirtualUser {
            index,
            state,
            dispatch: None,
            handle,
        });
        self.record_size();
        Some(index)
    }

    /// Stop handing out work and wait up to `graceful_stop` for in-flight
    /// iterations. Users still executing after that are aborted and reported
    /// as interrupted; users that died by panicking are counted separately.
    pub async fn retire(mut self, graceful_stop: Duration) -> Retired {
        for member in &mut self.members {
            member.dispatch = None;
        }
        let deadline = Instant::now() + graceful_stop;
        let mut retired = Retired::default();

        for member in self.members.drain(..) {
            let VirtualUser {
                index,
                state,
                mut handle,
                ..
            } = member;
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                // Nothing cancels a user before this point, so this is a panic.
                Ok(Err(e)) => {
                    tracing::debug!(scenario = %self.scenario, vu = index, error = %e, "virtual user died");
                    retired.panicked += 1;
                }
                Err(_) => {
                    if VuState::from_u8(state.load(Ordering::Acquire)) == VuState::Executing {
                        retired.interrupted += 1;
                    }
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        let Retired {
            interrupted,
            panicked,
        } = retired;
        if panicked > 0 {
            tracing::error!(
                scenario = %self.scenario,
                panicked,
                "virtual users panicked, results are incomplete"
            );
        }
        if interrupted > 0 {
            tracing::warn!(
                scenario = %self.scenario,
                interrupted,
                "graceful stop expired, abandoning in-flight iterations"
            );
            let _ = self.metrics.send(Metric::Interrupted {
                scenario: self.scenario.clone(),
                count: interrupted,
            });
        }
        retired
    }
}
