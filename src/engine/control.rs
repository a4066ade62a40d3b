use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Stop signal shared between the run controller, schedulers and virtual users.
///
/// A child state also observes its parent, so a scenario can be stopped on
/// its own (duration elapsed) or together with the whole run (external abort,
/// threshold abort).
pub struct ControlState {
    stopped: AtomicBool,
    notify: Notify,
    parent: Option<Arc<ControlState>>,
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            notify: Notify::new(),
            parent: None,
        }
    }

    pub fn child(parent: &Arc<ControlState>) -> Self {
        Self {
            parent: Some(parent.clone()),
            ..Self::new()
        }
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_stopped())
    }

    /// Resolves once this state or its parent is stopped.
    pub async fn stopped(&self) {
        loop {
            let own = self.notify.notified();
            tokio::pin!(own);
            // Register before checking the flag so a concurrent stop is not missed.
            own.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            match &self.parent {
                Some(parent) => {
                    let inherited = parent.notify.notified();
                    tokio::pin!(inherited);
                    inherited.as_mut().enable();
                    if parent.is_stopped() {
                        return;
                    }
                    tokio::select! {
                        _ = &mut own => {}
                        _ = &mut inherited => {}
                    }
                }
                None => own.await,
            }
        }
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}
