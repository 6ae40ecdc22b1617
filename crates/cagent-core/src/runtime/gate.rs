//! Suspension point for externally supplied decisions.
//!
//! The confirmation gate and the max-iterations gate share one decision
//! channel per run; the OAuth coordinator gets its own. At most one waiter
//! is parked on a gate at a time. Feeding a gate nobody is waiting on is
//! rejected so the frontend can tell the user.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::events::ResumeDecision;
use super::RuntimeError;

pub struct ResumeGate {
    tx: mpsc::Sender<ResumeDecision>,
    rx: Mutex<mpsc::Receiver<ResumeDecision>>,
    waiting: AtomicBool,
}

impl ResumeGate {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel(1);
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            waiting: AtomicBool::new(false),
        })
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    /// Feed a decision to the parked waiter.
    pub fn submit(&self, decision: ResumeDecision) -> Result<(), RuntimeError> {
        if !self.is_waiting() {
            tracing::warn!("resume decision dropped: nothing is waiting");
            return Err(RuntimeError::NothingWaiting);
        }
        self.tx
            .try_send(decision)
            .map_err(|_| RuntimeError::NothingWaiting)
    }

    /// Park until a decision arrives or the run is cancelled.
    pub async fn wait(&self, cancel: &CancellationToken) -> Option<ResumeDecision> {
        let mut rx = self.rx.lock().await;
        // Drain anything stale from a previous waiter that raced cancellation.
        while let Ok(stale) = rx.try_recv() {
            tracing::warn!(?stale, "discarding stale resume decision");
        }

        self.waiting.store(true, Ordering::Release);
        let decision = tokio::select! {
            _ = cancel.cancelled() => None,
            decision = rx.recv() => decision,
        };
        self.waiting.store(false, Ordering::Release);
        decision
    }
}
