//! Run progress events and cooperative cancellation.

use crate::executor::PartialTrial;
use llmbench_metrics::TrialResult;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    SelectModels,
    StopPrevious,
    DispatchTrial,
    AwaitCompletion,
    Record,
    StopCurrent,
    Finalize,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Requested,
    Streaming,
    AwaitingResponse,
    Done,
    Failed,
}

/// Most recent successful response, kept for display between trials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastResponse {
    pub model: String,
    pub text: String,
}

/// Immutable view of a run at one instant.
#[derive(Debug, Clone, Copy)]
pub struct RunSnapshot<'a> {
    pub phase: RunPhase,
    pub models: &'a [String],
    pub current_model: Option<&'a str>,
    /// 1-based repeat index of the current trial.
    pub repeat: u32,
    pub repeats: u32,
    pub completed: usize,
    pub total: usize,
    pub results: &'a [TrialResult],
    pub in_flight: Option<&'a PartialTrial>,
    pub trial_state: ExecutorState,
    /// Text streamed so far by the in-flight trial.
    pub streamed_text: &'a str,
    pub last_response: Option<&'a LastResponse>,
}

impl RunSnapshot<'_> {
    /// Text a display should show: the live stream when it has produced
    /// anything, otherwise the previous response.
    pub fn display_text(&self) -> Option<(&str, &str)> {
        match (self.current_model, self.streamed_text.is_empty()) {
            (Some(model), false) => Some((model, self.streamed_text)),
            _ => self
                .last_response
                .map(|last| (last.model.as_str(), last.text.as_str())),
        }
    }
}

pub trait RunObserver {
    fn on_snapshot(&mut self, snapshot: &RunSnapshot<'_>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl RunObserver for NullObserver {
    fn on_snapshot(&mut self, _snapshot: &RunSnapshot<'_>) {}
}

/// Shared stop flag, raised from a signal handler and observed by the run.
#[derive(Debug, Clone)]
pub struct CancellationFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is raised.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|raised| *raised).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancellationFlag {
    fn default() -> Self {
        Self::new()
    }
}
