//! Sequential run over the selected models and repeats.

use crate::config::{BenchmarkConfig, ProtocolTimings};
use crate::executor::{TrialExecutor, TrialOutcome, TrialProgress, TrialRequest};
use crate::observer::{CancellationFlag, ExecutorState, LastResponse, RunObserver, RunPhase, RunSnapshot};
use anyhow::Result;
use llmbench_catalog::{ModelCatalog, ModelSelector};
use llmbench_endpoint::{GenerateOptions, InferenceBackend, ResidencyProbe};
use llmbench_metrics::{RunStatistics, TrialResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a run needs besides the endpoint itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub selector: ModelSelector,
    pub prompt: String,
    pub options: GenerateOptions,
    pub keep_alive: String,
    pub stream: bool,
    pub repeats: u32,
    pub cold_run: bool,
    pub label: Option<String>,
}

impl RunPlan {
    pub fn from_config(config: &BenchmarkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            selector: config.selector(),
            prompt: config.resolve_prompt()?,
            options: config.generate_options(),
            keep_alive: config.keep_alive.clone(),
            stream: config.enable_streaming,
            repeats: config.repeat_runs,
            cold_run: config.cold_run,
            label: config.label.clone(),
        })
    }

    fn request_for(&self, model: &str) -> TrialRequest {
        TrialRequest {
            model: model.to_string(),
            prompt: self.prompt.clone(),
            options: self.options.clone(),
            keep_alive: self.keep_alive.clone(),
            stream: self.stream,
            label: self.label.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub models: Vec<String>,
    pub results: Vec<TrialResult>,
    pub statistics: RunStatistics,
    pub interrupted: bool,
}

impl RunOutcome {
    pub fn failed_trials(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }
}

struct RunState {
    models: Vec<String>,
    results: Vec<TrialResult>,
    last_response: Option<LastResponse>,
    current: Option<usize>,
    repeat: u32,
    repeats: u32,
}

impl RunState {
    fn snapshot(&self, phase: RunPhase) -> RunSnapshot<'_> {
        RunSnapshot {
            phase,
            models: &self.models,
            current_model: self.current.map(|index| self.models[index].as_str()),
            repeat: self.repeat,
            repeats: self.repeats,
            completed: self.results.len(),
            total: self.models.len() * self.repeats as usize,
            results: &self.results,
            in_flight: None,
            trial_state: ExecutorState::Idle,
            streamed_text: "",
            last_response: self.last_response.as_ref(),
        }
    }

    fn record(&mut self, result: TrialResult) {
        if !result.is_error() {
            if let Some(text) = result.response_text.as_ref().filter(|t| !t.is_empty()) {
                self.last_response = Some(LastResponse {
                    model: result.model.clone(),
                    text: text.clone(),
                });
            }
        }
        self.results.push(result);
    }
}

pub struct RunOrchestrator<B, P> {
    catalog: ModelCatalog<B>,
    executor: TrialExecutor<B, P>,
    probe: Arc<P>,
    timings: ProtocolTimings,
}

impl<B, P> RunOrchestrator<B, P>
where
    B: InferenceBackend,
    P: ResidencyProbe + 'static,
{
    pub fn new(backend: Arc<B>, probe: Arc<P>, timings: ProtocolTimings) -> Self {
        Self {
            catalog: ModelCatalog::new(Arc::clone(&backend)),
            executor: TrialExecutor::new(backend, Arc::clone(&probe), timings),
            probe,
            timings,
        }
    }

    /// Run every (model, repeat) pair in order. Results already recorded
    /// survive cancellation; the trial in flight when it is raised does not.
    pub async fn run(
        &mut self,
        plan: &RunPlan,
        cancel: &CancellationFlag,
        observer: &mut dyn RunObserver,
    ) -> RunOutcome {
        let repeats = plan.repeats.max(1);
        let mut state = RunState {
            models: Vec::new(),
            results: Vec::new(),
            last_response: None,
            current: None,
            repeat: 0,
            repeats,
        };
        observer.on_snapshot(&state.snapshot(RunPhase::SelectModels));

        state.models = self.catalog.select(&plan.selector).await;
        if state.models.is_empty() {
            warn!("no models matched the selection");
        }
        state.results.reserve(state.models.len() * repeats as usize);
        info!(models = state.models.len(), repeats, cold_run = plan.cold_run, "run started");

        let mut interrupted = false;
        let last_model = state.models.len().saturating_sub(1);

        'models: for index in 0..state.models.len() {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            if let Some(previous) = state.current {
                observer.on_snapshot(&state.snapshot(RunPhase::StopPrevious));
                let previous = state.models[previous].clone();
                self.unload(&previous).await;
            }
            state.current = Some(index);
            let model = state.models[index].clone();

            for repeat in 1..=repeats {
                if cancel.is_cancelled() {
                    interrupted = true;
                    break 'models;
                }
                state.repeat = repeat;
                observer.on_snapshot(&state.snapshot(RunPhase::DispatchTrial));

                let request = plan.request_for(&model);
                let outcome = {
                    let state = &state;
                    let observer = &mut *observer;
                    self.executor
                        .run(&request, cancel, &mut |progress: &TrialProgress<'_>| {
                            let mut snapshot = state.snapshot(RunPhase::AwaitCompletion);
                            snapshot.in_flight = Some(progress.partial);
                            snapshot.trial_state = progress.state;
                            snapshot.streamed_text = progress.text;
                            observer.on_snapshot(&snapshot);
                        })
                        .await
                };

                let TrialOutcome::Finished(result) = outcome else {
                    interrupted = true;
                    break 'models;
                };
                let descriptor = self.catalog.descriptor(&model).cloned();
                state.record(result.with_descriptor(descriptor));
                observer.on_snapshot(&state.snapshot(RunPhase::Record));

                tokio::select! {
                    _ = tokio::time::sleep(self.timings.result_pause) => {}
                    _ = cancel.cancelled() => {}
                }

                let final_trial = index == last_model && repeat == repeats;
                if plan.cold_run && !final_trial {
                    observer.on_snapshot(&state.snapshot(RunPhase::StopCurrent));
                    self.unload(&model).await;
                    tokio::time::sleep(self.timings.settle).await;
                }
            }
        }

        if interrupted {
            warn!(recorded = state.results.len(), "run interrupted");
        }
        observer.on_snapshot(&state.snapshot(RunPhase::Finalize));
        let statistics = RunStatistics::from_results(&state.results);
        observer.on_snapshot(&state.snapshot(RunPhase::Finished));

        RunOutcome {
            models: state.models,
            results: state.results,
            statistics,
            interrupted,
        }
    }

    async fn unload(&self, model: &str) {
        if let Err(err) = self.probe.unload(model).await {
            debug!(model, error = %err, "unload failed");
        }
    }
}
