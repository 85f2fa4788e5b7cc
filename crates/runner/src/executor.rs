//! Single-flight trial execution.
//!
//! A trial probes whether the model is already resident, starts a
//! [`MemoryMonitor`], issues one generation (streamed or batch), stops the
//! monitor, and folds everything into an immutable [`TrialResult`]. The
//! generation is raced against the run's [`CancellationFlag`]; a trial that
//! loses that race is abandoned and produces no result.

use crate::config::ProtocolTimings;
use crate::monitor::{sample_resident, MemoryMonitor};
use crate::observer::{CancellationFlag, ExecutorState};
use futures_util::StreamExt;
use llmbench_endpoint::{
    EndpointError, GenerateChunk, GenerateOptions, GenerateRequest, InferenceBackend, ResidencyProbe,
};
use llmbench_metrics::{MemorySample, TrialMetrics, TrialResult};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct TrialRequest {
    pub model: String,
    pub prompt: String,
    pub options: GenerateOptions,
    pub keep_alive: String,
    pub stream: bool,
    pub label: Option<String>,
}

impl TrialRequest {
    fn to_generate(&self) -> GenerateRequest {
        GenerateRequest::new(
            self.model.clone(),
            self.prompt.clone(),
            self.options.clone(),
            self.keep_alive.clone(),
            self.stream,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStatus {
    Running,
    Completed,
    Error,
}

/// The in-flight view of a trial. The sampler task writes the memory slot;
/// everything else belongs to the foreground loop.
#[derive(Debug, Clone)]
pub struct PartialTrial {
    pub model: String,
    pub preloaded: bool,
    pub status: TrialStatus,
    memory: watch::Receiver<Option<MemorySample>>,
}

impl PartialTrial {
    pub fn memory(&self) -> Option<MemorySample> {
        self.memory.borrow().clone()
    }
}

pub struct TrialProgress<'a> {
    pub state: ExecutorState,
    pub partial: &'a PartialTrial,
    pub text: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    Finished(TrialResult),
    Abandoned,
}

/// Splits a byte stream into newline-terminated units, holding back a
/// trailing partial unit until the rest of it arrives.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    /// Whatever is left once the stream ends.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buffer);
        (!rest.iter().all(u8::is_ascii_whitespace)).then_some(rest)
    }
}

#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    metrics: Option<TrialMetrics>,
    context_length: Option<u32>,
    done: bool,
    skipped: usize,
    reported: Option<String>,
}

impl StreamAccumulator {
    /// Feed one unit. Returns whether it carried new text.
    pub fn accept_line(&mut self, line: &[u8]) -> bool {
        let line = trim_whitespace(line);
        if line.is_empty() || self.done {
            return false;
        }
        let mut chunk: GenerateChunk = match serde_json::from_slice(line) {
            Ok(chunk) => chunk,
            Err(err) => {
                self.skipped += 1;
                debug!(error = %err, "skipping malformed stream unit");
                return false;
            }
        };

        if let Some(message) = chunk.error.take() {
            warn!(error = %message, "endpoint reported an error mid-stream");
            self.reported = Some(message);
            self.done = true;
            return false;
        }

        let fragment = chunk.text();
        let new_text = !fragment.is_empty();
        self.text.push_str(fragment);

        if chunk.done {
            self.done = true;
            self.metrics = chunk.metrics();
            self.context_length = chunk.context_length;
        }
        new_text
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn finish(self) -> Result<Generated, EndpointError> {
        if let Some(message) = self.reported {
            return Err(EndpointError::Reported(message));
        }
        let metrics = self.metrics.ok_or(EndpointError::MissingMetrics)?;
        Ok(Generated {
            text: self.text,
            metrics,
            context_length: self.context_length,
        })
    }
}

fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Rate limit for display updates: always on new text, otherwise at most
/// once per interval.
#[derive(Debug)]
pub struct DisplayThrottle {
    interval: std::time::Duration,
    last: Option<Instant>,
}

impl DisplayThrottle {
    pub fn new(interval: std::time::Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn should_emit(&mut self, new_text: bool) -> bool {
        let now = Instant::now();
        let due = self
            .last
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if new_text || due {
            self.last = Some(now);
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
    pub metrics: TrialMetrics,
    pub context_length: Option<u32>,
}

pub struct TrialExecutor<B, P> {
    backend: Arc<B>,
    probe: Arc<P>,
    timings: ProtocolTimings,
}

impl<B, P> TrialExecutor<B, P>
where
    B: InferenceBackend,
    P: ResidencyProbe + 'static,
{
    pub fn new(backend: Arc<B>, probe: Arc<P>, timings: ProtocolTimings) -> Self {
        Self {
            backend,
            probe,
            timings,
        }
    }

    /// Whether `model` was resident before the trial; any failure is `false`.
    pub async fn is_preloaded(&self, model: &str) -> bool {
        match self.backend.loaded_models().await {
            Ok(loaded) => loaded.iter().any(|name| name == model),
            Err(err) => {
                debug!(model, error = %err, "preload probe failed");
                false
            }
        }
    }

    pub async fn run(
        &self,
        request: &TrialRequest,
        cancel: &CancellationFlag,
        on_progress: &mut dyn FnMut(&TrialProgress<'_>),
    ) -> TrialOutcome {
        let preloaded = self.is_preloaded(&request.model).await;
        let mut monitor =
            MemoryMonitor::start(Arc::clone(&self.probe), request.model.clone(), self.timings.sample_interval);
        let mut partial = PartialTrial {
            model: request.model.clone(),
            preloaded,
            status: TrialStatus::Running,
            memory: monitor.subscribe(),
        };
        info!(model = %request.model, preloaded, stream = request.stream, "trial started");
        on_progress(&TrialProgress {
            state: ExecutorState::Requested,
            partial: &partial,
            text: "",
        });

        let generate = request.to_generate();
        let attempt = {
            let work = async {
                let timeout = self.timings.generate_timeout;
                let result = if request.stream {
                    tokio::time::timeout(timeout, self.stream(&generate, &partial, &mut *on_progress)).await
                } else {
                    on_progress(&TrialProgress {
                        state: ExecutorState::AwaitingResponse,
                        partial: &partial,
                        text: "",
                    });
                    tokio::time::timeout(timeout, self.batch(&generate)).await
                };
                result.unwrap_or_else(|_| {
                    Err(EndpointError::Timeout {
                        url: "/api/generate".to_string(),
                        timeout,
                    })
                })
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = work => Some(result),
            }
        };

        let last_seen = monitor.latest();
        monitor.stop(self.timings.sampler_join).await;

        let Some(attempt) = attempt else {
            info!(model = %request.model, "trial abandoned");
            return TrialOutcome::Abandoned;
        };

        let result = match attempt {
            Ok(generated) => {
                partial.status = TrialStatus::Completed;
                on_progress(&TrialProgress {
                    state: ExecutorState::Done,
                    partial: &partial,
                    text: &generated.text,
                });
                tokio::time::sleep(self.timings.settle).await;
                let memory = sample_resident(self.probe.as_ref(), &request.model)
                    .await
                    .or(last_seen);
                let context_length = generated.context_length.unwrap_or(request.options.num_ctx);
                let result = TrialResult::completed(
                    request.model.clone(),
                    preloaded,
                    generated.metrics,
                    context_length,
                    generated.text,
                )
                .with_memory(memory);
                info!(
                    model = %request.model,
                    tokens = result.tokens(),
                    tokens_per_second = result.tokens_per_second(),
                    total_s = result.total_seconds(),
                    "trial completed"
                );
                result
            }
            Err(err) => {
                partial.status = TrialStatus::Error;
                on_progress(&TrialProgress {
                    state: ExecutorState::Failed,
                    partial: &partial,
                    text: "",
                });
                warn!(model = %request.model, error = %err, "trial failed");
                TrialResult::failed(request.model.clone(), preloaded, err.to_string(), request.options.num_ctx)
                    .with_memory(last_seen)
            }
        };

        TrialOutcome::Finished(result.with_label(request.label.clone()))
    }

    async fn stream(
        &self,
        request: &GenerateRequest,
        partial: &PartialTrial,
        on_progress: &mut dyn FnMut(&TrialProgress<'_>),
    ) -> Result<Generated, EndpointError> {
        let mut body = self.backend.generate_stream(request).await?;
        let mut decoder = LineDecoder::default();
        let mut accumulator = StreamAccumulator::default();
        let mut throttle = DisplayThrottle::new(self.timings.display_throttle);

        'body: while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for line in decoder.push(&chunk) {
                let new_text = accumulator.accept_line(&line);
                if throttle.should_emit(new_text) {
                    on_progress(&TrialProgress {
                        state: ExecutorState::Streaming,
                        partial,
                        text: accumulator.text(),
                    });
                }
                if accumulator.is_done() {
                    break 'body;
                }
            }
        }
        if !accumulator.is_done() {
            if let Some(rest) = decoder.finish() {
                accumulator.accept_line(&rest);
            }
        }
        if accumulator.skipped() > 0 {
            debug!(model = %request.model, skipped = accumulator.skipped(), "malformed units skipped");
        }
        accumulator.finish()
    }

    async fn batch(&self, request: &GenerateRequest) -> Result<Generated, EndpointError> {
        let mut chunk = self.backend.generate(request).await?;
        if let Some(message) = chunk.error.take() {
            return Err(EndpointError::Reported(message));
        }
        let metrics = chunk.metrics().ok_or(EndpointError::MissingMetrics)?;
        Ok(Generated {
            text: chunk.response.unwrap_or_default(),
            metrics,
            context_length: chunk.context_length,
        })
    }
}
