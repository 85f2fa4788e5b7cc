use anyhow::Result;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use llmbench_suite::endpoint::{
    ByteStream, EndpointError, GenerateChunk, GenerateRequest, InferenceBackend, ResidencyProbe,
};
use llmbench_suite::metrics::{ModelDescriptor, TrialRecord};
use llmbench_suite::runner::export::{CSV_FILE, SYSTEM_INFO_FILE};
use llmbench_suite::runner::observer::RunPhase;
use llmbench_suite::runner::{
    BenchSession, BenchmarkConfig, CancellationFlag, NullObserver, RunObserver, RunSnapshot,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

const FINAL_UNIT: &str =
    "{\"done\":true,\"eval_count\":20,\"eval_duration\":1000000000,\"load_duration\":5000000,\"total_duration\":1200000000}\n";

/// Serves a fixed model list and streams `body` for every generation.
struct FakeEndpoint {
    models: Vec<&'static str>,
    body: String,
}

impl FakeEndpoint {
    fn new(models: Vec<&'static str>) -> Self {
        Self {
            models,
            body: format!("{{\"response\":\"Hello\"}}\n{{\"response\":\" world\"}}\n{FINAL_UNIT}"),
        }
    }
}

impl InferenceBackend for FakeEndpoint {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, EndpointError> {
        Ok(self.models.iter().map(|n| ModelDescriptor::new(*n, 3 << 30)).collect())
    }

    async fn loaded_models(&self) -> Result<Vec<String>, EndpointError> {
        Ok(Vec::new())
    }

    async fn generate(&self, _request: &GenerateRequest) -> Result<GenerateChunk, EndpointError> {
        Err(EndpointError::MissingMetrics)
    }

    async fn generate_stream(&self, _request: &GenerateRequest) -> Result<ByteStream, EndpointError> {
        // Split mid-line so the decoder has to join chunks.
        let (head, tail) = self.body.split_at(self.body.len() / 2);
        let chunks = vec![
            Ok(Bytes::from(head.to_string())),
            Ok(Bytes::from(tail.to_string())),
        ];
        Ok(stream::iter(chunks).boxed())
    }
}

#[derive(Default)]
struct FakeProbe {
    unloaded: Mutex<Vec<String>>,
}

impl ResidencyProbe for FakeProbe {
    async fn resident_status(&self) -> Result<String, EndpointError> {
        Ok("NAME ID SIZE PROCESSOR CONTEXT UNTIL\nm:2b abc 3.1 GB 100% GPU 4096 4 minutes from now\n".into())
    }

    async fn unload(&self, model: &str) -> Result<(), EndpointError> {
        if let Ok(mut unloaded) = self.unloaded.lock() {
            unloaded.push(model.to_string());
        }
        Ok(())
    }
}

/// Raises the cancellation flag once `after` results are recorded.
struct InterruptAfter {
    after: usize,
    cancel: CancellationFlag,
}

impl RunObserver for InterruptAfter {
    fn on_snapshot(&mut self, snapshot: &RunSnapshot<'_>) {
        if snapshot.phase == RunPhase::Record && snapshot.results.len() >= self.after {
            self.cancel.cancel();
        }
    }
}

fn config(output: &Path) -> BenchmarkConfig {
    BenchmarkConfig {
        select_pattern: Some("m:".into()),
        prompt: Some("hello".into()),
        output_dir: Some(output.to_path_buf()),
        ..BenchmarkConfig::default()
    }
}

fn read_csv(path: &Path) -> Result<Vec<TrialRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    Ok(reader.deserialize().collect::<Result<_, _>>()?)
}

#[tokio::test(start_paused = true)]
async fn every_model_and_repeat_is_recorded_and_exported() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("full");
    let session = BenchSession::new(BenchmarkConfig {
        repeat_runs: 2,
        ..config(&output)
    })?;

    let report = session
        .run_with(
            Arc::new(FakeEndpoint::new(vec!["m:10b", "m:2b", "m:9b"])),
            Arc::new(FakeProbe::default()),
            &CancellationFlag::new(),
            &mut NullObserver,
        )
        .await?;

    let outcome = &report.outcome;
    assert!(!outcome.interrupted);
    assert_eq!(outcome.results.len(), 6);
    let order: Vec<&str> = outcome.results.iter().map(|r| r.model.as_str()).collect();
    assert_eq!(order, vec!["m:2b", "m:2b", "m:9b", "m:9b", "m:10b", "m:10b"]);

    let first = &outcome.results[0];
    assert_eq!(first.response_text.as_deref(), Some("Hello world"));
    assert_eq!(first.tokens(), 20);
    assert!((first.tokens_per_second() - 20.0).abs() < 1e-9);
    let memory = first.memory.as_ref().expect("final memory sample");
    assert_eq!(memory.vram_percent, 100);

    assert_eq!(report.output_dir.as_deref(), Some(output.as_path()));
    let rows = read_csv(&output.join(CSV_FILE))?;
    assert_eq!(rows.len(), 6);
    assert!(output.join(SYSTEM_INFO_FILE).exists());
    assert_eq!(outcome.statistics.models.len(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn interrupt_keeps_recorded_trials_and_still_exports() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("partial");
    let session = BenchSession::new(BenchmarkConfig {
        repeat_runs: 3,
        ..config(&output)
    })?;

    let cancel = CancellationFlag::new();
    let mut observer = InterruptAfter {
        after: 2,
        cancel: cancel.clone(),
    };
    let report = session
        .run_with(
            Arc::new(FakeEndpoint::new(vec!["m:2b", "m:9b"])),
            Arc::new(FakeProbe::default()),
            &cancel,
            &mut observer,
        )
        .await?;

    assert!(report.outcome.interrupted);
    assert_eq!(report.outcome.results.len(), 2);
    assert_eq!(read_csv(&output.join(CSV_FILE))?.len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn malformed_stream_units_are_skipped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut endpoint = FakeEndpoint::new(vec!["m:2b"]);
    endpoint.body = format!("{{\"response\":\"Hi\"}}\nnot json at all\n{FINAL_UNIT}");

    let report = BenchSession::new(config(&dir.path().join("skip")))?
        .run_with(
            Arc::new(endpoint),
            Arc::new(FakeProbe::default()),
            &CancellationFlag::new(),
            &mut NullObserver,
        )
        .await?;

    let result = &report.outcome.results[0];
    assert!(!result.is_error(), "unexpected error: {:?}", result.error);
    assert_eq!(result.response_text.as_deref(), Some("Hi"));
    assert_eq!(result.tokens(), 20);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn an_empty_selection_exports_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("empty");
    let report = BenchSession::new(config(&output))?
        .run_with(
            Arc::new(FakeEndpoint::new(vec!["other:1b"])),
            Arc::new(FakeProbe::default()),
            &CancellationFlag::new(),
            &mut NullObserver,
        )
        .await?;

    assert!(report.outcome.results.is_empty());
    assert!(report.written.is_empty());
    assert!(report.output_dir.is_none());
    assert!(!output.exists());
    Ok(())
}
