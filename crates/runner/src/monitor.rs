//! Background sampling of a model's memory placement while a trial runs.

use llmbench_endpoint::ResidencyProbe;
use llmbench_metrics::{parse_status_report, MemorySample};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Read the resident-model report once and return the row for `model`.
/// Every failure yields `None`.
pub async fn sample_resident<P: ResidencyProbe>(probe: &P, model: &str) -> Option<MemorySample> {
    match probe.resident_status().await {
        Ok(report) => parse_status_report(&report, model),
        Err(err) => {
            debug!(model, error = %err, "memory sample failed");
            None
        }
    }
}

/// One sampler task per in-flight trial. The task is the only writer of the
/// sample slot; readers subscribe to it.
pub struct MemoryMonitor {
    slot: watch::Receiver<Option<MemorySample>>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MemoryMonitor {
    pub fn start<P>(probe: Arc<P>, model: impl Into<String>, interval: Duration) -> Self
    where
        P: ResidencyProbe + 'static,
    {
        let model = model.into();
        let (slot_tx, slot) = watch::channel(None);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    sample = sample_resident(probe.as_ref(), &model) => {
                        if let Some(sample) = sample {
                            slot_tx.send_replace(Some(sample.mark_active()));
                        }
                    }
                }
            }
            debug!(model = %model, "memory sampler stopped");
        });

        Self {
            slot,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<MemorySample>> {
        self.slot.clone()
    }

    pub fn latest(&self) -> Option<MemorySample> {
        self.slot.borrow().clone()
    }

    /// Signal the sampler and wait up to `join` for it to exit; a sampler
    /// that does not exit in time is aborted. Returns whether it exited on
    /// its own.
    pub async fn stop(&mut self, join: Duration) -> bool {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let Some(mut handle) = self.handle.take() else {
            return true;
        };
        match tokio::time::timeout(join, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(timeout = ?join, "memory sampler did not stop in time; aborting");
                handle.abort();
                false
            }
        }
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmbench_endpoint::EndpointError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REPORT: &str = "NAME ID SIZE PROCESSOR CONTEXT UNTIL\nm:1b abc 2.0 GB 25%/75% CPU/GPU 4096 Forever\n";

    #[derive(Default)]
    struct CountingProbe {
        calls: AtomicUsize,
        hang: bool,
    }

    impl ResidencyProbe for CountingProbe {
        async fn resident_status(&self) -> Result<String, EndpointError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(REPORT.to_string())
        }

        async fn unload(&self, _model: &str) -> Result<(), EndpointError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn samples_on_every_interval_until_stopped() {
        let probe = Arc::new(CountingProbe::default());
        let mut monitor = MemoryMonitor::start(probe.clone(), "m:1b", Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);

        let sample = monitor.latest().expect("sampled");
        assert!(sample.active);
        assert_eq!(sample.vram_percent, 75);
        assert_eq!(sample.context_length, 4096);

        assert!(monitor.stop(Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_probe_does_not_block_stop() {
        let probe = Arc::new(CountingProbe {
            hang: true,
            ..CountingProbe::default()
        });
        let mut monitor = MemoryMonitor::start(probe, "m:1b", Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = tokio::time::Instant::now();
        assert!(monitor.stop(Duration::from_secs(1)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(monitor.latest().is_none());
    }

    #[tokio::test]
    async fn missing_row_is_not_an_error() {
        let probe = CountingProbe::default();
        assert!(sample_resident(&probe, "other:1b").await.is_none());
        assert!(sample_resident(&probe, "m:1b").await.is_some());
    }
}
