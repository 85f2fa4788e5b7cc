//! Plain-text rendering for terminal output.

use crate::observer::{ExecutorState, RunObserver, RunPhase, RunSnapshot};
use llmbench_metrics::{Metric, RunStatistics, TrialResult};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::OnceLock;
use tracing::info;

const PREVIEW_CHARS: usize = 240;

/// Replace each `<think>...</think>` block with a short marker carrying its
/// length in characters.
pub fn collapse_think_tags(text: &str) -> String {
    static THINK: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = THINK.get_or_init(|| Regex::new(r"(?is)<think>(.*?)</think>").ok()) else {
        return text.to_string();
    };
    pattern
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let chars = caps.get(1).map_or(0, |m| m.as_str().chars().count());
            format!("<think> ({chars} chars) ... </think>")
        })
        .into_owned()
}

fn preview(text: &str) -> String {
    let collapsed = collapse_think_tags(text);
    let flat = collapsed.split_whitespace().collect::<Vec<_>>().join(" ");
    let count = flat.chars().count();
    if count <= PREVIEW_CHARS {
        flat
    } else {
        let tail: String = flat.chars().skip(count - PREVIEW_CHARS).collect();
        format!("...{tail}")
    }
}

pub fn render_results_table(results: &[TrialResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:>7} {:>9} {:>7} {:>9} {:>6} {:>8} {:>8} {:>7} {:>6} {:>9}",
        "Model", "Disk GB", "Preloaded", "Context", "RAM/VRAM", "MEM GB", "Load (s)", "Eval (s)", "Tok/s", "Ch/Tok", "Total (s)"
    );
    for result in results {
        let disk = result
            .descriptor
            .as_ref()
            .map_or_else(|| "n/a".to_string(), |d| d.disk_label());
        let context = if result.context_length > 0 {
            result.context_length.to_string()
        } else {
            "n/a".to_string()
        };
        let (split, size) = match (&result.memory, result.is_error()) {
            (Some(memory), false) => (memory.split_label(), memory.size_label()),
            _ => ("n/a".to_string(), "n/a".to_string()),
        };
        let preloaded = if result.preloaded { "YES" } else { "NO" };

        if result.is_error() {
            let _ = writeln!(
                out,
                "{:<24} {:>7} {:>9} {:>7} {:>9} {:>6} {:>8} {:>8} {:>7} {:>6} {:>9}",
                result.model, disk, preloaded, context, split, size, "ERROR", "ERROR", "ERROR", "ERROR", "ERROR"
            );
            continue;
        }
        let chars_per_token = match result.chars_per_token() {
            cpt if cpt > 0.0 => format!("{cpt:.2}"),
            _ => "n/a".to_string(),
        };
        let _ = writeln!(
            out,
            "{:<24} {:>7} {:>9} {:>7} {:>9} {:>6} {:>8.3} {:>8.3} {:>7.1} {:>6} {:>9.3}",
            result.model,
            disk,
            preloaded,
            context,
            split,
            size,
            result.load_seconds(),
            result.eval_seconds(),
            result.tokens_per_second(),
            chars_per_token,
            result.total_seconds()
        );
    }
    out
}

pub fn render_statistics(statistics: &RunStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:<18} {:>9} {:>9} {:>9} {:>9}",
        "Model", "Metric", "Mean", "Std Dev", "Min", "Max"
    );
    for model in &statistics.models {
        for (index, metric) in Metric::ALL.iter().enumerate() {
            let Some(summary) = model.summary(*metric) else {
                continue;
            };
            let stdev = summary
                .stdev
                .map_or_else(|| "n/a".to_string(), |s| format!("{s:.2}"));
            let _ = writeln!(
                out,
                "{:<24} {:<18} {:>9.2} {:>9} {:>9.2} {:>9.2}",
                if index == 0 { model.model.as_str() } else { "" },
                metric.name(),
                summary.mean,
                stdev,
                summary.min,
                summary.max
            );
        }
    }
    out
}

/// Line-oriented progress output: one line per dispatched trial, one per
/// recorded result with a short response preview.
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    show_responses: bool,
    printed_stream_start: bool,
}

impl ConsoleObserver {
    pub fn new(show_responses: bool) -> Self {
        Self {
            show_responses,
            printed_stream_start: false,
        }
    }
}

impl RunObserver for ConsoleObserver {
    fn on_snapshot(&mut self, snapshot: &RunSnapshot<'_>) {
        match snapshot.phase {
            RunPhase::DispatchTrial => {
                self.printed_stream_start = false;
                let model = snapshot.current_model.unwrap_or("?");
                let run = if snapshot.repeats > 1 {
                    format!(" run {}/{}", snapshot.repeat, snapshot.repeats)
                } else {
                    String::new()
                };
                println!("[{}/{}] testing {model}{run}", snapshot.completed + 1, snapshot.total);
            }
            RunPhase::AwaitCompletion => {
                if snapshot.trial_state == ExecutorState::Streaming && !self.printed_stream_start {
                    self.printed_stream_start = true;
                    let memory = snapshot
                        .in_flight
                        .and_then(|partial| partial.memory())
                        .map(|m| format!(" ({} in memory, {})", m.size_label(), m.processor))
                        .unwrap_or_default();
                    println!("      streaming{memory}");
                }
            }
            RunPhase::Record => {
                let Some(result) = snapshot.results.last() else {
                    return;
                };
                match &result.error {
                    Some(error) => println!("      failed: {error}"),
                    None => println!(
                        "      {:.1} tok/s, {} tokens, {:.3}s total, memory {}",
                        result.tokens_per_second(),
                        result.tokens(),
                        result.total_seconds(),
                        result
                            .memory
                            .as_ref()
                            .map_or_else(|| "n/a".to_string(), |m| m.split_label())
                    ),
                }
                if self.show_responses {
                    if let Some(text) = result.response_text.as_deref() {
                        println!("      > {}", preview(text));
                    }
                }
            }
            RunPhase::Finished => {
                info!(completed = snapshot.completed, total = snapshot.total, "run finished");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmbench_metrics::TrialMetrics;

    #[test]
    fn think_blocks_are_collapsed_case_insensitively() {
        let text = "<THINK>step one\nstep two</think>Answer: 42";
        assert_eq!(
            collapse_think_tags(text),
            "<think> (17 chars) ... </think>Answer: 42"
        );
        assert_eq!(collapse_think_tags("plain"), "plain");
    }

    #[test]
    fn preview_keeps_the_tail() {
        let long = "word ".repeat(100);
        let shown = preview(&long);
        assert!(shown.starts_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
    }

    #[test]
    fn tables_render_errors_and_statistics() {
        let metrics = TrialMetrics {
            tokens: 30,
            eval_duration_ns: 1_000_000_000,
            total_duration_ns: 2_000_000_000,
            ..TrialMetrics::default()
        };
        let results = vec![
            TrialResult::completed("a:1b", true, metrics, 4096, "hi"),
            TrialResult::completed("a:1b", false, metrics, 4096, "hi"),
            TrialResult::failed("b:1b", false, "boom", 4096),
        ];
        let table = render_results_table(&results);
        assert_eq!(table.lines().count(), 4);
        assert!(table.contains("30.0"));
        assert!(table.lines().last().unwrap().contains("ERROR"));

        let stats = render_statistics(&RunStatistics::from_results(&results));
        assert_eq!(stats.lines().count(), 4);
        assert!(stats.contains("tokens_per_second"));
        assert!(!stats.contains("b:1b"));
    }
}
