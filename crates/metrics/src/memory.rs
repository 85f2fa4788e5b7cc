//! Resident-memory samples parsed from the endpoint's textual status report.
//!
//! The report has one header line followed by one row per loaded model, e.g.
//!
//! ```text
//! NAME        ID              SIZE      PROCESSOR          CONTEXT    UNTIL
//! qwen3:8b    500a1f067a9f    6.5 GB    3%/97% CPU/GPU     4096       4 minutes from now
//! ```
//!
//! Parsing is forgiving: any field that cannot be read stays at
//! its zero value and no input ever produces an error.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub ram_percent: u32,
    pub vram_percent: u32,
    pub size_gb: f64,
    pub processor: String,
    pub context_length: u32,
    /// Set when the sample was taken while a trial was in flight.
    pub active: bool,
}

impl MemorySample {
    /// Parse one whitespace-tokenized status row.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        let tokens: Vec<&str> = tokens.iter().map(AsRef::as_ref).collect();
        let mut sample = Self::default();
        let mut processor_end = None;

        for (index, token) in tokens.iter().enumerate().skip(1) {
            match *token {
                "GB" => {
                    if let Ok(size) = tokens[index - 1].parse::<f64>() {
                        sample.size_gb = size;
                    }
                }
                "MB" => {
                    if let Ok(size) = tokens[index - 1].parse::<f64>() {
                        sample.size_gb = size / 1024.0;
                    }
                }
                _ => {}
            }

            if !token.contains('%') || processor_end.is_some() {
                continue;
            }

            let label = tokens.get(index + 1).copied();
            if let Some((ram, vram)) = token.split_once('/') {
                if let (Some(ram), Some(vram)) = (parse_percent(ram), parse_percent(vram)) {
                    sample.ram_percent = ram;
                    sample.vram_percent = vram;
                    processor_end = Some(match label {
                        Some("CPU/GPU") => index + 1,
                        _ => index,
                    });
                }
            } else if let (Some(percent), Some(label)) = (parse_percent(token), label) {
                match label {
                    "GPU" => {
                        sample.vram_percent = percent;
                        sample.ram_percent = 100u32.saturating_sub(percent);
                        processor_end = Some(index + 1);
                    }
                    "CPU" => {
                        sample.ram_percent = percent;
                        sample.vram_percent = 100u32.saturating_sub(percent);
                        processor_end = Some(index + 1);
                    }
                    _ => {}
                }
            }
        }

        // CONTEXT is the field right after PROCESSOR; without a processor
        // field fall back to the second-to-last token. A numeral followed by
        // a time unit is the start of UNTIL, not a context length.
        let context = match processor_end {
            Some(end) => tokens
                .get(end + 1)
                .filter(|t| is_numeral(t))
                .filter(|_| !tokens.get(end + 2).map_or(false, |next| is_time_unit(next))),
            None => tokens
                .len()
                .checked_sub(2)
                .filter(|index| *index > 0)
                .map(|index| &tokens[index])
                .filter(|t| is_numeral(t)),
        };
        if let Some(context) = context {
            sample.context_length = context.parse().unwrap_or(0);
        }

        sample.processor = processor_label(sample.ram_percent, sample.vram_percent);
        sample
    }

    /// Parse a raw status row.
    pub fn parse_line(line: &str) -> Self {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        Self::from_tokens(&tokens)
    }

    pub fn mark_active(mut self) -> Self {
        self.active = true;
        self
    }

    /// RAM/VRAM split such as `35%/65%`, or `n/a` when neither side was read.
    pub fn split_label(&self) -> String {
        if self.ram_percent > 0 || self.vram_percent > 0 {
            format!("{}%/{}%", self.ram_percent, self.vram_percent)
        } else {
            "n/a".to_string()
        }
    }

    pub fn size_label(&self) -> String {
        if self.size_gb >= 10.0 {
            format!("{:.0}", self.size_gb)
        } else if self.size_gb > 0.0 {
            format!("{:.1}", self.size_gb)
        } else {
            "n/a".to_string()
        }
    }
}

/// Find the row for `model` in a full status report and parse it.
///
/// The first line is a header and is never matched.
pub fn parse_status_report(report: &str, model: &str) -> Option<MemorySample> {
    report
        .lines()
        .skip(1)
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .find(|tokens| tokens.first() == Some(&model))
        .map(|tokens| MemorySample::from_tokens(&tokens))
}

/// Names of every model listed in a status report.
pub fn resident_models(report: &str) -> Vec<String> {
    report
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

fn parse_percent(token: &str) -> Option<u32> {
    token.trim().strip_suffix('%')?.parse().ok()
}

fn is_time_unit(token: &str) -> bool {
    matches!(
        token.to_ascii_lowercase().trim_end_matches('s'),
        "second" | "minute" | "hour" | "day" | "week"
    )
}

fn is_numeral(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn processor_label(ram_percent: u32, vram_percent: u32) -> String {
    match (ram_percent, vram_percent) {
        (ram, vram) if ram > 0 && vram > 0 => format!("{ram}%/{vram}% CPU/GPU"),
        (_, vram) if vram > 0 => format!("{vram}% GPU"),
        (ram, _) if ram > 0 => format!("{ram}% CPU"),
        _ => "CPU".to_string(),
    }
}
