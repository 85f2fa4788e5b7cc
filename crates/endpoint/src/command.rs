//! The endpoint's command-line tool, used for the textual status report and
//! for unloading models.

use crate::client::EndpointAddress;
use crate::error::EndpointError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OllamaCli {
    binary: String,
    host: String,
    timeout: Duration,
}

impl OllamaCli {
    pub fn new(binary: impl Into<String>, address: &EndpointAddress) -> Self {
        Self {
            binary: binary.into(),
            host: address.host_port(),
            timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Raw `ps` report: a header line, then one row per resident model.
    pub async fn ps(&self) -> Result<String, EndpointError> {
        self.run(&["ps"]).await
    }

    pub async fn stop(&self, model: &str) -> Result<(), EndpointError> {
        self.run(&["stop", model]).await.map(|_| ())
    }

    async fn run(&self, args: &[&str]) -> Result<String, EndpointError> {
        let command_line = format!("{} {}", self.binary, args.join(" "));
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .env("OLLAMA_HOST", &self.host)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| EndpointError::Command {
                command: command_line.clone(),
                reason: format!("timed out after {:?}", self.timeout),
            })?
            .map_err(|e| EndpointError::Command {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(command = %command_line, status = %output.status, "command exited unsuccessfully");
            return Err(EndpointError::Command {
                command: command_line,
                reason: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
