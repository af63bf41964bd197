//! Per-run enrichment inputs.
//!
//! Enrichment is anything computed freshly each run and never persisted
//! (external lookups, market context). It is recomputed before a resumed
//! run continues.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::session::Subject;

#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn enrich(&self, subject: &Subject) -> Result<Value>;
}

/// Supplies no enrichment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEnrichment;

#[async_trait]
impl EnrichmentProvider for NoEnrichment {
    async fn enrich(&self, _subject: &Subject) -> Result<Value> {
        Ok(Value::Null)
    }
}

/// Runs a command with the subject JSON on stdin and parses stdout as JSON.
#[derive(Debug, Clone)]
pub struct CommandEnrichment {
    command: String,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CommandEnrichment {
    pub fn new(command: &str, working_dir: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            command: command.to_string(),
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl EnrichmentProvider for CommandEnrichment {
    async fn enrich(&self, subject: &Subject) -> Result<Value> {
        let input = serde_json::to_string(subject).context("Failed to serialize subject")?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn enrichment command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .context("Failed to write subject to enrichment stdin")?;
        }

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| {
                format!(
                    "Enrichment command timed out after {}s",
                    self.timeout.as_secs()
                )
            })?
            .context("Failed to wait for enrichment command")?;

        if !output.status.success() {
            anyhow::bail!(
                "Enrichment command failed with exit code {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout.trim()).context("Enrichment output is not valid JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_no_enrichment_is_null() {
        let value = NoEnrichment.enrich(&Subject::new("d", "D")).await.unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn test_command_enrichment_parses_stdout() {
        let dir = tempdir().unwrap();
        let provider = CommandEnrichment::new(
            r#"cat > /dev/null; echo '{"sector_multiple": 6.5}'"#,
            dir.path(),
            5,
        );
        let value = provider.enrich(&Subject::new("d", "D")).await.unwrap();
        assert_eq!(value, json!({"sector_multiple": 6.5}));
    }

    #[tokio::test]
    async fn test_command_enrichment_timeout() {
        let dir = tempdir().unwrap();
        let provider = CommandEnrichment::new("sleep 5", dir.path(), 0);
        let err = provider.enrich(&Subject::new("d", "D")).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
