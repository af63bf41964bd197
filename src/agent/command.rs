//! Agents backed by an external command.
//!
//! The command runs under `sh -c`, receives the [`AgentContext`] as JSON on
//! stdin, and must print an [`AgentOutput`] JSON object on stdout. A
//! non-zero exit status is an execution failure. The process is killed if
//! the executor's timeout drops the future.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Agent, AgentContext, AgentError, AgentOutput, AgentSpec};

pub struct CommandAgent {
    spec: AgentSpec,
    command: String,
    working_dir: PathBuf,
    env: BTreeMap<String, String>,
}

impl CommandAgent {
    pub fn new(spec: AgentSpec, command: &str, working_dir: impl AsRef<Path>) -> Self {
        Self {
            spec,
            command: command.to_string(),
            working_dir: working_dir.as_ref().to_path_buf(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Agent for CommandAgent {
    fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    async fn run(&self, ctx: &AgentContext) -> Result<AgentOutput, AgentError> {
        let input = serde_json::to_string(ctx)
            .map_err(|e| AgentError::execution(format!("failed to serialize context: {}", e)))?;

        debug!(agent = %self.spec.name, command = %self.command, "Spawning agent command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("DEAL_ENGINE_AGENT", &self.spec.name)
            .env("DEAL_ENGINE_PHASE", self.spec.phase.as_str())
            .env("DEAL_ENGINE_SUBJECT", &ctx.subject.id)
            .envs(&self.env)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::execution(format!("failed to spawn '{}': {}", self.command, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that ignores stdin may close it early.
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!(agent = %self.spec.name, error = %e, "Agent closed stdin early");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AgentError::execution(format!("failed to wait for command: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(AgentError::execution(format!(
                "exit code {}: {}",
                code, detail
            )));
        }

        serde_json::from_str::<AgentOutput>(stdout.trim())
            .map_err(|e| AgentError::invalid_output(format!("stdout is not agent JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentErrorKind;
    use crate::lifecycle::AnalysisPhase;
    use crate::session::{RunMode, Subject};
    use serde_json::{Value, json};
    use tempfile::tempdir;

    fn ctx() -> AgentContext {
        AgentContext {
            subject: Subject::new("deal-42", "Acme"),
            mode: RunMode::Full,
            phase: AnalysisPhase::Extraction,
            results: BTreeMap::new(),
            facts: Vec::new(),
            enrichment: Value::Null,
        }
    }

    fn agent(command: &str, dir: &Path) -> CommandAgent {
        CommandAgent::new(
            AgentSpec::new("extractor", AnalysisPhase::Extraction),
            command,
            dir,
        )
    }

    #[tokio::test]
    async fn test_parses_json_output() {
        let dir = tempdir().unwrap();
        let a = agent(
            r#"cat > /dev/null; echo '{"data": {"arr": 500000}, "cost": 0.5, "facts": [{"fact_key": "financial.arr", "value": 500000, "source": "document_derived"}]}'"#,
            dir.path(),
        );
        let out = a.run(&ctx()).await.unwrap();
        assert_eq!(out.data, json!({"arr": 500000}));
        assert_eq!(out.cost, 0.5);
        assert_eq!(out.facts[0].fact_key, "financial.arr");
    }

    #[tokio::test]
    async fn test_receives_context_on_stdin() {
        let dir = tempdir().unwrap();
        let a = agent(
            r#"grep -q deal-42 && echo '{"data": "seen"}'"#,
            dir.path(),
        );
        let out = a.run(&ctx()).await.unwrap();
        assert_eq!(out.data, json!("seen"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_execution_error() {
        let dir = tempdir().unwrap();
        let a = agent("echo 'no api key' >&2; exit 3", dir.path());
        let err = a.run(&ctx()).await.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::Execution);
        assert!(err.message.contains("exit code 3"));
        assert!(err.message.contains("no api key"));
    }

    #[tokio::test]
    async fn test_garbage_stdout_is_invalid_output() {
        let dir = tempdir().unwrap();
        let a = agent("echo 'not json'", dir.path());
        let err = a.run(&ctx()).await.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::InvalidOutput);
    }

    #[tokio::test]
    async fn test_agent_env_is_set() {
        let dir = tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("MODEL".to_string(), "small".to_string());
        let a = agent(
            r#"cat > /dev/null; printf '{"data": "%s/%s"}' "$DEAL_ENGINE_AGENT" "$MODEL""#,
            dir.path(),
        )
        .with_env(env);
        let out = a.run(&ctx()).await.unwrap();
        assert_eq!(out.data, json!("extractor/small"));
    }
}
