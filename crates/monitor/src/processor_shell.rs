//! Processor that hands each change to an external command.
//!
//! The command runs through `sh -c` with a JSON payload on stdin:
//!
//! ```json
//! {"event": "create", "path": "/watched/a.txt", "externalId": null}
//! ```
//!
//! - Exit 0 → success. On create, trimmed stdout (when non-empty) becomes the
//!   external id.
//! - Any other exit code → failure, stderr is used as the error message.

use std::{path::Path, process::Stdio, time::Duration};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    serde::Serialize,
    tokio::{io::AsyncWriteExt, process::Command},
    tracing::debug,
};

use crate::processor::Processor;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
enum ShellEvent {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShellPayload<'a> {
    event: ShellEvent,
    path: String,
    external_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ShellProcessorConfig {
    pub command: String,
    /// Upper bound for a single invocation. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

/// A processor that executes an external shell command per change.
pub struct ShellProcessor {
    command: String,
    timeout: Option<Duration>,
}

impl ShellProcessor {
    pub const ID: &'static str = "Shell";

    pub fn new(command: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn from_config(config: ShellProcessorConfig) -> Self {
        Self::new(config.command, config.timeout)
    }

    /// Run the command for one event and return its trimmed stdout.
    async fn invoke(
        &self,
        event: ShellEvent,
        path: &Path,
        external_id: Option<&str>,
    ) -> Result<String> {
        let payload = serde_json::to_string(&ShellPayload {
            event,
            path: path.to_string_lossy().into_owned(),
            external_id,
        })
        .context("failed to serialize processor payload")?;

        debug!(command = %self.command, event = ?event, path = %path.display(), "spawning shell processor");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn processor command: {}", self.command))?;

        // Ignore broken pipe if the command doesn't read stdin.
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(payload.as_bytes()).await
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .with_context(|| format!("processor command timed out after {timeout:?}"))?,
            None => child.wait_with_output().await,
        }
        .context("processor command failed to complete")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "processor command exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Processor for ShellProcessor {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn process_create(&self, path: &Path) -> Result<Option<String>> {
        let stdout = self.invoke(ShellEvent::Create, path, None).await?;
        Ok((!stdout.is_empty()).then_some(stdout))
    }

    async fn process_update(&self, path: &Path, external_id: Option<&str>) -> Result<()> {
        self.invoke(ShellEvent::Update, path, external_id).await?;
        Ok(())
    }

    async fn process_delete(&self, path: &Path, external_id: Option<&str>) -> Result<()> {
        self.invoke(ShellEvent::Delete, path, external_id).await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_returns_stdout_as_id() {
        let processor = ShellProcessor::new("cat >/dev/null; echo upstream-42", None);
        let id = processor
            .process_create(Path::new("/data/a.txt"))
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("upstream-42"));
    }

    #[tokio::test]
    async fn create_without_output_has_no_id() {
        let processor = ShellProcessor::new("exit 0", None);
        let id = processor
            .process_create(Path::new("/data/a.txt"))
            .await
            .unwrap();
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let processor = ShellProcessor::new("echo 'upload rejected' >&2; exit 3", None);
        let err = processor
            .process_update(Path::new("/data/a.txt"), Some("id"))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("code 3"), "{message}");
        assert!(message.contains("upload rejected"), "{message}");
    }

    #[tokio::test]
    async fn payload_is_written_to_stdin() {
        // Succeeds only when stdin names the delete event and the expected id.
        let processor = ShellProcessor::new(
            r#"INPUT=$(cat); case "$INPUT" in *'"event":"delete"'*'"externalId":"abc"'*) exit 0;; *) exit 1;; esac"#,
            None,
        );
        processor
            .process_delete(Path::new("/data/a.txt"), Some("abc"))
            .await
            .unwrap();
        assert!(
            processor
                .process_delete(Path::new("/data/a.txt"), Some("other"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn timeout_is_enforced() {
        let processor = ShellProcessor::new("sleep 5", Some(Duration::from_millis(100)));
        let err = processor
            .process_create(Path::new("/data/a.txt"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
