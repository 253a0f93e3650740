//! Child process execution.

use std::process::Stdio;
use std::time::Instant;

use atlas_fusion_core::ToolRun;
use tokio::process::Command;
use tracing::debug;

use crate::command::CommandSpec;

/// Runs collaborator processes and captures their exit record.
pub struct CommandRunner;

impl CommandRunner {
    /// Execute one command and wait for it to exit.
    ///
    /// A non-zero exit is returned as a failing [`ToolRun`]; only a spawn
    /// failure or a timeout is an error.
    pub async fn execute(spec: &CommandSpec) -> anyhow::Result<ToolRun> {
        let start = Instant::now();
        debug!(tool = %spec.collaborator, command = %spec.display(), "spawning");

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("cannot spawn {}: {}", spec.program.display(), e))?;

        let output = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "{} timed out after {} seconds",
                    spec.collaborator,
                    spec.timeout_secs
                )
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        Ok(ToolRun {
            tool: spec.collaborator.name().to_string(),
            exit_code,
            success: output.status.success(),
            stdout,
            stderr,
            duration_ms,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::Collaborator;

    #[tokio::test]
    async fn test_execute_simple_command() {
        let spec = CommandSpec::new(
            Collaborator::VolumeMeasurer,
            "echo",
            vec!["1234".to_string()],
        );

        let run = CommandRunner::execute(&spec).await.expect("execute failed");
        assert!(run.passed());
        assert_eq!(run.exit_code, 0);
        assert_eq!(run.tool, "volume_measurer");
        assert!(run.stdout.contains("1234"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let spec = CommandSpec::new(Collaborator::Relabeler, "false", vec![]);

        let run = CommandRunner::execute(&spec).await.expect("execute failed");
        assert!(!run.passed());
        assert_ne!(run.exit_code, 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let spec = CommandSpec::new(
            Collaborator::Registrator,
            "/nonexistent/antsRegistrationSyN.sh",
            vec![],
        );
        assert!(CommandRunner::execute(&spec).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout() {
        let spec = CommandSpec::new(Collaborator::LabelFusion, "sleep", vec!["5".to_string()])
            .with_timeout(1);
        let err = CommandRunner::execute(&spec).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
