//! Bounded subprocess execution.

use crate::config::runtime::CommandSettings;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("failed to collect output of {program}: {source}")]
    Output {
        program: String,
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run the configured command with `extra_args` appended.
///
/// The child is killed if it outlives the timeout.
pub async fn run_command(
    settings: &CommandSettings,
    extra_args: &[&str],
) -> Result<CommandOutput, CommandError> {
    let child = Command::new(&settings.program)
        .args(&settings.args)
        .args(extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: settings.program.clone(),
            source,
        })?;

    let output = tokio::time::timeout(settings.timeout, child.wait_with_output())
        .await
        .map_err(|_| CommandError::TimedOut {
            program: settings.program.clone(),
            timeout: settings.timeout,
        })?
        .map_err(|source| CommandError::Output {
            program: settings.program.clone(),
            source,
        })?;

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> CommandSettings {
        CommandSettings {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "sh".into()],
            timeout,
        }
    }

    #[tokio::test]
    async fn test_extra_args_are_appended() {
        let output = run_command(&sh("echo \"$1\"", Duration::from_secs(5)), &["AWP | Dragon Lore"])
            .await
            .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout.trim(), "AWP | Dragon Lore");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let result = run_command(&sh("sleep 5", Duration::from_millis(50)), &[]).await;
        assert!(matches!(result, Err(CommandError::TimedOut { .. })));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let settings = CommandSettings {
            program: "/nonexistent/skinvault-quote".into(),
            args: vec![],
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            run_command(&settings, &[]).await,
            Err(CommandError::Spawn { .. })
        ));
    }
}
