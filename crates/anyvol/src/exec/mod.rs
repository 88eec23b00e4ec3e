//! External command execution.
//!
//! Mount helpers are always invoked with an argv vector and never through a
//! shell, so option values can not splice in additional commands.

mod cleanup;

pub use cleanup::{best_effort, remove_dir_if_present, remove_file_best_effort};

use std::process::Stdio;

use anyvol_common::{AnyvolError, AnyvolResult, TemplateError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::template::{self, Value};

/// Run synchronous filesystem or user-database work on the blocking pool.
///
/// # Errors
///
/// Returns the error of `work`, or [`AnyvolError::Internal`] if the task
/// panicked.
pub async fn blocking<T, F>(work: F) -> AnyvolResult<T>
where
    F: FnOnce() -> AnyvolResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AnyvolError::Internal {
            message: format!("blocking task failed: {e}"),
        })?
}

/// Runs a single external command to completion.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `command` (argv, program first), feeding `stdin` if given.
    ///
    /// Fails with [`AnyvolError::CommandFailed`] on a non-zero exit.
    async fn execute(&self, command: &[String], stdin: Option<&str>) -> AnyvolResult<()>;
}

/// Executor that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn execute(&self, command: &[String], stdin: Option<&str>) -> AnyvolResult<()> {
        let Some((program, args)) = command.split_first() else {
            return Err(AnyvolError::Internal {
                message: "attempted to execute an empty command".to_string(),
            });
        };

        tracing::debug!(?command, with_stdin = stdin.is_some(), "Executing command");

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .spawn()
            .map_err(|source| AnyvolError::CommandLaunch {
                command: command.to_vec(),
                source,
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            // A helper that exits without reading its input is judged by its
            // exit status alone.
            match pipe.write_all(input.as_bytes()).await {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                result => result?,
            }
            drop(pipe);
        }

        let status = child.wait().await?;
        tracing::debug!(?command, %status, "Command finished");

        if !status.success() {
            return Err(AnyvolError::CommandFailed {
                command: command.to_vec(),
                exit_code: status.code(),
            });
        }

        Ok(())
    }
}

/// A hook command as written in mount-type configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    /// A bare program name run without arguments.
    Program(String),
    /// One argv vector.
    Single(Vec<String>),
    /// Several argv vectors run in order.
    Sequence(Vec<Vec<String>>),
}

impl CommandSpec {
    /// Render every argument against `context`.
    pub fn render(&self, context: &Value) -> Result<Self, TemplateError> {
        let argv = |args: &[String]| -> Result<Vec<String>, TemplateError> {
            args.iter()
                .map(|arg| template::render_str(arg, context))
                .collect()
        };

        Ok(match self {
            Self::Program(program) => Self::Program(template::render_str(program, context)?),
            Self::Single(args) => Self::Single(argv(args)?),
            Self::Sequence(commands) => Self::Sequence(
                commands
                    .iter()
                    .map(|args| argv(args))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

/// Run an optional command spec.
///
/// A single command receives `stdin`; the entries of a sequence run without
/// input. Execution stops at the first failure. `None` and empty argv
/// vectors are no-ops.
pub async fn run(
    executor: &dyn CommandExecutor,
    spec: Option<&CommandSpec>,
    stdin: Option<&str>,
) -> AnyvolResult<()> {
    match spec {
        None => Ok(()),
        Some(CommandSpec::Program(program)) => {
            executor.execute(std::slice::from_ref(program), stdin).await
        }
        Some(CommandSpec::Single(args)) if args.is_empty() => Ok(()),
        Some(CommandSpec::Single(args)) => executor.execute(args, stdin).await,
        Some(CommandSpec::Sequence(commands)) => {
            for args in commands.iter().filter(|args| !args.is_empty()) {
                executor.execute(args, None).await?;
            }
            Ok(())
        }
    }
}
