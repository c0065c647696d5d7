// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! External command execution.
//!
//! Every utility (ping, arp, virsh, systemctl) is started through
//! [`CommandRunner`] with an argument vector. Nothing goes through a shell.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::debug;
use tokio::process::Command;

use crate::error::{Error, Result};

/// A single command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Capture stdout/stderr instead of discarding them.
    pub capture: bool,
    /// Kill the child if it runs longer than this.
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            capture: false,
            timeout: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub const fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Outcome of a finished (or abandoned) command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// Exit code; `None` if killed by a signal or abandoned on timeout.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl Output {
    #[must_use]
    pub fn exit(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_stdout(code: i32, stdout: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Runs external commands.
pub trait CommandRunner: Send + Sync + 'static {
    /// Run a command to completion or until its timeout expires.
    ///
    /// A non-zero exit is not an error; only failing to start the command is.
    fn run(&self, invocation: Invocation) -> impl Future<Output = io::Result<Output>> + Send;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: Invocation) -> impl Future<Output = io::Result<Output>> + Send {
        async move {
            let mut command = Command::new(&invocation.program);
            command
                .args(&invocation.args)
                .stdin(Stdio::null())
                .kill_on_drop(true);

            if invocation.capture {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            } else {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }

            let child = command.spawn()?;
            let wait = child.wait_with_output();

            // Dropping `wait` on timeout drops the child, which kills it.
            let output = match invocation.timeout {
                Some(limit) => match tokio::time::timeout(limit, wait).await {
                    Ok(result) => result?,
                    Err(_) => {
                        debug!("Abandoned after {}ms: {invocation}", limit.as_millis());
                        return Ok(Output {
                            timed_out: true,
                            ..Output::default()
                        });
                    }
                },
                None => wait.await?,
            };

            Ok(Output {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            })
        }
    }
}

/// Run a command and return its stdout, treating a non-zero exit as an error.
pub async fn checked_output<R: CommandRunner>(runner: &R, invocation: Invocation) -> Result<String> {
    let program = invocation.program.clone();
    let output = runner
        .run(invocation.capture())
        .await
        .map_err(|e| Error::Command {
            program: program.clone(),
            message: e.to_string(),
        })?;

    if output.success() {
        Ok(output.stdout)
    } else {
        let detail = output.stderr.trim();
        Err(Error::Command {
            program,
            message: match output.code {
                Some(code) if detail.is_empty() => format!("exit code {code}"),
                Some(code) => format!("exit code {code}: {detail}"),
                None => "terminated without exit code".to_string(),
            },
        })
    }
}
