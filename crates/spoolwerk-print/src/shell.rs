// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded subprocess execution.
//
// Every OS interaction in Spoolwerk (print cmdlets, port copies, spooler
// service control) is a child process. They all go through `CommandRunner`,
// which enforces a per-command deadline and kills the child when it expires.
// Nothing is ever left running in the background.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use spoolwerk_core::error::{Result, SpoolwerkError};

use crate::script::PowerShellScript;

/// Windows `CREATE_NO_WINDOW`: keep console windows from flashing up at the till.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// A fully specified child process invocation.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    /// Short name for logs and timeout errors.
    label: String,
    /// PowerShell source, kept in clear text for logging and inspection.
    script: Option<String>,
    /// Arguments are already quoted for the target and must be passed as-is.
    verbatim: bool,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>, label: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
            label: label.into(),
            script: None,
            verbatim: false,
        }
    }

    /// Pass the arguments to the child without any further quoting.
    ///
    /// Needed for `cmd.exe`, whose parser does not follow the quoting rules
    /// std applies; arguments must then be pre-quoted with
    /// [`cmd_quote`](crate::script::cmd_quote) where they carry data.
    pub fn verbatim(mut self) -> Self {
        self.verbatim = true;
        self
    }

    /// Run a PowerShell script via `-EncodedCommand`.
    ///
    /// The script never touches command-line quoting: it travels as base64
    /// UTF-16LE, which is what `-EncodedCommand` expects.
    pub fn powershell(
        program: impl Into<String>,
        label: impl Into<String>,
        script: &PowerShellScript,
        timeout: Duration,
    ) -> Self {
        let source = script.build();
        let mut command = Self::new(program, label, timeout).args([
            "-NoProfile",
            "-NonInteractive",
            "-ExecutionPolicy",
            "Bypass",
            "-EncodedCommand",
        ]);
        command.args.push(crate::script::encode_command(&source));
        command.script = Some(source);
        command
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    pub fn is_verbatim(&self) -> bool {
        self.verbatim
    }
}

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Whether stdout carries `sentinel` on a line of its own.
    pub fn has_sentinel(&self, sentinel: &str) -> bool {
        self.stdout.lines().any(|line| line.trim() == sentinel)
    }

    /// Combined, trimmed output for error details.
    pub fn detail(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        let text = match (stderr.is_empty(), stdout.is_empty()) {
            (false, _) => stderr,
            (true, false) => stdout,
            (true, true) => "no output",
        };
        match self.status {
            Some(code) => format!("exit code {code}: {}", truncate(text, 400)),
            None => format!("terminated: {}", truncate(text, 400)),
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// The seam for OS process invocation.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion or until its timeout expires.
    ///
    /// Returns `SpoolwerkError::Timeout` when the deadline passes; the child
    /// is terminated before this returns.
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    #[instrument(skip(self, command), fields(label = command.label(), program = command.program()))]
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput> {
        let mut cmd = tokio::process::Command::new(&command.program);
        push_args(&mut cmd, command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let started = Instant::now();
        let child = cmd.spawn()?;

        // Dropping the wait future on timeout drops the child, and
        // `kill_on_drop` terminates it.
        match tokio::time::timeout(command.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                debug!(
                    status = ?result.status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "process finished"
                );
                Ok(result)
            }
            Ok(Err(e)) => Err(SpoolwerkError::Io(e)),
            Err(_) => {
                warn!(
                    timeout_secs = command.timeout.as_secs(),
                    "process exceeded its deadline, killed"
                );
                Err(SpoolwerkError::Timeout {
                    operation: command.label.clone(),
                    secs: command.timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(windows)]
fn push_args(cmd: &mut tokio::process::Command, command: &ShellCommand) {
    if command.verbatim {
        for arg in &command.args {
            cmd.raw_arg(arg);
        }
    } else {
        cmd.args(&command.args);
    }
}

#[cfg(not(windows))]
fn push_args(cmd: &mut tokio::process::Command, command: &ShellCommand) {
    cmd.args(&command.args);
}
