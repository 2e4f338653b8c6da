// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Test doubles shared by the unit tests in this crate.

use std::sync::Mutex;

use async_trait::async_trait;

use spoolwerk_core::error::{Result, SpoolwerkError};

use crate::shell::{CommandOutput, CommandRunner, ShellCommand};

type Responder = dyn Fn(&ShellCommand) -> Result<CommandOutput> + Send + Sync;

/// Records every command and answers from a closure.
pub struct ScriptedRunner {
    calls: Mutex<Vec<ShellCommand>>,
    responder: Box<Responder>,
}

impl ScriptedRunner {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ShellCommand) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    pub fn calls(&self) -> Vec<ShellCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Scripts of every recorded PowerShell call, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.script().map(str::to_owned))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.clone());
        (self.responder)(command)
    }
}

pub fn ok(stdout: &str) -> Result<CommandOutput> {
    Ok(CommandOutput {
        status: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    })
}

pub fn failed(code: i32, stderr: &str) -> Result<CommandOutput> {
    Ok(CommandOutput {
        status: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    })
}

pub fn timed_out(command: &ShellCommand) -> Result<CommandOutput> {
    Err(SpoolwerkError::Timeout {
        operation: command.label().to_string(),
        secs: command.timeout().as_secs(),
    })
}
