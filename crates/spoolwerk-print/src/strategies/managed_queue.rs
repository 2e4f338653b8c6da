// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Managed print-queue API: open the queue through System.Printing, add a job
// and write the bytes straight into its job stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::StrategyKind;

use super::{TransportJob, TransportSettings, TransportStrategy, run_step};
use crate::payload::PayloadFile;
use crate::script::{self, PRINT_OK, PowerShellScript};
use crate::shell::{CommandRunner, ShellCommand};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ManagedQueueStrategy {
    runner: Arc<dyn CommandRunner>,
    settings: Arc<TransportSettings>,
}

impl ManagedQueueStrategy {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: Arc<TransportSettings>) -> Self {
        Self { runner, settings }
    }

    pub fn build_command(
        &self,
        printer_name: &str,
        job_name: &str,
        file: &str,
        timeout: Duration,
    ) -> ShellCommand {
        let mut script = PowerShellScript::new().line("Add-Type -AssemblyName System.Printing");

        // Connections to shared printers live on their own print server.
        script = match split_connection(printer_name) {
            Some((server, queue)) => script
                .line(format!(
                    "$server = New-Object System.Printing.PrintServer({})",
                    script::quote(server)
                ))
                .assign_literal("queueName", queue),
            None => script
                .line("$server = New-Object System.Printing.LocalPrintServer")
                .assign_literal("queueName", printer_name),
        };

        let script = script
            .line("$queue = $server.GetPrintQueue($queueName)")
            .line(format!("$job = $queue.AddJob({})", script::quote(job_name)))
            .line(format!(
                "$bytes = [System.IO.File]::ReadAllBytes({})",
                script::quote(file)
            ))
            .line("$stream = $job.JobStream")
            .line("try { $stream.Write($bytes, 0, $bytes.Length) } finally { $stream.Close() }")
            .emit(PRINT_OK);

        ShellCommand::powershell(
            &self.settings.powershell,
            StrategyKind::ManagedQueue.method_name(),
            &script,
            timeout,
        )
    }
}

/// `\\SERVER\Queue` -> (`\\SERVER`, `Queue`).
fn split_connection(printer_name: &str) -> Option<(&str, &str)> {
    let rest = printer_name.strip_prefix(r"\\")?;
    let idx = rest.find('\\')?;
    let queue = &rest[idx + 1..];
    if idx == 0 || queue.is_empty() {
        return None;
    }
    Some((&printer_name[..idx + 2], queue))
}

#[async_trait]
impl TransportStrategy for ManagedQueueStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ManagedQueue
    }

    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    #[instrument(skip_all, fields(printer = %job.printer_name))]
    async fn attempt(&self, job: &TransportJob) -> Result<()> {
        let file = PayloadFile::create(self.settings.temp_dir.as_deref(), &job.payload)?;
        let command = self.build_command(
            &job.printer_name,
            &job.job_name,
            &file.display_path(),
            job.timeout,
        );
        let output = run_step(self.runner.as_ref(), self.kind(), &command).await?;

        if !output.has_sentinel(PRINT_OK) {
            return Err(SpoolwerkError::strategy(self.kind().method_name(), output.detail()));
        }
        debug!(job = %job.job_name, "job stream written");
        Ok(())
    }
}
