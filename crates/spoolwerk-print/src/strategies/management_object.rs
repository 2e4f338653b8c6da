// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Management-object printing: resolve the printer as a `Win32_Printer`
// instance and stream the file through `Out-Printer`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::StrategyKind;

use super::{TransportJob, TransportSettings, TransportStrategy, run_step};
use crate::payload::PayloadFile;
use crate::script::{self, NOT_FOUND, PRINT_OK, PowerShellScript};
use crate::shell::{CommandRunner, ShellCommand};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ManagementObjectStrategy {
    runner: Arc<dyn CommandRunner>,
    settings: Arc<TransportSettings>,
}

impl ManagementObjectStrategy {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: Arc<TransportSettings>) -> Self {
        Self { runner, settings }
    }

    /// A missing printer exits early with `SPOOLWERK_NOT_FOUND`; the success
    /// sentinel is only written after `Out-Printer` returned.
    pub fn build_command(&self, printer_name: &str, file: &str, timeout: Duration) -> ShellCommand {
        let script = PowerShellScript::new()
            .line(format!(
                "$printer = Get-CimInstance -ClassName Win32_Printer -Filter {}",
                script::wql_name_filter(printer_name)
            ))
            .line(format!(
                "if (-not $printer) {{ Write-Output {}; exit 2 }}",
                script::quote(NOT_FOUND)
            ))
            .line(format!(
                "Get-Content -LiteralPath {} -Raw | Out-Printer -Name {}",
                script::quote(file),
                script::quote(printer_name)
            ))
            .emit(PRINT_OK);
        ShellCommand::powershell(
            &self.settings.powershell,
            StrategyKind::ManagementObject.method_name(),
            &script,
            timeout,
        )
    }
}

#[async_trait]
impl TransportStrategy for ManagementObjectStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ManagementObject
    }

    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    #[instrument(skip_all, fields(printer = %job.printer_name))]
    async fn attempt(&self, job: &TransportJob) -> Result<()> {
        let file = PayloadFile::create(self.settings.temp_dir.as_deref(), &job.payload)?;
        let command = self.build_command(&job.printer_name, &file.display_path(), job.timeout);
        let output = run_step(self.runner.as_ref(), self.kind(), &command).await?;

        if output.has_sentinel(NOT_FOUND) {
            return Err(SpoolwerkError::strategy(
                self.kind().method_name(),
                format!("no Win32_Printer named '{}'", job.printer_name),
            ));
        }
        // A zero exit code alone is not trusted: Out-Printer can return
        // cleanly after a partial failure.
        if !output.has_sentinel(PRINT_OK) {
            return Err(SpoolwerkError::strategy(self.kind().method_name(), output.detail()));
        }

        debug!("Out-Printer accepted the job");
        Ok(())
    }
}
