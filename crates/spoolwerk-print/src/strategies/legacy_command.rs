// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The DOS `print` command against the printer's share path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::StrategyKind;

use super::{TransportJob, TransportSettings, TransportStrategy, run_step};
use crate::payload::PayloadFile;
use crate::script;
use crate::shell::{CommandRunner, ShellCommand};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// `print` exits 0 even when it could not open the device.
const DEVICE_ERROR: &str = "unable to initialize device";

pub struct LegacyCommandStrategy {
    runner: Arc<dyn CommandRunner>,
    settings: Arc<TransportSettings>,
}

impl LegacyCommandStrategy {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: Arc<TransportSettings>) -> Self {
        Self { runner, settings }
    }

    pub fn build_command(&self, printer_name: &str, file: &str, timeout: Duration) -> Result<ShellCommand> {
        let device = format!("/D:{}", script::cmd_quote(&self.settings.share_path(printer_name))?);
        Ok(ShellCommand::new(
            &self.settings.cmd,
            StrategyKind::LegacyCommand.method_name(),
            timeout,
        )
        .verbatim()
        .args(["/C", "print"])
        .arg(device)
        .arg(script::cmd_quote(file)?))
    }
}

#[async_trait]
impl TransportStrategy for LegacyCommandStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LegacyCommand
    }

    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    #[instrument(skip_all, fields(printer = %job.printer_name))]
    async fn attempt(&self, job: &TransportJob) -> Result<()> {
        let file = PayloadFile::create(self.settings.temp_dir.as_deref(), &job.payload)?;
        let command = self.build_command(&job.printer_name, &file.display_path(), job.timeout)?;
        let output = run_step(self.runner.as_ref(), self.kind(), &command).await?;

        let combined = format!("{}\n{}", output.stdout, output.stderr).to_lowercase();
        if !output.success() || combined.contains(DEVICE_ERROR) {
            return Err(SpoolwerkError::strategy(self.kind().method_name(), output.detail()));
        }
        debug!("print command queued the file");
        Ok(())
    }
}
