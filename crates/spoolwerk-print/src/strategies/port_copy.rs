// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Binary port copy: resolve the printer's port and `copy /B` the payload to
// it, bypassing the driver's rendering path. When the port cannot be
// resolved the printer's share path is used instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::StrategyKind;

use super::{TransportJob, TransportSettings, TransportStrategy, run_step};
use crate::payload::PayloadFile;
use crate::script::{self, PowerShellScript};
use crate::shell::{CommandRunner, ShellCommand};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Ports that render to a file or a viewer rather than a device. Copying raw
/// bytes there either prompts the user or silently produces a broken file.
const VIRTUAL_PORT_PREFIXES: &[&str] = &["file:", "portprompt:", "xpsport:", "onenote", "nul:", "wfsport:"];

pub fn is_virtual_port(port: &str) -> bool {
    let port = port.trim().to_lowercase();
    VIRTUAL_PORT_PREFIXES.iter().any(|p| port.starts_with(p))
}

/// Where the bytes will be copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyTarget {
    Port(String),
    Share(String),
}

impl CopyTarget {
    pub fn path(&self) -> &str {
        match self {
            Self::Port(p) | Self::Share(p) => p,
        }
    }
}

pub struct PortCopyStrategy {
    runner: Arc<dyn CommandRunner>,
    settings: Arc<TransportSettings>,
}

impl PortCopyStrategy {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: Arc<TransportSettings>) -> Self {
        Self { runner, settings }
    }

    pub fn build_port_query(&self, printer_name: &str, timeout: Duration) -> ShellCommand {
        let script = PowerShellScript::new()
            .line(format!(
                "$printer = Get-CimInstance -ClassName Win32_Printer -Filter {}",
                script::wql_name_filter(printer_name)
            ))
            .line("if ($printer) { Write-Output $printer.PortName }");
        ShellCommand::powershell(&self.settings.powershell, "port-query", &script, timeout)
    }

    pub fn build_copy(&self, file: &str, target: &CopyTarget, timeout: Duration) -> Result<ShellCommand> {
        Ok(ShellCommand::new(
            &self.settings.cmd,
            StrategyKind::PortCopy.method_name(),
            timeout,
        )
        .verbatim()
        .args(["/C", "copy", "/B"])
        .arg(script::cmd_quote(file)?)
        .arg(script::cmd_quote(target.path())?))
    }

    /// Port name of `printer_name`, or `None` when it cannot be resolved.
    async fn resolve_port(&self, printer_name: &str, timeout: Duration) -> Option<String> {
        let query = self.build_port_query(printer_name, timeout);
        match self.runner.run(&query).await {
            Ok(output) if output.success() => output
                .stdout
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_owned),
            Ok(output) => {
                debug!(detail = %output.detail(), "port query failed");
                None
            }
            Err(e) => {
                debug!(error = %e, "port query failed");
                None
            }
        }
    }

    async fn target_for(&self, printer_name: &str, timeout: Duration) -> Result<CopyTarget> {
        match self.resolve_port(printer_name, timeout).await {
            Some(port) if is_virtual_port(&port) => Err(SpoolwerkError::strategy(
                self.kind().method_name(),
                format!("port '{port}' is virtual and cannot take raw data"),
            )),
            Some(port) => Ok(CopyTarget::Port(port)),
            None => {
                let share = self.settings.share_path(printer_name);
                warn!(%share, "port unresolved, copying to share path");
                Ok(CopyTarget::Share(share))
            }
        }
    }
}

#[async_trait]
impl TransportStrategy for PortCopyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PortCopy
    }

    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Port query plus the copy itself.
    fn time_budget(&self, timeout: Duration) -> Duration {
        timeout.saturating_mul(2)
    }

    #[instrument(skip_all, fields(printer = %job.printer_name))]
    async fn attempt(&self, job: &TransportJob) -> Result<()> {
        let target = self.target_for(&job.printer_name, job.timeout).await?;
        let file = PayloadFile::create(self.settings.temp_dir.as_deref(), &job.payload)?;
        let command = self.build_copy(&file.display_path(), &target, job.timeout)?;
        let output = run_step(self.runner.as_ref(), self.kind(), &command).await?;

        // `copy` reports a failed device open as "0 file(s) copied" and on
        // some builds still exits 0.
        let nothing_copied = output
            .stdout
            .lines()
            .any(|l| l.trim_start().starts_with("0 file(s) copied"));
        if !output.success() || nothing_copied {
            return Err(SpoolwerkError::strategy(
                self.kind().method_name(),
                format!("copy to {} failed: {}", target.path(), output.detail()),
            ));
        }
        debug!(target = target.path(), "bytes copied");
        Ok(())
    }
}
