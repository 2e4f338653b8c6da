// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer diagnostics.
//
// Enumerates printers through the print management cmdlets, queries the
// extended status of one of them and interprets the answer. Printer status
// reporting on Windows is inconsistent (receipt drivers sit in "Pending
// Deletion" after every job, USB printers report Ready while unplugged), so
// interpretation is explicit and policy-driven.
//
// Failures are folded into the returned `DiagnosticsResult`; `diagnose`
// never returns an error.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::config::EngineConfig;
use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::human_errors::troubleshooting_steps;
use spoolwerk_core::types::{DiagnosticsResult, DispatchResult, Printer, PrinterStatus, StatusPolicy};

use crate::script::{self, PowerShellScript};
use crate::shell::{CommandRunner, ShellCommand};

/// Raw enumeration record as emitted by `ConvertTo-Json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PrinterRecord {
    name: String,
    #[serde(default)]
    driver_name: Option<String>,
    #[serde(default)]
    port_name: Option<String>,
    #[serde(default)]
    printer_status: Option<i64>,
}

/// `ConvertTo-Json` collapses one-element arrays into a bare object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(v) => v,
            Self::One(one) => vec![one],
        }
    }
}

/// Extended status of one printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusReport {
    pub printer_status: i64,
    #[serde(default)]
    pub work_offline: bool,
}

/// Parse the JSON printed by the enumeration script.
pub fn parse_printer_list(json: &str, policy: &StatusPolicy) -> Result<Vec<Printer>> {
    let json = json.trim();
    if json.is_empty() {
        return Ok(Vec::new());
    }
    let records: OneOrMany<PrinterRecord> = serde_json::from_str(json)?;
    Ok(records
        .into_vec()
        .into_iter()
        .map(|r| snapshot(r, policy))
        .collect())
}

fn snapshot(record: PrinterRecord, policy: &StatusPolicy) -> Printer {
    let status_code = record.printer_status.unwrap_or(0);
    let status = PrinterStatus::from_code(status_code);
    let is_online = status != PrinterStatus::Offline;
    Printer {
        name: record.name,
        driver_name: record.driver_name.unwrap_or_default(),
        port_name: record.port_name.unwrap_or_default(),
        status_code,
        is_online,
        is_accessible: is_online && status.is_accessible(policy),
    }
}

pub struct DiagnosticsEngine {
    runner: Arc<dyn CommandRunner>,
    powershell: String,
    query_timeout: Duration,
    policy: StatusPolicy,
}

impl DiagnosticsEngine {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &EngineConfig) -> Self {
        Self {
            runner,
            powershell: config.powershell.clone(),
            query_timeout: config.query_timeout(),
            policy: config.status_policy,
        }
    }

    pub fn policy(&self) -> &StatusPolicy {
        &self.policy
    }

    fn command(&self, label: &str, script: &PowerShellScript) -> ShellCommand {
        ShellCommand::powershell(&self.powershell, label, script, self.query_timeout)
    }

    pub fn build_enumeration(&self) -> ShellCommand {
        let script = PowerShellScript::new()
            .line(
                "$printers = @(Get-Printer | Select-Object Name, DriverName, PortName, \
                 @{Name='PrinterStatus';Expression={[int]$_.PrinterStatus}})",
            )
            .line("ConvertTo-Json -InputObject $printers -Compress");
        self.command("enumerate-printers", &script)
    }

    /// Exact-name match: `Get-Printer -Name` would treat `[` and `*` in a
    /// printer name as wildcards.
    pub fn build_status_query(&self, printer_name: &str) -> ShellCommand {
        let script = PowerShellScript::new()
            .assign_literal("name", printer_name)
            .line("$p = Get-Printer | Where-Object { $_.Name -eq $name } | Select-Object -First 1")
            .line("if (-not $p) { throw \"printer '$name' disappeared\" }")
            .line(format!(
                "$w = Get-CimInstance -ClassName Win32_Printer -Filter {}",
                script::wql_name_filter(printer_name)
            ))
            .line(
                "[pscustomobject]@{ PrinterStatus = [int]$p.PrinterStatus; \
                 WorkOffline = [bool]($w -and $w.WorkOffline) } | ConvertTo-Json -Compress",
            );
        self.command("printer-status", &script)
    }

    pub fn build_default_query(&self) -> ShellCommand {
        let script = PowerShellScript::new()
            .line("$d = Get-CimInstance -ClassName Win32_Printer -Filter 'Default=TRUE'")
            .line("if ($d) { Write-Output $d.Name }");
        self.command("default-printer", &script)
    }

    /// Fresh snapshot of every installed printer.
    #[instrument(skip(self))]
    pub async fn list_printers(&self) -> Result<Vec<Printer>> {
        let output = self
            .runner
            .run(&self.build_enumeration())
            .await
            .map_err(|e| SpoolwerkError::Enumeration(e.to_string()))?;
        if !output.success() {
            return Err(SpoolwerkError::Enumeration(output.detail()));
        }
        let printers = parse_printer_list(&output.stdout, &self.policy)
            .map_err(|e| SpoolwerkError::Enumeration(format!("unreadable printer list: {e}")))?;
        debug!(count = printers.len(), "printers enumerated");
        Ok(printers)
    }

    /// Extended status of `printer_name`.
    #[instrument(skip(self))]
    pub async fn query_status(&self, printer_name: &str) -> Result<StatusReport> {
        let output = self
            .runner
            .run(&self.build_status_query(printer_name))
            .await
            .map_err(|e| SpoolwerkError::StatusQuery(e.to_string()))?;
        if !output.success() {
            return Err(SpoolwerkError::StatusQuery(output.detail()));
        }
        serde_json::from_str(output.stdout.trim())
            .map_err(|e| SpoolwerkError::StatusQuery(format!("unreadable status: {e}")))
    }

    /// The OS default printer, if one is set.
    #[instrument(skip(self))]
    pub async fn default_printer(&self) -> Result<Option<String>> {
        let output = self
            .runner
            .run(&self.build_default_query())
            .await
            .map_err(|e| SpoolwerkError::Enumeration(e.to_string()))?;
        if !output.success() {
            return Err(SpoolwerkError::Enumeration(output.detail()));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_owned))
    }

    /// Diagnose `printer_name`. Never fails; problems are reported in the
    /// result.
    #[instrument(skip(self))]
    pub async fn diagnose(&self, printer_name: &str) -> DiagnosticsResult {
        let printers = match self.list_printers().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "enumeration failed");
                return DiagnosticsResult::enumeration_failed(e.to_string());
            }
        };
        let available: Vec<String> = printers.iter().map(|p| p.name.clone()).collect();

        let Some(mut printer) = printers.into_iter().find(|p| p.name == printer_name) else {
            info!(available = available.len(), "printer not found");
            return DiagnosticsResult::not_found(available);
        };

        let report = match self.query_status(printer_name).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "status query failed");
                return DiagnosticsResult::status_check_failed(printer, available, e.to_string());
            }
        };

        let status = PrinterStatus::from_code(report.printer_status);
        let is_online = status != PrinterStatus::Offline && !report.work_offline;
        let is_accessible = is_online && status.is_accessible(&self.policy);

        printer.status_code = report.printer_status;
        printer.is_online = is_online;
        printer.is_accessible = is_accessible;

        info!(
            status = %status.label(),
            is_online,
            is_accessible,
            "printer diagnosed"
        );
        DiagnosticsResult {
            printer_exists: true,
            is_accessible,
            status: status.label(),
            is_online,
            work_offline: report.work_offline,
            available_printers: available,
            error_detail: None,
            printer: Some(printer),
        }
    }
}

/// Shareable plain-text report for sending to whoever supports the till.
pub fn support_summary(diagnostics: &DiagnosticsResult, dispatch: Option<&DispatchResult>) -> String {
    let now = chrono::Utc::now().format("%d %b %Y, %H:%M UTC");
    let mut text = format!("Spoolwerk Print Report\nDate: {now}\n");

    match &diagnostics.printer {
        Some(printer) => {
            text.push_str(&format!("Printer: {}\n", printer.name));
            text.push_str(&format!("Driver: {}\n", printer.driver_name));
            text.push_str(&format!("Port: {}\n", printer.port_name));
        }
        None => text.push_str("Printer: not found\n"),
    }
    text.push_str(&format!("Status: {}\n", diagnostics.status));
    text.push_str(&format!(
        "Online: {}{}\n",
        yes_no(diagnostics.is_online),
        if diagnostics.work_offline { " (set to work offline)" } else { "" }
    ));
    text.push_str(&format!("Ready to print: {}\n", yes_no(diagnostics.is_accessible)));
    if let Some(ref detail) = diagnostics.error_detail {
        text.push_str(&format!("Error: {detail}\n"));
    }
    if !diagnostics.printer_exists && !diagnostics.available_printers.is_empty() {
        text.push_str(&format!(
            "Installed printers: {}\n",
            diagnostics.available_printers.join(", ")
        ));
    }

    if let Some(result) = dispatch {
        text.push('\n');
        text.push_str(&format!("Last print: {}\n", result.method_used));
        for (i, attempt) in result.attempts.iter().enumerate() {
            let outcome = if attempt.success {
                "ok".to_string()
            } else {
                attempt.error_detail.clone().unwrap_or_else(|| "failed".into())
            };
            text.push_str(&format!(
                "  {}. {} ({} ms): {outcome}\n",
                i + 1,
                attempt.method_name,
                attempt.elapsed_ms
            ));
        }
        if result.attempts.is_empty() {
            text.push_str(&format!("  {}\n", result.details));
        }
    }

    let steps = troubleshooting_steps(diagnostics);
    text.push('\n');
    if steps.is_empty() {
        text.push_str("All checks passed. Printer is ready.\n");
    } else {
        text.push_str("What to do:\n");
        for (i, step) in steps.iter().enumerate() {
            text.push_str(&format!("  {}. {step}\n", i + 1));
        }
    }
    text
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
