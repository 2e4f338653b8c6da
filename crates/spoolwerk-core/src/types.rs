// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Spoolwerk print engine.
//
// Everything here is a per-call snapshot: printers are re-enumerated on every
// diagnostic call and requests/results are discarded once the call returns.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SpoolwerkError};

/// Unique identifier for a dispatched print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// -- Printer status ----------------------------------------------------------

/// Printer status as reported by the OS print management surface.
///
/// The numeric values are defined by the OS (`MSFT_Printer.PrinterStatus`);
/// this type only interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrinterStatus {
    Ready,
    Paused,
    Error,
    PendingDeletion,
    PaperJam,
    PaperOut,
    ManualFeed,
    PaperProblem,
    Offline,
    /// Any code outside the known table.
    Unknown(i64),
}

impl PrinterStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Ready,
            1 => Self::Paused,
            2 => Self::Error,
            3 => Self::PendingDeletion,
            4 => Self::PaperJam,
            5 => Self::PaperOut,
            6 => Self::ManualFeed,
            7 => Self::PaperProblem,
            8 => Self::Offline,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Ready => 0,
            Self::Paused => 1,
            Self::Error => 2,
            Self::PendingDeletion => 3,
            Self::PaperJam => 4,
            Self::PaperOut => 5,
            Self::ManualFeed => 6,
            Self::PaperProblem => 7,
            Self::Offline => 8,
            Self::Unknown(code) => *code,
        }
    }

    /// Label used in `DiagnosticsResult::status`.
    pub fn label(&self) -> String {
        match self {
            Self::Ready => "Ready".into(),
            Self::Paused => "Paused".into(),
            Self::Error => "Error".into(),
            Self::PendingDeletion => "Pending Deletion".into(),
            Self::PaperJam => "Paper Jam".into(),
            Self::PaperOut => "Paper Out".into(),
            Self::ManualFeed => "Manual Feed".into(),
            Self::PaperProblem => "Paper Problem".into(),
            Self::Offline => "Offline".into(),
            Self::Unknown(code) => format!("Unknown ({code})"),
        }
    }

    /// Whether this status alone allows printing under the given policy.
    ///
    /// Manual feed is always accessible. Pending deletion is accessible only
    /// while `policy.pending_deletion_accessible` is set: several receipt
    /// drivers park in that state after every job and still print.
    pub fn is_accessible(&self, policy: &StatusPolicy) -> bool {
        match self {
            Self::Ready | Self::ManualFeed => true,
            Self::PendingDeletion => policy.pending_deletion_accessible,
            Self::Unknown(code) => *code == 0,
            _ => false,
        }
    }
}

/// Overridable interpretation rules for ambiguous status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPolicy {
    /// Treat code 3 ("Pending Deletion") as accessible.
    pub pending_deletion_accessible: bool,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            pending_deletion_accessible: true,
        }
    }
}

/// Read-only snapshot of an OS-enumerated printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Printer {
    /// Exact OS display name.
    pub name: String,
    pub driver_name: String,
    pub port_name: String,
    pub status_code: i64,
    pub is_online: bool,
    pub is_accessible: bool,
}

impl Printer {
    pub fn status(&self) -> PrinterStatus {
        PrinterStatus::from_code(self.status_code)
    }
}

// -- Requests ----------------------------------------------------------------

/// Most copies a single request may ask for.
pub const MAX_COPIES: u32 = 100;

/// Longest per-strategy timeout a request or config may set.
pub const MAX_STRATEGY_TIMEOUT: Duration = Duration::from_secs(300);

/// Optional knobs for a single print call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintOptions {
    /// Number of copies; the payload is repeated back to back.
    pub copies: u32,
    /// Overrides every strategy's own subprocess timeout.
    pub timeout: Option<Duration>,
    /// Spooler job name; a generated one is used when absent.
    pub job_name: Option<String>,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            copies: 1,
            timeout: None,
            job_name: None,
        }
    }
}

/// A single print call. Never persisted.
#[derive(Debug, Clone)]
pub struct PrintRequest {
    pub printer_name: String,
    pub payload: Vec<u8>,
    pub is_plain_text: bool,
    pub options: PrintOptions,
}

impl PrintRequest {
    /// Raw bytes (ESC/POS, ZPL, ...) sent as-is.
    pub fn raw(printer_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            printer_name: printer_name.into(),
            payload,
            is_plain_text: false,
            options: PrintOptions::default(),
        }
    }

    /// UTF-8 text; line endings are normalised before transport.
    pub fn text(printer_name: impl Into<String>, text: &str) -> Self {
        Self {
            printer_name: printer_name.into(),
            payload: text.as_bytes().to_vec(),
            is_plain_text: true,
            options: PrintOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PrintOptions) -> Self {
        self.options = options;
        self
    }

    /// Reject requests that no transport should see.
    pub fn validate(&self) -> Result<()> {
        if self.printer_name.trim().is_empty() {
            return Err(SpoolwerkError::InvalidRequest("printer name is empty".into()));
        }
        if self.payload.is_empty() {
            return Err(SpoolwerkError::InvalidRequest("payload is empty".into()));
        }
        if !(1..=MAX_COPIES).contains(&self.options.copies) {
            return Err(SpoolwerkError::InvalidRequest(format!(
                "copies must be between 1 and {MAX_COPIES}"
            )));
        }
        if let Some(timeout) = self.options.timeout {
            if timeout.is_zero() || timeout > MAX_STRATEGY_TIMEOUT {
                return Err(SpoolwerkError::InvalidRequest(format!(
                    "timeout must be between 1 and {} seconds",
                    MAX_STRATEGY_TIMEOUT.as_secs()
                )));
            }
        }
        Ok(())
    }

    /// The job name to hand to the spooler.
    pub fn job_name(&self) -> String {
        self.options
            .job_name
            .clone()
            .unwrap_or_else(|| format!("spoolwerk-{}", JobId::new()))
    }
}

// -- Strategies and dispatch --------------------------------------------------

/// The OS-level transport mechanisms the dispatcher can try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// `Win32_Printer` lookup + `Out-Printer`.
    ManagementObject,
    /// `System.Printing` queue job stream.
    ManagedQueue,
    /// Binary copy to the printer's port (or share path).
    PortCopy,
    /// The DOS `print` command.
    LegacyCommand,
    /// winspool RAW job submitted from a PowerShell shim.
    RawScript,
}

impl StrategyKind {
    pub fn all() -> &'static [StrategyKind] {
        &[
            StrategyKind::ManagementObject,
            StrategyKind::ManagedQueue,
            StrategyKind::PortCopy,
            StrategyKind::LegacyCommand,
            StrategyKind::RawScript,
        ]
    }

    /// Stable name recorded in `StrategyAttempt::method_name`.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::ManagementObject => "management-object",
            Self::ManagedQueue => "managed-queue",
            Self::PortCopy => "port-copy",
            Self::LegacyCommand => "legacy-command",
            Self::RawScript => "raw-script",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method_name())
    }
}

/// How the dispatcher picks its strategy order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Conservative order with an accessibility pre-flight.
    Standard,
    /// Direct paths first, no accessibility pre-flight.
    Bypass,
    /// Order chosen from the printer's driver classification.
    Auto,
}

/// One transport tried during a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub method_name: String,
    pub success: bool,
    pub error_detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// `method_used` value when every strategy failed.
pub const ALL_METHODS_FAILED: &str = "All methods failed";

/// `method_used` value when the pre-flight check rejected the printer.
pub const PREFLIGHT_FAILED: &str = "Pre-flight check failed";

/// Outcome of a dispatch call.
///
/// `success` is true exactly when the last attempt succeeded; attempts are in
/// invocation order and none follow a success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub success: bool,
    pub method_used: String,
    pub details: String,
    pub attempts: Vec<StrategyAttempt>,
}

impl DispatchResult {
    pub fn succeeded(method: &str, attempts: Vec<StrategyAttempt>) -> Self {
        let details = if attempts.len() > 1 {
            format!("printed via {method} after {} failed attempt(s)", attempts.len() - 1)
        } else {
            format!("printed via {method}")
        };
        Self {
            success: true,
            method_used: method.to_string(),
            details,
            attempts,
        }
    }

    pub fn exhausted(attempts: Vec<StrategyAttempt>) -> Self {
        let details = attempts
            .iter()
            .map(|a| {
                format!(
                    "{}: {}",
                    a.method_name,
                    a.error_detail.as_deref().unwrap_or("failed")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            success: false,
            method_used: ALL_METHODS_FAILED.to_string(),
            details,
            attempts,
        }
    }

    pub fn preflight_rejected(details: impl Into<String>) -> Self {
        Self {
            success: false,
            method_used: PREFLIGHT_FAILED.to_string(),
            details: details.into(),
            attempts: Vec::new(),
        }
    }
}

// -- Driver classification ----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverType {
    Thermal,
    #[serde(rename = "generic-80-normal")]
    Generic80Normal,
    Generic,
    TextOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedMethod {
    /// Bypass the spooler: port copy / raw paths first.
    DirectUsb,
    /// Go through the spooler's managed paths.
    WindowsSpooler,
    /// Unknown driver on a USB port: try both.
    Hybrid,
}

/// Heuristic verdict on a printer driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverClassification {
    pub driver_type: DriverType,
    pub supports_direct_usb: bool,
    /// Whether the managed print path can print without a native dialog.
    pub silent_capable: bool,
    pub recommended_method: RecommendedMethod,
}

// -- Diagnostics --------------------------------------------------------------

pub const STATUS_NOT_FOUND: &str = "Not Found";
pub const STATUS_CHECK_FAILED: &str = "Status Check Failed";
pub const STATUS_ENUMERATION_FAILED: &str = "Enumeration Failed";

/// Result of diagnosing a single printer.
///
/// `is_accessible` is never true while `is_online` is false, and a printer
/// that does not exist is never accessible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsResult {
    pub printer_exists: bool,
    pub is_accessible: bool,
    pub status: String,
    pub is_online: bool,
    pub work_offline: bool,
    pub available_printers: Vec<String>,
    pub error_detail: Option<String>,
    /// Enumerated snapshot of the target, when it exists.
    pub printer: Option<Printer>,
}

impl DiagnosticsResult {
    pub fn not_found(available_printers: Vec<String>) -> Self {
        Self {
            printer_exists: false,
            is_accessible: false,
            status: STATUS_NOT_FOUND.into(),
            is_online: false,
            work_offline: false,
            available_printers,
            error_detail: None,
            printer: None,
        }
    }

    pub fn enumeration_failed(detail: impl Into<String>) -> Self {
        Self {
            printer_exists: false,
            is_accessible: false,
            status: STATUS_ENUMERATION_FAILED.into(),
            is_online: false,
            work_offline: false,
            available_printers: Vec::new(),
            error_detail: Some(detail.into()),
            printer: None,
        }
    }

    pub fn status_check_failed(
        printer: Printer,
        available_printers: Vec<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            printer_exists: true,
            is_accessible: false,
            status: STATUS_CHECK_FAILED.into(),
            is_online: false,
            work_offline: false,
            available_printers,
            error_detail: Some(detail.into()),
            printer: Some(printer),
        }
    }
}

// -- Spooler recovery ---------------------------------------------------------

/// Observed state of the OS print spooler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpoolerState {
    Healthy,
    /// Jobs stuck in pending deletion or error.
    Stuck,
    Recovering,
    Unrecoverable,
}

/// Which remediation tier brought the spooler back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTier {
    /// Cleared jobs of printers stuck in pending deletion.
    NonPrivileged,
    /// Restarted the spooler service and wiped the spool directory.
    Privileged,
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Flaky mechanism or timeout; safe to retry automatically.
    Transient,
    /// User must take action (elevate, reconnect, add paper).
    UserAction,
    /// Retrying cannot help: unknown printer or bad request.
    Permanent,
}
