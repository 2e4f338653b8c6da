// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for cashiers and support staff.
//
// Every technical error is mapped to plain English with a clear suggestion.
// Diagnostics failures become an ordered list of things to try, never a raw
// error string.

use crate::error::SpoolwerkError;
use crate::types::{
    DiagnosticsResult, DispatchResult, PrinterStatus, STATUS_CHECK_FAILED,
    STATUS_ENUMERATION_FAILED,
};

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Flaky mechanism or timeout; trying again may work.
    Transient,
    /// Someone must do something (reconnect, add paper, elevate).
    ActionRequired,
    /// Cannot be fixed by retrying: wrong printer name or bad config.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether the system should auto-retry.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert a `SpoolwerkError` into a `HumanError` a cashier can act on.
pub fn humanize_error(err: &SpoolwerkError) -> HumanError {
    match err {
        SpoolwerkError::StrategyFailed { detail, .. } => humanize_detail(detail),

        SpoolwerkError::Timeout { operation, secs } => HumanError {
            message: "The printer didn't respond in time.".into(),
            suggestion: format!(
                "Check that the printer is switched on and connected, then try again. ({operation}, {secs}s)"
            ),
            retriable: true,
            severity: Severity::Transient,
        },

        SpoolwerkError::PrinterNotFound(name) => HumanError {
            message: format!("Windows doesn't know a printer called \"{name}\"."),
            suggestion: "Pick the printer again from the list in Settings. The name must match exactly.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        SpoolwerkError::InvalidRequest(detail) => HumanError {
            message: "There was nothing valid to print.".into(),
            suggestion: format!("The receipt could not be prepared. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },

        SpoolwerkError::Enumeration(_) => HumanError {
            message: "We couldn't get the list of printers from Windows.".into(),
            suggestion: "The print spooler may be stuck. Try the \"Reset print queue\" option, then try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        SpoolwerkError::StatusQuery(_) => HumanError {
            message: "We couldn't check the printer's status.".into(),
            suggestion: "The printer may still work. Try printing; if nothing comes out, reset the print queue.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        SpoolwerkError::PrivilegeRequired => HumanError {
            message: "Resetting the print spooler needs administrator rights.".into(),
            suggestion: "Close the app and start it again with \"Run as administrator\", or ask your manager to reset the print queue.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        SpoolwerkError::Recovery(_) => HumanError {
            message: "The print queue could not be reset.".into(),
            suggestion: "Restart the computer. If printing still fails, reinstall the printer driver.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        SpoolwerkError::Script(_) => HumanError {
            message: "Windows gave an unexpected answer.".into(),
            suggestion: "Try again. If this keeps happening, please send the support report.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        SpoolwerkError::Config(detail) => HumanError {
            message: "The print settings are invalid.".into(),
            suggestion: format!("Fix the configuration file or delete it to use defaults. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },

        SpoolwerkError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                HumanError {
                    message: "The app isn't allowed to write its temporary print file.".into(),
                    suggestion: "Check that the temp folder is writable, or set a different temp folder in the configuration.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else if io_err.kind() == std::io::ErrorKind::NotFound {
                HumanError {
                    message: "A program needed for printing is missing.".into(),
                    suggestion: "Make sure Windows PowerShell is installed and on the PATH.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else {
                HumanError {
                    message: "There was a problem reading or writing a file.".into(),
                    suggestion: "Try again. If this keeps happening, the disk may be full.".into(),
                    retriable: true,
                    severity: Severity::Transient,
                }
            }
        }

        SpoolwerkError::Serialization(_) => HumanError {
            message: "The app had an internal data problem.".into(),
            suggestion: "Try again. If this keeps happening, please report it.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
    }
}

/// Parse transport failure details into human-readable messages.
fn humanize_detail(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("timed out") {
        HumanError {
            message: "The printer didn't respond in time.".into(),
            suggestion: "Check that the printer is switched on and the cable is plugged in, then try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        }
    } else if lower.contains("access is denied") || lower.contains("access denied") {
        HumanError {
            message: "Windows refused access to the printer.".into(),
            suggestion: "Check the printer's sharing and security settings, or run the app as administrator.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("not found")
        || lower.contains("no win32_printer")
        || lower.contains("invalid printer name")
    {
        HumanError {
            message: "Windows couldn't find that printer.".into(),
            suggestion: "Pick the printer again from the list in Settings.".into(),
            retriable: false,
            severity: Severity::Permanent,
        }
    } else if lower.contains("is virtual") {
        HumanError {
            message: "This printer saves to a file instead of printing.".into(),
            suggestion: "Choose the receipt printer itself, not a PDF, XPS or OneNote printer.".into(),
            retriable: false,
            severity: Severity::Permanent,
        }
    } else if lower.contains("unable to initialize device") || has_word(&lower, "port") {
        HumanError {
            message: "The printer's connection could not be opened.".into(),
            suggestion: "Unplug the printer's USB cable, wait five seconds, and plug it back in.".into(),
            retriable: true,
            severity: Severity::Transient,
        }
    } else {
        HumanError {
            message: "The printer had a problem.".into(),
            suggestion: format!("Try again. If this keeps happening, reset the print queue. (Detail: {detail})"),
            retriable: true,
            severity: Severity::Transient,
        }
    }
}

/// `word` occurs in `text` with no letter or digit on either side.
fn has_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(i, _)| {
        let before = text[..i].chars().next_back();
        let after = text[i + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// One-line message for a failed dispatch; the attempt list goes to logs.
pub fn dispatch_failure_message(result: &DispatchResult) -> String {
    if result.success {
        return String::new();
    }
    if result.attempts.is_empty() {
        return format!("The receipt was not printed: {}", result.details);
    }
    format!(
        "The receipt could not be printed. We tried {} different ways to reach the printer and none worked.",
        result.attempts.len()
    )
}

/// Ordered, actionable troubleshooting steps for a diagnostics result.
///
/// Returns an empty list when the printer is ready.
pub fn troubleshooting_steps(result: &DiagnosticsResult) -> Vec<String> {
    if result.is_accessible {
        return Vec::new();
    }

    let mut steps = Vec::new();

    if !result.printer_exists {
        if result.status == STATUS_ENUMERATION_FAILED {
            steps.push("Restart the print spooler (use \"Reset print queue\"), then check again.".into());
        } else {
            steps.push("Check the printer name: it must match the name shown in Windows \"Printers & scanners\" exactly.".into());
            if !result.available_printers.is_empty() {
                steps.push(format!(
                    "Printers Windows can see right now: {}.",
                    result.available_printers.join(", ")
                ));
            }
        }
        steps.push("Reinstall or reconnect the printer driver if the printer is missing from Windows.".into());
        steps.push("Check the physical connection: power, USB or network cable.".into());
        return steps;
    }

    if result.status == STATUS_CHECK_FAILED {
        steps.push("Restart the print spooler (use \"Reset print queue\").".into());
        steps.push("Check the physical connection: power, USB or network cable.".into());
        steps.push("Reinstall or reconnect the printer driver.".into());
        return steps;
    }

    let status = result.printer.as_ref().map(|p| p.status());

    if result.work_offline || !result.is_online || status == Some(PrinterStatus::Offline) {
        steps.push("Check the physical connection: make sure the printer is switched on and the cable is firmly plugged in.".into());
        steps.push("In Windows \"Printers & scanners\", open the printer queue and untick \"Use Printer Offline\".".into());
    }

    match status {
        Some(PrinterStatus::PaperJam) => {
            steps.push("Open the printer cover and gently remove any stuck paper.".into())
        }
        Some(PrinterStatus::PaperOut) | Some(PrinterStatus::PaperProblem) => {
            steps.push("Load a new paper roll and close the cover firmly.".into())
        }
        Some(PrinterStatus::Paused) => {
            steps.push("Open the printer queue in Windows and choose \"Resume printing\".".into())
        }
        _ => {}
    }

    steps.push("Restart the print spooler (use \"Reset print queue\").".into());
    steps.push("Reinstall or reconnect the printer driver.".into());
    steps
}
