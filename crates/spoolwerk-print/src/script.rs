// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Typed PowerShell script assembly.
//
// Printer names come from the OS and routinely contain quotes, brackets and
// backslashes ("EPSON TM-T20II Receipt5", "\\SERVER\Kitchen's"). Every value
// interpolated into a script goes through `quote` (PowerShell literal) and,
// inside WQL filters, `wql_literal` first. Values handed to `cmd.exe` go
// through `cmd_quote`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use spoolwerk_core::error::{Result, SpoolwerkError};

/// Printed by a print script only after the print call itself returned.
pub const PRINT_OK: &str = "SPOOLWERK_PRINT_OK";

/// Printed when a management-object lookup found no printer.
pub const NOT_FOUND: &str = "SPOOLWERK_NOT_FOUND";

/// Prefix of the job-clearing summary line (`SPOOLWERK_CLEARED <n>`).
pub const CLEARED: &str = "SPOOLWERK_CLEARED";

/// Prefix of the stuck-printer count line (`SPOOLWERK_STUCK <n>`).
pub const STUCK: &str = "SPOOLWERK_STUCK";

/// Printed after the spooler service came back up.
pub const SPOOLER_RESTARTED: &str = "SPOOLWERK_SPOOLER_RESTARTED";

/// Line-oriented PowerShell script. Starts with `$ErrorActionPreference =
/// 'Stop'` so that any cmdlet failure aborts with a non-zero exit code.
#[derive(Debug, Clone)]
pub struct PowerShellScript {
    lines: Vec<String>,
}

impl Default for PowerShellScript {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerShellScript {
    pub fn new() -> Self {
        Self {
            lines: vec!["$ErrorActionPreference = 'Stop'".to_string()],
        }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// `$name = <single-quoted value>`
    pub fn assign_literal(self, name: &str, value: &str) -> Self {
        let line = format!("${name} = {}", quote(value));
        self.line(line)
    }

    /// Emit `sentinel` on its own stdout line.
    pub fn emit(self, sentinel: &str) -> Self {
        let line = format!("Write-Output {}", quote(sentinel));
        self.line(line)
    }

    pub fn build(&self) -> String {
        self.lines.join("\n")
    }
}

/// Quote `value` as a PowerShell single-quoted (verbatim) string.
///
/// PowerShell treats the typographic quotes U+2018..U+201B as single quotes
/// too, so those are doubled as well. NUL cannot appear in a command line and
/// is dropped.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => {
                out.push(c);
                out.push(c);
            }
            '\0' => {}
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Escape `value` for use inside a single-quoted WQL string literal.
pub fn wql_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `Name='<value>'` WQL filter, quoted for PowerShell.
pub fn wql_name_filter(printer_name: &str) -> String {
    quote(&format!("Name='{}'", wql_literal(printer_name)))
}

/// Quote `value` as one `cmd.exe` argument.
///
/// The value is wrapped in double quotes, which makes `& | < > ^` and spaces
/// literal. `%` still expands inside quotes, so each one is emitted outside
/// them as `^%`; a variable name can then never close before a caret. A
/// double quote cannot be escaped at all and is rejected, as are NUL and line
/// breaks. The result must reach `cmd.exe` verbatim (`ShellCommand::verbatim`).
pub fn cmd_quote(value: &str) -> Result<String> {
    if let Some(c) = value.chars().find(|c| matches!(c, '"' | '\0' | '\r' | '\n')) {
        return Err(SpoolwerkError::InvalidRequest(format!(
            "{c:?} cannot be passed to cmd.exe: {value}"
        )));
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '%' {
            out.push_str("\"^%\"");
        } else {
            out.push(c);
        }
    }
    out.push('"');
    Ok(out)
}

/// Encode a script for `powershell -EncodedCommand` (base64 of UTF-16LE).
pub fn encode_command(script: &str) -> String {
    let bytes: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(bytes)
}
