// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// RAW winspool job submitted from a PowerShell shim.
//
// The spooler is asked for a "RAW" datatype document, so the driver's
// rendering path is skipped entirely and ESC/POS bytes reach the device
// unchanged. The winspool calls are made through a small inline C# type
// compiled by `Add-Type`.

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

/// `SpoolwerkRaw.Send(printer, jobName, bytes)` returns the Win32 error code,
/// 0 on success.
const WINSPOOL_SHIM: &str = r#"Add-Type -TypeDefinition @'
using System;
using System.Runtime.InteropServices;
public static class SpoolwerkRaw {
    [StructLayout(LayoutKind.Sequential, CharSet = CharSet.Unicode)]
    public class DOCINFO {
        [MarshalAs(UnmanagedType.LPWStr)] public string pDocName;
        [MarshalAs(UnmanagedType.LPWStr)] public string pOutputFile;
        [MarshalAs(UnmanagedType.LPWStr)] public string pDataType;
    }
    [DllImport("winspool.drv", CharSet = CharSet.Unicode, SetLastError = true)]
    static extern bool OpenPrinter(string name, out IntPtr handle, IntPtr defaults);
    [DllImport("winspool.drv", SetLastError = true)]
    static extern bool ClosePrinter(IntPtr handle);
    [DllImport("winspool.drv", CharSet = CharSet.Unicode, SetLastError = true)]
    static extern int StartDocPrinter(IntPtr handle, int level, [In] DOCINFO info);
    [DllImport("winspool.drv", SetLastError = true)]
    static extern bool EndDocPrinter(IntPtr handle);
    [DllImport("winspool.drv", SetLastError = true)]
    static extern bool StartPagePrinter(IntPtr handle);
    [DllImport("winspool.drv", SetLastError = true)]
    static extern bool EndPagePrinter(IntPtr handle);
    [DllImport("winspool.drv", SetLastError = true)]
    static extern bool WritePrinter(IntPtr handle, byte[] buffer, int count, out int written);
    public static int Send(string printer, string jobName, byte[] bytes) {
        IntPtr handle;
        if (!OpenPrinter(printer, out handle, IntPtr.Zero)) { return Marshal.GetLastWin32Error(); }
        try {
            DOCINFO info = new DOCINFO();
            info.pDocName = jobName;
            info.pDataType = "RAW";
            if (StartDocPrinter(handle, 1, info) == 0) { return Marshal.GetLastWin32Error(); }
            try {
                if (!StartPagePrinter(handle)) { return Marshal.GetLastWin32Error(); }
                int written;
                bool ok = WritePrinter(handle, bytes, bytes.Length, out written);
                int error = ok ? 0 : Marshal.GetLastWin32Error();
                EndPagePrinter(handle);
                if (!ok) { return error; }
                if (written != bytes.Length) { return 1784; }
                return 0;
            } finally { EndDocPrinter(handle); }
        } finally { ClosePrinter(handle); }
    }
}
'@"#;

pub struct RawScriptStrategy {
    runner: Arc<dyn CommandRunner>,
    settings: Arc<TransportSettings>,
}

impl RawScriptStrategy {
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
        let script = PowerShellScript::new()
            .line(WINSPOOL_SHIM)
            .line(format!(
                "$bytes = [System.IO.File]::ReadAllBytes({})",
                script::quote(file)
            ))
            .line(format!(
                "$code = [SpoolwerkRaw]::Send({}, {}, $bytes)",
                script::quote(printer_name),
                script::quote(job_name)
            ))
            .line("if ($code -ne 0) { throw \"winspool error $code\" }")
            .emit(PRINT_OK);
        ShellCommand::powershell(
            &self.settings.powershell,
            StrategyKind::RawScript.method_name(),
            &script,
            timeout,
        )
    }
}

#[async_trait]
impl TransportStrategy for RawScriptStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RawScript
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
        debug!(bytes = job.payload.len(), "RAW job written");
        Ok(())
    }
}
