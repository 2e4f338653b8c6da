// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stuck spooler recovery.
//
// Two tiers, cheapest first:
//   1. clear the queued jobs of every printer parked in Pending Deletion
//      (no elevation needed), then let the spooler settle;
//   2. only when tier 1 failed: stop the Spooler service, wipe the spool
//      directory and start it again, each as its own bounded subprocess.
//      Needs an elevated process; without it the reset fails immediately with
//      `PrivilegeRequired`.
//
// The spooler itself belongs to the OS. `SpoolerState` is what this process
// last observed: Healthy -> Stuck when a printer reports Error or Pending
// Deletion, Recovering while a reset runs, then Healthy or Unrecoverable.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, instrument, warn};

use spoolwerk_core::config::EngineConfig;
use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::{PrinterStatus, RecoveryTier, SpoolerState};

use crate::script::{self, CLEARED, PowerShellScript, SPOOLER_RESTARTED, STUCK};
use crate::shell::{CommandOutput, CommandRunner, ShellCommand};

/// Printers whose status code is Pending Deletion.
const PENDING_DELETION_FILTER: &str =
    "$stuck = @(Get-Printer | Where-Object { [int]$_.PrinterStatus -eq 3 })";

pub struct SpoolerRecovery {
    runner: Arc<dyn CommandRunner>,
    powershell: String,
    query_timeout: Duration,
    service_timeout: Duration,
    settle_delay: Duration,
    restart_stabilize: Duration,
    spool_dir: Option<PathBuf>,
    state: Arc<Mutex<SpoolerState>>,
}

impl SpoolerRecovery {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &EngineConfig) -> Self {
        Self {
            runner,
            powershell: config.powershell.clone(),
            query_timeout: config.query_timeout(),
            service_timeout: config.service_timeout(),
            settle_delay: config.settle_delay(),
            restart_stabilize: config.restart_stabilize(),
            spool_dir: config.spool_dir.clone(),
            state: Arc::new(Mutex::new(SpoolerState::Healthy)),
        }
    }

    /// Last observed spooler state.
    pub fn state(&self) -> SpoolerState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SpoolerState::Unrecoverable)
    }

    fn set_state(&self, new_state: SpoolerState) {
        if let Ok(mut state) = self.state.lock() {
            let old = *state;
            if old != new_state {
                info!(from = ?old, to = ?new_state, "spooler state changed");
            }
            *state = new_state;
        }
    }

    /// Record a printer status seen elsewhere (diagnostics, enumeration).
    ///
    /// Error and Pending Deletion move a healthy spooler to `Stuck`; nothing
    /// else changes the state, since one ready printer says little about the
    /// others.
    pub fn observe_status(&self, status: PrinterStatus) {
        if matches!(status, PrinterStatus::Error | PrinterStatus::PendingDeletion)
            && self.state() == SpoolerState::Healthy
        {
            self.set_state(SpoolerState::Stuck);
        }
    }

    pub fn build_find_stuck(&self) -> ShellCommand {
        let script = PowerShellScript::new()
            .line(PENDING_DELETION_FILTER)
            .line(format!("Write-Output \"{STUCK} $($stuck.Count)\""));
        ShellCommand::powershell(&self.powershell, "find-stuck-printers", &script, self.query_timeout)
    }

    pub fn build_clear_pending(&self) -> ShellCommand {
        let script = PowerShellScript::new()
            .line(PENDING_DELETION_FILTER)
            .line("$cleared = 0")
            .line("foreach ($p in $stuck) {")
            .line("    $jobs = @(Get-PrintJob -PrinterName $p.Name)")
            .line("    $jobs | Remove-PrintJob")
            .line("    $cleared += $jobs.Count")
            .line("}")
            .line(format!("Write-Output \"{CLEARED} $cleared\""));
        ShellCommand::powershell(&self.powershell, "clear-pending-deletion", &script, self.query_timeout)
    }

    pub fn build_elevation_check(&self) -> ShellCommand {
        let script = PowerShellScript::new()
            .line("$identity = [Security.Principal.WindowsIdentity]::GetCurrent()")
            .line("$principal = New-Object Security.Principal.WindowsPrincipal($identity)")
            .line("Write-Output $principal.IsInRole([Security.Principal.WindowsBuiltInRole]::Administrator)");
        ShellCommand::powershell(&self.powershell, "elevation-check", &script, self.query_timeout)
    }

    pub fn build_stop_service(&self) -> ShellCommand {
        let script = PowerShellScript::new().line("Stop-Service -Name Spooler -Force");
        ShellCommand::powershell(&self.powershell, "stop-spooler", &script, self.service_timeout)
    }

    pub fn build_wipe_spool_dir(&self) -> ShellCommand {
        let spool_dir = match &self.spool_dir {
            Some(dir) => script::quote(&dir.to_string_lossy()),
            None => "(Join-Path $env:SystemRoot 'System32\\spool\\PRINTERS')".to_string(),
        };
        let script = PowerShellScript::new()
            .line(format!("$spool = {spool_dir}"))
            .line("Get-ChildItem -LiteralPath $spool -File | Remove-Item -Force");
        ShellCommand::powershell(&self.powershell, "wipe-spool-dir", &script, self.service_timeout)
    }

    pub fn build_start_service(&self) -> ShellCommand {
        let script = PowerShellScript::new()
            .line("Start-Service -Name Spooler")
            .emit(SPOOLER_RESTARTED);
        ShellCommand::powershell(&self.powershell, "start-spooler", &script, self.service_timeout)
    }

    /// Count printers stuck in Pending Deletion, marking the spooler `Stuck`
    /// when there are any.
    #[instrument(skip(self))]
    pub async fn find_stuck_printers(&self) -> Result<u32> {
        let output = self.runner.run(&self.build_find_stuck()).await?;
        if !output.success() {
            return Err(SpoolwerkError::Recovery(output.detail()));
        }
        let count = count_after(&output, STUCK)?;
        if count > 0 {
            warn!(printers = count, "printers stuck in pending deletion");
            self.observe_status(PrinterStatus::PendingDeletion);
        }
        Ok(count)
    }

    /// Tier 1: remove the queued jobs of printers stuck in Pending Deletion.
    /// Returns how many jobs were removed.
    #[instrument(skip(self))]
    pub async fn clear_pending_deletion(&self) -> Result<u32> {
        let output = self.runner.run(&self.build_clear_pending()).await?;
        if !output.success() {
            return Err(SpoolwerkError::Recovery(output.detail()));
        }
        let count = count_after(&output, CLEARED)?;
        info!(cleared = count, "stuck jobs removed");
        Ok(count)
    }

    /// Whether this process runs with administrator rights.
    pub async fn is_elevated(&self) -> Result<bool> {
        let output = self.runner.run(&self.build_elevation_check()).await?;
        match output.stdout.trim() {
            "True" => Ok(true),
            "False" => Ok(false),
            _ => Err(SpoolwerkError::Script(format!(
                "elevation check answered: {}",
                output.detail()
            ))),
        }
    }

    async fn run_service_step(&self, command: &ShellCommand) -> Result<CommandOutput> {
        let output = self.runner.run(command).await?;
        if !output.success() {
            return Err(SpoolwerkError::Recovery(format!(
                "{} failed: {}",
                command.label(),
                output.detail()
            )));
        }
        Ok(output)
    }

    async fn restart_privileged(&self) -> Result<()> {
        if !self.is_elevated().await? {
            warn!("spooler restart needs administrator rights");
            return Err(SpoolwerkError::PrivilegeRequired);
        }

        let stopped = self.run_service_step(&self.build_stop_service()).await;
        // Files are locked while the service runs, so the wipe needs the stop.
        let wiped = match &stopped {
            Ok(_) => self.run_service_step(&self.build_wipe_spool_dir()).await,
            Err(_) => Ok(CommandOutput::default()),
        };
        if let Err(e) = &wiped {
            warn!(error = %e, "spool directory not wiped, starting service anyway");
        }
        // Start runs whatever happened above.
        let started = self
            .run_service_step(&self.build_start_service())
            .await
            .and_then(|output| {
                if output.has_sentinel(SPOOLER_RESTARTED) {
                    Ok(())
                } else {
                    Err(SpoolwerkError::Recovery(output.detail()))
                }
            });

        stopped?;
        wiped?;
        started?;
        tokio::time::sleep(self.restart_stabilize).await;
        info!("print spooler restarted");
        Ok(())
    }

    /// Tier 2 only: restart the spooler and wipe the spool directory.
    #[instrument(skip(self))]
    pub async fn restart_spooler(&self) -> Result<()> {
        self.set_state(SpoolerState::Recovering);
        let result = self.restart_privileged().await;
        self.set_state(if result.is_ok() {
            SpoolerState::Healthy
        } else {
            SpoolerState::Unrecoverable
        });
        result
    }

    /// Bring a stuck spooler back, escalating to the privileged tier only
    /// when clearing jobs failed.
    #[instrument(skip(self))]
    pub async fn reset_spooler(&self) -> Result<RecoveryTier> {
        if let Err(e) = self.find_stuck_printers().await {
            warn!(error = %e, "could not count stuck printers");
        }
        self.set_state(SpoolerState::Recovering);

        match self.clear_pending_deletion().await {
            Ok(_) => {
                tokio::time::sleep(self.settle_delay).await;
                self.set_state(SpoolerState::Healthy);
                return Ok(RecoveryTier::NonPrivileged);
            }
            Err(e) => warn!(error = %e, "clearing stuck jobs failed, escalating"),
        }

        match self.restart_privileged().await {
            Ok(()) => {
                self.set_state(SpoolerState::Healthy);
                Ok(RecoveryTier::Privileged)
            }
            Err(e) => {
                self.set_state(SpoolerState::Unrecoverable);
                Err(e)
            }
        }
    }
}

/// The number on the `<prefix> <n>` line of `output`.
fn count_after(output: &CommandOutput, prefix: &str) -> Result<u32> {
    output
        .stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(prefix))
        .and_then(|n| n.trim().parse::<u32>().ok())
        .ok_or_else(|| SpoolwerkError::Script(format!("no {prefix} count in: {}", output.detail())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{OnceLock, Weak};

    use crate::test_support::{ScriptedRunner, failed, ok};

    fn config() -> EngineConfig {
        EngineConfig {
            settle_delay_ms: 0,
            restart_stabilize_ms: 0,
            ..Default::default()
        }
    }

    fn recovery(runner: Arc<ScriptedRunner>) -> SpoolerRecovery {
        SpoolerRecovery::new(runner, &config())
    }

    fn labels(runner: &ScriptedRunner) -> Vec<String> {
        runner.calls().iter().map(|c| c.label().to_string()).collect()
    }

    #[tokio::test]
    async fn tier_one_success_never_escalates() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.label() {
            "find-stuck-printers" => ok("SPOOLWERK_STUCK 1\r\n"),
            _ => ok("SPOOLWERK_CLEARED 4\r\n"),
        }));
        let r = recovery(runner.clone());
        assert_eq!(r.reset_spooler().await.unwrap(), RecoveryTier::NonPrivileged);
        assert_eq!(labels(&runner), ["find-stuck-printers", "clear-pending-deletion"]);
        assert_eq!(r.state(), SpoolerState::Healthy);
    }

    #[tokio::test]
    async fn failed_stuck_count_does_not_block_the_reset() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.label() {
            "find-stuck-printers" => failed(1, "Get-Printer : The spooler service is not reachable."),
            _ => ok("SPOOLWERK_CLEARED 0"),
        }));
        let r = recovery(runner);
        assert_eq!(r.reset_spooler().await.unwrap(), RecoveryTier::NonPrivileged);
    }

    #[tokio::test]
    async fn stuck_printers_mark_the_spooler_stuck() {
        let runner = Arc::new(ScriptedRunner::new(|_| ok("SPOOLWERK_STUCK 2\r\n")));
        let r = recovery(runner);
        assert_eq!(r.state(), SpoolerState::Healthy);
        assert_eq!(r.find_stuck_printers().await.unwrap(), 2);
        assert_eq!(r.state(), SpoolerState::Stuck);
    }

    #[tokio::test]
    async fn no_stuck_printers_keeps_the_spooler_healthy() {
        let runner = Arc::new(ScriptedRunner::new(|_| ok("SPOOLWERK_STUCK 0")));
        let r = recovery(runner);
        assert_eq!(r.find_stuck_printers().await.unwrap(), 0);
        assert_eq!(r.state(), SpoolerState::Healthy);
    }

    #[test]
    fn only_error_and_pending_deletion_mean_stuck() {
        let runner = Arc::new(ScriptedRunner::new(|_| ok("")));
        let r = recovery(runner);
        for status in [PrinterStatus::Ready, PrinterStatus::PaperOut, PrinterStatus::Offline] {
            r.observe_status(status);
            assert_eq!(r.state(), SpoolerState::Healthy);
        }
        r.observe_status(PrinterStatus::Error);
        assert_eq!(r.state(), SpoolerState::Stuck);
    }

    #[tokio::test]
    async fn stuck_spooler_recovers_through_recovering() {
        // The responder reads the recovery's state while each step runs.
        let slot: Arc<OnceLock<Weak<SpoolerRecovery>>> = Arc::new(OnceLock::new());
        let seen: Arc<Mutex<Vec<(String, SpoolerState)>>> = Arc::default();
        let runner = {
            let slot = slot.clone();
            let seen = seen.clone();
            Arc::new(ScriptedRunner::new(move |cmd| {
                if let Some(r) = slot.get().and_then(Weak::upgrade) {
                    seen.lock().unwrap().push((cmd.label().to_string(), r.state()));
                }
                match cmd.label() {
                    "find-stuck-printers" => ok("SPOOLWERK_STUCK 1"),
                    _ => ok("SPOOLWERK_CLEARED 3"),
                }
            }))
        };
        let r = Arc::new(recovery(runner));
        slot.set(Arc::downgrade(&r)).unwrap();

        r.observe_status(PrinterStatus::PendingDeletion);
        assert_eq!(r.state(), SpoolerState::Stuck);
        r.reset_spooler().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            [
                ("find-stuck-printers".to_string(), SpoolerState::Stuck),
                ("clear-pending-deletion".to_string(), SpoolerState::Recovering),
            ]
        );
        assert_eq!(r.state(), SpoolerState::Healthy);
    }

    #[tokio::test]
    async fn stuck_spooler_without_rights_is_unrecoverable() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.label() {
            "find-stuck-printers" => ok("SPOOLWERK_STUCK 1"),
            "clear-pending-deletion" => failed(1, "Access is denied."),
            "elevation-check" => ok("False\r\n"),
            _ => ok("SPOOLWERK_SPOOLER_RESTARTED"),
        }));
        let r = recovery(runner.clone());
        r.observe_status(PrinterStatus::Error);
        assert_eq!(r.state(), SpoolerState::Stuck);

        let err = r.reset_spooler().await.unwrap_err();
        assert!(matches!(err, SpoolwerkError::PrivilegeRequired));
        assert_eq!(r.state(), SpoolerState::Unrecoverable);
        assert!(
            runner
                .calls()
                .iter()
                .all(|c| !c.label().ends_with("-spooler") && c.label() != "wipe-spool-dir")
        );
        assert!(runner.scripts().iter().all(|s| !s.contains("Stop-Service")));
    }

    #[tokio::test]
    async fn elevated_escalates_to_restart() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.label() {
            "find-stuck-printers" => ok("SPOOLWERK_STUCK 1"),
            "clear-pending-deletion" => failed(1, "Remove-PrintJob : The RPC server is unavailable."),
            "elevation-check" => ok("True"),
            "start-spooler" => ok("SPOOLWERK_SPOOLER_RESTARTED\r\n"),
            _ => ok(""),
        }));
        let r = recovery(runner.clone());
        assert_eq!(r.reset_spooler().await.unwrap(), RecoveryTier::Privileged);
        assert_eq!(
            labels(&runner),
            [
                "find-stuck-printers",
                "clear-pending-deletion",
                "elevation-check",
                "stop-spooler",
                "wipe-spool-dir",
                "start-spooler"
            ]
        );
        assert_eq!(r.state(), SpoolerState::Healthy);
    }

    #[tokio::test]
    async fn failed_wipe_still_starts_the_service() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.label() {
            "elevation-check" => ok("True"),
            "wipe-spool-dir" => failed(1, "Remove-Item : The process cannot access the file."),
            "start-spooler" => ok("SPOOLWERK_SPOOLER_RESTARTED"),
            _ => ok(""),
        }));
        let r = recovery(runner.clone());
        let err = r.restart_spooler().await.unwrap_err();

        assert!(err.to_string().contains("wipe-spool-dir failed"));
        assert_eq!(labels(&runner).last().map(String::as_str), Some("start-spooler"));
        assert_eq!(r.state(), SpoolerState::Unrecoverable);
    }

    #[tokio::test]
    async fn failed_stop_skips_the_wipe_but_still_starts() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.label() {
            "elevation-check" => ok("True"),
            "stop-spooler" => failed(1, "Stop-Service : Cannot stop service 'Print Spooler'."),
            _ => ok("SPOOLWERK_SPOOLER_RESTARTED"),
        }));
        let r = recovery(runner.clone());
        assert!(r.restart_spooler().await.is_err());
        assert_eq!(labels(&runner), ["elevation-check", "stop-spooler", "start-spooler"]);
    }

    #[tokio::test]
    async fn forced_restart_skips_tier_one() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.label() {
            "elevation-check" => ok("True"),
            _ => ok("SPOOLWERK_SPOOLER_RESTARTED"),
        }));
        recovery(runner.clone()).restart_spooler().await.unwrap();
        assert!(runner.calls().iter().all(|c| c.label() != "clear-pending-deletion"));
    }

    #[tokio::test]
    async fn missing_job_count_is_a_script_error() {
        let runner = Arc::new(ScriptedRunner::new(|_| ok("")));
        let err = recovery(runner).clear_pending_deletion().await.unwrap_err();
        assert!(matches!(err, SpoolwerkError::Script(_)));
    }

    #[test]
    fn every_service_step_is_bounded() {
        let runner = Arc::new(ScriptedRunner::new(|_| ok("")));
        let r = recovery(runner);
        for cmd in [r.build_stop_service(), r.build_wipe_spool_dir(), r.build_start_service()] {
            assert!(cmd.timeout() <= Duration::from_secs(15), "{}", cmd.label());
        }
        assert!(r.build_stop_service().script().unwrap().contains("Stop-Service"));
        assert!(!r.build_wipe_spool_dir().script().unwrap().contains("Service"));
    }

    #[test]
    fn wipe_script_targets_configured_spool_dir() {
        let runner = Arc::new(ScriptedRunner::new(|_| ok("")));
        let config = EngineConfig {
            spool_dir: Some(PathBuf::from(r"D:\Spool")),
            service_timeout_secs: 12,
            ..Default::default()
        };
        let cmd = SpoolerRecovery::new(runner, &config).build_wipe_spool_dir();
        assert!(cmd.script().unwrap().contains(r"$spool = 'D:\Spool'"));
        assert_eq!(cmd.timeout(), Duration::from_secs(12));
    }

    #[test]
    fn default_spool_dir_is_under_system_root() {
        let runner = Arc::new(ScriptedRunner::new(|_| ok("")));
        let script = recovery(runner).build_wipe_spool_dir().script().unwrap().to_string();
        assert!(script.contains(r"Join-Path $env:SystemRoot 'System32\spool\PRINTERS'"));
    }
}
