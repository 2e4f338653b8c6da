// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print engine facade.
//
// Wires one command runner, the spool guard, diagnostics, the dispatcher and
// spooler recovery together from an `EngineConfig`. Every part is still
// usable on its own; this type only holds them and takes the right lock
// around each call.

use std::sync::Arc;

use tracing::{info, instrument};

use spoolwerk_core::config::EngineConfig;
use spoolwerk_core::error::Result;
use spoolwerk_core::types::{
    DiagnosticsResult, DispatchMode, DispatchResult, DriverClassification, Printer, PrintRequest,
    RecoveryTier, SpoolerState,
};

use crate::classifier;
use crate::diagnostics::DiagnosticsEngine;
use crate::dispatcher::PrintDispatcher;
use crate::guard::SpoolGuard;
use crate::recovery::SpoolerRecovery;
use crate::retry::RetryingStrategy;
use crate::shell::{CommandRunner, ProcessRunner};
use crate::strategies::{StrategySet, TransportSettings, TransportStrategy};

pub struct PrintEngine {
    config: EngineConfig,
    guard: SpoolGuard,
    diagnostics: Arc<DiagnosticsEngine>,
    dispatcher: PrintDispatcher,
    recovery: SpoolerRecovery,
}

impl PrintEngine {
    /// Engine backed by real OS processes.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_runner(config, Arc::new(ProcessRunner::new()))
    }

    pub fn with_runner(config: EngineConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        config.validate()?;

        let mut strategies = StrategySet::builtin(runner.clone(), TransportSettings::from_config(&config));
        if let Some(retry) = config.retry.clone() {
            info!(max_attempts = retry.max_attempts, "strategy retry enabled");
            strategies = strategies.map(move |s| {
                Arc::new(RetryingStrategy::new(s, retry.clone())) as Arc<dyn TransportStrategy>
            });
        }

        let diagnostics = Arc::new(DiagnosticsEngine::new(runner.clone(), &config));
        let mut dispatcher = PrintDispatcher::new(strategies).with_timeout(config.strategy_timeout());
        if config.preflight {
            dispatcher = dispatcher.with_diagnostics(diagnostics.clone());
        }
        let recovery = SpoolerRecovery::new(runner, &config);

        Ok(Self {
            config,
            guard: SpoolGuard::new(),
            diagnostics,
            dispatcher,
            recovery,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn guard(&self) -> &SpoolGuard {
        &self.guard
    }

    /// Dispatch `request`. Waits for any running spooler reset first.
    #[instrument(skip(self, request), fields(printer = %request.printer_name))]
    pub async fn print(&self, request: &PrintRequest, mode: DispatchMode) -> DispatchResult {
        let _permit = self.guard.dispatch(&request.printer_name).await;
        self.dispatcher.dispatch(request, mode).await
    }

    /// Print a short plain-text test page.
    pub async fn print_test_page(&self, printer_name: &str, mode: DispatchMode) -> DispatchResult {
        self.print(&test_page(printer_name), mode).await
    }

    /// Diagnose one printer. An Error or Pending Deletion status marks the
    /// spooler `Stuck`.
    pub async fn diagnose(&self, printer_name: &str) -> DiagnosticsResult {
        let result = self.diagnostics.diagnose(printer_name).await;
        if let Some(printer) = &result.printer {
            self.recovery.observe_status(printer.status());
        }
        result
    }

    pub async fn list_printers(&self) -> Result<Vec<Printer>> {
        self.diagnostics.list_printers().await
    }

    pub async fn default_printer(&self) -> Result<Option<String>> {
        self.diagnostics.default_printer().await
    }

    pub fn classify(&self, driver_name: &str, port_name: &str) -> DriverClassification {
        classifier::classify(driver_name, port_name)
    }

    /// Two-tier spooler reset. Blocks new dispatches and waits for running
    /// ones.
    pub async fn reset_spooler(&self) -> Result<RecoveryTier> {
        let _permit = self.guard.reset().await;
        self.recovery.reset_spooler().await
    }

    /// Privileged spooler restart without trying tier 1 first.
    pub async fn restart_spooler(&self) -> Result<()> {
        let _permit = self.guard.reset().await;
        self.recovery.restart_spooler().await
    }

    pub fn spooler_state(&self) -> SpoolerState {
        self.recovery.state()
    }
}

/// A plain-text test page for `printer_name`.
pub fn test_page(printer_name: &str) -> PrintRequest {
    let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    let text = format!(
        "Spoolwerk test page\n\
         ------------------------------\n\
         Printer: {printer_name}\n\
         Printed: {now}\n\
         ------------------------------\n\
         If you can read this, printing works.\n\n\n\n"
    );
    PrintRequest::text(printer_name, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use spoolwerk_core::config::RetryConfig;

    use crate::test_support::{ScriptedRunner, failed, ok, timed_out};

    fn quiet_config() -> EngineConfig {
        EngineConfig {
            preflight: false,
            settle_delay_ms: 0,
            restart_stabilize_ms: 0,
            host_name: Some("TILL-01".into()),
            ..Default::default()
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            query_timeout_secs: 0,
            ..Default::default()
        };
        let runner = Arc::new(ScriptedRunner::new(|_| ok("")));
        assert!(PrintEngine::with_runner(config, runner).is_err());
    }

    #[test]
    fn test_page_names_the_printer() {
        let request = test_page("RONGTA 80mm");
        assert!(request.is_plain_text);
        assert!(String::from_utf8_lossy(&request.payload).contains("Printer: RONGTA 80mm"));
    }

    #[tokio::test]
    async fn print_goes_through_first_strategy() {
        let runner = Arc::new(ScriptedRunner::new(|_| ok("SPOOLWERK_PRINT_OK")));
        let engine = PrintEngine::with_runner(quiet_config(), runner.clone()).unwrap();
        let result = engine.print_test_page("RONGTA 80mm", DispatchMode::Standard).await;
        assert!(result.success);
        assert_eq!(result.method_used, "management-object");
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn retry_config_wraps_strategies() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let runner = Arc::new(ScriptedRunner::new(move |cmd| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                timed_out(cmd)
            } else {
                ok("SPOOLWERK_PRINT_OK")
            }
        }));
        let config = EngineConfig {
            retry: Some(RetryConfig {
                base_delay_ms: 1,
                max_delay_ms: 2,
                jitter: false,
                ..Default::default()
            }),
            ..quiet_config()
        };
        let engine = PrintEngine::with_runner(config, runner).unwrap();
        let result = engine
            .print(&PrintRequest::text("POS-80", "hi"), DispatchMode::Standard)
            .await;

        assert!(result.success);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reset_waits_for_dispatch_in_flight() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.label() {
            "find-stuck-printers" => ok("SPOOLWERK_STUCK 0"),
            _ => ok("SPOOLWERK_CLEARED 0"),
        }));
        let engine = Arc::new(PrintEngine::with_runner(quiet_config(), runner).unwrap());

        let permit = engine.guard().dispatch("POS-80").await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), engine.reset_spooler()).await;
        assert!(blocked.is_err());

        drop(permit);
        let tier = engine.reset_spooler().await.unwrap();
        assert_eq!(tier, RecoveryTier::NonPrivileged);
        assert_eq!(engine.spooler_state(), SpoolerState::Healthy);
    }

    #[tokio::test]
    async fn diagnosing_a_pending_deletion_printer_marks_spooler_stuck() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.label() {
            "enumerate-printers" => ok(
                r#"{"Name":"POS-80","DriverName":"POS-80","PortName":"USB001","PrinterStatus":3}"#,
            ),
            "printer-status" => ok(r#"{"PrinterStatus":3,"WorkOffline":false}"#),
            _ => failed(1, "unexpected"),
        }));
        let engine = PrintEngine::with_runner(quiet_config(), runner).unwrap();
        assert_eq!(engine.spooler_state(), SpoolerState::Healthy);

        let result = engine.diagnose("POS-80").await;
        assert!(result.printer_exists);
        assert_eq!(engine.spooler_state(), SpoolerState::Stuck);
    }

    #[tokio::test]
    async fn diagnosing_a_ready_printer_leaves_spooler_healthy() {
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.label() {
            "enumerate-printers" => ok(
                r#"[{"Name":"POS-80","DriverName":"POS-80","PortName":"USB001","PrinterStatus":0}]"#,
            ),
            "printer-status" => ok(r#"{"PrinterStatus":0,"WorkOffline":false}"#),
            _ => failed(1, "unexpected"),
        }));
        let engine = PrintEngine::with_runner(quiet_config(), runner).unwrap();
        assert!(engine.diagnose("POS-80").await.is_accessible);
        assert_eq!(engine.spooler_state(), SpoolerState::Healthy);
    }
}
