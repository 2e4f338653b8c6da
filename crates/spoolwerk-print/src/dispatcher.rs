// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Multi-strategy print dispatch.
//
// Walks a `StrategyPlan` in order and stops at the first transport that
// reports success. Each attempt runs in its own task under an outer deadline,
// so an error, a panic or a hung subprocess all end up as one failed
// `StrategyAttempt` and the loop moves on. Strategies run strictly one after
// another; attempts are never retried here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::types::{
    DiagnosticsResult, DispatchMode, DispatchResult, PrintRequest, StrategyAttempt,
};

use crate::classifier::{StrategyPlan, classify};
use crate::diagnostics::DiagnosticsEngine;
use crate::payload::prepare_payload;
use crate::strategies::{StrategySet, TransportJob, TransportStrategy};

/// Slack on top of a strategy's own time budget before its task is aborted.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

pub struct PrintDispatcher {
    strategies: StrategySet,
    diagnostics: Option<Arc<DiagnosticsEngine>>,
    timeout_override: Option<Duration>,
    grace: Duration,
}

impl PrintDispatcher {
    pub fn new(strategies: StrategySet) -> Self {
        Self {
            strategies,
            diagnostics: None,
            timeout_override: None,
            grace: DEFAULT_GRACE,
        }
    }

    /// Attach a diagnostics engine for the pre-flight check.
    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticsEngine>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Subprocess timeout applied to every strategy unless the request
    /// carries its own.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_override = timeout;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Print `request`, choosing the strategy order from `mode`.
    #[instrument(skip(self, request), fields(printer = %request.printer_name))]
    pub async fn dispatch(&self, request: &PrintRequest, mode: DispatchMode) -> DispatchResult {
        match mode {
            DispatchMode::Standard => self.dispatch_with_plan(request, &StrategyPlan::standard()).await,
            DispatchMode::Bypass => self.dispatch_with_plan(request, &StrategyPlan::bypass()).await,
            DispatchMode::Auto => self.dispatch_auto(request).await,
        }
    }

    /// Print `request` with an explicit plan.
    pub async fn dispatch_with_plan(&self, request: &PrintRequest, plan: &StrategyPlan) -> DispatchResult {
        let payload = match prepare_payload(request) {
            Ok(p) => p,
            Err(e) => return DispatchResult::preflight_rejected(e.to_string()),
        };

        if plan.require_accessible {
            if let Some(diagnostics) = &self.diagnostics {
                let diag = diagnostics.diagnose(&request.printer_name).await;
                if let Some(reason) = rejection(&request.printer_name, &diag, true) {
                    warn!(%reason, "pre-flight check failed");
                    return DispatchResult::preflight_rejected(reason);
                }
            }
        }

        self.execute(request, payload, plan).await
    }

    async fn dispatch_auto(&self, request: &PrintRequest) -> DispatchResult {
        let Some(diagnostics) = &self.diagnostics else {
            debug!("no diagnostics attached, using standard order");
            return self.dispatch_with_plan(request, &StrategyPlan::standard()).await;
        };

        let payload = match prepare_payload(request) {
            Ok(p) => p,
            Err(e) => return DispatchResult::preflight_rejected(e.to_string()),
        };

        let diag = diagnostics.diagnose(&request.printer_name).await;
        let Some(printer) = diag.printer.as_ref().filter(|_| diag.printer_exists) else {
            let reason = rejection(&request.printer_name, &diag, false)
                .unwrap_or_else(|| format!("printer '{}' not found", request.printer_name));
            return DispatchResult::preflight_rejected(reason);
        };

        let classification = classify(&printer.driver_name, &printer.port_name);
        let plan = StrategyPlan::recommended(&classification);
        info!(
            driver = %printer.driver_name,
            port = %printer.port_name,
            recommended = ?classification.recommended_method,
            "strategy order chosen from driver"
        );

        if let Some(reason) = rejection(&request.printer_name, &diag, plan.require_accessible) {
            return DispatchResult::preflight_rejected(reason);
        }
        self.execute(request, payload, &plan).await
    }

    async fn execute(&self, request: &PrintRequest, payload: Vec<u8>, plan: &StrategyPlan) -> DispatchResult {
        let payload: Arc<[u8]> = payload.into();
        let job_name = request.job_name();
        let mut attempts = Vec::with_capacity(plan.order.len());

        for kind in &plan.order {
            let Some(strategy) = self.strategies.get(*kind) else {
                debug!(method = kind.method_name(), "strategy not registered, skipping");
                continue;
            };

            let timeout = request
                .options
                .timeout
                .or(self.timeout_override)
                .unwrap_or_else(|| strategy.default_timeout());
            let job = TransportJob {
                printer_name: request.printer_name.clone(),
                payload: payload.clone(),
                timeout,
                job_name: job_name.clone(),
            };

            let started_at = Utc::now();
            let started = Instant::now();
            let outcome = run_isolated(strategy, job, self.grace).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => {
                    info!(method = kind.method_name(), elapsed_ms, "print succeeded");
                    attempts.push(StrategyAttempt {
                        method_name: kind.method_name().to_string(),
                        success: true,
                        error_detail: None,
                        started_at,
                        elapsed_ms,
                    });
                    return DispatchResult::succeeded(kind.method_name(), attempts);
                }
                Err(detail) => {
                    warn!(method = kind.method_name(), elapsed_ms, %detail, "strategy failed");
                    attempts.push(StrategyAttempt {
                        method_name: kind.method_name().to_string(),
                        success: false,
                        error_detail: Some(detail),
                        started_at,
                        elapsed_ms,
                    });
                }
            }
        }

        warn!(attempts = attempts.len(), "every strategy failed");
        DispatchResult::exhausted(attempts)
    }
}

/// Why the pre-flight check refuses `diag`, if it does.
fn rejection(printer_name: &str, diag: &DiagnosticsResult, require_accessible: bool) -> Option<String> {
    if !diag.printer_exists {
        let mut reason = match &diag.error_detail {
            Some(detail) => format!("could not look up printer '{printer_name}': {detail}"),
            None => format!("printer '{printer_name}' not found"),
        };
        if !diag.available_printers.is_empty() {
            reason.push_str(&format!(" (available: {})", diag.available_printers.join(", ")));
        }
        return Some(reason);
    }
    if require_accessible && !diag.is_accessible {
        let mut reason = format!("printer '{printer_name}' is not ready: {}", diag.status);
        if let Some(detail) = &diag.error_detail {
            reason.push_str(&format!(" ({detail})"));
        }
        return Some(reason);
    }
    None
}

/// Run one attempt in its own task. Errors, panics and a blown deadline all
/// come back as a failure detail.
async fn run_isolated(
    strategy: Arc<dyn TransportStrategy>,
    job: TransportJob,
    grace: Duration,
) -> std::result::Result<(), String> {
    let kind = strategy.kind();
    let deadline = strategy.time_budget(job.timeout).saturating_add(grace);
    let mut handle = tokio::spawn(async move { strategy.attempt(&job).await });

    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Err(join_err)) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            Err(format!("{kind} panicked: {message}"))
        }
        Ok(Err(join_err)) => Err(format!("{kind} was cancelled: {join_err}")),
        Err(_) => {
            // Wait for the aborted task to unwind so its temp file is gone
            // before the next strategy starts.
            handle.abort();
            let _ = handle.await;
            Err(format!("{kind} exceeded its {}ms deadline", deadline.as_millis()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use spoolwerk_core::config::EngineConfig;
    use spoolwerk_core::error::{Result, SpoolwerkError};
    use spoolwerk_core::types::{ALL_METHODS_FAILED, PREFLIGHT_FAILED, PrintOptions, StrategyKind};

    use crate::payload::PayloadFile;
    use crate::strategies::TransportSettings;
    use crate::test_support::{ScriptedRunner, failed, ok};

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        Hang,
    }

    /// Records the order strategies were invoked in.
    type CallLog = Arc<Mutex<Vec<StrategyKind>>>;

    struct FakeStrategy {
        kind: StrategyKind,
        behaviour: Behaviour,
        log: CallLog,
        temp_dir: Option<std::path::PathBuf>,
    }

    #[async_trait]
    impl TransportStrategy for FakeStrategy {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        fn default_timeout(&self) -> Duration {
            Duration::from_millis(20)
        }

        async fn attempt(&self, job: &TransportJob) -> Result<()> {
            self.log.lock().unwrap().push(self.kind);
            let _file = match &self.temp_dir {
                Some(dir) => Some(PayloadFile::create(Some(dir), &job.payload)?),
                None => None,
            };
            match self.behaviour {
                Behaviour::Succeed => Ok(()),
                Behaviour::Fail => Err(SpoolwerkError::strategy(self.kind.method_name(), "boom")),
                Behaviour::Panic => panic!("driver exploded"),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }

    fn fake_set(
        behaviour: impl Fn(StrategyKind) -> Behaviour,
        temp_dir: Option<&std::path::Path>,
    ) -> (StrategySet, CallLog) {
        let log: CallLog = Arc::default();
        let mut set = StrategySet::new();
        for kind in StrategyKind::all() {
            set.insert(Arc::new(FakeStrategy {
                kind: *kind,
                behaviour: behaviour(*kind),
                log: log.clone(),
                temp_dir: temp_dir.map(|d| d.to_path_buf()),
            }));
        }
        (set, log)
    }

    fn request() -> PrintRequest {
        PrintRequest::raw("RONGTA 80mm", vec![0x1B, 0x40, b'h', b'i'])
    }

    fn dispatcher(set: StrategySet) -> PrintDispatcher {
        PrintDispatcher::new(set).with_grace(Duration::from_millis(50))
    }

    /// Diagnostics whose enumeration shows one printer with the given
    /// driver, port and status code.
    fn diagnostics_for(driver: &'static str, port: &'static str, status: i64) -> Arc<DiagnosticsEngine> {
        let list = format!(
            r#"[{{"Name":"RONGTA 80mm","DriverName":"{driver}","PortName":"{port}","PrinterStatus":{status}}}]"#
        );
        let status_json = format!(r#"{{"PrinterStatus":{status},"WorkOffline":false}}"#);
        let runner = Arc::new(ScriptedRunner::new(move |cmd| match cmd.label() {
            "enumerate-printers" => ok(&list),
            "printer-status" => ok(&status_json),
            _ => failed(1, "unexpected"),
        }));
        Arc::new(DiagnosticsEngine::new(runner, &EngineConfig::default()))
    }

    #[tokio::test]
    async fn all_fail_reports_every_attempt() {
        let (set, log) = fake_set(|_| Behaviour::Fail, None);
        let result = dispatcher(set).dispatch(&request(), DispatchMode::Standard).await;

        assert!(!result.success);
        assert_eq!(result.method_used, ALL_METHODS_FAILED);
        assert_eq!(result.attempts.len(), 4);
        assert!(result.attempts.iter().all(|a| !a.success && a.error_detail.is_some()));
        assert_eq!(log.lock().unwrap().len(), 4);
        assert!(result.details.contains("management-object: management-object failed: boom"));
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let (set, log) = fake_set(
            |k| if k == StrategyKind::RawScript { Behaviour::Succeed } else { Behaviour::Fail },
            None,
        );
        let result = dispatcher(set).dispatch(&request(), DispatchMode::Bypass).await;

        assert!(result.success);
        assert_eq!(result.method_used, "raw-script");
        assert_eq!(result.attempts.len(), 3);
        assert!(result.attempts.last().unwrap().success);
        assert_eq!(
            *log.lock().unwrap(),
            [StrategyKind::PortCopy, StrategyKind::LegacyCommand, StrategyKind::RawScript]
        );
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let (set, _) = fake_set(
            |k| match k {
                StrategyKind::ManagementObject => Behaviour::Panic,
                _ => Behaviour::Succeed,
            },
            None,
        );
        let result = dispatcher(set).dispatch(&request(), DispatchMode::Standard).await;

        assert!(result.success);
        assert_eq!(result.method_used, "managed-queue");
        let first = &result.attempts[0];
        assert!(!first.success);
        assert!(first.error_detail.as_deref().unwrap().contains("driver exploded"));
    }

    #[tokio::test]
    async fn hung_strategy_is_aborted_and_its_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (set, _) = fake_set(
            |k| match k {
                StrategyKind::PortCopy => Behaviour::Hang,
                _ => Behaviour::Fail,
            },
            Some(dir.path()),
        );
        let result = dispatcher(set).dispatch(&request(), DispatchMode::Bypass).await;

        assert!(!result.success);
        assert!(result.attempts[0].error_detail.as_deref().unwrap().contains("deadline"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn real_strategies_leave_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| failed(1, "Access is denied.")));
        let set = StrategySet::builtin(
            runner.clone(),
            TransportSettings {
                powershell: "powershell.exe".into(),
                cmd: "cmd.exe".into(),
                temp_dir: Some(dir.path().to_path_buf()),
                host_name: "TILL-01".into(),
            },
        );
        let result = dispatcher(set).dispatch(&request(), DispatchMode::Bypass).await;

        assert!(!result.success);
        assert_eq!(result.attempts.len(), 5);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn successful_strategies_leave_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|cmd| match cmd.label() {
            "port-query" => ok("USB001\r\n"),
            _ => ok("        1 file(s) copied.\r\nSPOOLWERK_PRINT_OK\r\n"),
        }));
        let set = StrategySet::builtin(
            runner.clone(),
            TransportSettings {
                powershell: "powershell.exe".into(),
                cmd: "cmd.exe".into(),
                temp_dir: Some(dir.path().to_path_buf()),
                host_name: "TILL-01".into(),
            },
        );
        let dispatcher = dispatcher(set);

        for kind in StrategyKind::all() {
            let plan = StrategyPlan {
                order: vec![*kind],
                require_accessible: false,
            };
            let result = dispatcher.dispatch_with_plan(&request(), &plan).await;
            assert!(result.success, "{kind}: {}", result.details);
            assert_eq!(result.method_used, kind.method_name());
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0, "{kind}");
        }
    }

    #[tokio::test]
    async fn oversized_timeout_is_rejected_not_panicked() {
        let (set, log) = fake_set(|_| Behaviour::Succeed, None);
        let request = request().with_options(PrintOptions {
            timeout: Some(Duration::from_secs(u64::MAX)),
            ..Default::default()
        });
        let result = dispatcher(set).dispatch(&request, DispatchMode::Bypass).await;

        assert!(!result.success);
        assert_eq!(result.method_used, PREFLIGHT_FAILED);
        assert!(result.details.contains("timeout"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn deadline_saturates_for_huge_budgets() {
        let strategy: Arc<dyn TransportStrategy> = Arc::new(FakeStrategy {
            kind: StrategyKind::PortCopy,
            behaviour: Behaviour::Succeed,
            log: Arc::default(),
            temp_dir: None,
        });
        let job = TransportJob {
            printer_name: "RONGTA 80mm".into(),
            payload: Arc::from(&b"hi"[..]),
            timeout: Duration::MAX,
            job_name: "j".into(),
        };
        assert_eq!(run_isolated(strategy, job, Duration::from_secs(5)).await, Ok(()));
    }

    #[tokio::test]
    async fn preflight_rejects_missing_printer() {
        let (set, log) = fake_set(|_| Behaviour::Succeed, None);
        let result = dispatcher(set)
            .with_diagnostics(diagnostics_for("RONGTA 80mm Series Printer", "USB001", 0))
            .dispatch(&PrintRequest::text("Kitchen", "hi"), DispatchMode::Standard)
            .await;

        assert!(!result.success);
        assert_eq!(result.method_used, PREFLIGHT_FAILED);
        assert!(result.attempts.is_empty());
        assert!(result.details.contains("available: RONGTA 80mm"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn preflight_rejects_inaccessible_printer_in_standard_mode() {
        let (set, log) = fake_set(|_| Behaviour::Succeed, None);
        let result = dispatcher(set)
            .with_diagnostics(diagnostics_for("Generic / Text Only", "USB001", 5))
            .dispatch(&request(), DispatchMode::Standard)
            .await;

        assert_eq!(result.method_used, PREFLIGHT_FAILED);
        assert!(result.details.contains("Paper Out"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bypass_ignores_reported_status() {
        let (set, _) = fake_set(|_| Behaviour::Succeed, None);
        let result = dispatcher(set)
            .with_diagnostics(diagnostics_for("RONGTA 80mm Series Printer", "USB001", 8))
            .dispatch(&request(), DispatchMode::Bypass)
            .await;

        assert!(result.success);
        assert_eq!(result.method_used, "port-copy");
    }

    #[tokio::test]
    async fn auto_mode_sends_thermal_printer_direct() {
        let (set, log) = fake_set(|_| Behaviour::Fail, None);
        let result = dispatcher(set)
            .with_diagnostics(diagnostics_for("RONGTA 80mm Series Printer", "USB001", 3))
            .dispatch(&request(), DispatchMode::Auto)
            .await;

        assert_eq!(result.method_used, ALL_METHODS_FAILED);
        let order = log.lock().unwrap().clone();
        let pos = |k: StrategyKind| order.iter().position(|x| *x == k).unwrap();
        assert_eq!(order[0], StrategyKind::PortCopy);
        assert!(pos(StrategyKind::PortCopy) < pos(StrategyKind::ManagementObject));
    }

    #[tokio::test]
    async fn auto_mode_gates_spooler_printers() {
        let (set, log) = fake_set(|_| Behaviour::Succeed, None);
        let result = dispatcher(set)
            .with_diagnostics(diagnostics_for("Microsoft Print To PDF", "PORTPROMPT:", 1))
            .dispatch(&request(), DispatchMode::Auto)
            .await;

        assert_eq!(result.method_used, PREFLIGHT_FAILED);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn auto_mode_without_diagnostics_uses_standard_order() {
        let (set, log) = fake_set(|_| Behaviour::Succeed, None);
        let result = dispatcher(set).dispatch(&request(), DispatchMode::Auto).await;
        assert_eq!(result.method_used, "management-object");
        assert_eq!(*log.lock().unwrap(), [StrategyKind::ManagementObject]);
    }

    #[tokio::test]
    async fn invalid_request_runs_nothing() {
        let (set, log) = fake_set(|_| Behaviour::Succeed, None);
        let request = request().with_options(PrintOptions {
            copies: 0,
            ..Default::default()
        });
        let result = dispatcher(set).dispatch(&request, DispatchMode::Bypass).await;
        assert!(!result.success);
        assert!(result.attempts.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn request_timeout_reaches_strategies() {
        let runner = Arc::new(ScriptedRunner::new(|_| failed(1, "nope")));
        let set = StrategySet::builtin(
            runner.clone(),
            TransportSettings {
                powershell: "powershell.exe".into(),
                cmd: "cmd.exe".into(),
                temp_dir: None,
                host_name: "TILL-01".into(),
            },
        );
        let request = request().with_options(PrintOptions {
            timeout: Some(Duration::from_secs(3)),
            ..Default::default()
        });
        dispatcher(set).dispatch(&request, DispatchMode::Standard).await;
        assert!(runner.calls().iter().all(|c| c.timeout() == Duration::from_secs(3)));
    }
}
