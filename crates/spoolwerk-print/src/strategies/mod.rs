// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transport strategies: interchangeable OS-level paths for pushing a payload
// to a named printer.
//
// Each strategy materialises the payload into its own temp file, builds one
// typed command per OS step, and reports a typed failure rather than letting
// a process or I/O error escape. Ordering is decided elsewhere (the
// dispatcher's plan); strategies know nothing about each other.

pub mod legacy_command;
pub mod managed_queue;
pub mod management_object;
pub mod port_copy;
pub mod raw_script;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use spoolwerk_core::config::EngineConfig;
use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::StrategyKind;

use crate::shell::{CommandOutput, CommandRunner, ShellCommand};

pub use legacy_command::LegacyCommandStrategy;
pub use managed_queue::ManagedQueueStrategy;
pub use management_object::ManagementObjectStrategy;
pub use port_copy::PortCopyStrategy;
pub use raw_script::RawScriptStrategy;

/// What a strategy is asked to print.
#[derive(Debug, Clone)]
pub struct TransportJob {
    /// Exact OS printer name.
    pub printer_name: String,
    /// Prepared bytes (line endings and copies already applied).
    pub payload: Arc<[u8]>,
    /// Subprocess deadline for each step of this attempt.
    pub timeout: Duration,
    /// Name shown in the spooler queue.
    pub job_name: String,
}

/// One OS-level transport mechanism.
#[async_trait]
pub trait TransportStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Subprocess timeout used when the request does not override it.
    fn default_timeout(&self) -> Duration;

    /// Longest time one `attempt` may take when every subprocess step is
    /// bounded by `timeout`.
    fn time_budget(&self, timeout: Duration) -> Duration {
        timeout
    }

    /// Push `job.payload` to `job.printer_name`.
    async fn attempt(&self, job: &TransportJob) -> Result<()>;
}

/// Shared settings for the built-in strategies.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub powershell: String,
    pub cmd: String,
    pub temp_dir: Option<PathBuf>,
    pub host_name: String,
}

impl TransportSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            powershell: config.powershell.clone(),
            cmd: config.cmd.clone(),
            temp_dir: config.temp_dir.clone(),
            host_name: config.resolved_host_name(),
        }
    }

    /// `\\host\printer`, or the name itself when it already is a UNC
    /// connection (`\\SERVER\Kitchen`).
    pub fn share_path(&self, printer_name: &str) -> String {
        if printer_name.starts_with(r"\\") {
            printer_name.to_string()
        } else {
            format!(r"\\{}\{}", self.host_name, printer_name)
        }
    }
}

/// Run one step of a strategy, turning process start-up failures into a
/// strategy failure. Timeouts pass through unchanged.
pub(crate) async fn run_step(
    runner: &dyn CommandRunner,
    kind: StrategyKind,
    command: &ShellCommand,
) -> Result<CommandOutput> {
    runner.run(command).await.map_err(|e| match e {
        SpoolwerkError::Io(io) => SpoolwerkError::strategy(
            kind.method_name(),
            format!("could not start {}: {io}", command.program()),
        ),
        other => other,
    })
}

/// Strategies available to a dispatcher, keyed by kind.
#[derive(Clone, Default)]
pub struct StrategySet {
    strategies: HashMap<StrategyKind, Arc<dyn TransportStrategy>>,
}

impl StrategySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All five built-in strategies sharing one runner.
    pub fn builtin(runner: Arc<dyn CommandRunner>, settings: TransportSettings) -> Self {
        let settings = Arc::new(settings);
        Self::new()
            .with(ManagementObjectStrategy::new(runner.clone(), settings.clone()))
            .with(ManagedQueueStrategy::new(runner.clone(), settings.clone()))
            .with(PortCopyStrategy::new(runner.clone(), settings.clone()))
            .with(LegacyCommandStrategy::new(runner.clone(), settings.clone()))
            .with(RawScriptStrategy::new(runner, settings))
    }

    pub fn with(mut self, strategy: impl TransportStrategy + 'static) -> Self {
        self.insert(Arc::new(strategy));
        self
    }

    /// Register (or replace) the strategy for its kind.
    pub fn insert(&mut self, strategy: Arc<dyn TransportStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: StrategyKind) -> Option<Arc<dyn TransportStrategy>> {
        self.strategies.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Replace every strategy with `wrap(strategy)`.
    pub fn map<F>(mut self, wrap: F) -> Self
    where
        F: Fn(Arc<dyn TransportStrategy>) -> Arc<dyn TransportStrategy>,
    {
        for strategy in self.strategies.values_mut() {
            *strategy = wrap(strategy.clone());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    fn settings() -> TransportSettings {
        TransportSettings {
            powershell: "powershell.exe".into(),
            cmd: "cmd.exe".into(),
            temp_dir: None,
            host_name: "TILL-01".into(),
        }
    }

    #[test]
    fn share_path_uses_local_host() {
        assert_eq!(settings().share_path("POS-80"), r"\\TILL-01\POS-80");
    }

    #[test]
    fn share_path_keeps_unc_connections() {
        assert_eq!(settings().share_path(r"\\BACKOFFICE\Kitchen"), r"\\BACKOFFICE\Kitchen");
    }

    #[test]
    fn builtin_set_registers_every_kind() {
        let runner = Arc::new(ScriptedRunner::new(|_| crate::test_support::ok("")));
        let set = StrategySet::builtin(runner, settings());
        assert_eq!(set.len(), StrategyKind::all().len());
        for kind in StrategyKind::all() {
            assert_eq!(set.get(*kind).unwrap().kind(), *kind);
        }
    }

    #[tokio::test]
    async fn process_start_failure_becomes_strategy_failure() {
        let runner = ScriptedRunner::new(|_| {
            Err(SpoolwerkError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "program not found",
            )))
        });
        let cmd = ShellCommand::new("cmd.exe", "port-copy", Duration::from_secs(1));
        let err = run_step(&runner, StrategyKind::PortCopy, &cmd).await.unwrap_err();
        match err {
            SpoolwerkError::StrategyFailed { method, detail } => {
                assert_eq!(method, "port-copy");
                assert!(detail.contains("could not start cmd.exe"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
