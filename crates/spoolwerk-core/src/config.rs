// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpoolwerkError};
use crate::types::{MAX_STRATEGY_TIMEOUT, StatusPolicy};

/// Allowed per-step timeout for spooler service control.
pub const SERVICE_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 10..=15;

/// Persistent engine settings. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// PowerShell executable used for every scripted strategy and query.
    pub powershell: String,
    /// Command interpreter used for `copy /B` and `print`.
    pub cmd: String,
    /// Timeout for enumeration and status queries.
    pub query_timeout_secs: u64,
    /// Overrides every strategy's default timeout when set.
    pub strategy_timeout_secs: Option<u64>,
    /// Directory for per-attempt payload files (system temp dir when unset).
    pub temp_dir: Option<PathBuf>,
    /// Host name for `\\host\printer` share paths (`COMPUTERNAME` when unset).
    pub host_name: Option<String>,
    /// Interpretation of ambiguous status codes.
    pub status_policy: StatusPolicy,
    /// Run the accessibility pre-flight before standard dispatches.
    pub preflight: bool,
    /// Wait after clearing stuck jobs.
    pub settle_delay_ms: u64,
    /// Wait after restarting the spooler service.
    pub restart_stabilize_ms: u64,
    /// Timeout for each spooler service step (stop, wipe, start).
    pub service_timeout_secs: u64,
    /// Spool directory wiped by the privileged recovery tier
    /// (`%SystemRoot%\System32\spool\PRINTERS` when unset).
    pub spool_dir: Option<PathBuf>,
    /// Wrap every strategy in a retry-with-backoff decorator when set.
    pub retry: Option<RetryConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            powershell: "powershell.exe".into(),
            cmd: "cmd.exe".into(),
            query_timeout_secs: 10,
            strategy_timeout_secs: None,
            temp_dir: None,
            host_name: None,
            status_policy: StatusPolicy::default(),
            preflight: true,
            settle_delay_ms: 2_000,
            restart_stabilize_ms: 3_000,
            service_timeout_secs: 15,
            spool_dir: None,
            retry: None,
        }
    }
}

impl EngineConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn strategy_timeout(&self) -> Option<Duration> {
        self.strategy_timeout_secs.map(Duration::from_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn restart_stabilize(&self) -> Duration {
        Duration::from_millis(self.restart_stabilize_ms)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }

    /// Host name for share-style printer paths.
    pub fn resolved_host_name(&self) -> String {
        self.host_name
            .clone()
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "localhost".into())
    }

    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.powershell.trim().is_empty() || self.cmd.trim().is_empty() {
            return Err(SpoolwerkError::Config("shell executables must not be empty".into()));
        }
        if self.query_timeout_secs == 0 {
            return Err(SpoolwerkError::Config("query timeout must be at least one second".into()));
        }
        if !SERVICE_TIMEOUT_RANGE.contains(&self.service_timeout_secs) {
            return Err(SpoolwerkError::Config(format!(
                "service timeout must be between {} and {} seconds",
                SERVICE_TIMEOUT_RANGE.start(),
                SERVICE_TIMEOUT_RANGE.end()
            )));
        }
        if let Some(secs) = self.strategy_timeout_secs {
            if secs == 0 || secs > MAX_STRATEGY_TIMEOUT.as_secs() {
                return Err(SpoolwerkError::Config(format!(
                    "strategy timeout must be between 1 and {} seconds",
                    MAX_STRATEGY_TIMEOUT.as_secs()
                )));
            }
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }
}

/// Retry-with-backoff policy for wrapping an individual strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Add spread in `[0, base)` to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SpoolwerkError::Config("retry.max_attempts must be at least 1".into()));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(SpoolwerkError::Config("retry.multiplier must be >= 1.0".into()));
        }
        Ok(())
    }
}
