// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry with exponential backoff + jitter around a single transport strategy.
//
// Classifies errors into Transient (auto-retry), UserAction (wait for user),
// and Permanent (give up). Only transient errors trigger automatic retries.
// The dispatcher itself never retries; wrapping is opt-in via
// `EngineConfig.retry`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use spoolwerk_core::config::RetryConfig;
use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::{ErrorClass, StrategyKind};

use crate::strategies::{TransportJob, TransportStrategy};

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry: error is permanent or user action needed.
    GiveUp(ErrorClass),
    /// Maximum attempts exhausted.
    Exhausted,
}

/// Classify a `SpoolwerkError` into an `ErrorClass` for retry decisions.
pub fn classify_error(err: &SpoolwerkError) -> ErrorClass {
    match err {
        SpoolwerkError::Timeout { .. } => ErrorClass::Transient,
        SpoolwerkError::StrategyFailed { detail, .. } => classify_detail(detail),
        SpoolwerkError::Enumeration(_) => ErrorClass::Transient,
        SpoolwerkError::StatusQuery(_) => ErrorClass::Transient,
        SpoolwerkError::Recovery(_) => ErrorClass::Transient,

        SpoolwerkError::PrivilegeRequired => ErrorClass::UserAction,

        SpoolwerkError::PrinterNotFound(_) => ErrorClass::Permanent,
        SpoolwerkError::InvalidRequest(_) => ErrorClass::Permanent,
        SpoolwerkError::Config(_) => ErrorClass::Permanent,
        SpoolwerkError::Script(_) => ErrorClass::Permanent,
        SpoolwerkError::Serialization(_) => ErrorClass::Permanent,

        SpoolwerkError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ErrorClass::UserAction
            }
            _ => ErrorClass::Transient,
        },
    }
}

/// Classify the detail text of a failed strategy.
fn classify_detail(detail: &str) -> ErrorClass {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("access is denied") || lower.contains("paper") || lower.contains("offline") {
        return ErrorClass::UserAction;
    }

    // The same mechanism will fail the same way again.
    if lower.contains("no win32_printer")
        || lower.contains("is virtual")
        || lower.contains("could not start")
        || lower.contains("invalid printer name")
    {
        return ErrorClass::Permanent;
    }

    // Default to transient (optimistic: retry first, give up later)
    ErrorClass::Transient
}

/// Decide whether to retry after attempt number `attempt` (zero-based) failed.
pub fn should_retry(err: &SpoolwerkError, attempt: u32, config: &RetryConfig) -> RetryDecision {
    match classify_error(err) {
        ErrorClass::Permanent => {
            info!("permanent error, not retrying");
            RetryDecision::GiveUp(ErrorClass::Permanent)
        }
        ErrorClass::UserAction => {
            info!("user action required, not auto-retrying");
            RetryDecision::GiveUp(ErrorClass::UserAction)
        }
        ErrorClass::Transient => {
            if attempt + 1 >= config.max_attempts {
                warn!(attempt, max = config.max_attempts, "retry limit exhausted");
                RetryDecision::Exhausted
            } else {
                let delay = compute_delay(attempt, config);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling retry");
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// Exponential backoff with jitter.
///
/// delay = min(base * multiplier^attempt + jitter, max_delay)
pub fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay_ms;
    let factor = config.multiplier.max(1.0).powi(attempt.min(16) as i32);
    let exp_ms = (base_ms as f64 * factor).min(u64::MAX as f64) as u64;

    let jitter_ms = if config.jitter { jitter(base_ms, attempt) } else { 0 };
    let total_ms = exp_ms.saturating_add(jitter_ms);
    Duration::from_millis(total_ms.min(config.max_delay_ms))
}

/// Deterministic spread in `[0, base)` from the attempt number.
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64 + 1).wrapping_mul(6364136223846793005);
    (hash >> 33) % base_ms.max(1)
}

/// A strategy that retries transient failures of the wrapped one.
pub struct RetryingStrategy {
    inner: Arc<dyn TransportStrategy>,
    config: RetryConfig,
}

impl RetryingStrategy {
    pub fn new(inner: Arc<dyn TransportStrategy>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl TransportStrategy for RetryingStrategy {
    fn kind(&self) -> StrategyKind {
        self.inner.kind()
    }

    fn default_timeout(&self) -> Duration {
        self.inner.default_timeout()
    }

    /// Every attempt plus the backoff sleeps between them.
    fn time_budget(&self, timeout: Duration) -> Duration {
        let per_attempt = self.inner.time_budget(timeout);
        let mut total = per_attempt;
        for attempt in 0..self.config.max_attempts.saturating_sub(1) {
            total = total
                .saturating_add(compute_delay(attempt, &self.config))
                .saturating_add(per_attempt);
        }
        total
    }

    async fn attempt(&self, job: &TransportJob) -> Result<()> {
        let mut attempt = 0;
        loop {
            let err = match self.inner.attempt(job).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            match should_retry(&err, attempt, &self.config) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        method = self.kind().method_name(),
                        attempt,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp(_) | RetryDecision::Exhausted => return Err(err),
            }
        }
    }
}
