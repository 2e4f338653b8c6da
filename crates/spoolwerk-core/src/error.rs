// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Spoolwerk.
//
// Aggregate outcomes (a dispatch where every strategy failed, a diagnostics
// run whose status query broke) are reported as values, not through this
// enum. These variants cover the individual failures underneath them.

use thiserror::Error;

/// Top-level error type for all Spoolwerk operations.
#[derive(Debug, Error)]
pub enum SpoolwerkError {
    // -- Transport --
    #[error("{method} failed: {detail}")]
    StrategyFailed { method: String, detail: String },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("printer not found: {0}")]
    PrinterNotFound(String),

    #[error("invalid print request: {0}")]
    InvalidRequest(String),

    // -- Diagnostics --
    #[error("printer enumeration failed: {0}")]
    Enumeration(String),

    #[error("printer status query failed: {0}")]
    StatusQuery(String),

    // -- Spooler recovery --
    #[error("administrator privileges required to restart the print spooler")]
    PrivilegeRequired,

    #[error("spooler recovery failed: {0}")]
    Recovery(String),

    // -- Process / script plumbing --
    #[error("unexpected script output: {0}")]
    Script(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SpoolwerkError {
    /// Shorthand for a strategy-level failure.
    pub fn strategy(method: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StrategyFailed {
            method: method.into(),
            detail: detail.into(),
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpoolwerkError>;
