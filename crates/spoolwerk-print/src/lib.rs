// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk Print — multi-strategy raw print dispatch, driver classification,
// printer diagnostics and spooler recovery on top of the Windows print
// subsystem. This crate bridges between the core domain types defined in
// `spoolwerk-core` and the OS processes that actually move the bytes.

pub mod classifier;
pub mod diagnostics;
pub mod dispatcher;
pub mod engine;
pub mod guard;
pub mod payload;
pub mod recovery;
pub mod retry;
pub mod script;
pub mod shell;
pub mod strategies;

#[cfg(test)]
mod test_support;

pub use classifier::{StrategyPlan, classify};
pub use diagnostics::{DiagnosticsEngine, support_summary};
pub use dispatcher::PrintDispatcher;
pub use engine::PrintEngine;
pub use guard::SpoolGuard;
pub use recovery::SpoolerRecovery;
pub use retry::RetryingStrategy;
pub use shell::{CommandRunner, ProcessRunner};
pub use strategies::{StrategySet, TransportStrategy};
