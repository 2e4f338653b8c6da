// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Process-wide exclusion between print dispatches and spooler resets.
//
// A dispatch holds the global lock shared plus its printer's lock
// exclusively, so dispatches to different printers run side by side while
// two dispatches to the same printer queue up. A spooler reset holds the
// global lock exclusively and therefore waits for every in-flight dispatch
// (and blocks new ones) until it is done. A printer's lock is dropped from
// the map when its last permit is released and nobody else is waiting on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

type PrinterLocks = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Clone, Default)]
pub struct SpoolGuard {
    global: Arc<RwLock<()>>,
    printers: PrinterLocks,
}

/// Held for the duration of one dispatch.
#[derive(Debug)]
pub struct DispatchPermit {
    printer: Option<OwnedMutexGuard<()>>,
    printer_name: String,
    printers: PrinterLocks,
    _global: OwnedRwLockReadGuard<()>,
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        // The guard owns a clone of the lock's Arc.
        drop(self.printer.take());
        let mut printers = lock_map(&self.printers);
        if printers
            .get(&self.printer_name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            printers.remove(&self.printer_name);
            debug!(printer = %self.printer_name, "printer lock released");
        }
    }
}

/// Held for the duration of one spooler reset.
#[derive(Debug)]
pub struct ResetPermit {
    _global: OwnedRwLockWriteGuard<()>,
}

impl SpoolGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn dispatch(&self, printer_name: &str) -> DispatchPermit {
        let global = self.global.clone().read_owned().await;
        let printer = self.printer_lock(printer_name).lock_owned().await;
        debug!(printer = printer_name, "dispatch permit acquired");
        DispatchPermit {
            printer: Some(printer),
            printer_name: printer_name.to_string(),
            printers: self.printers.clone(),
            _global: global,
        }
    }

    pub async fn reset(&self) -> ResetPermit {
        let global = self.global.clone().write_owned().await;
        debug!("reset permit acquired");
        ResetPermit { _global: global }
    }

    fn printer_lock(&self, printer_name: &str) -> Arc<AsyncMutex<()>> {
        lock_map(&self.printers)
            .entry(printer_name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Map updates are single inserts or removes, so a poisoned map is still
/// consistent.
fn lock_map(printers: &PrinterLocks) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    printers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
