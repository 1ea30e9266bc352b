//! Release bookkeeping for everything a mounted mini-app has started.
//!
//! One ledger exists per mount generation. The isolated root creates it on
//! mount and disposes + drains it on unmount, so callbacks captured by an
//! older generation can tell they are stale even when the root is reused.

use std::{cell::RefCell, rc::Rc};

use crate::core::LOG_TARGET;

/// Identity of a resource handed out through the instrumented scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Timer(u32),
    Frame(u32),
    Listener(u32),
    Observer(u32),
}

type Release = Box<dyn FnOnce() -> anyhow::Result<()>>;

struct Entry {
    key: ResourceKey,
    release: Release,
}

#[derive(Default)]
struct LedgerState {
    entries: Vec<Entry>,
    disposed: bool,
    generation: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub released: usize,
    pub failed: usize,
}

/// Cheaply clonable handle; clones share one ledger.
#[derive(Clone, Default)]
pub struct ResourceLedger {
    inner: Rc<RefCell<LedgerState>>,
}

impl std::fmt::Debug for ResourceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("ResourceLedger")
            .field("generation", &state.generation)
            .field("entries", &state.entries.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl ResourceLedger {
    pub fn new(generation: u64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(LedgerState {
                generation,
                ..LedgerState::default()
            })),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.borrow().generation
    }

    /// Append a release action for `key`. A disposed ledger runs it at once.
    pub fn record<F>(&self, key: ResourceKey, release: F)
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        if self.is_disposed() {
            if let Err(err) = release() {
                tracing::warn!(
                    target: LOG_TARGET,
                    resource = ?key,
                    error = %err,
                    "late release action failed"
                );
            }
            return;
        }
        self.inner.borrow_mut().entries.push(Entry {
            key,
            release: Box::new(release),
        });
    }

    /// Drop the release action for a resource the mini-app already released.
    pub fn forget(&self, key: ResourceKey) {
        self.inner.borrow_mut().entries.retain(|e| e.key != key);
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: ResourceKey) -> bool {
        self.inner.borrow().entries.iter().any(|e| e.key == key)
    }

    /// Mark inert. Callbacks guarded by this ledger stop firing from now on.
    pub fn dispose(&self) {
        self.inner.borrow_mut().disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    /// Run every release action in FIFO order and empty the ledger.
    ///
    /// A failing release is logged and counted; the remaining ones still run.
    pub fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            // INVARIANT: no borrow is held while a release action runs.
            let batch = std::mem::take(&mut self.inner.borrow_mut().entries);
            if batch.is_empty() {
                break;
            }
            for entry in batch {
                match (entry.release)() {
                    Ok(()) => report.released += 1,
                    Err(err) => {
                        report.failed += 1;
                        tracing::warn!(
                            target: LOG_TARGET,
                            resource = ?entry.key,
                            error = %err,
                            "release action failed"
                        );
                    }
                }
            }
        }
        tracing::debug!(
            target: LOG_TARGET,
            generation = self.generation(),
            released = report.released,
            failed = report.failed,
            "ledger drained"
        );
        report
    }
}
