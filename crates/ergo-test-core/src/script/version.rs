//! Process-wide active script version
//!
//! The evaluator reads the active version instead of taking it as a
//! parameter. The only way to set it is [`VersionScope::enter`], which holds
//! a process-wide lock for the lifetime of the guard and restores the
//! previous value on drop, including during unwinding. Two threads can never
//! interleave a set-evaluate-restore sequence.
//!
//! Scopes are reentrant on the thread that holds the lock: a nested
//! `enter` only swaps the value.

use std::cell::Cell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

const UNSET: u8 = u8::MAX;

static SCOPE_LOCK: Mutex<()> = Mutex::new(());
static ACTIVE_VERSION: AtomicU8 = AtomicU8::new(UNSET);

thread_local! {
    static SCOPE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// RAII guard establishing the active script version
#[must_use = "the version is only active while the scope is alive"]
pub struct VersionScope {
    previous: u8,
    _lock: Option<MutexGuard<'static, ()>>,
}

impl VersionScope {
    pub fn enter(version: u8) -> Self {
        let lock = if SCOPE_DEPTH.with(Cell::get) == 0 {
            Some(SCOPE_LOCK.lock().unwrap_or_else(PoisonError::into_inner))
        } else {
            None
        };
        SCOPE_DEPTH.with(|d| d.set(d.get() + 1));
        let previous = ACTIVE_VERSION.swap(version, Ordering::SeqCst);
        tracing::trace!(version, "entered script version scope");
        VersionScope {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for VersionScope {
    fn drop(&mut self) {
        ACTIVE_VERSION.store(self.previous, Ordering::SeqCst);
        SCOPE_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
        // the lock field is released after this body runs
    }
}

/// Currently active version, `None` outside any scope.
pub fn active() -> Option<u8> {
    match ACTIVE_VERSION.load(Ordering::SeqCst) {
        UNSET => None,
        v => Some(v),
    }
}
