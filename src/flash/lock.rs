//! Process-wide flash mutex.
//!
//! Both STM32 flashers hold this for their entire run so two transports can
//! never flash the same board concurrently, and so USB/serial drivers are
//! shielded from the IRQ overload concurrent flashing can cause on some
//! hosts. An explicit value the application owns and injects into each
//! flasher, rather than an ambient global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Who is currently holding the flash lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashHolder {
    Serial,
    Dfu,
    ArduPilot,
}

struct LockState {
    holder: Option<FlashHolder>,
    started_at: Option<Instant>,
}

/// A process-wide exclusive lock. Cloning shares the same underlying lock
/// (it's reference-counted internally via `Arc` semantics through
/// `std::sync::Mutex` held behind a `'static` or injected owner) — in
/// practice the application constructs one `FlashLock` at startup and
/// injects `&FlashLock` into every flasher and command handler.
pub struct FlashLock {
    state: Mutex<LockState>,
    held: AtomicBool,
}

impl Default for FlashLock {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                holder: None,
                started_at: None,
            }),
            held: AtomicBool::new(false),
        }
    }

    /// Attempt to acquire the lock for `holder`. Returns `false` without
    /// blocking if the lock is already held.
    pub fn acquire(&self, holder: FlashHolder) -> bool {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.holder = Some(holder);
        state.started_at = Some(Instant::now());
        true
    }

    /// Release the lock. A no-op if not currently held.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.holder = None;
        state.started_at = None;
        self.held.store(false, Ordering::Release);
    }

    /// Unconditionally clear the lock, for operator-triggered recovery when
    /// a flasher crashed or hung without releasing normally.
    pub fn force_release(&self) {
        self.release();
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    pub fn holder(&self) -> Option<FlashHolder> {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).holder
    }

    /// Elapsed time since the lock was acquired, or `None` if not held.
    /// Monotonic for the duration the lock is held.
    pub fn duration(&self) -> Option<Duration> {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .started_at
            .map(|t| t.elapsed())
    }
}

/// RAII guard that releases the lock on drop, so every exit path of a
/// flasher — success, early return, or a `?`-propagated error — releases
/// it without a manual `finally`.
pub struct FlashLockGuard<'a> {
    lock: &'a FlashLock,
}

impl FlashLock {
    /// Acquire the lock and return a guard that releases it on drop, or
    /// `None` if already held.
    pub fn acquire_guard(&self, holder: FlashHolder) -> Option<FlashLockGuard<'_>> {
        if self.acquire(holder) {
            Some(FlashLockGuard { lock: self })
        } else {
            None
        }
    }
}

impl Drop for FlashLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
