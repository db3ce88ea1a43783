//! Global state for the interception façade: the process-wide
//! `AllocationRegistry` and the once-only shutdown-hook registration.
//!
//! Manual atomic init instead of `OnceLock`: under `LD_PRELOAD`, a reentrant
//! call into our own `malloc` while `OnceLock::get_or_init`'s internal
//! `Once` is held would futex-wait on a lock its own holder can never
//! release from the same thread.

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};

use heapwarden_core::AllocationRegistry;

const STATE_UNINIT: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;

static REGISTRY_STATE: AtomicU8 = AtomicU8::new(STATE_UNINIT);
static REGISTRY_PTR: AtomicPtr<AllocationRegistry> = AtomicPtr::new(std::ptr::null_mut());

/// The global registry, or `None` while it is still being constructed
/// (reentrant guard) — callers on that path fall through to the real
/// allocator untracked, exactly like a pre-init allocation.
pub(crate) fn try_global_registry() -> Option<&'static AllocationRegistry> {
    let state = REGISTRY_STATE.load(Ordering::Acquire);

    if state == STATE_READY {
        let ptr = REGISTRY_PTR.load(Ordering::Acquire);
        // SAFETY: only ever set, once, to a `Box::into_raw` pointer below,
        // and never freed for the lifetime of the process.
        return Some(unsafe { &*ptr });
    }

    if state == STATE_INITIALIZING {
        return None;
    }

    if REGISTRY_STATE
        .compare_exchange(
            STATE_UNINIT,
            STATE_INITIALIZING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        return if REGISTRY_STATE.load(Ordering::Acquire) == STATE_READY {
            let ptr = REGISTRY_PTR.load(Ordering::Acquire);
            Some(unsafe { &*ptr })
        } else {
            None
        };
    }

    let registry = Box::new(AllocationRegistry::new());
    let ptr = Box::into_raw(registry);
    REGISTRY_PTR.store(ptr, Ordering::Release);
    REGISTRY_STATE.store(STATE_READY, Ordering::Release);
    // SAFETY: `ptr` was just published via `Box::into_raw` above.
    Some(unsafe { &*ptr })
}

static SHUTDOWN_HOOK_REGISTERED: AtomicU8 = AtomicU8::new(0);

/// Registers the shutdown hook exactly once per process, via `libc::atexit`.
///
/// `atexit` handlers run after user threads have completed and before ELF
/// destructors/TLS teardown — matching the requirement that the leak report
/// is produced once the profiled program is otherwise done running
/// (spec.md §5).
pub(crate) fn ensure_shutdown_hook_registered(hook: extern "C" fn()) {
    if SHUTDOWN_HOOK_REGISTERED
        .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        // SAFETY: `hook` is a valid `extern "C" fn()`; `atexit` only ever
        // stores the pointer for a later call, it does not invoke it here.
        unsafe {
            libc::atexit(hook);
        }
    }
}

static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

/// Marks the process as tearing down. Once set, `free` stops validating
/// against the registry — its records are being drained by the shutdown
/// hook itself, so their addresses are intentionally "unknown" to the
/// façade from this point on (spec.md §4.4, §5).
pub(crate) fn begin_shutdown() {
    SHUTTING_DOWN.store(true, Ordering::SeqCst);
}

#[must_use]
pub(crate) fn is_shutting_down() -> bool {
    SHUTTING_DOWN.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_available_once_initialized() {
        let first = try_global_registry();
        let second = try_global_registry();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(std::ptr::eq(first.unwrap(), second.unwrap()));
    }
}
