//! Environment-driven configuration, resolved once per process.
//!
//! `std::env::var` itself allocates (it builds an owned `String`), so a
//! blocking `OnceLock::get_or_init` here can deadlock: a reentrant call into
//! our own exported `malloc` while the lock is held would spin forever
//! waiting for a lock its own holder can never release. We use the same
//! non-blocking atomic cache the rest of this codebase uses for anything
//! resolved lazily from the environment.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use heapwarden_core::MAX_FRAMES;

const UNRESOLVED: u8 = 0;
const RESOLVING: u8 = 1;
const OFF: u8 = 2;
const ON: u8 = 3;

static STACK_TRACES_STATE: AtomicU8 = AtomicU8::new(UNRESOLVED);

/// Whether `HEAPWARDEN_STACK_TRACES` requests frame dumps on a leak or
/// corruption report. Defaults to **on** — spec.md §6: absent or any value
/// other than `"0"` enables traces; only `"0"` turns them off. A thread
/// racing the resolution below just sees the pre-resolution default, never
/// a blocking wait, since `std::env::var` itself allocates.
#[must_use]
pub fn stack_traces_enabled() -> bool {
    let cached = STACK_TRACES_STATE.load(Ordering::Acquire);
    if cached == ON {
        return true;
    }
    if cached == OFF {
        return false;
    }
    if cached == RESOLVING {
        return true;
    }

    if STACK_TRACES_STATE
        .compare_exchange(UNRESOLVED, RESOLVING, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return true;
    }

    let enabled = std::env::var("HEAPWARDEN_STACK_TRACES")
        .map(|v| v.trim() != "0")
        .unwrap_or(true);
    STACK_TRACES_STATE.store(if enabled { ON } else { OFF }, Ordering::Release);
    enabled
}

const FRAMES_UNRESOLVED: usize = usize::MAX;
static MAX_FRAMES_CACHE: AtomicUsize = AtomicUsize::new(FRAMES_UNRESOLVED);

/// Capture depth, clamped to `[1, MAX_FRAMES]`. `HEAPWARDEN_MAX_FRAMES` lets
/// a user shrink it below the hard cap; it can never raise it past the
/// fixed-size buffer `AllocationRecord` actually has room for.
#[must_use]
pub fn configured_max_frames() -> usize {
    let cached = MAX_FRAMES_CACHE.load(Ordering::Acquire);
    if cached != FRAMES_UNRESOLVED {
        return cached;
    }
    let resolved = std::env::var("HEAPWARDEN_MAX_FRAMES")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .map(|n| n.clamp(1, MAX_FRAMES))
        .unwrap_or(MAX_FRAMES);
    // Racing a second resolution just computes the same value twice; store
    // unconditionally rather than adding another RESOLVING sentinel.
    MAX_FRAMES_CACHE.store(resolved, Ordering::Release);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolving_state_is_treated_as_enabled() {
        // Matches the "default on" resolution result a racing thread would
        // eventually observe once resolution completes.
        let previous = STACK_TRACES_STATE.swap(RESOLVING, Ordering::SeqCst);
        assert!(stack_traces_enabled());
        STACK_TRACES_STATE.store(previous, Ordering::SeqCst);
    }

    #[test]
    fn cached_state_is_process_sticky() {
        let previous = STACK_TRACES_STATE.swap(ON, Ordering::SeqCst);
        assert!(stack_traces_enabled());
        STACK_TRACES_STATE.store(OFF, Ordering::SeqCst);
        assert!(!stack_traces_enabled());
        STACK_TRACES_STATE.store(previous, Ordering::SeqCst);
    }

    #[test]
    fn absent_variable_defaults_to_enabled() {
        let previous = STACK_TRACES_STATE.swap(UNRESOLVED, Ordering::SeqCst);
        // SAFETY: test-only, single-threaded access to the process environment.
        unsafe { std::env::remove_var("HEAPWARDEN_STACK_TRACES") };
        assert!(stack_traces_enabled());
        STACK_TRACES_STATE.store(previous, Ordering::SeqCst);
    }

    #[test]
    fn zero_disables_stack_traces() {
        let previous = STACK_TRACES_STATE.swap(UNRESOLVED, Ordering::SeqCst);
        // SAFETY: test-only, single-threaded access to the process environment.
        unsafe { std::env::set_var("HEAPWARDEN_STACK_TRACES", "0") };
        assert!(!stack_traces_enabled());
        // SAFETY: test-only, single-threaded access to the process environment.
        unsafe { std::env::remove_var("HEAPWARDEN_STACK_TRACES") };
        STACK_TRACES_STATE.store(previous, Ordering::SeqCst);
    }

    #[test]
    fn any_other_value_enables_stack_traces() {
        let previous = STACK_TRACES_STATE.swap(UNRESOLVED, Ordering::SeqCst);
        // SAFETY: test-only, single-threaded access to the process environment.
        unsafe { std::env::set_var("HEAPWARDEN_STACK_TRACES", "nope") };
        assert!(stack_traces_enabled());
        // SAFETY: test-only, single-threaded access to the process environment.
        unsafe { std::env::remove_var("HEAPWARDEN_STACK_TRACES") };
        STACK_TRACES_STATE.store(previous, Ordering::SeqCst);
    }

    #[test]
    fn max_frames_clamps_to_the_hard_cap() {
        let previous = MAX_FRAMES_CACHE.swap(FRAMES_UNRESOLVED, Ordering::SeqCst);
        // SAFETY: test-only, single-threaded access to the process environment.
        unsafe { std::env::set_var("HEAPWARDEN_MAX_FRAMES", "9999") };
        assert_eq!(configured_max_frames(), MAX_FRAMES);
        // SAFETY: test-only, single-threaded access to the process environment.
        unsafe { std::env::remove_var("HEAPWARDEN_MAX_FRAMES") };
        MAX_FRAMES_CACHE.store(previous, Ordering::SeqCst);
    }

    #[test]
    fn max_frames_honors_a_smaller_request() {
        let previous = MAX_FRAMES_CACHE.swap(FRAMES_UNRESOLVED, Ordering::SeqCst);
        // SAFETY: test-only, single-threaded access to the process environment.
        unsafe { std::env::set_var("HEAPWARDEN_MAX_FRAMES", "3") };
        assert_eq!(configured_max_frames(), 3);
        // SAFETY: test-only, single-threaded access to the process environment.
        unsafe { std::env::remove_var("HEAPWARDEN_MAX_FRAMES") };
        MAX_FRAMES_CACHE.store(previous, Ordering::SeqCst);
    }
}
