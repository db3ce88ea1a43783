//! The Interception Façade (IF): the `malloc`/`free`/`calloc`/`realloc`/
//! `posix_memalign` replacement entry points that every linked symbol in
//! the profiled process actually resolves to.
//!
//! Each entry point follows the same skeleton (spec.md §4.4): ensure the
//! runtime is initialized, delegate to the real allocator via `rab`, then
//! — only when the thread-local reentrancy guard is clear and the call
//! was genuinely an outermost one — capture a stack, classify it, and
//! update the registry. Every allocation the tracking path itself makes
//! (growing the registry's hash table, boxing a record) happens with the
//! guard held, so it is served straight from the real allocator and never
//! re-enters this module.

use std::cell::Cell;
use std::ffi::c_void;
use std::time::{SystemTime, UNIX_EPOCH};

use heapwarden_core::{classify, AllocationRecord, Provenance};

use crate::{config, diagnostics, rab, stacktrace, state};

thread_local! {
    /// Set for the duration of this thread's own tracking-path work (stack
    /// capture, classification, registry insert/remove). A *process-wide*
    /// flag would be wrong here — spec.md §4.4 calls out that it would
    /// silently drop tracking for an unrelated thread's concurrent
    /// allocation racing the bookkeeping one.
    static REENTRANT: Cell<bool> = const { Cell::new(false) };
}

/// RAII guard: clears the thread-local flag on every exit path, including
/// early returns and panics, so a future allocation on this thread is
/// never left permanently untracked.
struct ReentrancyGuard;

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        REENTRANT.with(|flag| flag.set(false));
    }
}

/// Attempts to enter the tracking path on this thread. Returns `None` if
/// this thread is already inside it (a nested, bookkeeping allocation),
/// in which case the caller must skip tracking entirely and just return
/// the real allocator's result.
fn enter() -> Option<ReentrancyGuard> {
    REENTRANT.with(|flag| {
        if flag.get() {
            None
        } else {
            flag.set(true);
            Some(ReentrancyGuard)
        }
    })
}

extern "C" fn run_shutdown_hook() {
    state::begin_shutdown();
    let Some(registry) = state::try_global_registry() else {
        return;
    };
    // Held for the whole drain: building the report below may itself
    // allocate (growing the buffer of itemized records), and that
    // allocation must not try to re-lock the registry's mutex while
    // `iterate_and_drain` already holds it on this same thread. With the
    // guard held, `malloc`'s own `enter()` call simply fails and the
    // allocation is served untracked, exactly like any other bookkeeping
    // allocation (spec.md §4.2's bootstrap rule).
    let _guard = enter();
    let mut leaked_user = Vec::new();
    let summary = registry.iterate_and_drain(|record| {
        if record.provenance == Provenance::User {
            leaked_user.push(record.clone());
        }
    });
    if summary.total_count() > 0 {
        diagnostics::report_leaks(leaked_user.iter(), &summary);
    }
}

/// Runs once per process, the first time any entry point is called:
/// resolves the real allocator symbols (via the first `rab` call made by
/// whichever entry point got here first) and registers the shutdown hook.
/// Idempotent — cheap to call on every entry.
fn ensure_initialized() {
    state::ensure_shutdown_hook_registered(run_shutdown_hook);
}

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Classifies an already-captured stack and inserts the record. Called
/// only while the reentrancy guard from `enter()` is held — every
/// allocation this function itself triggers (the record's entry in the
/// registry's hash table) is therefore made by whichever allocator is
/// current under the guard, i.e. the real one via `rab`.
///
/// Takes `frames` rather than capturing them itself: `classify` inspects
/// frame 1 expecting it to be the allocator's *immediate caller*
/// (spec.md §4.3), so the capture must happen directly in the exported
/// entry point's own body — one more level of function-call indirection
/// here would shift every frame index by one and point the classifier at
/// this crate's own code instead of the caller's.
#[inline]
fn insert_record(address: usize, size: usize, frames: &[usize]) {
    let provenance = classify(frames, stacktrace::owning_object_path);
    let record = AllocationRecord::new(address, size, now_seconds(), frames, provenance);
    if let Some(registry) = state::try_global_registry() {
        if !registry.add(record) {
            diagnostics::report_tracking_storage_failure();
        }
    }
}

/// Removes any record for `old_address` before it becomes invalid — used
/// by both `free` and the move/no-move cases of `realloc`.
fn untrack(old_address: usize) {
    if let Some(registry) = state::try_global_registry() {
        registry.remove(old_address);
    }
}

/// Replacement `malloc`. See spec.md §4.4 "On allocate(size)".
#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    ensure_initialized();
    let ptr = rab::malloc(size);
    if !ptr.is_null() {
        if let Some(_guard) = enter() {
            let (frames, frame_count) = stacktrace::capture(config::configured_max_frames());
            insert_record(ptr as usize, size, &frames[..frame_count]);
        }
    }
    ptr
}

/// Replacement `free`. See spec.md §4.4 "On free(address)".
#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    ensure_initialized();
    if ptr.is_null() {
        return;
    }
    if state::is_shutting_down() {
        rab::free(ptr);
        return;
    }
    let Some(_guard) = enter() else {
        // Reentrant call (freeing tracking-storage itself): the address was
        // never tracked in the first place, so there is nothing to
        // validate — just release it through the real allocator.
        rab::free(ptr);
        return;
    };

    let address = ptr as usize;
    let registry = state::try_global_registry();
    let present = registry.is_some_and(|r| r.contains(address));
    if !present {
        let (frames, frame_count) = stacktrace::capture(config::configured_max_frames());
        diagnostics::report_corruption(address, &frames[..frame_count]);
        return;
    }
    untrack(address);
    rab::free(ptr);
}

/// Replacement `calloc`. See spec.md §4.4 "On allocate_and_zero(count, size)".
#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    ensure_initialized();
    let ptr = rab::calloc(nmemb, size);
    if !ptr.is_null() {
        if let Some(_guard) = enter() {
            let (frames, frame_count) = stacktrace::capture(config::configured_max_frames());
            insert_record(ptr as usize, nmemb.saturating_mul(size), &frames[..frame_count]);
        }
    }
    ptr
}

/// Replacement `realloc`. See spec.md §4.4 "On reallocate(address, new_size)".
#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, new_size: usize) -> *mut c_void {
    ensure_initialized();

    if ptr.is_null() {
        // SAFETY: `malloc` has the same signature and calling convention;
        // forwarding here matches spec.md P6 (`reallocate(null, n)` ==
        // `allocate(n)`).
        return unsafe { malloc(new_size) };
    }
    if new_size == 0 {
        // SAFETY: `free` accepts any pointer previously returned by this
        // allocator family; matches spec.md P6 (`reallocate(p, 0)` ==
        // `free(p)`).
        unsafe { free(ptr) };
        return std::ptr::null_mut();
    }

    let old_address = ptr as usize;
    let new_ptr = rab::realloc(ptr, new_size);
    if let Some(_guard) = enter() {
        // spec.md §4.4: the old address's record is removed unconditionally
        // — covering both the in-place (new_ptr == old_address) and moved
        // cases identically — and a fresh record is inserted only when the
        // reallocation actually produced a live address.
        untrack(old_address);
        if !new_ptr.is_null() {
            let (frames, frame_count) = stacktrace::capture(config::configured_max_frames());
            insert_record(new_ptr as usize, new_size, &frames[..frame_count]);
        }
    }
    new_ptr
}

/// Replacement `posix_memalign`. A §2 supplemental addition: the aligned
/// allocation entry point most real programs actually call, tracked
/// through the same skeleton as `malloc` so aligned allocations are not
/// invisible to leak detection.
#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    alignment: usize,
    size: usize,
) -> i32 {
    ensure_initialized();
    let rc = rab::posix_memalign(memptr, alignment, size);
    if rc == 0 {
        // SAFETY: a zero return guarantees `posix_memalign` wrote a valid
        // pointer through `memptr`.
        let ptr = unsafe { *memptr };
        if !ptr.is_null() {
            if let Some(_guard) = enter() {
                let (frames, frame_count) = stacktrace::capture(config::configured_max_frames());
                insert_record(ptr as usize, size, &frames[..frame_count]);
            }
        }
    }
    rc
}
