//! The Real-Allocator Binder (RAB): resolves the process's real `malloc`,
//! `free`, `calloc`, `realloc`, and `posix_memalign` exactly once, via
//! `dlsym(RTLD_NEXT, ...)`, and exposes them for the interception façade to
//! call through.
//!
//! glibc's own lazy-binding machinery can make the very first `dlsym` call
//! allocate — which would recurse straight back into our exported `calloc`
//! before the real one is known. We break that cycle with a small static
//! bootstrap arena: any allocation requested while a symbol is still being
//! resolved is served from the arena instead. It is never freed; `free` on
//! an address inside it is simply a no-op.

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

pub type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(*mut c_void);
pub type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
pub type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
pub type PosixMemalignFn = unsafe extern "C" fn(*mut *mut c_void, usize, usize) -> i32;

/// Marks a slot as "another thread/reentrant call is resolving this right
/// now" — never a value `dlsym` can legitimately return (real symbols live
/// on page-aligned text addresses).
const RESOLVING: *mut () = 1usize as *mut ();

static MALLOC_SLOT: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());
static FREE_SLOT: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());
static CALLOC_SLOT: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());
static REALLOC_SLOT: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());
static POSIX_MEMALIGN_SLOT: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());

const BOOTSTRAP_ARENA_SIZE: usize = 256 * 1024;
static mut BOOTSTRAP_ARENA: [u8; BOOTSTRAP_ARENA_SIZE] = [0; BOOTSTRAP_ARENA_SIZE];
static BOOTSTRAP_CURSOR: AtomicUsize = AtomicUsize::new(0);

/// Hands out `size` bytes (8-byte aligned) from the static bootstrap arena.
/// Returns null once the arena is exhausted.
fn bootstrap_alloc(size: usize) -> *mut c_void {
    let aligned = (size.max(1) + 7) & !7;
    let start = BOOTSTRAP_CURSOR.fetch_add(aligned, Ordering::SeqCst);
    if start + aligned > BOOTSTRAP_ARENA_SIZE {
        return std::ptr::null_mut();
    }
    // SAFETY: the fetch_add above reserved [start, start + aligned) exclusively
    // for this call; no other caller holds an overlapping range.
    unsafe {
        let base = std::ptr::addr_of_mut!(BOOTSTRAP_ARENA).cast::<u8>();
        base.add(start).cast()
    }
}

/// Whether `ptr` was handed out by the bootstrap arena (and so must never be
/// passed to a real `free`).
fn is_bootstrap_ptr(ptr: *mut c_void) -> bool {
    // SAFETY: only used to compute an address range, never dereferenced.
    let base = std::ptr::addr_of!(BOOTSTRAP_ARENA).cast::<u8>() as usize;
    let addr = ptr as usize;
    addr >= base && addr < base + BOOTSTRAP_ARENA_SIZE
}

/// Writes a fixed diagnostic message and terminates the process immediately.
///
/// Used only when a real allocator symbol cannot be found at all — a
/// misconfigured preload the profiler cannot safely run under. Uses
/// `libc::write`/`libc::_exit` directly: no formatting, no atexit handlers,
/// no stdio teardown (`libc::_exit` is documented by the `libc` crate as
/// skipping both).
fn fatal_missing_symbol(message: &'static str) -> ! {
    // SAFETY: writing a `'static` byte slice to a fixed fd; fd and buffer are
    // both valid for the duration of the call.
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            message.as_ptr().cast(),
            message.len(),
        );
    }
    // SAFETY: terminates the process without running destructors, matching
    // the requirement that a bootstrap failure perform no further library calls.
    unsafe { libc::_exit(1) }
}

macro_rules! resolve {
    ($slot:expr, $name:expr, $ty:ty, $fatal_msg:expr) => {{
        let cached = $slot.load(Ordering::Acquire);
        if !cached.is_null() && cached != RESOLVING {
            // SAFETY: only ever stored below from a `dlsym` result cast to
            // this exact function-pointer type.
            return Some(unsafe { std::mem::transmute::<*mut (), $ty>(cached) });
        }
        if cached == RESOLVING {
            return None;
        }
        if $slot
            .compare_exchange(
                std::ptr::null_mut(),
                RESOLVING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return None;
        }
        // SAFETY: RTLD_NEXT + a NUL-terminated symbol name is the documented
        // dlsym contract for "the next definition of this symbol after us".
        let raw = unsafe { libc::dlsym(libc::RTLD_NEXT, $name.as_ptr().cast()) };
        if raw.is_null() {
            fatal_missing_symbol($fatal_msg);
        }
        $slot.store(raw.cast(), Ordering::Release);
        Some(unsafe { std::mem::transmute::<*mut (), $ty>(raw.cast()) })
    }};
}

fn real_malloc_fn() -> Option<MallocFn> {
    resolve!(MALLOC_SLOT, c"malloc", MallocFn, "heapwarden: real malloc not found\n")
}

fn real_free_fn() -> Option<FreeFn> {
    resolve!(FREE_SLOT, c"free", FreeFn, "heapwarden: real free not found\n")
}

fn real_calloc_fn() -> Option<CallocFn> {
    resolve!(CALLOC_SLOT, c"calloc", CallocFn, "heapwarden: real calloc not found\n")
}

fn real_realloc_fn() -> Option<ReallocFn> {
    resolve!(REALLOC_SLOT, c"realloc", ReallocFn, "heapwarden: real realloc not found\n")
}

fn real_posix_memalign_fn() -> Option<PosixMemalignFn> {
    resolve!(
        POSIX_MEMALIGN_SLOT,
        c"posix_memalign",
        PosixMemalignFn,
        "heapwarden: real posix_memalign not found\n"
    )
}

/// Allocates through the real `malloc`, falling back to the bootstrap arena
/// while the symbol is still being resolved.
pub fn malloc(size: usize) -> *mut c_void {
    match real_malloc_fn() {
        // SAFETY: resolved directly from the real `malloc` symbol; POSIX's
        // malloc contract applies.
        Some(f) => unsafe { f(size) },
        None => bootstrap_alloc(size),
    }
}

/// Releases `ptr` through the real `free`. A no-op for bootstrap-arena
/// pointers (that memory is never reclaimed) and for null.
pub fn free(ptr: *mut c_void) {
    if ptr.is_null() || is_bootstrap_ptr(ptr) {
        return;
    }
    if let Some(f) = real_free_fn() {
        // SAFETY: caller contract (see `free`'s own doc) applies transitively.
        unsafe { f(ptr) };
    }
}

/// Allocates and zeroes through the real `calloc`, falling back to a
/// zeroed bootstrap-arena slice while the symbol is still being resolved
/// (the arena is zero-initialized static storage, and never reused).
pub fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    match real_calloc_fn() {
        // SAFETY: resolved directly from the real `calloc` symbol.
        Some(f) => unsafe { f(nmemb, size) },
        None => bootstrap_alloc(nmemb.saturating_mul(size)),
    }
}

/// Resizes through the real `realloc`. Not available from the bootstrap
/// arena (growing a bump slab in place is not supported) — returns null if
/// `realloc` is not yet resolved and `ptr` was not itself bootstrap memory.
pub fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if is_bootstrap_ptr(ptr) {
        // The bootstrap arena never tracks allocation sizes, so a faithful
        // resize is impossible; hand back fresh bootstrap memory sized for
        // the request and leave the copy to the (rare, bootstrap-only) caller.
        return bootstrap_alloc(size);
    }
    match real_realloc_fn() {
        // SAFETY: resolved directly from the real `realloc` symbol.
        Some(f) => unsafe { f(ptr, size) },
        None => std::ptr::null_mut(),
    }
}

/// Aligned allocation through the real `posix_memalign`. Returns `ENOMEM`
/// while the symbol is still resolving — there is no bootstrap-arena
/// fallback with alignment guarantees.
pub fn posix_memalign(memptr: *mut *mut c_void, alignment: usize, size: usize) -> i32 {
    match real_posix_memalign_fn() {
        // SAFETY: resolved directly from the real `posix_memalign` symbol;
        // `memptr` validity is the caller's contract to uphold.
        Some(f) => unsafe { f(memptr, alignment, size) },
        None => libc::ENOMEM,
    }
}
