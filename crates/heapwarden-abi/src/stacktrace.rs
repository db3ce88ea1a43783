//! Allocation-free stack capture and address-to-object resolution.
//!
//! Both primitives come straight from `libc`: `backtrace` walks the call
//! stack into a caller-owned buffer with no allocation of its own, and
//! `dladdr` resolves a return address to the path of the shared object
//! containing it, also without allocating.

use std::ffi::{c_void, CStr};
use std::mem::MaybeUninit;

use heapwarden_core::MAX_FRAMES;

/// Captures up to `MAX_FRAMES` return addresses into a fixed buffer.
///
/// Frame 0 is this function's own caller (the interception entry point);
/// see `heapwarden_core::provenance::classify`, which only ever looks at
/// frame 1. `libc::backtrace` itself has no notion of "skip my own
/// caller's caller" — its frame 0 is always `capture`'s own call frame —
/// so we ask for one extra slot and drop that leading frame here before
/// returning. Without this, every frame handed to `classify` would be
/// shifted by one: frame 1 would always resolve inside this crate's own
/// `.so`, never into libc or the real caller, and the Provenance
/// Classifier could never mark anything infrastructure.
#[must_use]
pub fn capture(max_frames: usize) -> ([usize; MAX_FRAMES], usize) {
    let cap = max_frames.min(MAX_FRAMES);
    let mut raw = [std::ptr::null_mut::<c_void>(); MAX_FRAMES + 1];
    // SAFETY: `raw` has room for `MAX_FRAMES + 1` slots; the requested count
    // below never exceeds that, so `backtrace` cannot write past the buffer.
    let requested = (cap + 1).min(MAX_FRAMES + 1);
    let captured = unsafe { libc::backtrace(raw.as_mut_ptr(), requested as i32) };
    let captured = captured.max(0) as usize;
    // Drop `raw[0]`: it is this function's own frame, not the caller's.
    let usable = captured.saturating_sub(1);

    let mut frames = [0usize; MAX_FRAMES];
    for (dst, src) in frames.iter_mut().zip(raw.iter().skip(1)).take(usable) {
        *dst = *src as usize;
    }
    (frames, usable)
}

/// Resolves `address` to the path of the shared object it falls inside, or
/// `None` if `dladdr` cannot place it.
///
/// `dladdr` fills a caller-owned `Dl_info` and returns a pointer into the
/// loader's own static tables for `dli_fname`. Returned as a borrowed
/// `&'static str` rather than an owned `String`: `dli_fname` points at the
/// loader's own link-map string table, valid for the life of the process,
/// and borrowing it (instead of `to_owned`-ing it) keeps this query truly
/// allocation-free end to end, not just guard-protected against recursion.
#[must_use]
pub fn owning_object_path(address: usize) -> Option<&'static str> {
    let mut info = MaybeUninit::<libc::Dl_info>::uninit();
    // SAFETY: `info` is a valid, appropriately sized `Dl_info` for `dladdr`
    // to initialize; a null/zero return means it was left untouched, which
    // we treat as "unresolved" below rather than reading through it.
    let rc = unsafe { libc::dladdr(address as *const c_void, info.as_mut_ptr()) };
    if rc == 0 {
        return None;
    }
    // SAFETY: a non-zero return guarantees `dladdr` initialized `info`.
    let info = unsafe { info.assume_init() };
    if info.dli_fname.is_null() {
        return None;
    }
    // SAFETY: `dli_fname`, when non-null, points at a NUL-terminated path
    // owned by the dynamic loader for the lifetime of the process.
    let cstr = unsafe { CStr::from_ptr(info.dli_fname) };
    cstr.to_str().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_finds_at_least_one_frame() {
        let (frames, len) = capture(MAX_FRAMES);
        assert!(len > 0);
        assert!(frames[..len].iter().all(|&f| f != 0));
    }

    #[test]
    fn capture_respects_a_smaller_request() {
        let (_, len) = capture(2);
        assert!(len <= 2);
    }

    #[test]
    fn owning_object_resolves_a_known_code_address() {
        let addr = owning_object_path as usize;
        let resolved = owning_object_path(addr);
        assert!(resolved.is_some());
    }

    #[test]
    fn owning_object_borrows_rather_than_allocates() {
        // Two resolutions of the same address return the identical backing
        // bytes (the loader's own string table), not two separately
        // allocated copies — confirms the `&'static str` path never heap
        // allocates, which `String`/`to_owned` would.
        let addr = owning_object_path as usize;
        let first = owning_object_path(addr).unwrap();
        let second = owning_object_path(addr).unwrap();
        assert_eq!(first.as_ptr(), second.as_ptr());
    }

    #[test]
    fn owning_object_rejects_a_bogus_address() {
        assert!(owning_object_path(0).is_none());
    }
}
