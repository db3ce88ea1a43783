//! ABI boundary for heapwarden: produces `libheapwarden.so`, the shared
//! object an operator puts ahead of the real allocator with
//! `LD_PRELOAD=/path/to/libheapwarden.so target-program`.
//!
//! # Architecture
//!
//! ```text
//! target program -> intercept (this crate) -> rab (real allocator) -> address
//!                         |                                            |
//!                         v                                            v
//!                 heapwarden-core::registry  <-----  stacktrace + config
//! ```
//!
//! `intercept`'s entry points are only `#[no_mangle]` under
//! `cfg(not(test))` — exporting them under `cargo test` would shadow the
//! test binary's own allocator and deadlock it on its first heap
//! allocation. The module itself stays compiled in both configurations
//! (with ordinary, mangled names in test builds) so its reentrancy guard
//! and tracking helpers are still directly unit-tested.

pub mod config;
pub mod diagnostics;
pub mod intercept;
pub mod rab;
pub mod stacktrace;
pub(crate) mod state;
