//! The allocation record: everything the registry keeps per live allocation.

/// Hard cap on captured return addresses per allocation site.
///
/// Matches the bound enforced by the stack-capture call in the ABI crate —
/// raising it here without raising the capture buffer size there is a no-op.
pub const MAX_FRAMES: usize = 16;

/// Where an allocation's frame-1 caller was resolved to.
///
/// Assigned once by the provenance classifier at insert time and never
/// revisited — see `AllocationRecord::provenance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Frame 1 is not inside the C library — a candidate leak.
    User,
    /// Frame 1 resolved into the C library itself — suppressed from the
    /// itemized leak list, counted only in the summary.
    Infrastructure,
}

/// One live (or about-to-be-reported) heap allocation.
///
/// `stack`/`stack_len` are a private copy: the caller's capture buffer may
/// be reused immediately after `AllocationRegistry::add` returns.
#[derive(Debug, Clone)]
pub struct AllocationRecord {
    pub address: usize,
    pub size: usize,
    /// Wall-clock second at capture time. Diagnostic only — never compared.
    pub timestamp: u64,
    pub stack: [usize; MAX_FRAMES],
    pub stack_len: usize,
    pub provenance: Provenance,
}

impl AllocationRecord {
    #[must_use]
    pub fn new(
        address: usize,
        size: usize,
        timestamp: u64,
        frames: &[usize],
        provenance: Provenance,
    ) -> Self {
        let mut stack = [0usize; MAX_FRAMES];
        let stack_len = frames.len().min(MAX_FRAMES);
        stack[..stack_len].copy_from_slice(&frames[..stack_len]);
        Self {
            address,
            size,
            timestamp,
            stack,
            stack_len,
            provenance,
        }
    }

    #[must_use]
    pub fn frames(&self) -> &[usize] {
        &self.stack[..self.stack_len]
    }
}
