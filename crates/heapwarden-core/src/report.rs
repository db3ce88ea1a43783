//! Pure formatting of the fixed-format diagnostic lines from spec.md §6.
//!
//! Every function here only fills a caller-owned `FixedBuf` — writing the
//! bytes to the diagnostic stream, and dumping frame addresses through the
//! runtime's own address-dump facility, is the ABI crate's job (it alone
//! has the raw-write primitive and the libc binding for that facility).

use crate::fmtbuf::FixedBuf;
use crate::registry::DrainSummary;

/// Label used by every corruption report (spec.md §4.5, §6).
pub const CORRUPTION_LABEL: &str = "Double-Free or Invalid-Free";

/// Leading banner of the leak report.
pub const LEAK_REPORT_HEADER: &str = "========== MEMORY LEAKS ==========\n";

/// Trailing banner of the leak report.
pub const LEAK_REPORT_FOOTER: &str = "==================================\n";

/// Maximum formatted length of any single line this module produces.
pub const LINE_CAPACITY: usize = 160;

pub type Line = FixedBuf<LINE_CAPACITY>;

/// `[CORRUPTION] Double-Free or Invalid-Free at <address>\n`
pub fn format_corruption_line(address: usize) -> Line {
    let mut line = Line::new();
    line.push_str("[CORRUPTION] ");
    line.push_str(CORRUPTION_LABEL);
    line.push_str(" at ");
    line.push_usize_hex(address);
    line.push_str("\n");
    line
}

/// `[LEAK] <address>: <size> bytes\n`
pub fn format_leak_entry(address: usize, size: usize) -> Line {
    let mut line = Line::new();
    line.push_str("[LEAK] ");
    line.push_usize_hex(address);
    line.push_str(": ");
    line.push_usize_dec(size);
    line.push_str(" bytes\n");
    line
}

/// `  Real leaks: <n> allocation(s), <bytes> bytes\n`
pub fn format_real_leaks_summary_line(summary: &DrainSummary) -> Line {
    let mut line = Line::new();
    line.push_str("  Real leaks: ");
    line.push_usize_dec(summary.user_count);
    line.push_str(" allocation(s), ");
    line.push_usize_dec(summary.user_bytes);
    line.push_str(" bytes\n");
    line
}

/// `  Libc infrastructure: <m> allocation(s), <bytes> bytes (ignored)\n`
///
/// Only meaningful — and only ever emitted by the caller — when
/// `summary.infrastructure_count > 0` (spec.md §6).
pub fn format_infrastructure_summary_line(summary: &DrainSummary) -> Line {
    let mut line = Line::new();
    line.push_str("  Libc infrastructure: ");
    line.push_usize_dec(summary.infrastructure_count);
    line.push_str(" allocation(s), ");
    line.push_usize_dec(summary.infrastructure_bytes);
    line.push_str(" bytes (ignored)\n");
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Provenance;
    use crate::registry::AllocationRegistry;

    fn bytes(line: &Line) -> &[u8] {
        line.as_bytes()
    }

    #[test]
    fn corruption_line_matches_fixed_format() {
        let line = format_corruption_line(0xdead_beef);
        assert_eq!(
            bytes(&line),
            b"[CORRUPTION] Double-Free or Invalid-Free at 0xdeadbeef\n"
        );
    }

    #[test]
    fn leak_entry_matches_fixed_format() {
        let line = format_leak_entry(0x1000, 1024);
        assert_eq!(bytes(&line), b"[LEAK] 0x1000: 1024 bytes\n");
    }

    #[test]
    fn summary_lines_from_a_real_drain() {
        use crate::record::AllocationRecord;

        let ar = AllocationRegistry::new();
        ar.add(AllocationRecord::new(0x1, 1024, 0, &[], Provenance::User));
        ar.add(AllocationRecord::new(0x2, 512, 0, &[], Provenance::User));
        ar.add(AllocationRecord::new(
            0x3,
            64,
            0,
            &[],
            Provenance::Infrastructure,
        ));
        let summary = ar.iterate_and_drain(|_| {});

        let real = format_real_leaks_summary_line(&summary);
        assert_eq!(bytes(&real), b"  Real leaks: 2 allocation(s), 1536 bytes\n");

        let infra = format_infrastructure_summary_line(&summary);
        assert_eq!(
            bytes(&infra),
            b"  Libc infrastructure: 1 allocation(s), 64 bytes (ignored)\n"
        );
    }

    #[test]
    fn header_and_footer_literals() {
        assert_eq!(LEAK_REPORT_HEADER, "========== MEMORY LEAKS ==========\n");
        assert_eq!(LEAK_REPORT_FOOTER, "==================================\n");
    }
}
