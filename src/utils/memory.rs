//! Resident-memory snapshot for the monitor loop.

/// Returns the resident set size of the current process in bytes.
///
/// Reads `VmRSS` from `/proc/self/status`, so this only produces a value on
/// Linux; other platforms get `None` and the monitor loop simply omits the
/// figure from its report.
pub fn resident_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}
