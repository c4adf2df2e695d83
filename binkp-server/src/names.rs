//! Filename conventions for queue files and received-file triage
//!
//! Flat networks queue outbound mail as `s<node>.net` and file received
//! packets as `p<0|1>-0-<n>.net` pending files. FTN networks move mail in
//! bundles whose extensions encode the day of week (`su0`..`sa9`, plus
//! letter variants for busy days) and in `.pkt` mail packets.

use std::sync::LazyLock;

use regex::Regex;

/// Highest pending-file sequence number probed before giving up
pub const MAX_PENDING_FILES: u32 = 1000;

static BUNDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(su|mo|tu|we|th|fr|sa)[0-9a-z]$").unwrap());

/// The outbound queue file offered to flat network node `node`
pub fn flat_outbound_name(node: u16) -> String {
    format!("s{node}.net")
}

/// Whether `name` looks like an FTN mail bundle
pub fn is_bundle_file(name: &str) -> bool {
    BUNDLE_RE.is_match(name)
}

/// Whether `name` looks like an FTN mail packet
pub fn is_packet_file(name: &str) -> bool {
    has_extension(name, "pkt")
}

/// Whether `name` looks like a TIC metadata file
pub fn is_tic_file(name: &str) -> bool {
    has_extension(name, "tic")
}

/// The pending-file name a received flat queue file is parked under.
///
/// The first digit is 1 when the source file carried a nonzero node number
/// and 0 otherwise; `sequence` distinguishes files from repeated sessions.
pub fn pending_name(received: &str, sequence: u32) -> String {
    let digits: String =
        received.chars().skip(1).take_while(|c| c.is_ascii_digit()).collect();
    let node: u32 = digits.parse().unwrap_or(0);
    let prefix = if node != 0 { 1 } else { 0 };
    format!("p{prefix}-0-{sequence}.net")
}

/// Whether an announced filename is safe to create under the receive dir.
///
/// Anything carrying a directory part (or a bare dot name) would escape
/// the per-session directory and is refused outright.
pub fn is_safe_receive_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

fn has_extension(name: &str, ext: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, e)) => e.eq_ignore_ascii_case(ext),
        None => false,
    }
}
