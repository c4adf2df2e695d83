//! FidoNet `.?lo` outbound control files
//!
//! One control file queues bundles for one destination at one priority.
//! The name carries the addressing: an 8-hex-digit stem (4 digits net,
//! 4 digits node) and a 3-letter extension whose first letter encodes the
//! priority and whose last two letters are literally `lo`. Each line is a
//! directive character immediately followed by a bundle path; a zero-byte
//! file is a "poll" (connect with nothing to send).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use binkp_common::address::FtnAddress;

// =============================================================================
// Directives
// =============================================================================

/// What to do with a queued bundle after the remote confirms receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloDirective {
    /// `#`: truncate the bundle to zero bytes
    TruncateAfterSend,
    /// `^`: delete the bundle
    DeleteAfterSend,
    /// `~`: entry is dead, never offer it
    SkipFile,
}

impl FloDirective {
    /// The directive encoded by a line's first character
    pub fn from_char(c: char) -> Option<FloDirective> {
        match c {
            '#' => Some(FloDirective::TruncateAfterSend),
            '^' => Some(FloDirective::DeleteAfterSend),
            '~' => Some(FloDirective::SkipFile),
            _ => None,
        }
    }

    /// The character this directive writes back to disk
    pub fn as_char(self) -> char {
        match self {
            FloDirective::TruncateAfterSend => '#',
            FloDirective::DeleteAfterSend => '^',
            FloDirective::SkipFile => '~',
        }
    }
}

// =============================================================================
// Bundle status
// =============================================================================

/// Priority class of a queued bundle, encoded in the control file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleStatus {
    /// `.clo`: send on the next call, ahead of everything else
    Crash,
    /// `.flo`: routine mail
    Normal,
    /// `.dlo`: send directly, no routing through hubs
    Direct,
    /// `.ilo`: connect immediately
    Immediate,
    /// `.hlo`: hold for the remote to pick up; never scanned for sending
    Hold,
}

impl BundleStatus {
    /// The statuses scanned when building an outbound queue, in offer order
    pub const SENDABLE: [BundleStatus; 4] = [
        BundleStatus::Crash,
        BundleStatus::Normal,
        BundleStatus::Direct,
        BundleStatus::Immediate,
    ];

    /// The control file extension for this status
    pub fn extension(self) -> &'static str {
        match self {
            BundleStatus::Crash => "clo",
            BundleStatus::Normal => "flo",
            BundleStatus::Direct => "dlo",
            BundleStatus::Immediate => "ilo",
            BundleStatus::Hold => "hlo",
        }
    }

    /// The status encoded by a control file extension
    pub fn from_extension(ext: &str) -> Option<BundleStatus> {
        match ext.to_ascii_lowercase().as_str() {
            "clo" => Some(BundleStatus::Crash),
            "flo" => Some(BundleStatus::Normal),
            "dlo" => Some(BundleStatus::Direct),
            "ilo" => Some(BundleStatus::Immediate),
            "hlo" => Some(BundleStatus::Hold),
            _ => None,
        }
    }
}

// =============================================================================
// Naming
// =============================================================================

/// The 8-hex-digit net+node stem with an arbitrary extension
pub fn net_node_name(dest: &FtnAddress, extension: &str) -> String {
    format!("{:04x}{:04x}.{}", dest.net(), dest.node(), extension)
}

/// The control file name queueing bundles for `dest` at `status`
pub fn flo_name(dest: &FtnAddress, status: BundleStatus) -> String {
    net_node_name(dest, status.extension())
}

// =============================================================================
// FloFile
// =============================================================================

/// One queued bundle reference inside a control file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloEntry {
    pub path: PathBuf,
    pub directive: FloDirective,
}

/// One `.?lo` control file, parsed
///
/// A malformed filename makes the whole file invalid rather than an error;
/// callers check [`FloFile::is_valid`] / [`FloFile::exists`] before use.
#[derive(Debug, Clone)]
pub struct FloFile {
    path: PathBuf,
    dest_net: u16,
    dest_node: u16,
    status: Option<BundleStatus>,
    entries: Vec<FloEntry>,
    poll: bool,
    exists: bool,
}

impl FloFile {
    /// Load a control file from disk.
    ///
    /// A missing file yields an empty, non-poll `FloFile` that can still be
    /// populated and saved. A malformed name yields an invalid one whose
    /// contents are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error only when an existing file cannot be read.
    pub fn load(path: &Path) -> io::Result<FloFile> {
        let (dest_net, dest_node, status) = match parse_flo_filename(path) {
            Some(parts) => parts,
            None => {
                return Ok(FloFile {
                    path: path.to_path_buf(),
                    dest_net: 0,
                    dest_node: 0,
                    status: None,
                    entries: Vec::new(),
                    poll: false,
                    exists: false,
                });
            }
        };

        let mut flo = FloFile {
            path: path.to_path_buf(),
            dest_net,
            dest_node,
            status: Some(status),
            entries: Vec::new(),
            poll: false,
            exists: false,
        };
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(flo),
            Err(e) => return Err(e),
        };
        flo.exists = true;
        flo.poll = metadata.len() == 0;
        if flo.poll {
            return Ok(flo);
        }

        let text = fs::read_to_string(path)?;
        for line in text.lines() {
            let line = line.trim_end();
            let Some(first) = line.chars().next() else {
                continue;
            };
            let Some(directive) = FloDirective::from_char(first) else {
                continue;
            };
            let path = PathBuf::from(&line[first.len_utf8()..]);
            flo.entries.push(FloEntry { path, directive });
        }
        Ok(flo)
    }

    /// Whether the filename parsed as a control file name
    pub fn is_valid(&self) -> bool {
        self.status.is_some()
    }

    /// Whether the file existed on disk at load time
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Whether the file is a poll: present but zero bytes
    pub fn poll(&self) -> bool {
        self.poll
    }

    pub fn empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FloEntry] {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Priority class from the extension; `None` when the name was invalid
    pub fn status(&self) -> Option<BundleStatus> {
        self.status
    }

    /// The destination address this file queues for, in the caller's zone
    pub fn destination(&self, zone: u16) -> Option<FtnAddress> {
        self.status?;
        Some(FtnAddress::new(zone, self.dest_net, self.dest_node, 0, None))
    }

    /// Append an entry; duplicates are kept
    pub fn insert(&mut self, path: &Path, directive: FloDirective) {
        self.entries.push(FloEntry { path: path.to_path_buf(), directive });
    }

    /// Remove the first entry whose path matches exactly
    pub fn erase(&mut self, path: &Path) -> bool {
        match self.entries.iter().position(|e| e.path == path) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Drop all entries and the poll flag
    pub fn clear(&mut self) {
        self.entries.clear();
        self.poll = false;
    }

    /// Persist the current state.
    ///
    /// A poll or a file with entries is (re)written whole; an empty
    /// non-poll file is deleted from disk; nothing at all is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or delete fails.
    pub fn save(&mut self) -> io::Result<()> {
        if self.poll || !self.entries.is_empty() {
            let mut text = String::new();
            for entry in &self.entries {
                text.push(entry.directive.as_char());
                text.push_str(&entry.path.display().to_string());
                text.push('\n');
            }
            fs::write(&self.path, text)?;
            self.exists = true;
            return Ok(());
        }
        if self.exists {
            fs::remove_file(&self.path)?;
            self.exists = false;
        }
        Ok(())
    }
}

/// Split a control file name into (net, node, status).
///
/// The stem must be exactly 8 hex digits and the extension a recognized
/// `.?lo` form.
fn parse_flo_filename(path: &Path) -> Option<(u16, u16, BundleStatus)> {
    let ext = path.extension()?.to_str()?;
    if ext.len() != 3 || !ext[1..].eq_ignore_ascii_case("lo") {
        return None;
    }
    let status = BundleStatus::from_extension(ext)?;
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 8 || !stem.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let net = u16::from_str_radix(&stem[..4], 16).ok()?;
    let node = u16::from_str_radix(&stem[4..], 16).ok()?;
    Some((net, node, status))
}
