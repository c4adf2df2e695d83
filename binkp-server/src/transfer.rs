//! Files moving through a session
//!
//! Outbound files and received files share one [`TransferFile`] trait so the
//! session can hold a uniform queue and tests can swap disk I/O for memory.
//! Frame I/O is async but file I/O here is plain std: chunks are small and
//! the session already pumps the socket between them.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use crc::Digest;

use crate::checksum::{CRC32, crc32_bytes, crc32_file};
use crate::flo::{FloDirective, FloFile};

// =============================================================================
// TransferFile
// =============================================================================

/// One file a session can send or receive
pub trait TransferFile: Send {
    /// Name announced on the wire, no directory part
    fn filename(&self) -> &str;

    /// Unix mtime announced on the wire
    fn timestamp(&self) -> i64;

    /// CRC32 of the full contents; 0 = absent
    fn crc(&self) -> u32;

    fn file_size(&self) -> io::Result<u64>;

    fn read_chunk(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Append one received chunk
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;

    /// Apply the post-delivery action after the peer confirmed receipt
    fn delete(&mut self) -> io::Result<()>;

    /// The M_FILE offer line: `name size timestamp offset [crc-hex]`
    fn as_packet_data(&self, offset: u64) -> String {
        let size = self.file_size().unwrap_or(0);
        match self.crc() {
            0 => format!("{} {} {} {}", self.filename(), size, self.timestamp(), offset),
            crc => {
                format!("{} {} {} {} {:08X}", self.filename(), size, self.timestamp(), offset, crc)
            }
        }
    }
}

// =============================================================================
// Offer lines
// =============================================================================

/// A parsed M_FILE offer: `name size timestamp [offset [crc-hex]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffer {
    pub filename: String,
    pub length: u64,
    pub timestamp: i64,
    pub offset: u64,
    pub crc: u32,
}

impl FileOffer {
    pub fn parse(line: &str) -> Option<FileOffer> {
        let mut parts = line.split_whitespace();
        let filename = parts.next()?.to_string();
        let length = parts.next()?.parse().ok()?;
        let timestamp = parts.next()?.parse().ok()?;
        let offset = match parts.next() {
            Some(token) => token.parse().ok()?,
            None => 0,
        };
        let crc = match parts.next() {
            Some(token) => u32::from_str_radix(token, 16).ok()?,
            None => 0,
        };
        Some(FileOffer { filename, length, timestamp, offset, crc })
    }
}

// =============================================================================
// Disk-backed files
// =============================================================================

/// Ties an outbound bundle back to the control file that queued it, so a
/// delivery confirmation can apply the directive and rewrite the `.?lo`
#[derive(Clone)]
pub struct FloAssociation {
    pub flo: Arc<Mutex<FloFile>>,
    pub entry_path: PathBuf,
    pub directive: FloDirective,
}

enum OpenMode {
    Read,
    Write,
}

/// A transfer file backed by a real file on disk
pub struct DiskTransferFile {
    path: PathBuf,
    filename: String,
    timestamp: i64,
    crc: u32,
    file: Option<(File, OpenMode)>,
    flo: Option<FloAssociation>,
}

impl DiskTransferFile {
    /// Queue an existing on-disk file for sending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file's metadata (or contents, when
    /// `with_crc`) cannot be read.
    pub fn outbound(path: PathBuf, with_crc: bool) -> io::Result<DiskTransferFile> {
        let metadata = fs::metadata(&path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let timestamp = metadata
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp())
            .unwrap_or(0);
        let crc = if with_crc { crc32_file(&path)? } else { 0 };
        Ok(DiskTransferFile { path, filename, timestamp, crc, file: None, flo: None })
    }

    /// Attach the control file entry this bundle came from
    pub fn with_flo(mut self, association: FloAssociation) -> DiskTransferFile {
        self.flo = Some(association);
        self
    }

    /// A fresh file to receive into under `dir`
    pub fn inbound(dir: &Path, filename: &str) -> DiskTransferFile {
        DiskTransferFile {
            path: dir.join(filename),
            filename: filename.to_string(),
            timestamp: 0,
            crc: 0,
            file: None,
            flo: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&mut self) -> io::Result<&mut File> {
        if !matches!(self.file, Some((_, OpenMode::Read))) {
            self.file = Some((File::open(&self.path)?, OpenMode::Read));
        }
        match &mut self.file {
            Some((file, _)) => Ok(file),
            None => Err(io::Error::other("file not open")),
        }
    }

    fn writer(&mut self) -> io::Result<&mut File> {
        if !matches!(self.file, Some((_, OpenMode::Write))) {
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.file = Some((file, OpenMode::Write));
        }
        match &mut self.file {
            Some((file, _)) => Ok(file),
            None => Err(io::Error::other("file not open")),
        }
    }
}

impl TransferFile for DiskTransferFile {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn crc(&self) -> u32 {
        self.crc
    }

    fn file_size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn read_chunk(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let file = self.reader()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer()?.write_all(chunk)
    }

    fn close(&mut self) -> io::Result<()> {
        self.file = None;
        Ok(())
    }

    fn delete(&mut self) -> io::Result<()> {
        self.close()?;
        let Some(association) = self.flo.clone() else {
            return remove_if_present(&self.path);
        };
        match association.directive {
            FloDirective::DeleteAfterSend => remove_if_present(&self.path)?,
            FloDirective::TruncateAfterSend => {
                File::create(&self.path)?;
            }
            FloDirective::SkipFile => {}
        }
        let mut flo = match association.flo.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        flo.erase(&association.entry_path);
        flo.save()
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

// =============================================================================
// In-memory files
// =============================================================================

/// A transfer file held entirely in memory, for tests and injected factories
pub struct InMemoryTransferFile {
    filename: String,
    timestamp: i64,
    contents: Vec<u8>,
    with_crc: bool,
}

impl InMemoryTransferFile {
    pub fn new(filename: &str, contents: &[u8], timestamp: i64, with_crc: bool) -> Self {
        InMemoryTransferFile {
            filename: filename.to_string(),
            timestamp,
            contents: contents.to_vec(),
            with_crc,
        }
    }

    /// An empty file to receive into
    pub fn empty(filename: &str) -> Self {
        Self::new(filename, &[], 0, false)
    }

    pub fn contents(&self) -> &[u8] {
        &self.contents
    }
}

impl TransferFile for InMemoryTransferFile {
    fn filename(&self) -> &str {
        &self.filename
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn crc(&self) -> u32 {
        if self.with_crc { crc32_bytes(&self.contents) } else { 0 }
    }

    fn file_size(&self) -> io::Result<u64> {
        Ok(self.contents.len() as u64)
    }

    fn read_chunk(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.contents.len());
        let end = start.saturating_add(len).min(self.contents.len());
        Ok(self.contents[start..end].to_vec())
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.contents.extend_from_slice(chunk);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn delete(&mut self) -> io::Result<()> {
        self.contents.clear();
        Ok(())
    }
}

// =============================================================================
// ReceiveFile
// =============================================================================

/// A file currently being received, wrapping the factory-made sink.
///
/// Accounting always starts at zero, whatever starting offset the offer
/// carried: the factory opens a fresh sink holding none of the earlier
/// bytes, so only the full declared length completes the file and earns
/// the receipt. The running CRC covers exactly the bytes written here.
pub struct ReceiveFile {
    file: Box<dyn TransferFile + Send>,
    filename: String,
    expected_length: u64,
    timestamp: i64,
    crc: u32,
    length: u64,
    digest: Option<Digest<'static, u32>>,
}

impl ReceiveFile {
    pub fn new(
        file: Box<dyn TransferFile + Send>,
        offer: &FileOffer,
    ) -> ReceiveFile {
        ReceiveFile {
            file,
            filename: offer.filename.clone(),
            expected_length: offer.length,
            timestamp: offer.timestamp,
            crc: offer.crc,
            length: 0,
            digest: Some(CRC32.digest()),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn expected_length(&self) -> u64 {
        self.expected_length
    }

    /// Bytes written so far
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// CRC declared in the offer; 0 = absent
    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub fn complete(&self) -> bool {
        self.length >= self.expected_length
    }

    /// Append one data frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying sink fails to accept the chunk.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_chunk(chunk)?;
        self.length += chunk.len() as u64;
        if let Some(digest) = &mut self.digest {
            digest.update(chunk);
        }
        Ok(())
    }

    /// CRC32 over the bytes written; takes the running digest
    pub fn computed_crc(&mut self) -> Option<u32> {
        self.digest.take().map(|digest| digest.finalize())
    }

    pub fn close(&mut self) -> io::Result<()> {
        self.file.close()
    }

    /// Discard a partial receive
    pub fn delete(&mut self) -> io::Result<()> {
        self.file.delete()
    }
}
