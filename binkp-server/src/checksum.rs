//! CRC32 helpers for transfer verification
//!
//! Peers that both announce `OPT CRC` attach a CRC32 to file offers and
//! acknowledgments. A CRC of 0 means "absent" on the wire, so callers treat
//! 0 from [`crc32_file`] as nothing to verify.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crc::{CRC_32_ISO_HDLC, Crc};

/// The polynomial binkp peers agree on: the common zlib/PKZIP CRC32
pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const READ_BUF_SIZE: usize = 16 * 1024;

/// CRC32 of a byte slice
pub fn crc32_bytes(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// CRC32 of a file's full contents.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn crc32_file(path: &Path) -> io::Result<u32> {
    let mut file = File::open(path)?;
    let mut digest = CRC32.digest();
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.finalize())
}
