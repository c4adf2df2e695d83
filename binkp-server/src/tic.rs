//! Narrow TIC metadata parsing for received-file triage
//!
//! A TIC file announces a file-area upload: a keyword-per-line text sidecar
//! naming the payload plus its declared size, CRC32, and link password.
//! Reclassification only needs those fields, so everything else in the
//! format is skipped without complaint.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use crate::checksum::crc32_file;

/// Errors from reading a TIC file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicError {
    /// The file could not be read
    Io(String),
    /// No `File` keyword named a payload
    MissingFile,
}

impl fmt::Display for TicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicError::Io(e) => write!(f, "cannot read tic file: {}", e),
            TicError::MissingFile => write!(f, "tic file names no payload"),
        }
    }
}

impl std::error::Error for TicError {}

impl From<io::Error> for TicError {
    fn from(e: io::Error) -> Self {
        TicError::Io(e.to_string())
    }
}

/// The fields of a TIC sidecar that triage consults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicFile {
    /// Payload filename as announced
    pub file: String,
    /// Declared payload size in bytes
    pub size: Option<u64>,
    /// Declared payload CRC32
    pub crc: Option<u32>,
    /// Link password carried in the sidecar
    pub password: Option<String>,
    /// Destination file area
    pub area: Option<String>,
}

impl TicFile {
    /// Parse TIC text.
    ///
    /// Lines are `Keyword value`; keywords are case-insensitive and
    /// unrecognized ones are ignored. A malformed `Size` or `Crc` value is
    /// treated as absent so that triage falls through to the payload checks
    /// that do apply.
    ///
    /// # Errors
    ///
    /// Returns [`TicError::MissingFile`] when no payload is named.
    pub fn parse(text: &str) -> Result<TicFile, TicError> {
        let mut file = None;
        let mut size = None;
        let mut crc = None;
        let mut password = None;
        let mut area = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (keyword, value) = match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k, v.trim()),
                None => (line, ""),
            };
            if keyword.eq_ignore_ascii_case("file") {
                file = Some(value.to_string());
            } else if keyword.eq_ignore_ascii_case("size") {
                size = value.parse::<u64>().ok();
            } else if keyword.eq_ignore_ascii_case("crc") {
                crc = u32::from_str_radix(value, 16).ok();
            } else if keyword.eq_ignore_ascii_case("pw") {
                password = Some(value.to_string());
            } else if keyword.eq_ignore_ascii_case("area") {
                area = Some(value.to_string());
            }
        }

        let file = file.filter(|f| !f.is_empty()).ok_or(TicError::MissingFile)?;
        Ok(TicFile { file, size, crc, password, area })
    }

    /// Read and parse a TIC file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or names no payload.
    pub fn load(path: &Path) -> Result<TicFile, TicError> {
        let text = fs::read_to_string(path)?;
        TicFile::parse(&text)
    }

    /// Whether the payload in `dir` matches the declared size and CRC.
    ///
    /// A missing payload fails; a declaration the sidecar does not carry is
    /// not checked.
    pub fn payload_matches(&self, dir: &Path) -> bool {
        let path = dir.join(&self.file);
        let Ok(metadata) = fs::metadata(&path) else {
            return false;
        };
        if let Some(size) = self.size
            && metadata.len() != size
        {
            return false;
        }
        if let Some(crc) = self.crc {
            match crc32_file(&path) {
                Ok(actual) => {
                    if actual != crc {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
        true
    }

    /// Whether the sidecar's password satisfies the configured link password.
    ///
    /// No configured password means no requirement. Comparison is
    /// case-insensitive, matching how links exchange these by convention.
    pub fn password_matches(&self, expected: Option<&str>) -> bool {
        match expected {
            None => true,
            Some(e) if e.is_empty() => true,
            Some(e) => {
                self.password.as_deref().is_some_and(|p| p.eq_ignore_ascii_case(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::checksum::crc32_bytes;

    const PAYLOAD: &[u8] = b"the quick brown fox jumps over the lazy dog";

    fn tic_text(crc: u32) -> String {
        format!(
            "Area FSX_FILE\nFile payload.zip\nSize {}\nCrc {:08X}\nPw SECRET\nDesc A test file\n",
            PAYLOAD.len(),
            crc
        )
    }

    #[test]
    fn test_parse_fields() {
        let tic = TicFile::parse(&tic_text(0xDEADBEEF)).unwrap();
        assert_eq!(tic.file, "payload.zip");
        assert_eq!(tic.size, Some(PAYLOAD.len() as u64));
        assert_eq!(tic.crc, Some(0xDEAD_BEEF));
        assert_eq!(tic.password.as_deref(), Some("SECRET"));
        assert_eq!(tic.area.as_deref(), Some("FSX_FILE"));
    }

    #[test]
    fn test_parse_keywords_case_insensitive() {
        let tic = TicFile::parse("FILE a.zip\nSIZE 10\nCRC ff\n").unwrap();
        assert_eq!(tic.file, "a.zip");
        assert_eq!(tic.size, Some(10));
        assert_eq!(tic.crc, Some(0xFF));
    }

    #[test]
    fn test_parse_requires_file() {
        assert_eq!(TicFile::parse("Size 10\n"), Err(TicError::MissingFile));
        assert_eq!(TicFile::parse("File \n"), Err(TicError::MissingFile));
    }

    #[test]
    fn test_parse_malformed_numbers_become_absent() {
        let tic = TicFile::parse("File a.zip\nSize big\nCrc zz\n").unwrap();
        assert_eq!(tic.size, None);
        assert_eq!(tic.crc, None);
    }

    #[test]
    fn test_payload_matches() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("payload.zip"), PAYLOAD).unwrap();
        let tic = TicFile::parse(&tic_text(crc32_bytes(PAYLOAD))).unwrap();
        assert!(tic.payload_matches(dir.path()));
    }

    #[test]
    fn test_payload_wrong_crc() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("payload.zip"), PAYLOAD).unwrap();
        let tic = TicFile::parse(&tic_text(0x12345678)).unwrap();
        assert!(!tic.payload_matches(dir.path()));
    }

    #[test]
    fn test_payload_wrong_size() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("payload.zip"), b"short").unwrap();
        let tic = TicFile::parse(&tic_text(crc32_bytes(PAYLOAD))).unwrap();
        assert!(!tic.payload_matches(dir.path()));
    }

    #[test]
    fn test_payload_missing() {
        let dir = TempDir::new().unwrap();
        let tic = TicFile::parse(&tic_text(crc32_bytes(PAYLOAD))).unwrap();
        assert!(!tic.payload_matches(dir.path()));
    }

    #[test]
    fn test_payload_without_declarations() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("payload.zip"), PAYLOAD).unwrap();
        let tic = TicFile::parse("File payload.zip\n").unwrap();
        assert!(tic.payload_matches(dir.path()));
    }

    #[test]
    fn test_password_checks() {
        let tic = TicFile::parse(&tic_text(0)).unwrap();
        assert!(tic.password_matches(None));
        assert!(tic.password_matches(Some("")));
        assert!(tic.password_matches(Some("secret")));
        assert!(tic.password_matches(Some("SECRET")));
        assert!(!tic.password_matches(Some("wrong")));
    }

    #[test]
    fn test_password_required_but_absent() {
        let tic = TicFile::parse("File a.zip\n").unwrap();
        assert!(!tic.password_matches(Some("secret")));
    }
}
