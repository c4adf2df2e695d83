//! Framing error types

use std::fmt;
use std::io;

/// Errors from reading or writing binkp frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Underlying I/O error (message only, keeps the error cloneable)
    Io(String),
    /// The stream ended in the middle of a frame
    ConnectionClosed,
    /// No data arrived within the idle timeout (no frame was started)
    IdleTimeout,
    /// A frame started but did not complete within the frame timeout
    FrameTimeout,
    /// Outgoing payload exceeds what the 15-bit length field can carry
    PayloadTooLarge { length: usize, max: usize },
    /// A control frame must carry at least the command identifier byte
    EmptyControlFrame,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Io(msg) => write!(f, "I/O error: {}", msg),
            FrameError::ConnectionClosed => write!(f, "connection closed mid-frame"),
            FrameError::IdleTimeout => write!(f, "no frame received within idle timeout"),
            FrameError::FrameTimeout => write!(f, "frame did not complete within timeout"),
            FrameError::PayloadTooLarge { length, max } => {
                write!(f, "payload of {} bytes exceeds frame maximum of {}", length, max)
            }
            FrameError::EmptyControlFrame => write!(f, "control frame with empty payload"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::ConnectionClosed
        } else {
            FrameError::Io(err.to_string())
        }
    }
}
