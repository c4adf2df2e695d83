//! Frame reader for parsing binkp frames from a stream

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::time::timeout;

use super::error::FrameError;
use super::frame::{Frame, decode_header};

/// Default timeout for completing a frame once the first byte is received.
///
/// Matches the fixed data-read window of the transfer loop: a peer that
/// started a frame gets this long to finish it.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Default idle timeout (waiting for the first header byte)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads binkp frames from an async reader
pub struct FrameReader<R> {
    reader: R,
}

impl<R> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Get a reference to the underlying reader
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Get a mutable reference to the underlying reader
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consume the frame reader and return the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncReadExt + Unpin> FrameReader<R> {
    /// Read the next frame from the stream
    ///
    /// Returns `Ok(None)` if the connection is cleanly closed before a frame
    /// starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed or an I/O error occurs.
    ///
    /// # Note
    ///
    /// This method has no timeout - it will wait indefinitely for data.
    /// For session use, prefer
    /// [`read_frame_with_full_timeout`](Self::read_frame_with_full_timeout).
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let first_byte = match self.read_byte_allow_eof().await? {
            Some(b) => b,
            None => return Ok(None), // Clean disconnect
        };
        self.read_frame_after_first_byte(first_byte).await
    }

    /// Read the next frame, waiting indefinitely for it to start but
    /// requiring it to complete within `frame_timeout` once started.
    ///
    /// Returns `Ok(None)` if the connection is cleanly closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed, an I/O error occurs, or
    /// the frame doesn't complete within the timeout after the first byte.
    pub async fn read_frame_with_timeout(
        &mut self,
        frame_timeout: Duration,
    ) -> Result<Option<Frame>, FrameError> {
        let first_byte = match self.read_byte_allow_eof().await? {
            Some(b) => b,
            None => return Ok(None), // Clean disconnect
        };
        match timeout(frame_timeout, self.read_frame_after_first_byte(first_byte)).await {
            Ok(result) => result,
            Err(_) => Err(FrameError::FrameTimeout),
        }
    }

    /// Read the next frame with a bound on both the idle wait and the frame
    /// itself.
    ///
    /// The session drives all of its reads through this method: the idle
    /// timeout is the state machine's per-call wait (an
    /// [`FrameError::IdleTimeout`] here just means "nothing arrived right
    /// now" and is not itself fatal), while a frame that starts and stalls is
    /// a protocol failure.
    ///
    /// Returns `Ok(None)` if the connection is cleanly closed.
    ///
    /// # Arguments
    ///
    /// * `idle_timeout` - Maximum time to wait for the first header byte
    /// * `frame_timeout` - Maximum time to complete the frame after the first byte
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed, an I/O error occurs, no
    /// data arrives within `idle_timeout`, or the frame doesn't complete
    /// within `frame_timeout`.
    pub async fn read_frame_with_full_timeout(
        &mut self,
        idle_timeout: Duration,
        frame_timeout: Duration,
    ) -> Result<Option<Frame>, FrameError> {
        let first_byte = match timeout(idle_timeout, self.read_byte_allow_eof()).await {
            Ok(Ok(Some(b))) => b,
            Ok(Ok(None)) => return Ok(None), // Clean disconnect
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(FrameError::IdleTimeout),
        };
        match timeout(frame_timeout, self.read_frame_after_first_byte(first_byte)).await {
            Ok(result) => result,
            Err(_) => Err(FrameError::FrameTimeout),
        }
    }

    /// Read one byte, mapping a clean EOF to `Ok(None)`.
    async fn read_byte_allow_eof(&mut self) -> Result<Option<u8>, FrameError> {
        let mut byte = [0u8; 1];
        match self.reader.read_exact(&mut byte).await {
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Complete a frame whose first header byte has been consumed.
    ///
    /// From here on EOF is a mid-frame close, not a clean disconnect.
    async fn read_frame_after_first_byte(
        &mut self,
        first_byte: u8,
    ) -> Result<Option<Frame>, FrameError> {
        let mut second = [0u8; 1];
        self.reader.read_exact(&mut second).await?;
        let (control, length) = decode_header([first_byte, second[0]]);

        if control && length == 0 {
            return Err(FrameError::EmptyControlFrame);
        }

        let mut payload = vec![0u8; length];
        if length > 0 {
            self.reader.read_exact(&mut payload).await?;
        }

        if control {
            let id = payload[0];
            let args = String::from_utf8_lossy(&payload[1..]).into_owned();
            Ok(Some(Frame::Command { id, args }))
        } else {
            Ok(Some(Frame::Data(payload)))
        }
    }
}
