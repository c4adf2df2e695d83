//! Frame writer for serializing binkp frames to a stream

use tokio::io::AsyncWriteExt;

use super::error::FrameError;
use super::frame::{MAX_COMMAND_ARGS, MAX_PAYLOAD, encode_header};

/// Writes binkp frames to an async writer
pub struct FrameWriter<W> {
    writer: W,
}

impl<W> FrameWriter<W> {
    /// Create a new frame writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Get a reference to the underlying writer
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Get a mutable reference to the underlying writer
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Consume the frame writer and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWriteExt + Unpin> FrameWriter<W> {
    /// Write one control frame: command identifier plus argument text.
    ///
    /// The frame is flushed immediately; binkp is an interactive protocol
    /// and the peer may be waiting on this command to advance its own state.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] if `args` exceeds
    /// [`MAX_COMMAND_ARGS`], or an I/O error from the underlying writer.
    pub async fn write_command(&mut self, id: u8, args: &str) -> Result<(), FrameError> {
        let args = args.as_bytes();
        if args.len() > MAX_COMMAND_ARGS {
            return Err(FrameError::PayloadTooLarge { length: args.len() + 1, max: MAX_PAYLOAD });
        }
        let mut buf = Vec::with_capacity(args.len() + 3);
        buf.extend_from_slice(&encode_header(true, args.len() + 1));
        buf.push(id);
        buf.extend_from_slice(args);
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Write one data frame carrying the next slice of the current file.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] if `payload` exceeds
    /// [`MAX_PAYLOAD`], or an I/O error from the underlying writer.
    pub async fn write_data(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge { length: payload.len(), max: MAX_PAYLOAD });
        }
        self.writer.write_all(&encode_header(false, payload.len())).await?;
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut down the underlying writer, flushing any buffered bytes.
    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
