//! Binkp wire framing
//!
//! Every unit on the wire is a frame introduced by a 2-byte big-endian
//! header. Bit 15 tags the frame type (1 = control, 0 = data) and the low 15
//! bits give the payload length, so a payload is at most 32767 bytes. A
//! control frame's first payload byte is a command identifier
//! (see [`crate::commands`]) and the remainder is ASCII argument text. A data
//! frame's payload is the next contiguous slice of the file being received;
//! data frames carry no offsets, so arrival order is file order.

mod error;
mod frame;
mod reader;
mod writer;

pub use error::FrameError;
pub use frame::{CONTROL_FLAG, Frame, MAX_COMMAND_ARGS, MAX_PAYLOAD, decode_header, encode_header};
pub use reader::{DEFAULT_FRAME_TIMEOUT, DEFAULT_IDLE_TIMEOUT, FrameReader};
pub use writer::FrameWriter;
