//! Frame model and header encoding

/// High bit of the 2-byte header: set for control frames, clear for data.
pub const CONTROL_FLAG: u16 = 0x8000;

/// Maximum frame payload (15-bit length field).
pub const MAX_PAYLOAD: usize = 0x7FFF;

/// Maximum command argument text: one payload byte goes to the command id.
pub const MAX_COMMAND_ARGS: usize = MAX_PAYLOAD - 1;

/// One decoded binkp frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Control frame: command identifier plus ASCII argument text.
    ///
    /// The identifier is kept raw here; mapping to a known command (and
    /// rejecting unknown identifiers) is session policy, not framing.
    Command { id: u8, args: String },
    /// Data frame: the next in-order slice of the file being received.
    Data(Vec<u8>),
}

impl Frame {
    /// Payload length this frame occupies on the wire.
    pub fn payload_len(&self) -> usize {
        match self {
            Frame::Command { args, .. } => args.len() + 1,
            Frame::Data(data) => data.len(),
        }
    }
}

/// Encode a frame header. `len` must already be validated against
/// [`MAX_PAYLOAD`]; the length is masked to the 15-bit field.
pub fn encode_header(control: bool, len: usize) -> [u8; 2] {
    let mut header = (len as u16) & (MAX_PAYLOAD as u16);
    if control {
        header |= CONTROL_FLAG;
    }
    header.to_be_bytes()
}

/// Decode a frame header into (is_control, payload_len).
pub fn decode_header(bytes: [u8; 2]) -> (bool, usize) {
    let header = u16::from_be_bytes(bytes);
    (header & CONTROL_FLAG != 0, (header & (MAX_PAYLOAD as u16)) as usize)
}
