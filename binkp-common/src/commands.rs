//! Binkp control-frame command identifiers
//!
//! Every control frame carries one of these identifiers in its first payload
//! byte; the remainder of the payload is ASCII argument text. The identifier
//! values are fixed by FTS-1026 and must never be renumbered.

/// Command identifier carried in the first byte of a control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinkCommand {
    /// Informational text (SYS/ZYZ/VER/LOC/OPT subcommands); never an error.
    Nul,
    /// Space-separated list of the sender's network addresses.
    Adr,
    /// Session password, plaintext or `CRAM-MD5-<hex>`.
    Pwd,
    /// File offer: `filename size timestamp offset [crc-hex]`.
    File,
    /// Password accepted; transfer phase may begin.
    Ok,
    /// End of batch: the sender has nothing further to offer.
    Eob,
    /// Full receipt confirmation for an offered file.
    Got,
    /// Fatal error text; the session ends after this frame.
    Err,
    /// The remote cannot take the session right now.
    Bsy,
    /// Request to (re)send a file from a byte offset.
    Get,
    /// Non-destructive skip of an offered file.
    Skip,
}

impl BinkCommand {
    /// Decode a wire command identifier. Returns `None` for identifiers
    /// outside the FTS-1026 table, which callers must treat as a protocol
    /// violation.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Nul),
            1 => Some(Self::Adr),
            2 => Some(Self::Pwd),
            3 => Some(Self::File),
            4 => Some(Self::Ok),
            5 => Some(Self::Eob),
            6 => Some(Self::Got),
            7 => Some(Self::Err),
            8 => Some(Self::Bsy),
            9 => Some(Self::Get),
            10 => Some(Self::Skip),
            _ => None,
        }
    }

    /// The wire identifier for this command.
    pub fn id(self) -> u8 {
        match self {
            Self::Nul => 0,
            Self::Adr => 1,
            Self::Pwd => 2,
            Self::File => 3,
            Self::Ok => 4,
            Self::Eob => 5,
            Self::Got => 6,
            Self::Err => 7,
            Self::Bsy => 8,
            Self::Get => 9,
            Self::Skip => 10,
        }
    }

    /// Conventional name used in session logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nul => "M_NUL",
            Self::Adr => "M_ADR",
            Self::Pwd => "M_PWD",
            Self::File => "M_FILE",
            Self::Ok => "M_OK",
            Self::Eob => "M_EOB",
            Self::Got => "M_GOT",
            Self::Err => "M_ERR",
            Self::Bsy => "M_BSY",
            Self::Get => "M_GET",
            Self::Skip => "M_SKIP",
        }
    }
}

impl std::fmt::Display for BinkCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
