//! Binkp Common Library
//!
//! Shared protocol types, framing, addressing, and authentication primitives
//! for the binkp mailer suite.

pub mod address;
pub mod commands;
pub mod cram;
pub mod framing;

/// Protocol revision announced in the `M_NUL VER` greeting line.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default TCP port for binkp connections (FTS-1026).
pub const DEFAULT_PORT: u16 = 24554;

/// Default port as a string for clap default values and display.
///
/// This is the string representation of [`DEFAULT_PORT`], provided as a
/// constant because Rust doesn't support const string formatting.
pub const DEFAULT_PORT_STR: &str = "24554";
