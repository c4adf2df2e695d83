//! Binkp Session Engine
//!
//! The server side of the binkp mailer suite: the session state machine,
//! the outbound queue built from flat-network pending files and FidoNet
//! `.?lo` control files, and post-session reclassification of received
//! files into inbound directories.
//!
//! The `binkpd` binary drives this crate from two front-ends: `receive`
//! listens for inbound calls and `send` places one outbound call. Both run
//! the same [`session::BinkSession`] over any async byte stream, so tests
//! drive complete sessions over [`tokio::io::duplex`] with no sockets.

pub mod callout;
pub mod checksum;
pub mod config;
pub mod file_manager;
pub mod flo;
pub mod names;
pub mod net;
pub mod remote;
pub mod session;
pub mod tic;
pub mod transfer;
