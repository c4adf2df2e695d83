//! Command-line argument parsing

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use binkp_common::DEFAULT_PORT;

/// Binkp mailer daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path (may appear before or after the subcommand)
    #[arg(short, long, default_value = "binkp.json", global = true)]
    pub config: PathBuf,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen for inbound binkp sessions
    Receive {
        /// IP address to bind to (IPv4 or IPv6)
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: IpAddr,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Call one remote node and exchange queued files
    Send {
        /// Network name from the configuration file
        #[arg(short, long)]
        network: String,

        /// Remote node: a flat node number or a zone:net/node[.point][@domain]
        /// FTN address
        #[arg(long)]
        node: String,

        /// Host name or IP address to connect to
        #[arg(long)]
        host: String,

        /// Port to connect to
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}
