//! Daemon configuration
//!
//! One JSON file describes the system identity, the networks this node
//! belongs to, per-link credentials, and session tuning. Everything except
//! the identity and network list has serde defaults, so a minimal config is
//! a couple of lines.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use binkp_common::address::{FtnAddress, fixup_address};

use crate::callout::CalloutEntry;
use crate::net::{Network, NetworkKind};

// =============================================================================
// Errors
// =============================================================================

/// Errors from loading the daemon configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read
    Io(String),
    /// The file was not valid JSON for `BinkConfig`
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config: {}", e),
            ConfigError::Parse(e) => write!(f, "cannot parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

// =============================================================================
// Auth failure policy
// =============================================================================

/// What to do when the remote's password does not check out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailurePolicy {
    /// Send M_ERR and end the session
    #[default]
    Terminate,
    /// Continue as an insecure session: receive files, offer none
    ReceiveOnly,
}

// =============================================================================
// Session timeouts
// =============================================================================

/// Per-state timing for a binkp session
///
/// The defaults match the traditional mailer behavior; integration tests
/// shrink them so a full handshake runs in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionTimeouts {
    /// Frame pump before the greeting exchange
    #[serde(default = "default_conn_init_pump_ms")]
    pub conn_init_pump_ms: u64,

    /// Frame pump after sending the greeting
    #[serde(default = "default_greeting_pump_ms")]
    pub greeting_pump_ms: u64,

    /// One poll step while waiting for the peer's address list
    #[serde(default = "default_addr_poll_step_ms")]
    pub addr_poll_step_ms: u64,

    /// Poll steps to wait for the peer's address list
    #[serde(default = "default_addr_poll_tries")]
    pub addr_poll_tries: u32,

    /// One poll step while waiting for M_PWD or M_OK
    #[serde(default = "default_password_poll_step_ms")]
    pub password_poll_step_ms: u64,

    /// Poll steps to wait for M_PWD or M_OK
    #[serde(default = "default_password_poll_tries")]
    pub password_poll_tries: u32,

    /// Frame pump when entering and leaving the transfer state
    #[serde(default = "default_transfer_pump_ms")]
    pub transfer_pump_ms: u64,

    /// Pumps of `transfer_pump_ms` after all offers are sent
    #[serde(default = "default_transfer_drain_rounds")]
    pub transfer_drain_rounds: u32,

    /// Frame pump after each M_FILE offer
    #[serde(default = "default_offer_pump_ms")]
    pub offer_pump_ms: u64,

    /// Frame pump between outbound data chunks
    #[serde(default = "default_chunk_pump_ms")]
    pub chunk_pump_ms: u64,

    /// Progress timeout while reading one data frame's payload
    #[serde(default = "default_data_read_ms")]
    pub data_read_ms: u64,

    /// One wait step for the remote's M_EOB
    #[serde(default = "default_eob_step_ms")]
    pub eob_step_ms: u64,

    /// Wait steps for the remote's M_EOB
    #[serde(default = "default_eob_retries")]
    pub eob_retries: u32,

    /// One drain step in the terminal error states
    #[serde(default = "default_drain_step_ms")]
    pub drain_step_ms: u64,

    /// Frame pump between run-loop states
    #[serde(default = "default_loop_pump_ms")]
    pub loop_pump_ms: u64,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            conn_init_pump_ms: default_conn_init_pump_ms(),
            greeting_pump_ms: default_greeting_pump_ms(),
            addr_poll_step_ms: default_addr_poll_step_ms(),
            addr_poll_tries: default_addr_poll_tries(),
            password_poll_step_ms: default_password_poll_step_ms(),
            password_poll_tries: default_password_poll_tries(),
            transfer_pump_ms: default_transfer_pump_ms(),
            transfer_drain_rounds: default_transfer_drain_rounds(),
            offer_pump_ms: default_offer_pump_ms(),
            chunk_pump_ms: default_chunk_pump_ms(),
            data_read_ms: default_data_read_ms(),
            eob_step_ms: default_eob_step_ms(),
            eob_retries: default_eob_retries(),
            drain_step_ms: default_drain_step_ms(),
            loop_pump_ms: default_loop_pump_ms(),
        }
    }
}

impl SessionTimeouts {
    /// Timeouts scaled for tests driving both session ends in-process
    pub fn fast() -> Self {
        Self {
            conn_init_pump_ms: 10,
            greeting_pump_ms: 10,
            addr_poll_step_ms: 50,
            addr_poll_tries: 20,
            password_poll_step_ms: 50,
            password_poll_tries: 20,
            transfer_pump_ms: 20,
            transfer_drain_rounds: 3,
            offer_pump_ms: 20,
            chunk_pump_ms: 5,
            data_read_ms: 2000,
            eob_step_ms: 100,
            eob_retries: 20,
            drain_step_ms: 50,
            loop_pump_ms: 10,
        }
    }

    pub fn conn_init_pump(&self) -> Duration {
        Duration::from_millis(self.conn_init_pump_ms)
    }

    pub fn greeting_pump(&self) -> Duration {
        Duration::from_millis(self.greeting_pump_ms)
    }

    pub fn addr_poll_step(&self) -> Duration {
        Duration::from_millis(self.addr_poll_step_ms)
    }

    pub fn password_poll_step(&self) -> Duration {
        Duration::from_millis(self.password_poll_step_ms)
    }

    pub fn transfer_pump(&self) -> Duration {
        Duration::from_millis(self.transfer_pump_ms)
    }

    pub fn offer_pump(&self) -> Duration {
        Duration::from_millis(self.offer_pump_ms)
    }

    pub fn chunk_pump(&self) -> Duration {
        Duration::from_millis(self.chunk_pump_ms)
    }

    pub fn data_read(&self) -> Duration {
        Duration::from_millis(self.data_read_ms)
    }

    pub fn eob_step(&self) -> Duration {
        Duration::from_millis(self.eob_step_ms)
    }

    pub fn drain_step(&self) -> Duration {
        Duration::from_millis(self.drain_step_ms)
    }

    pub fn loop_pump(&self) -> Duration {
        Duration::from_millis(self.loop_pump_ms)
    }
}

fn default_conn_init_pump_ms() -> u64 {
    2000
}

fn default_greeting_pump_ms() -> u64 {
    100
}

fn default_addr_poll_step_ms() -> u64 {
    1000
}

fn default_addr_poll_tries() -> u32 {
    10
}

fn default_password_poll_step_ms() -> u64 {
    1000
}

fn default_password_poll_tries() -> u32 {
    30
}

fn default_transfer_pump_ms() -> u64 {
    500
}

fn default_transfer_drain_rounds() -> u32 {
    5
}

fn default_offer_pump_ms() -> u64 {
    2000
}

fn default_chunk_pump_ms() -> u64 {
    1000
}

fn default_data_read_ms() -> u64 {
    10_000
}

fn default_eob_step_ms() -> u64 {
    5000
}

fn default_eob_retries() -> u32 {
    12
}

fn default_drain_step_ms() -> u64 {
    3000
}

fn default_loop_pump_ms() -> u64 {
    100
}

// =============================================================================
// BinkConfig
// =============================================================================

/// Top-level daemon configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BinkConfig {
    /// System name announced in the greeting (M_NUL SYS)
    pub system_name: String,

    /// Sysop name announced in the greeting (M_NUL ZYZ)
    pub sysop_name: String,

    /// Location announced in the greeting (M_NUL LOC)
    #[serde(default = "default_location")]
    pub location: String,

    /// Offer and honor CRC32 on file transfers
    #[serde(default = "default_true")]
    pub crc: bool,

    /// Issue a CRAM-MD5 challenge when answering
    #[serde(default = "default_true")]
    pub cram_md5: bool,

    /// What to do when the remote's password does not check out
    #[serde(default)]
    pub auth_failure: AuthFailurePolicy,

    /// Networks this system belongs to
    #[serde(default)]
    pub networks: Vec<Network>,

    /// Per-link credentials: domain -> remote address -> entry
    #[serde(default)]
    pub callout: BTreeMap<String, BTreeMap<String, CalloutEntry>>,

    /// Session timing overrides
    #[serde(default)]
    pub session: SessionTimeouts,
}

impl BinkConfig {
    /// Load the configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: BinkConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Look up a network by name (case-insensitive)
    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.name.eq_ignore_ascii_case(name))
    }

    /// Look up the network answering to `domain`
    pub fn network_for_domain(&self, domain: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.domain().eq_ignore_ascii_case(domain))
    }

    /// Look up the flat network whose domain matches, falling back to the
    /// first flat network when the peer announced no usable domain
    pub fn flat_network_for_domain(&self, domain: &str) -> Option<&Network> {
        self.networks
            .iter()
            .filter(|n| n.kind == NetworkKind::Flat)
            .find(|n| n.domain().eq_ignore_ascii_case(domain))
            .or_else(|| self.networks.iter().find(|n| n.kind == NetworkKind::Flat))
    }

    /// Every address this system answers to, across all networks
    pub fn known_addresses(&self) -> std::collections::BTreeSet<FtnAddress> {
        self.networks.iter().filter_map(Network::announce_address).collect()
    }

    /// Every remote link address named in the callout table.
    ///
    /// Keys without a domain suffix inherit the domain they are filed
    /// under; bare numbers are flat network nodes. Answering sessions
    /// resolve the peer's announced address list against this set.
    pub fn known_link_addresses(&self) -> std::collections::BTreeSet<FtnAddress> {
        let mut known = std::collections::BTreeSet::new();
        for (domain, links) in &self.callout {
            for key in links.keys() {
                let Ok(addr) = fixup_address(key).parse::<FtnAddress>() else {
                    continue;
                };
                if addr.domain().is_some() {
                    known.insert(addr);
                } else {
                    known.insert(addr.with_domain(domain));
                }
            }
        }
        known
    }
}

fn default_location() -> String {
    "Unknown".to_string()
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Tests
// =============================================================================
