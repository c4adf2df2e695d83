//! Per-link credentials
//!
//! Passwords are looked up by the remote's resolved address inside its
//! domain. A missing entry is not an error: the handshake falls back to the
//! open password `"-"`, which both sides of an unkeyed link present.

use std::fmt;

use binkp_common::address::{FLAT_NET, FLAT_ZONE, FtnAddress};

use crate::config::BinkConfig;

/// The open password used when no callout entry names the remote
pub const DEFAULT_PASSWORD: &str = "-";

/// Credentials for one remote link
#[derive(Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CalloutEntry {
    /// Session password for the binkp handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Password expected on TIC files from this link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tic_password: Option<String>,
}

// Manual Debug implementation so passwords never reach logs
impl fmt::Debug for CalloutEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalloutEntry")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("tic_password", &self.tic_password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Where session secrets come from
///
/// `None` means no entry names the address. Sessions treat that as the open
/// password rather than a failure; see [`expected_password`].
pub trait CredentialSource: Send + Sync {
    /// Session password for `address` within `domain`
    fn session_password(&self, domain: &str, address: &FtnAddress) -> Option<String>;

    /// TIC file password for `address` within `domain`
    fn tic_password(&self, domain: &str, address: &FtnAddress) -> Option<String>;
}

/// The password expected from `address`, falling back to the open password
pub fn expected_password(
    source: &dyn CredentialSource,
    domain: &str,
    address: &FtnAddress,
) -> String {
    source
        .session_password(domain, address)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PASSWORD.to_string())
}

impl CredentialSource for BinkConfig {
    fn session_password(&self, domain: &str, address: &FtnAddress) -> Option<String> {
        entry_for(self, domain, address).and_then(|e| e.password.clone())
    }

    fn tic_password(&self, domain: &str, address: &FtnAddress) -> Option<String> {
        entry_for(self, domain, address).and_then(|e| e.tic_password.clone())
    }
}

/// Find the callout entry for an address.
///
/// Entries may be keyed by the full address, the address without its domain,
/// or (for flat networks) the bare node number.
fn entry_for<'a>(
    config: &'a BinkConfig,
    domain: &str,
    address: &FtnAddress,
) -> Option<&'a CalloutEntry> {
    let links = config.callout.get(domain)?;
    if let Some(entry) = links.get(&address.to_string()) {
        return Some(entry);
    }
    if let Some(entry) = links.get(&address.without_domain().to_string()) {
        return Some(entry);
    }
    if address.zone() == FLAT_ZONE && address.net() == FLAT_NET {
        return links.get(&address.node().to_string());
    }
    None
}
