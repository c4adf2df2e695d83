//! What we know about the peer on the other side of a session
//!
//! An originating session knows the remote identity before the socket
//! opens; an answering session starts blank and fills this in as the
//! greeting and address negotiation arrive. Setting an address or domain
//! re-derives the network binding from the configuration, so by the time
//! authentication runs the session knows which network's files and
//! credentials apply.

use std::collections::BTreeSet;
use std::sync::Arc;

use binkp_common::address::{FtnAddress, wwivnet_node_number_from_ftn_address};

use crate::config::BinkConfig;
use crate::net::Network;

/// Peer identity and negotiation state for one session
#[derive(Debug, Clone)]
pub struct Remote {
    config: Arc<BinkConfig>,
    domain: String,
    network_name: String,
    ftn_addresses: BTreeSet<FtnAddress>,
    wwivnet_node: u16,
    expected: Option<FtnAddress>,
    address_list: String,
    system_name: String,
    sysop_name: String,
    version: String,
}

impl Remote {
    /// State for a session we initiate: the target is known up front.
    ///
    /// A flat target fills in the node number; an FTN target seeds the
    /// resolved address set, so the outbound scan works the same way it
    /// does after an answering negotiation.
    pub fn for_originating(
        config: Arc<BinkConfig>,
        network_name: &str,
        expected: FtnAddress,
    ) -> Remote {
        let domain = match expected.domain() {
            Some(d) => d.to_ascii_lowercase(),
            None => config
                .network(network_name)
                .map(Network::domain)
                .unwrap_or_else(|| network_name.to_ascii_lowercase()),
        };
        let wwivnet_node =
            wwivnet_node_number_from_ftn_address(&expected.to_string(), &domain).unwrap_or(0);
        let mut ftn_addresses = BTreeSet::new();
        if wwivnet_node == 0 {
            ftn_addresses.insert(expected.clone());
        }
        Remote {
            config,
            domain,
            network_name: network_name.to_string(),
            ftn_addresses,
            wwivnet_node,
            expected: Some(expected),
            address_list: String::new(),
            system_name: String::new(),
            sysop_name: String::new(),
            version: String::new(),
        }
    }

    /// State for an answered call: nothing known until the peer talks
    pub fn for_answering(config: Arc<BinkConfig>) -> Remote {
        Remote {
            config,
            domain: String::new(),
            network_name: String::new(),
            ftn_addresses: BTreeSet::new(),
            wwivnet_node: 0,
            expected: None,
            address_list: String::new(),
            system_name: String::new(),
            sysop_name: String::new(),
            version: String::new(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    /// The configured network this peer resolved to, if any
    pub fn network(&self) -> Option<&Network> {
        self.config.network(&self.network_name)
    }

    /// Flat network node number; 0 until resolved
    pub fn wwivnet_node(&self) -> u16 {
        self.wwivnet_node
    }

    pub fn ftn_addresses(&self) -> &BTreeSet<FtnAddress> {
        &self.ftn_addresses
    }

    /// The identity we dialed, for originating sessions
    pub fn expected(&self) -> Option<&FtnAddress> {
        self.expected.as_ref()
    }

    /// The raw announced address list, lowercased
    pub fn address_list(&self) -> &str {
        &self.address_list
    }

    pub fn system_name(&self) -> &str {
        &self.system_name
    }

    pub fn sysop_name(&self) -> &str {
        &self.sysop_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The single address used for credential lookup.
    ///
    /// Originating sessions use the identity they dialed; answering
    /// sessions use the resolved flat node or the first resolved FTN
    /// address.
    pub fn password_address(&self) -> Option<FtnAddress> {
        if let Some(expected) = &self.expected {
            return Some(expected.clone());
        }
        if self.wwivnet_node != 0 {
            return Some(FtnAddress::from_flat_node(self.wwivnet_node, &self.domain));
        }
        self.ftn_addresses.iter().next().cloned()
    }

    /// Store the peer's M_ADR payload verbatim (lowercased)
    pub fn set_address_list(&mut self, list: &str) {
        self.address_list = list.trim().to_ascii_lowercase();
    }

    pub fn set_system_name(&mut self, name: &str) {
        self.system_name = name.trim().to_string();
    }

    pub fn set_sysop_name(&mut self, name: &str) {
        self.sysop_name = name.trim().to_string();
    }

    pub fn set_version(&mut self, version: &str) {
        self.version = version.trim().to_string();
    }

    /// Record the peer's flat network node and re-derive the network.
    ///
    /// Falls back to the first configured flat network when the announced
    /// domain names none of ours.
    pub fn set_wwivnet_node(&mut self, node: u16, domain: Option<&str>) {
        self.wwivnet_node = node;
        if let Some(d) = domain {
            self.domain = d.to_ascii_lowercase();
        }
        if let Some(network) = self.config.flat_network_for_domain(&self.domain) {
            self.network_name = network.name.clone();
            if self.domain.is_empty() {
                self.domain = network.domain();
            }
        }
    }

    /// Record the peer's domain and re-derive the network
    pub fn set_domain(&mut self, domain: &str) {
        self.domain = domain.to_ascii_lowercase();
        if let Some(network) = self.config.network_for_domain(&self.domain) {
            self.network_name = network.name.clone();
        }
    }

    /// Record the resolved address set.
    ///
    /// The domain follows the first address that carries one, which in
    /// turn re-derives the network binding.
    pub fn set_ftn_addresses(&mut self, addresses: BTreeSet<FtnAddress>) {
        if let Some(domain) = addresses.iter().find_map(|a| a.domain()) {
            let domain = domain.to_string();
            self.set_domain(&domain);
        }
        self.ftn_addresses = addresses;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<BinkConfig> {
        Arc::new(
            serde_json::from_str(
                r#"{
                    "system_name": "Test System",
                    "sysop_name": "Test Sysop",
                    "networks": [
                        {"name": "wwivnet", "kind": "flat", "dir": "/opt/net/wwivnet", "node": 1},
                        {"name": "fsxnet", "kind": "ftn", "dir": "/opt/net/fsxnet",
                         "address": "21:1/100@fsxnet"}
                    ]
                }"#,
            )
            .unwrap(),
        )
    }

    fn addr(s: &str) -> FtnAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_originating_flat_target() {
        let remote =
            Remote::for_originating(test_config(), "wwivnet", addr("20000:20000/2@wwivnet"));
        assert_eq!(remote.wwivnet_node(), 2);
        assert_eq!(remote.domain(), "wwivnet");
        assert_eq!(remote.network_name(), "wwivnet");
        assert!(remote.ftn_addresses().is_empty());
        assert_eq!(
            remote.password_address().unwrap().to_string(),
            "20000:20000/2@wwivnet"
        );
    }

    #[test]
    fn test_originating_ftn_target() {
        let remote = Remote::for_originating(test_config(), "fsxnet", addr("21:1/151@fsxnet"));
        assert_eq!(remote.wwivnet_node(), 0);
        assert_eq!(remote.domain(), "fsxnet");
        assert!(remote.ftn_addresses().contains(&addr("21:1/151@fsxnet")));
        assert_eq!(remote.password_address().unwrap().to_string(), "21:1/151@fsxnet");
    }

    #[test]
    fn test_originating_target_without_domain() {
        // The network's own domain fills the gap.
        let remote = Remote::for_originating(test_config(), "fsxnet", addr("21:1/151"));
        assert_eq!(remote.domain(), "fsxnet");
    }

    #[test]
    fn test_answering_starts_blank() {
        let remote = Remote::for_answering(test_config());
        assert_eq!(remote.wwivnet_node(), 0);
        assert!(remote.domain().is_empty());
        assert!(remote.network_name().is_empty());
        assert!(remote.network().is_none());
        assert!(remote.password_address().is_none());
    }

    #[test]
    fn test_address_list_is_lowercased() {
        let mut remote = Remote::for_answering(test_config());
        remote.set_address_list("  20000:20000/2@WWIVnet ");
        assert_eq!(remote.address_list(), "20000:20000/2@wwivnet");
    }

    #[test]
    fn test_set_wwivnet_node_resolves_network() {
        let mut remote = Remote::for_answering(test_config());
        remote.set_wwivnet_node(2, Some("wwivnet"));
        assert_eq!(remote.wwivnet_node(), 2);
        assert_eq!(remote.network_name(), "wwivnet");
        assert_eq!(
            remote.password_address().unwrap().to_string(),
            "20000:20000/2@wwivnet"
        );
    }

    #[test]
    fn test_set_wwivnet_node_without_domain_falls_back() {
        let mut remote = Remote::for_answering(test_config());
        remote.set_wwivnet_node(5, None);
        assert_eq!(remote.network_name(), "wwivnet");
        assert_eq!(remote.domain(), "wwivnet");
    }

    #[test]
    fn test_set_domain_resolves_network() {
        let mut remote = Remote::for_answering(test_config());
        remote.set_domain("FSXnet");
        assert_eq!(remote.domain(), "fsxnet");
        assert_eq!(remote.network_name(), "fsxnet");
    }

    #[test]
    fn test_set_ftn_addresses_derives_domain() {
        let mut remote = Remote::for_answering(test_config());
        let mut addrs = BTreeSet::new();
        addrs.insert(addr("21:1/151@fsxnet"));
        remote.set_ftn_addresses(addrs);
        assert_eq!(remote.domain(), "fsxnet");
        assert_eq!(remote.network_name(), "fsxnet");
        assert_eq!(remote.password_address().unwrap().to_string(), "21:1/151@fsxnet");
    }

    #[test]
    fn test_greeting_fields() {
        let mut remote = Remote::for_answering(test_config());
        remote.set_system_name("  Example BBS ");
        remote.set_sysop_name("Some Sysop");
        remote.set_version("binkpd/0.3.4 binkp/1.0");
        assert_eq!(remote.system_name(), "Example BBS");
        assert_eq!(remote.sysop_name(), "Some Sysop");
        assert_eq!(remote.version(), "binkpd/0.3.4 binkp/1.0");
    }
}
