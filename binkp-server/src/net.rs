//! Network definitions and per-session directory layout

use std::path::{Path, PathBuf};

use binkp_common::address::FtnAddress;

// =============================================================================
// Network kinds
// =============================================================================

/// How a network addresses its member nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Flat 16-bit node numbers with `s<node>.net` queue files
    Flat,
    /// FidoNet `zone:net/node[.point]@domain` addressing with `.?lo`
    /// outbound control files
    Ftn,
}

// =============================================================================
// FidoNet directories
// =============================================================================

/// FidoNet-style directory layout for one network
///
/// Paths are resolved relative to the network directory unless absolute.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FidoDirs {
    /// Where received bundles and mail packets are filed
    #[serde(default = "default_inbound_dir")]
    pub inbound_dir: PathBuf,

    /// Where outbound bundles and `.?lo` control files live
    #[serde(default = "default_outbound_dir")]
    pub outbound_dir: PathBuf,

    /// Where validated TIC files and their payloads are filed
    #[serde(default = "default_tic_dir")]
    pub tic_dir: PathBuf,

    /// Where unrecognized received files are parked
    #[serde(default = "default_unknown_dir")]
    pub unknown_dir: PathBuf,

    /// Whether received TIC files are validated and filed
    #[serde(default)]
    pub process_tic: bool,
}

impl Default for FidoDirs {
    fn default() -> Self {
        Self {
            inbound_dir: default_inbound_dir(),
            outbound_dir: default_outbound_dir(),
            tic_dir: default_tic_dir(),
            unknown_dir: default_unknown_dir(),
            process_tic: false,
        }
    }
}

fn default_inbound_dir() -> PathBuf {
    PathBuf::from("in")
}

fn default_outbound_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_tic_dir() -> PathBuf {
    PathBuf::from("tic")
}

fn default_unknown_dir() -> PathBuf {
    PathBuf::from("unknown")
}

// =============================================================================
// Network
// =============================================================================

/// One network this system belongs to
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Network {
    /// Short network name, e.g. "wwivnet" or "fsxnet"
    pub name: String,

    /// Addressing scheme
    pub kind: NetworkKind,

    /// Network data directory (queue files, pending packets)
    pub dir: PathBuf,

    /// Our node number on a flat network (0 = unset)
    #[serde(default)]
    pub node: u16,

    /// Our address on an FTN network, e.g. "21:9/123@fsxnet"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// FTN directory layout; flat networks ignore this
    #[serde(default)]
    pub fido: FidoDirs,
}

impl Network {
    /// Parse the configured FTN address, if any
    pub fn ftn_address(&self) -> Option<FtnAddress> {
        self.address.as_deref().and_then(|a| a.parse().ok())
    }

    /// The domain this network answers to
    ///
    /// FTN networks use the domain embedded in the configured address;
    /// flat networks (and addresses without a domain) use the lowercased
    /// network name.
    pub fn domain(&self) -> String {
        if let Some(addr) = self.ftn_address()
            && let Some(domain) = addr.domain()
        {
            return domain.to_string();
        }
        self.name.to_lowercase()
    }

    /// The address announced for this network during the session greeting
    ///
    /// Flat networks present their node in the reserved flat zone with the
    /// network name as domain. Returns `None` when the network has no
    /// usable address (flat node 0, or an unparseable FTN address).
    pub fn announce_address(&self) -> Option<FtnAddress> {
        match self.kind {
            NetworkKind::Flat => {
                if self.node == 0 {
                    return None;
                }
                Some(FtnAddress::from_flat_node(self.node, &self.domain()))
            }
            NetworkKind::Ftn => {
                let addr = self.ftn_address()?;
                if addr.domain().is_some() {
                    Some(addr)
                } else {
                    Some(addr.with_domain(&self.domain()))
                }
            }
        }
    }
}

// =============================================================================
// Directory layout
// =============================================================================

/// Resolved directory layout for one session on one network
///
/// The receive directory is unique per session so concurrent sessions on
/// the same network never interleave partially received files.
#[derive(Debug, Clone)]
pub struct Dirs {
    net: PathBuf,
    receive: PathBuf,
    inbound: PathBuf,
    outbound: PathBuf,
    tic: PathBuf,
    unknown: PathBuf,
}

impl Dirs {
    /// Resolve the layout for `network` and session number `session_id`
    pub fn for_network(network: &Network, session_id: u32) -> Self {
        let net = network.dir.clone();
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                net.join(p)
            }
        };
        Self {
            receive: net.join(format!("r{session_id}")),
            inbound: resolve(&network.fido.inbound_dir),
            outbound: resolve(&network.fido.outbound_dir),
            tic: resolve(&network.fido.tic_dir),
            unknown: resolve(&network.fido.unknown_dir),
            net,
        }
    }

    /// The network data directory
    pub fn net_dir(&self) -> &Path {
        &self.net
    }

    /// The per-session receive directory
    pub fn receive_dir(&self) -> &Path {
        &self.receive
    }

    /// The FTN inbound directory for bundles and packets
    pub fn inbound_dir(&self) -> &Path {
        &self.inbound
    }

    /// The FTN outbound directory holding `.?lo` files and bundles
    pub fn outbound_dir(&self) -> &Path {
        &self.outbound
    }

    /// The directory for validated TIC files and payloads
    pub fn tic_dir(&self) -> &Path {
        &self.tic
    }

    /// The directory for unrecognized received files
    pub fn unknown_dir(&self) -> &Path {
        &self.unknown
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_network() -> Network {
        Network {
            name: "WWIVnet".to_string(),
            kind: NetworkKind::Flat,
            dir: PathBuf::from("/opt/net/wwivnet"),
            node: 1234,
            address: None,
            fido: FidoDirs::default(),
        }
    }

    fn ftn_network() -> Network {
        Network {
            name: "fsxnet".to_string(),
            kind: NetworkKind::Ftn,
            dir: PathBuf::from("/opt/net/fsxnet"),
            node: 0,
            address: Some("21:1/100@fsxnet".to_string()),
            fido: FidoDirs::default(),
        }
    }

    #[test]
    fn test_flat_domain_is_lowercased_name() {
        assert_eq!(flat_network().domain(), "wwivnet");
    }

    #[test]
    fn test_ftn_domain_from_address() {
        let mut net = ftn_network();
        assert_eq!(net.domain(), "fsxnet");

        // Address without a domain falls back to the network name.
        net.address = Some("21:1/100".to_string());
        net.name = "FSXnet".to_string();
        assert_eq!(net.domain(), "fsxnet");
    }

    #[test]
    fn test_flat_announce_address() {
        let addr = flat_network().announce_address().unwrap();
        assert_eq!(addr.to_string(), "20000:20000/1234@wwivnet");
    }

    #[test]
    fn test_flat_announce_address_without_node() {
        let mut net = flat_network();
        net.node = 0;
        assert!(net.announce_address().is_none());
    }

    #[test]
    fn test_ftn_announce_address() {
        let addr = ftn_network().announce_address().unwrap();
        assert_eq!(addr.to_string(), "21:1/100@fsxnet");
    }

    #[test]
    fn test_ftn_announce_address_adds_domain() {
        let mut net = ftn_network();
        net.address = Some("21:1/100".to_string());
        let addr = net.announce_address().unwrap();
        assert_eq!(addr.to_string(), "21:1/100@fsxnet");
    }

    #[test]
    fn test_ftn_announce_address_unparseable() {
        let mut net = ftn_network();
        net.address = Some("not-an-address".to_string());
        assert!(net.announce_address().is_none());
    }

    #[test]
    fn test_fido_dirs_defaults() {
        let dirs = FidoDirs::default();
        assert_eq!(dirs.inbound_dir, PathBuf::from("in"));
        assert_eq!(dirs.outbound_dir, PathBuf::from("out"));
        assert_eq!(dirs.tic_dir, PathBuf::from("tic"));
        assert_eq!(dirs.unknown_dir, PathBuf::from("unknown"));
        assert!(!dirs.process_tic);
    }

    #[test]
    fn test_dirs_resolve_relative_to_net_dir() {
        let dirs = Dirs::for_network(&ftn_network(), 7);
        assert_eq!(dirs.net_dir(), Path::new("/opt/net/fsxnet"));
        assert_eq!(dirs.receive_dir(), Path::new("/opt/net/fsxnet/r7"));
        assert_eq!(dirs.inbound_dir(), Path::new("/opt/net/fsxnet/in"));
        assert_eq!(dirs.outbound_dir(), Path::new("/opt/net/fsxnet/out"));
        assert_eq!(dirs.tic_dir(), Path::new("/opt/net/fsxnet/tic"));
        assert_eq!(dirs.unknown_dir(), Path::new("/opt/net/fsxnet/unknown"));
    }

    #[test]
    fn test_dirs_keep_absolute_overrides() {
        let mut net = ftn_network();
        net.fido.inbound_dir = PathBuf::from("/srv/ftn/in");
        let dirs = Dirs::for_network(&net, 1);
        assert_eq!(dirs.inbound_dir(), Path::new("/srv/ftn/in"));
        assert_eq!(dirs.outbound_dir(), Path::new("/opt/net/fsxnet/out"));
    }

    #[test]
    fn test_network_kind_serialization() {
        let json = serde_json::to_string(&NetworkKind::Flat).expect("serialize");
        assert_eq!(json, "\"flat\"");
        let kind: NetworkKind = serde_json::from_str("\"ftn\"").expect("deserialize");
        assert_eq!(kind, NetworkKind::Ftn);
    }

    #[test]
    fn test_network_deserialization_defaults() {
        let json = r#"{"name": "fsxnet", "kind": "ftn", "dir": "/opt/net/fsxnet"}"#;
        let net: Network = serde_json::from_str(json).expect("deserialize");
        assert_eq!(net.node, 0);
        assert!(net.address.is_none());
        assert_eq!(net.fido.inbound_dir, PathBuf::from("in"));
    }
}
