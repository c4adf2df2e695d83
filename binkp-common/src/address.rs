//! FTN address parsing and address-list resolution
//!
//! Addresses use the FidoNet form `zone:net/node[.point][@domain]`. Peers
//! announce a free-text, space-delimited list of addresses during the binkp
//! handshake; the helpers here turn that list into a validated identity.
//!
//! The reserved `20000:20000` zone:net pair wraps a flat network node number
//! in FTN syntax so that both addressing schemes travel over the same
//! handshake.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Reserved zone used to express flat network node numbers as FTN addresses.
pub const FLAT_ZONE: u16 = 20000;

/// Reserved net used to express flat network node numbers as FTN addresses.
pub const FLAT_NET: u16 = 20000;

/// Errors from parsing an FTN address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    /// The input was empty or all whitespace
    Empty,
    /// No `:` separating zone from net
    MissingZone,
    /// No `/` separating net from node
    MissingNode,
    /// A zone/net/node/point component was not a number in range
    InvalidNumber(String),
    /// A wildcard component (`*` or `ALL`) is not accepted here
    Wildcard,
    /// `@` present but the domain is empty or malformed
    InvalidDomain,
}

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressParseError::Empty => write!(f, "address is empty"),
            AddressParseError::MissingZone => write!(f, "address has no zone (missing ':')"),
            AddressParseError::MissingNode => write!(f, "address has no node (missing '/')"),
            AddressParseError::InvalidNumber(part) => {
                write!(f, "address component is not a valid number: '{}'", part)
            }
            AddressParseError::Wildcard => write!(f, "wildcard addresses are not accepted"),
            AddressParseError::InvalidDomain => write!(f, "address domain is malformed"),
        }
    }
}

impl std::error::Error for AddressParseError {}

/// A fully-specified FTN address: `zone:net/node[.point][@domain]`.
///
/// Zone and net are always nonzero; node 0 is legal (net hosts). A missing
/// point is stored as 0 and omitted when formatting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FtnAddress {
    zone: u16,
    net: u16,
    node: u16,
    point: u16,
    domain: Option<String>,
}

impl FtnAddress {
    /// Build an address from components. `domain` is trimmed; an empty
    /// domain is treated as absent.
    pub fn new(zone: u16, net: u16, node: u16, point: u16, domain: Option<&str>) -> Self {
        let domain = domain
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        Self { zone, net, node, point, domain }
    }

    /// Wrap a flat network node number in the reserved `20000:20000` form.
    pub fn from_flat_node(node: u16, domain: &str) -> Self {
        Self::new(FLAT_ZONE, FLAT_NET, node, 0, Some(domain))
    }

    pub fn zone(&self) -> u16 {
        self.zone
    }

    pub fn net(&self) -> u16 {
        self.net
    }

    pub fn node(&self) -> u16 {
        self.node
    }

    pub fn point(&self) -> u16 {
        self.point
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Same zone, net, and node; point and domain are not compared. This is
    /// the match used when resolving a peer's announced list against our
    /// configured addresses, where one side commonly omits the domain.
    pub fn approximately_equals(&self, other: &FtnAddress) -> bool {
        self.zone == other.zone && self.net == other.net && self.node == other.node
    }

    /// A copy of this address with the domain removed.
    pub fn without_domain(&self) -> FtnAddress {
        FtnAddress { domain: None, ..self.clone() }
    }

    /// A copy of this address carrying `domain`.
    pub fn with_domain(&self, domain: &str) -> FtnAddress {
        FtnAddress::new(self.zone, self.net, self.node, self.point, Some(domain))
    }
}

impl fmt::Display for FtnAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.zone, self.net, self.node)?;
        if self.point != 0 {
            write!(f, ".{}", self.point)?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "@{}", domain)?;
        }
        Ok(())
    }
}

impl FromStr for FtnAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressParseError::Empty);
        }
        if s.contains('*') || s.eq_ignore_ascii_case("all") {
            return Err(AddressParseError::Wildcard);
        }

        let (body, domain) = match s.split_once('@') {
            Some((body, domain)) => {
                if domain.is_empty() || domain.contains('@') || domain.contains(char::is_whitespace)
                {
                    return Err(AddressParseError::InvalidDomain);
                }
                (body, Some(domain))
            }
            None => (s, None),
        };

        let (zone_str, rest) = body.split_once(':').ok_or(AddressParseError::MissingZone)?;
        let (net_str, node_str) = rest.split_once('/').ok_or(AddressParseError::MissingNode)?;
        let (node_str, point_str) = match node_str.split_once('.') {
            Some((node, point)) => (node, Some(point)),
            None => (node_str, None),
        };

        let zone = parse_component(zone_str)?;
        let net = parse_component(net_str)?;
        let node = parse_component(node_str)?;
        let point = match point_str {
            Some(p) => parse_component(p)?,
            None => 0,
        };
        if zone == 0 || net == 0 {
            return Err(AddressParseError::InvalidNumber(body.to_string()));
        }

        Ok(FtnAddress::new(zone, net, node, point, domain))
    }
}

fn parse_component(s: &str) -> Result<u16, AddressParseError> {
    s.parse::<u16>()
        .map_err(|_| AddressParseError::InvalidNumber(s.to_string()))
}

/// Normalize a caller-supplied remote identity token.
///
/// A bare number is a flat network node and gains the reserved
/// `20000:20000/` prefix; anything already carrying FTN structure is
/// returned trimmed but otherwise untouched.
pub fn fixup_address(token: &str) -> String {
    let token = token.trim();
    if token.contains(':') || token.contains('/') {
        token.to_string()
    } else {
        format!("{}:{}/{}", FLAT_ZONE, FLAT_NET, token)
    }
}

/// Pick the peer's address for `domain` out of a free-text address list.
///
/// Returns the first well-formed, non-wildcard address whose domain suffix
/// matches `domain`. When no address names the domain, falls back to the
/// first well-formed address carrying no domain at all.
pub fn ftn_address_from_address_list(list: &str, domain: &str) -> Option<FtnAddress> {
    let suffix = format!("@{}", domain);
    let mut fallback = None;
    for token in list.split_whitespace() {
        let Ok(addr) = token.parse::<FtnAddress>() else {
            continue;
        };
        if token.ends_with(&suffix) {
            return Some(addr);
        }
        if addr.domain().is_none() && fallback.is_none() {
            fallback = Some(addr);
        }
    }
    fallback
}

/// Resolve a peer's announced list against our known addresses.
///
/// A token is accepted when it parses and either matches a known address
/// exactly or is approximately equal (zone:net/node) to one. The stored
/// result prefers whichever variant carries an explicit domain, with the
/// known (configured) variant winning when both do.
pub fn ftn_addresses_from_address_list(
    list: &str,
    known: &BTreeSet<FtnAddress>,
) -> BTreeSet<FtnAddress> {
    let mut resolved = BTreeSet::new();
    for token in list.split_whitespace() {
        let Ok(addr) = token.parse::<FtnAddress>() else {
            continue;
        };
        if known.contains(&addr) {
            resolved.insert(addr);
            continue;
        }
        for k in known {
            if k.approximately_equals(&addr) {
                let chosen = if k.domain().is_some() || addr.domain().is_none() {
                    k.clone()
                } else {
                    addr.clone()
                };
                resolved.insert(chosen);
                break;
            }
        }
    }
    resolved
}

/// Extract the flat network node number from an FTN-wrapped address.
///
/// Returns `Some(node)` only for the reserved `20000:20000` zone:net whose
/// domain (when present) matches `domain`; everything else is "no node".
pub fn wwivnet_node_number_from_ftn_address(address: &str, domain: &str) -> Option<u16> {
    let addr = address.parse::<FtnAddress>().ok()?;
    if addr.zone() != FLAT_ZONE || addr.net() != FLAT_NET {
        return None;
    }
    if addr.domain().is_none_or(|d| d == domain) {
        Some(addr.node())
    } else {
        None
    }
}
