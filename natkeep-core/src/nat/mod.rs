//! NAT (Network Address Translation) classification and observed external addresses.
//!
//! A [`NatType`] is what a STUN discovery reports about the local network, and a
//! [`Host`] is the external transport address the server saw our socket come from.
//!
//! # Examples
//!
//! ```rust
//! use natkeep_core::nat::{are_different, Host, NatType};
//!
//! let nat = NatType::PortRestricted;
//! assert!(nat.is_punchable());
//!
//! let a = Host::new("203.0.113.7:1000".parse().unwrap());
//! let b = Host::new("203.0.113.7:1001".parse().unwrap());
//! assert!(are_different(Some(&a), Some(&b)));
//! assert!(!are_different(None, None));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Type of NAT as classified by a STUN discovery.
///
/// # Variants
///
/// - `Error` - The discovery itself failed
/// - `Unknown` - Nothing is known yet
/// - `None` - Not behind a NAT
/// - `Blocked` - UDP is blocked
/// - `Full` - Full cone, any external host can reach the mapping
/// - `Symmetric` - A different mapping per destination
/// - `Restricted` - Only contacted IPs can reach the mapping
/// - `PortRestricted` - Only contacted IP:port pairs can reach the mapping
/// - `SymmetricUdpFirewall` - Public address behind a stateful firewall
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize, Default)]
pub enum NatType {
    Error,
    #[default]
    Unknown,
    None,
    Blocked,
    Full,
    Symmetric,
    Restricted,
    PortRestricted,
    SymmetricUdpFirewall,
}

impl NatType {
    /// Returns true if a mapping for this NAT type can be held open with keep-alives.
    #[inline]
    pub fn is_punchable(&self) -> bool {
        matches!(
            self,
            NatType::None
                | NatType::PortRestricted
                | NatType::Restricted
                | NatType::Full
                | NatType::SymmetricUdpFirewall
        )
    }

    /// Returns false for the results a misbehaving server tends to produce.
    #[inline]
    pub fn is_reliable(&self) -> bool {
        !matches!(self, NatType::Error | NatType::Unknown | NatType::Blocked)
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NatType::Error => "Test failed",
            NatType::Unknown => "Unexpected response from the STUN server",
            NatType::None => "Not behind a NAT",
            NatType::Blocked => "UDP is blocked",
            NatType::Full => "Full cone NAT",
            NatType::Symmetric => "Symmetric NAT",
            NatType::Restricted => "Restricted NAT",
            NatType::PortRestricted => "Port restricted NAT",
            NatType::SymmetricUdpFirewall => "Symmetric UDP firewall",
        };
        f.write_str(name)
    }
}

/// An external transport address observed by a STUN server.
///
/// Two hosts are the same when their [`transport_addr`](Host::transport_addr) strings are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    addr: SocketAddr,
}

impl Host {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }
    /// `ip:port`, with IPv6 addresses in brackets.
    pub fn transport_addr(&self) -> String {
        self.addr.to_string()
    }
}

impl From<SocketAddr> for Host {
    fn from(addr: SocketAddr) -> Self {
        Host::new(addr)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Whether two observations should be reported as an address change.
///
/// Exactly one side missing counts as different; two missing sides do not.
pub fn are_different(first: Option<&Host>, second: Option<&Host>) -> bool {
    match (first, second) {
        (None, None) => false,
        (Some(first), Some(second)) => first.transport_addr() != second.transport_addr(),
        _ => true,
    }
}
