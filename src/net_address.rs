//! Typed network addresses for peers, with canonicalization and
//! classification.
//!
//! Peer addresses arrive as raw byte strings gossiped by untrusted peers, so
//! every constructor canonicalizes the bytes and re-derives the network type
//! from them rather than trusting the sender's claim.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use chrono::{DateTime, TimeZone, Utc};

use crate::errors::Error;

mod classify;
mod parse;

#[cfg(test)]
mod tests;

pub use classify::Reachability;
pub use parse::parse_host;

pub(crate) use classify::reachability;

use parse::{onion_v2_host, onion_v3_host};

bitflags::bitflags! {
    /// A bitflag describing services advertised by a node on the network.
    ///
    /// Only the full-node bit is interpreted here; other bits are carried
    /// opaquely and merged when the same address is gossiped repeatedly.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct ServiceFlags: u64 {
        /// The node is a full node capable of serving blocks.
        const NODE_NETWORK = 1 << 0;
    }
}

/// The network a peer address belongs to, derived from its byte layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NetAddressType {
    /// A plain IPv4 address, stored as 4 bytes.
    Ipv4,
    /// A plain IPv6 address, stored as 16 bytes.
    Ipv6,
    /// A version 2 Tor onion service, stored as the 6-byte onion-cat prefix
    /// followed by the 10-byte service public key.
    TorV2,
    /// A version 3 Tor onion service, stored as the 32-byte ed25519 service
    /// public key.
    TorV3,
    /// An address whose type could not be derived. Only produced by
    /// [`parse_host`] for hostnames that need resolving.
    Unknown,
}

impl NetAddressType {
    /// The numeric tag identifying this type in wire records and in the
    /// peers file.
    pub fn wire_code(self) -> u8 {
        match self {
            NetAddressType::Ipv4 => 1,
            NetAddressType::Ipv6 => 2,
            NetAddressType::TorV2 => 3,
            NetAddressType::TorV3 => 4,
            NetAddressType::Unknown => 0,
        }
    }

    /// The type for a numeric tag read from a wire record or the peers
    /// file.
    pub fn from_wire_code(code: u8) -> Result<NetAddressType, Error> {
        match code {
            1 => Ok(NetAddressType::Ipv4),
            2 => Ok(NetAddressType::Ipv6),
            3 => Ok(NetAddressType::TorV2),
            4 => Ok(NetAddressType::TorV3),
            _ => Err(Error::Parse("unknown address type code")),
        }
    }
}

impl fmt::Display for NetAddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetAddressType::Ipv4 => "IPv4",
            NetAddressType::Ipv6 => "IPv6",
            NetAddressType::TorV2 => "TORv2",
            NetAddressType::TorV3 => "TORv3",
            NetAddressType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// The reserved IPv6 prefix used by the deprecated onion-cat mapping to
/// embed a 10-byte TORv2 service key in an IPv6 address.
pub const ONION_CAT_PREFIX: [u8; 6] = [0xfd, 0x87, 0xd8, 0x7e, 0xeb, 0x43];

/// A peer endpoint: a typed network address, port, advertised services, and
/// the last time the address was seen.
///
/// `NetAddress` values are immutable once constructed. Updates to a stored
/// address (service merges, timestamp refreshes) build a new value with the
/// [`with_services`](Self::with_services) and
/// [`with_timestamp`](Self::with_timestamp) builders and replace the shared
/// handle, so previously returned handles never change underneath a caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetAddress {
    addr_type: NetAddressType,
    ip: Vec<u8>,
    port: u16,
    services: ServiceFlags,
    timestamp: DateTime<Utc>,
}

/// Returns true when the raw bytes are an IPv4 address: either 4 bytes, or
/// an IPv4-mapped IPv6 address.
fn is_ipv4_bytes(bytes: &[u8]) -> bool {
    match bytes.len() {
        4 => true,
        16 => ipv6_from_slice(bytes).to_ipv4_mapped().is_some(),
        _ => false,
    }
}

fn ipv6_from_slice(bytes: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(bytes);
    Ipv6Addr::from(octets)
}

/// Derives the network type from raw address bytes.
///
/// The caller's claimed type only matters for TORv3: a 32-byte address is
/// otherwise indistinguishable from garbage.
pub fn derive_net_address_type(
    claimed: NetAddressType,
    bytes: &[u8],
) -> Result<NetAddressType, Error> {
    match bytes.len() {
        _ if is_ipv4_bytes(bytes) => Ok(NetAddressType::Ipv4),
        10 => Ok(NetAddressType::TorV2),
        16 if bytes[..6] == ONION_CAT_PREFIX => Ok(NetAddressType::TorV2),
        16 => Ok(NetAddressType::Ipv6),
        32 if claimed == NetAddressType::TorV3 => Ok(NetAddressType::TorV3),
        _ => Err(Error::UnknownAddressType(
            "unable to determine address type from raw network address bytes",
        )),
    }
}

/// Converts raw address bytes into the standard stored layout for their
/// network type: IPv4-mapped IPv6 collapses to 4 bytes, and a bare 10-byte
/// TORv2 key gains the onion-cat prefix.
pub fn canonicalize_ip(addr_type: NetAddressType, bytes: &[u8]) -> Vec<u8> {
    match (addr_type, bytes.len()) {
        (NetAddressType::Ipv4, 16) => {
            match ipv6_from_slice(bytes).to_ipv4_mapped() {
                Some(v4) => v4.octets().to_vec(),
                None => bytes.to_vec(),
            }
        }
        (NetAddressType::TorV2, 10) => {
            let mut ip = ONION_CAT_PREFIX.to_vec();
            ip.extend_from_slice(bytes);
            ip
        }
        _ => bytes.to_vec(),
    }
}

/// Truncates a wall-clock time to second granularity, the resolution used
/// throughout the address book and its on-disk format.
pub(crate) fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(time.timestamp(), 0)
        .single()
        .expect("timestamp in seconds is always in range")
}

impl NetAddress {
    /// Constructs a new `NetAddress` from explicitly typed raw bytes.
    ///
    /// The bytes are canonicalized first; if the claimed type then disagrees
    /// with the type derived from the canonical bytes, an error is returned.
    pub fn from_bytes(
        addr_type: NetAddressType,
        bytes: &[u8],
        port: u16,
        timestamp: DateTime<Utc>,
        services: ServiceFlags,
    ) -> Result<NetAddress, Error> {
        let ip = canonicalize_ip(addr_type, bytes);
        let derived = derive_net_address_type(addr_type, &ip)?;
        if derived != addr_type {
            return Err(Error::MismatchedAddressType {
                claimed: addr_type,
                derived,
            });
        }
        Ok(NetAddress {
            addr_type,
            ip,
            port,
            services,
            timestamp: truncate_to_seconds(timestamp),
        })
    }

    /// Constructs a new `NetAddress` from an IP address, with the current
    /// time as its timestamp.
    pub fn from_ip(ip: IpAddr, port: u16, services: ServiceFlags) -> NetAddress {
        let bytes = match ip {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        // An IP from the standard library is always IPv4 or IPv6, possibly
        // carrying an onion-cat payload.
        let addr_type = derive_net_address_type(NetAddressType::Unknown, &bytes)
            .expect("4 or 16 byte addresses always derive a type");
        let ip = canonicalize_ip(addr_type, &bytes);
        NetAddress {
            addr_type,
            ip,
            port,
            services,
            timestamp: truncate_to_seconds(Utc::now()),
        }
    }

    /// The network type of this address.
    pub fn addr_type(&self) -> NetAddressType {
        self.addr_type
    }

    /// The canonical raw address bytes: 4 for IPv4, 16 for IPv6 and
    /// onion-cat TORv2, 32 for TORv3.
    pub fn ip(&self) -> &[u8] {
        &self.ip
    }

    /// The peer's port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The services advertised for this address.
    pub fn services(&self) -> ServiceFlags {
        self.services
    }

    /// The last time this address was seen, at second granularity.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns a copy of this address with different services.
    pub fn with_services(&self, services: ServiceFlags) -> NetAddress {
        NetAddress {
            services,
            ..self.clone()
        }
    }

    /// Returns a copy of this address with a different timestamp.
    pub fn with_timestamp(&self, timestamp: DateTime<Utc>) -> NetAddress {
        NetAddress {
            timestamp: truncate_to_seconds(timestamp),
            ..self.clone()
        }
    }

    /// Whether this address can be reached from the public internet.
    pub fn is_routable(&self) -> bool {
        classify::is_routable(self)
    }

    /// The network group this address belongs to, used to cluster addresses
    /// that likely share an operator when hashing into buckets.
    pub fn group_key(&self) -> String {
        classify::group_key(self)
    }

    /// The address rendered without its port: dotted-quad, colon-hex, or a
    /// `.onion` name for Tor addresses.
    pub fn ip_string(&self) -> String {
        match self.addr_type {
            NetAddressType::TorV2 => onion_v2_host(&self.ip[6..]),
            NetAddressType::TorV3 => onion_v3_host(&self.ip),
            _ => match self.to_ip_addr() {
                Some(ip) => ip.to_string(),
                None => hex::encode(&self.ip),
            },
        }
    }

    /// A canonical `host:port` string uniquely identifying this address.
    ///
    /// IPv6 hosts are bracketed, so keys parse back with standard host/port
    /// splitting.
    pub fn key(&self) -> String {
        let host = self.ip_string();
        if host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// The address as a standard library IP, when it has an IP form.
    ///
    /// TORv2 addresses render through their onion-cat IPv6 embedding;
    /// TORv3 addresses have no IP form.
    pub fn to_ip_addr(&self) -> Option<IpAddr> {
        match self.ip.len() {
            4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.ip);
                Some(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            16 => Some(IpAddr::V6(ipv6_from_slice(&self.ip))),
            _ => None,
        }
    }

    /// The all-zero address of the given family, used as the fallback when
    /// no local address is worth advertising.
    pub fn unspecified(addr_type: NetAddressType, port: u16) -> NetAddress {
        let ip = match addr_type {
            NetAddressType::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            _ => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        NetAddress::from_ip(ip, port, ServiceFlags::empty())
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
