//! Routability, network-group, and reachability classification.
//!
//! The special-purpose ranges below follow the IANA registries; each
//! predicate takes the canonical stored bytes for its family.

use std::fmt;

use super::{NetAddress, NetAddressType};

fn is_rfc1918(b: &[u8]) -> bool {
    b[0] == 10 || (b[0] == 172 && (b[1] & 0xf0) == 16) || (b[0] == 192 && b[1] == 168)
}

fn is_rfc2544(b: &[u8]) -> bool {
    b[0] == 198 && (b[1] == 18 || b[1] == 19)
}

fn is_rfc3927(b: &[u8]) -> bool {
    b[0] == 169 && b[1] == 254
}

fn is_v4_loopback(b: &[u8]) -> bool {
    b[0] == 127
}

fn is_v4_multicast(b: &[u8]) -> bool {
    (b[0] & 0xf0) == 224
}

fn is_v4_unspecified(b: &[u8]) -> bool {
    b[..4] == [0, 0, 0, 0]
}

fn is_v4_broadcast(b: &[u8]) -> bool {
    b[..4] == [255, 255, 255, 255]
}

fn is_v6_unspecified(b: &[u8]) -> bool {
    b.iter().all(|&o| o == 0)
}

fn is_v6_loopback(b: &[u8]) -> bool {
    b[..15].iter().all(|&o| o == 0) && b[15] == 1
}

fn is_v6_multicast(b: &[u8]) -> bool {
    b[0] == 0xff
}

/// RFC 4862 link-local: fe80::/64.
fn is_rfc4862(b: &[u8]) -> bool {
    b[..8] == [0xfe, 0x80, 0, 0, 0, 0, 0, 0]
}

/// RFC 4193 unique local: fc00::/7.
fn is_rfc4193(b: &[u8]) -> bool {
    (b[0] & 0xfe) == 0xfc
}

/// RFC 4843 ORCHID: 2001:10::/28.
fn is_rfc4843(b: &[u8]) -> bool {
    b[0] == 0x20 && b[1] == 0x01 && b[2] == 0x00 && (b[3] & 0xf0) == 0x10
}

/// RFC 3849 documentation range: 2001:db8::/32.
fn is_rfc3849(b: &[u8]) -> bool {
    b[0] == 0x20 && b[1] == 0x01 && b[2] == 0x0d && b[3] == 0xb8
}

/// RFC 4380 Teredo tunneling: 2001::/32.
fn is_rfc4380(b: &[u8]) -> bool {
    b[0] == 0x20 && b[1] == 0x01 && b[2] == 0x00 && b[3] == 0x00
}

/// RFC 3964 6to4 tunneling: 2002::/16, IPv4 embedded at bytes 2..6.
fn is_rfc3964(b: &[u8]) -> bool {
    b[0] == 0x20 && b[1] == 0x02
}

/// RFC 6052 IPv4-IPv6 translation: 64:ff9b::/96, IPv4 embedded at 12..16.
fn is_rfc6052(b: &[u8]) -> bool {
    b[..12] == [0x00, 0x64, 0xff, 0x9b, 0, 0, 0, 0, 0, 0, 0, 0]
}

/// RFC 6145 IPv4-translated: ::ffff:0:0:0/96, IPv4 embedded at 12..16.
fn is_rfc6145(b: &[u8]) -> bool {
    b[..12] == [0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 0, 0]
}

/// Whether the address is reachable from the public internet.
///
/// Tor addresses are always considered routable; their reachability from a
/// particular local address is a separate question answered by
/// [`reachability`].
pub(crate) fn is_routable(na: &NetAddress) -> bool {
    let b = na.ip();
    match na.addr_type() {
        NetAddressType::TorV2 | NetAddressType::TorV3 => true,
        NetAddressType::Ipv4 => {
            !is_v4_unspecified(b)
                && !is_v4_broadcast(b)
                && !is_v4_loopback(b)
                && !is_v4_multicast(b)
                && !is_rfc1918(b)
                && !is_rfc2544(b)
                && !is_rfc3927(b)
        }
        NetAddressType::Ipv6 => {
            !is_v6_unspecified(b)
                && !is_v6_loopback(b)
                && !is_v6_multicast(b)
                && !is_rfc4862(b)
                && !is_rfc4193(b)
                && !is_rfc4843(b)
                && !is_rfc3849(b)
        }
        NetAddressType::Unknown => false,
    }
}

fn v4_group(b: &[u8]) -> String {
    format!("v4:{}.{}", b[0], b[1])
}

/// The network group of an address: a short tag clustering addresses that
/// likely share an operator.
///
/// IPv4 groups by /16 and IPv6 by /32, except that tunnelled IPv6 addresses
/// group by the IPv4 endpoint embedded in them, so a tunnel operator cannot
/// mint fresh groups for free. All unroutable addresses share one group.
pub(crate) fn group_key(na: &NetAddress) -> String {
    if !is_routable(na) {
        return "local".to_string();
    }

    let b = na.ip();
    match na.addr_type() {
        NetAddressType::TorV2 => "torv2".to_string(),
        NetAddressType::TorV3 => "torv3".to_string(),
        NetAddressType::Ipv4 => v4_group(b),
        NetAddressType::Ipv6 if is_rfc4380(b) => {
            // Teredo stores the client IPv4 bitwise-inverted in the tail.
            v4_group(&[b[12] ^ 0xff, b[13] ^ 0xff])
        }
        NetAddressType::Ipv6 if is_rfc3964(b) => v4_group(&b[2..4]),
        NetAddressType::Ipv6 if is_rfc6052(b) || is_rfc6145(b) => v4_group(&b[12..14]),
        NetAddressType::Ipv6 => {
            format!("v6:{:02x}{:02x}:{:02x}{:02x}", b[0], b[1], b[2], b[3])
        }
        NetAddressType::Unknown => "local".to_string(),
    }
}

/// How well a local address can be expected to reach a remote one, ordered
/// from worst to best.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Reachability {
    /// The remote cannot be reached from this local address at all.
    Unreachable,
    /// Reachable only through some default route; nothing about the local
    /// address helps.
    Default,
    /// Reachable over a Teredo tunnel.
    Teredo,
    /// Reachable over tunnelled IPv6 (6to4, translation prefixes).
    Ipv6Weak,
    /// Reachable over native IPv4.
    Ipv4,
    /// Reachable over native IPv6.
    Ipv6Strong,
    /// Both endpoints are on the same private overlay network.
    Private,
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reachability::Unreachable => "unreachable",
            Reachability::Default => "default",
            Reachability::Teredo => "teredo",
            Reachability::Ipv6Weak => "ipv6-weak",
            Reachability::Ipv4 => "ipv4",
            Reachability::Ipv6Strong => "ipv6-strong",
            Reachability::Private => "private",
        };
        f.write_str(name)
    }
}

fn is_onion(na: &NetAddress) -> bool {
    matches!(
        na.addr_type(),
        NetAddressType::TorV2 | NetAddressType::TorV3
    )
}

fn is_routable_v4(na: &NetAddress) -> bool {
    na.addr_type() == NetAddressType::Ipv4 && is_routable(na)
}

fn is_teredo(na: &NetAddress) -> bool {
    na.addr_type() == NetAddressType::Ipv6 && is_rfc4380(na.ip())
}

fn is_tunnelled_v6(na: &NetAddress) -> bool {
    let b = na.ip();
    na.addr_type() == NetAddressType::Ipv6
        && (is_rfc3964(b) || is_rfc6052(b) || is_rfc6145(b))
}

/// Scores how well `local` can reach `remote`.
///
/// This is a total function over both address types and routability; the
/// decision table is pinned row by row by the tests.
pub(crate) fn reachability(local: &NetAddress, remote: &NetAddress) -> Reachability {
    if !is_routable(remote) {
        return Reachability::Unreachable;
    }

    if is_onion(remote) {
        return if is_onion(local) {
            Reachability::Private
        } else if is_routable_v4(local) {
            Reachability::Ipv4
        } else {
            Reachability::Default
        };
    }

    if remote.addr_type() == NetAddressType::Ipv4 {
        return if is_routable_v4(local) {
            Reachability::Ipv4
        } else {
            Reachability::Unreachable
        };
    }

    // Remote is routable IPv6.
    if !is_routable(local) || is_onion(local) {
        return Reachability::Default;
    }
    if is_teredo(local) {
        return Reachability::Teredo;
    }
    if local.addr_type() == NetAddressType::Ipv4 {
        return Reachability::Ipv4;
    }
    if is_teredo(remote) || is_tunnelled_v6(local) {
        // Tunnelled connections work, but lose to a native IPv6 path.
        return Reachability::Ipv6Weak;
    }
    Reachability::Ipv6Strong
}
