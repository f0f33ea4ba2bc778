//! Randomised property tests for address canonicalization and keys.

use chrono::Utc;
use proptest::prelude::*;

use crate::{
    local_addresses::validate_peer_na,
    net_address::{
        canonicalize_ip, derive_net_address_type, NetAddress, NetAddressType, Reachability,
        ServiceFlags,
    },
};

/// A strategy producing raw address bytes with the claimed type needed to
/// construct them.
fn raw_address() -> impl Strategy<Value = (NetAddressType, Vec<u8>)> {
    prop_oneof![
        any::<[u8; 4]>().prop_map(|b| (NetAddressType::Ipv4, b.to_vec())),
        any::<[u8; 16]>().prop_map(|b| {
            let claimed = derive_net_address_type(NetAddressType::Unknown, &b)
                .expect("16 byte addresses always derive a type");
            (claimed, b.to_vec())
        }),
        any::<[u8; 10]>().prop_map(|b| (NetAddressType::TorV2, b.to_vec())),
        any::<[u8; 32]>().prop_map(|b| (NetAddressType::TorV3, b.to_vec())),
    ]
}

fn net_address() -> impl Strategy<Value = NetAddress> {
    (raw_address(), any::<u16>()).prop_map(|((claimed, bytes), port)| {
        NetAddress::from_bytes(
            claimed,
            &bytes,
            port,
            Utc::now(),
            ServiceFlags::NODE_NETWORK,
        )
        .expect("claimed type was derived from the bytes")
    })
}

proptest! {
    /// Canonicalizing already canonical bytes is a no-op.
    #[test]
    fn canonicalize_is_idempotent((claimed, bytes) in raw_address()) {
        let once = canonicalize_ip(claimed, &bytes);
        let twice = canonicalize_ip(claimed, &once);
        prop_assert_eq!(once, twice);
    }

    /// The stored type always agrees with the type re-derived from the
    /// stored bytes.
    #[test]
    fn stored_type_matches_bytes(na in net_address()) {
        let derived = derive_net_address_type(na.addr_type(), na.ip()).unwrap();
        prop_assert_eq!(derived, na.addr_type());
    }

    /// Key strings are injective over (type, ip, port) and stable.
    #[test]
    fn keys_are_injective_and_stable(a in net_address(), b in net_address()) {
        prop_assert_eq!(a.key(), a.key());

        let same_endpoint =
            a.addr_type() == b.addr_type() && a.ip() == b.ip() && a.port() == b.port();
        prop_assert_eq!(a.key() == b.key(), same_endpoint);
    }

    /// Reconstructing an address from its own parts is lossless.
    #[test]
    fn reconstruction_round_trips(na in net_address()) {
        let rebuilt = NetAddress::from_bytes(
            na.addr_type(),
            na.ip(),
            na.port(),
            na.timestamp(),
            na.services(),
        )
        .unwrap();
        prop_assert_eq!(rebuilt, na);
    }

    /// An unreachable pairing is never advertised.
    #[test]
    fn unreachable_pairs_are_never_valid(local in net_address(), remote in net_address()) {
        let (valid, reach) = validate_peer_na(&local, &remote);
        if reach == Reachability::Unreachable {
            prop_assert!(!valid);
        }
    }
}
