//! Fixed test vectors for address typing, classification, and parsing.

use chrono::Utc;

use crate::{
    errors::Error,
    local_addresses::validate_peer_na,
    net_address::{
        canonicalize_ip, derive_net_address_type, parse_host, NetAddress, NetAddressType,
        Reachability, ServiceFlags, ONION_CAT_PREFIX,
    },
};

fn addr(host: &str) -> NetAddress {
    NetAddress::from_ip(host.parse().unwrap(), 8333, ServiceFlags::NODE_NETWORK)
}

#[test]
fn type_derivation_follows_byte_layout() {
    let v4_mapped: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 12, 1, 2, 3];
    let mut onion_cat = [0u8; 16];
    onion_cat[..6].copy_from_slice(&ONION_CAT_PREFIX);

    let cases: Vec<(NetAddressType, Vec<u8>, NetAddressType)> = vec![
        (NetAddressType::Unknown, vec![12, 1, 2, 3], NetAddressType::Ipv4),
        (NetAddressType::Unknown, v4_mapped.to_vec(), NetAddressType::Ipv4),
        (NetAddressType::Unknown, vec![0x07; 10], NetAddressType::TorV2),
        (NetAddressType::Unknown, onion_cat.to_vec(), NetAddressType::TorV2),
        (NetAddressType::Unknown, vec![0x20; 16], NetAddressType::Ipv6),
        (NetAddressType::TorV3, vec![0x11; 32], NetAddressType::TorV3),
    ];

    for (claimed, bytes, want) in cases {
        assert_eq!(derive_net_address_type(claimed, &bytes).unwrap(), want);
    }

    // 32 bytes without a TORv3 claim, and lengths that fit no layout.
    assert!(derive_net_address_type(NetAddressType::Unknown, &[0x11; 32]).is_err());
    assert!(derive_net_address_type(NetAddressType::Unknown, &[0x11; 5]).is_err());
}

#[test]
fn canonicalize_collapses_and_prefixes() {
    let v4_mapped: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 12, 1, 2, 3];
    assert_eq!(
        canonicalize_ip(NetAddressType::Ipv4, &v4_mapped),
        vec![12, 1, 2, 3]
    );

    let canonical = canonicalize_ip(NetAddressType::TorV2, &[0x07; 10]);
    assert_eq!(canonical.len(), 16);
    assert_eq!(canonical[..6], ONION_CAT_PREFIX);
    assert_eq!(canonical[6..], [0x07; 10]);

    // Canonicalizing is idempotent.
    assert_eq!(
        canonicalize_ip(NetAddressType::TorV2, &canonical),
        canonical
    );
    assert_eq!(
        canonicalize_ip(NetAddressType::Ipv4, &[12, 1, 2, 3]),
        vec![12, 1, 2, 3]
    );
}

#[test]
fn mismatched_claim_is_rejected() {
    let v4_mapped: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 12, 1, 2, 3];
    let result = NetAddress::from_bytes(
        NetAddressType::Ipv6,
        &v4_mapped,
        8333,
        Utc::now(),
        ServiceFlags::NODE_NETWORK,
    );
    assert!(matches!(
        result,
        Err(Error::MismatchedAddressType { .. })
    ));
}

#[test]
fn keys_are_canonical_host_port() {
    assert_eq!(addr("173.194.115.66").key(), "173.194.115.66:8333");
    assert_eq!(addr("2620:100::1").key(), "[2620:100::1]:8333");

    // An IPv4-mapped IPv6 literal collapses to its IPv4 key.
    assert_eq!(addr("::ffff:173.194.115.66").key(), "173.194.115.66:8333");
}

#[test]
fn onion_cat_addresses_render_as_onion_names() {
    // This IPv6 literal carries the onion-cat embedding of the
    // `a5ccbdkubbr2jlcp.onion` service key.
    let na = addr("fd87:d87e:eb43:744:208d:5408:63a4:ac4f");
    assert_eq!(na.addr_type(), NetAddressType::TorV2);
    assert_eq!(na.ip_string(), "a5ccbdkubbr2jlcp.onion");
    assert_eq!(na.key(), "a5ccbdkubbr2jlcp.onion:8333");

    // And the onion name parses back to the same bytes.
    let (addr_type, bytes) = parse_host("a5ccbdkubbr2jlcp.onion").unwrap();
    assert_eq!(addr_type, NetAddressType::TorV2);
    assert_eq!(bytes, na.ip());
}

#[test]
fn torv3_names_round_trip_with_checksum() {
    let pubkey = [0x42u8; 32];
    let na = NetAddress::from_bytes(
        NetAddressType::TorV3,
        &pubkey,
        8333,
        Utc::now(),
        ServiceFlags::NODE_NETWORK,
    )
    .unwrap();

    let host = na.ip_string();
    assert!(host.ends_with(".onion"));
    assert_eq!(host.len(), 56 + ".onion".len());

    let (addr_type, bytes) = parse_host(&host).unwrap();
    assert_eq!(addr_type, NetAddressType::TorV3);
    assert_eq!(bytes, pubkey);

    // Corrupting the service key invalidates the embedded checksum.
    let mut corrupted = host.clone();
    let replacement = if corrupted.starts_with('a') { 'b' } else { 'a' };
    corrupted.replace_range(0..1, &replacement.to_string());
    assert!(matches!(
        parse_host(&corrupted),
        Err(Error::InvalidOnion(_))
    ));
}

#[test]
fn malformed_onion_names_are_rejected() {
    // '0' and '1' are not in the base32 alphabet.
    assert!(matches!(
        parse_host("0000000000000000.onion"),
        Err(Error::InvalidOnion(_))
    ));
    // Neither a TORv2 nor a TORv3 stem length.
    assert!(matches!(
        parse_host("abcdef.onion"),
        Err(Error::InvalidOnion(_))
    ));
}

#[test]
fn hostnames_parse_as_unknown() {
    let (addr_type, bytes) = parse_host("seed.example.com").unwrap();
    assert_eq!(addr_type, NetAddressType::Unknown);
    assert!(bytes.is_empty());
}

#[test]
fn routability() {
    let unroutable = [
        "0.0.0.0",
        "255.255.255.255",
        "127.0.0.1",
        "10.1.2.3",
        "172.16.0.254",
        "192.168.0.100",
        "169.254.1.1",
        "198.18.0.1",
        "224.0.0.1",
        "::",
        "::1",
        "fe80::1",
        "fc00::1",
        "fd00::1",
        "2001:10::1",
        "2001:db8::1",
        "ff02::1",
    ];
    for host in unroutable {
        assert!(!addr(host).is_routable(), "{host} should be unroutable");
    }

    let routable = [
        "12.1.2.3",
        "204.124.1.1",
        "2620:100::1",
        "2001:470::1",
        "2001::1",
        "2002:c01:203::1",
        // Onion-cat TORv2 sits inside fc00::/7 but is a Tor address.
        "fd87:d87e:eb43::1",
    ];
    for host in routable {
        assert!(addr(host).is_routable(), "{host} should be routable");
    }
}

#[test]
fn group_keys_cluster_by_operator() {
    // IPv4 groups by /16.
    assert_eq!(addr("173.194.115.66").group_key(), "v4:173.194");
    assert_eq!(
        addr("173.194.1.1").group_key(),
        addr("173.194.200.200").group_key()
    );
    assert_ne!(
        addr("173.194.1.1").group_key(),
        addr("173.195.1.1").group_key()
    );

    // Plain IPv6 groups by /32.
    assert_eq!(addr("2620:100::1").group_key(), "v6:2620:0100");

    // Tunnelled IPv6 groups by the embedded IPv4 endpoint.
    assert_eq!(addr("2002:c01:203::1").group_key(), "v4:12.1");
    assert_eq!(addr("64:ff9b::c01:203").group_key(), "v4:12.1");
    // Teredo embeds the client address bitwise-inverted.
    assert_eq!(addr("2001::f3fe:fdfc").group_key(), "v4:12.1");

    // Tor networks are single groups, distinct from each other.
    assert_eq!(addr("fd87:d87e:eb43::1").group_key(), "torv2");
    let torv3 = NetAddress::from_bytes(
        NetAddressType::TorV3,
        &[0x42; 32],
        8333,
        Utc::now(),
        ServiceFlags::NODE_NETWORK,
    )
    .unwrap();
    assert_eq!(torv3.group_key(), "torv3");

    // All unroutable addresses collide into one group.
    assert_eq!(addr("127.0.0.1").group_key(), "local");
    assert_eq!(addr("192.168.0.100").group_key(), "local");
    assert_eq!(addr("::1").group_key(), "local");
}

/// Pins the full reachability decision table, together with the
/// advertising verdict derived from it.
#[test]
fn reachability_decision_table() {
    let onion_cat = "fd87:d87e:eb43::";
    let teredo = "2001::";
    let six_to_four = "2002::";
    let nat64 = "64:ff9b::";
    let translated = "::ffff:0:0:0";

    let cases = [
        ("torv2 to torv2", onion_cat, onion_cat, false, Reachability::Private),
        ("routable ipv4 to torv2", "12.1.2.3", onion_cat, true, Reachability::Ipv4),
        ("unroutable ipv4 to torv2", "0.0.0.0", onion_cat, false, Reachability::Default),
        ("routable ipv6 to torv2", "2003::", onion_cat, false, Reachability::Default),
        ("unroutable ipv6 to torv2", "::1", onion_cat, false, Reachability::Default),
        ("teredo to teredo", teredo, teredo, true, Reachability::Teredo),
        ("unroutable ipv4 to teredo", "0.0.0.0", teredo, false, Reachability::Default),
        ("routable ipv4 to teredo", "12.1.2.3", teredo, true, Reachability::Ipv4),
        ("routable ipv6 to teredo", "2003::", teredo, true, Reachability::Ipv6Weak),
        ("routable ipv4 to routable ipv4", "12.1.2.3", "12.1.2.3", true, Reachability::Ipv4),
        ("routable ipv6 to routable ipv4", "2003::", "12.1.2.3", false, Reachability::Unreachable),
        ("unroutable ipv4 to routable ipv6", "0.0.0.0", "2003::", false, Reachability::Default),
        ("unroutable ipv6 to routable ipv6", "::1", "2003::", false, Reachability::Default),
        ("routable ipv4 to unroutable ipv6", "12.1.2.3", "::1", false, Reachability::Unreachable),
        ("teredo to routable ipv6", teredo, "2003::", true, Reachability::Teredo),
        ("routable ipv4 to routable ipv6", "12.1.2.3", "2003::", true, Reachability::Ipv4),
        ("6to4 to routable ipv6", six_to_four, "2003::", true, Reachability::Ipv6Weak),
        ("nat64 to routable ipv6", nat64, "2003::", true, Reachability::Ipv6Weak),
        ("translated to routable ipv6", translated, "2003::", true, Reachability::Ipv6Weak),
        ("native ipv6 to routable ipv6", "2620:100::1", "2003::", true, Reachability::Ipv6Strong),
    ];

    for (name, local, remote, want_valid, want_reach) in cases {
        let (valid, reach) = validate_peer_na(&addr(local), &addr(remote));
        assert_eq!(reach, want_reach, "{name}: wrong reachability");
        assert_eq!(valid, want_valid, "{name}: wrong advertising verdict");
    }
}

#[test]
fn copy_on_write_builders_do_not_mutate() {
    let original = addr("12.1.2.3");
    let updated = original.with_services(ServiceFlags::from_bits_retain(0b11));

    assert_eq!(original.services(), ServiceFlags::NODE_NETWORK);
    assert_eq!(updated.services(), ServiceFlags::from_bits_retain(0b11));
    assert_eq!(original.key(), updated.key());

    let later = original.timestamp() + chrono::Duration::seconds(90);
    let refreshed = original.with_timestamp(later);
    assert_eq!(refreshed.timestamp(), later);
    assert_ne!(original.timestamp(), refreshed.timestamp());
}
