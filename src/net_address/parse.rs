//! Parsing host strings into typed address bytes.

use std::net::IpAddr;

use data_encoding::BASE32_NOPAD;
use sha3::{Digest, Sha3_256};

use super::{NetAddressType, ONION_CAT_PREFIX};
use crate::errors::Error;

/// The version byte appended to TORv3 public keys in `.onion` names.
const TORV3_VERSION: u8 = 0x03;

/// The base32 length of a TORv2 `.onion` stem: 10 key bytes.
const TORV2_STEM_LEN: usize = 16;

/// The base32 length of a TORv3 `.onion` stem: 32 key bytes, a 2-byte
/// checksum, and a version byte.
const TORV3_STEM_LEN: usize = 56;

/// Computes the 2-byte checksum embedded in TORv3 `.onion` names:
/// the truncated SHA3-256 of `".onion checksum" ‖ pubkey ‖ version`.
pub(crate) fn torv3_checksum(pubkey: &[u8]) -> [u8; 2] {
    let mut hasher = Sha3_256::new();
    hasher.update(b".onion checksum");
    hasher.update(pubkey);
    hasher.update([TORV3_VERSION]);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

fn base32_lower(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes).to_ascii_lowercase()
}

/// Renders a 10-byte TORv2 service key as its `.onion` host name.
pub(crate) fn onion_v2_host(key: &[u8]) -> String {
    format!("{}.onion", base32_lower(key))
}

/// Renders a 32-byte TORv3 service key as its `.onion` host name, appending
/// the checksum and version byte the name format requires.
pub(crate) fn onion_v3_host(pubkey: &[u8]) -> String {
    let mut bytes = pubkey.to_vec();
    bytes.extend_from_slice(&torv3_checksum(pubkey));
    bytes.push(TORV3_VERSION);
    format!("{}.onion", base32_lower(&bytes))
}

fn decode_onion_stem(stem: &str) -> Result<Vec<u8>, Error> {
    BASE32_NOPAD
        .decode(stem.to_ascii_uppercase().as_bytes())
        .map_err(|_| Error::InvalidOnion("onion host is not valid base32"))
}

/// Parses a host string into a network type and raw address bytes.
///
/// `.onion` names decode into Tor service keys (with the onion-cat prefix
/// applied for TORv2), IP literals parse into their canonical bytes, and
/// anything else is returned as [`NetAddressType::Unknown`] with no bytes,
/// for the caller to resolve.
pub fn parse_host(host: &str) -> Result<(NetAddressType, Vec<u8>), Error> {
    if let Some(stem) = host.strip_suffix(".onion") {
        return match stem.len() {
            TORV2_STEM_LEN => {
                let key = decode_onion_stem(stem)?;
                let mut ip = ONION_CAT_PREFIX.to_vec();
                ip.extend_from_slice(&key);
                Ok((NetAddressType::TorV2, ip))
            }
            TORV3_STEM_LEN => {
                let decoded = decode_onion_stem(stem)?;
                let (pubkey, trailer) = decoded.split_at(32);
                if trailer[2] != TORV3_VERSION {
                    return Err(Error::InvalidOnion("unsupported onion version"));
                }
                if trailer[..2] != torv3_checksum(pubkey) {
                    return Err(Error::InvalidOnion("onion checksum mismatch"));
                }
                Ok((NetAddressType::TorV3, pubkey.to_vec()))
            }
            _ => Err(Error::InvalidOnion("unexpected onion host length")),
        };
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(match ip {
            IpAddr::V4(v4) => (NetAddressType::Ipv4, v4.octets().to_vec()),
            IpAddr::V6(v6) if v6.octets()[..6] == ONION_CAT_PREFIX => {
                (NetAddressType::TorV2, v6.octets().to_vec())
            }
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => (NetAddressType::Ipv4, v4.octets().to_vec()),
                None => (NetAddressType::Ipv6, v6.octets().to_vec()),
            },
        });
    }

    Ok((NetAddressType::Unknown, Vec::new()))
}
