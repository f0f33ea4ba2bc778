//! Errors surfaced by the address manager.

use std::io;

use thiserror::Error;

/// An error working with peer network addresses or the address book.
#[derive(Error, Debug)]
pub enum Error {
    /// The raw bytes of an address did not match any supported network type.
    #[error("unknown address type: {0}")]
    UnknownAddressType(&'static str),

    /// The claimed network type of an address does not match the type
    /// derived from its bytes.
    #[error("derived address type {derived} does not match expected type {claimed}")]
    MismatchedAddressType {
        /// The type claimed by the caller or the wire record.
        claimed: crate::net_address::NetAddressType,
        /// The type derived from the raw address bytes.
        derived: crate::net_address::NetAddressType,
    },

    /// A `.onion` host failed to decode or its embedded checksum was wrong.
    #[error("invalid onion address: {0}")]
    InvalidOnion(&'static str),

    /// The injected resolver returned no addresses for a hostname.
    #[error("unresolved host: {0}")]
    UnresolvedHost(String),

    /// The operation referenced an address that is not in the address book.
    #[error("address {0} is not known to the address book")]
    UnknownAddress(String),

    /// Local addresses must be routable before they can be advertised.
    #[error("local address {0} is not routable")]
    UnroutableAddress(String),

    /// The peers file or a wire record was malformed.
    #[error("parse error: {0}")]
    Parse(&'static str),

    /// An underlying IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
