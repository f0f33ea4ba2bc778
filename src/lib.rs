//! An eclipse-resistant address manager for peers on a cryptocurrency network.
//!
//! Gossiped peer addresses are untrusted: a single adversary can cheaply
//! invent large numbers of them. This crate defends against address-table
//! poisoning the same way Bitcoin-family nodes do, by partitioning candidate
//! addresses into a fixed set of buckets keyed by a per-node secret and the
//! network groups of the address and of the peer that gossiped it. Addresses
//! that have been successfully connected to are promoted into a separate
//! "tried" tier, and outbound candidates are drawn at random across both
//! tiers.
//!
//! The main entry point is [`AddressManager`], which wraps the bucketed
//! [`AddressBook`] in a single lock, persists it to disk on a timer, and
//! tracks the host's own [local addresses](LocalAddressRegistry) so callers
//! can pick the best address to advertise to a given remote peer.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod address_book;
pub mod address_manager;
pub mod config;
pub mod constants;
pub mod errors;
pub mod known_address;
pub mod local_addresses;
pub mod net_address;
pub mod wire;

pub use crate::{
    address_book::AddressBook,
    address_manager::{AddressManager, LookupFn},
    config::Config,
    errors::Error,
    known_address::KnownAddress,
    local_addresses::{AddressPriority, LocalAddress, LocalAddressRegistry},
    net_address::{NetAddress, NetAddressType, Reachability, ServiceFlags},
};

/// A boxed [`std::error::Error`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
