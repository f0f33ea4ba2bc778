//! Randomised property tests for the bucketed table.

use proptest::prelude::*;

use super::check;
use crate::{
    address_book::AddressBook,
    net_address::{NetAddress, ServiceFlags},
};

/// The operations a peer-facing caller can drive the table with.
#[derive(Copy, Clone, Debug)]
enum Op {
    Add(u8, u8),
    Good(u8),
    Attempt(u8),
    Connected(u8),
}

/// A fixed pool of routable addresses spanning many /16 groups, so random
/// operation sequences exercise multiple buckets.
fn pool_addr(i: u8) -> NetAddress {
    let host = format!("{}.{}.147.{}", 60 + (i % 64), 60 + (i / 64), i);
    NetAddress::from_ip(host.parse().unwrap(), 8333, ServiceFlags::NODE_NETWORK)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<u8>(), any::<u8>()).prop_map(|(a, s)| Op::Add(a, s)),
        any::<u8>().prop_map(Op::Good),
        any::<u8>().prop_map(Op::Attempt),
        any::<u8>().prop_map(Op::Connected),
    ]
}

fn apply(book: &mut AddressBook, op: Op) {
    match op {
        Op::Add(a, s) => book.add_or_update_address(&pool_addr(a), &pool_addr(s)),
        // History operations on addresses the table never saw (or already
        // evicted) fail; that is part of the contract, not a test failure.
        Op::Good(a) => {
            let _ = book.good(&pool_addr(a));
        }
        Op::Attempt(a) => {
            let _ = book.attempt(&pool_addr(a));
        }
        Op::Connected(a) => {
            let _ = book.connected(&pool_addr(a));
        }
    }
}

proptest! {
    /// Every operation sequence leaves the table structurally sound: each
    /// address in exactly one tier, reference counts matching bucket
    /// membership, and no bucket over capacity.
    #[test]
    fn operations_preserve_invariants(ops in proptest::collection::vec(op(), 1..200)) {
        let mut book = AddressBook::new();
        for op in ops {
            apply(&mut book, op);
        }
        check::invariants_hold(&book);
    }

    /// Saving and reloading reproduces the table exactly: same index, same
    /// bucket memberships, same connection history.
    #[test]
    fn save_load_round_trips(ops in proptest::collection::vec(op(), 1..200)) {
        let mut book = AddressBook::new();
        for op in ops {
            apply(&mut book, op);
        }

        let reloaded = AddressBook::from_serialized(book.serialize()).unwrap();
        check::invariants_hold(&reloaded);
        check::books_equal(&book, &reloaded);
    }
}
