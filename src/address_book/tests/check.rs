//! Shared assertions on address book structure.

use std::collections::HashMap;

use crate::{
    address_book::AddressBook,
    constants::{NEW_BUCKET_SIZE, TRIED_BUCKET_COUNT},
};

/// Asserts every structural invariant of the bucketed table:
///
/// - each indexed address is in at least one new bucket or exactly one
///   tried bucket, never both;
/// - `refs` equals the number of new-bucket slots holding the address;
/// - the `tried` flag matches tried-bucket membership;
/// - no bucket exceeds its capacity;
/// - the new/tried counters match the index.
pub fn invariants_hold(book: &AddressBook) {
    let mut new_refs: HashMap<&str, u32> = HashMap::new();
    for (bucket, entries) in book.addr_new.iter().enumerate() {
        assert!(
            entries.len() <= NEW_BUCKET_SIZE,
            "new bucket {bucket} over capacity"
        );
        for key in entries {
            assert!(
                book.addr_index.contains_key(key),
                "new bucket {bucket} references unindexed address {key}"
            );
            *new_refs.entry(key.as_str()).or_default() += 1;
        }
    }

    let mut tried_memberships: HashMap<&str, u32> = HashMap::new();
    for (bucket, entries) in book.addr_tried.iter().enumerate() {
        assert!(
            entries.len() <= book.tried_bucket_size,
            "tried bucket {bucket} over capacity"
        );
        for key in entries {
            assert!(
                book.addr_index.contains_key(key.as_str()),
                "tried bucket {bucket} references unindexed address {key}"
            );
            *tried_memberships.entry(key.as_str()).or_default() += 1;
        }
    }
    assert_eq!(book.addr_tried.len(), TRIED_BUCKET_COUNT);

    let mut n_new = 0;
    let mut n_tried = 0;
    for (key, ka) in &book.addr_index {
        let refs = new_refs.get(key.as_str()).copied().unwrap_or(0);
        let tried = tried_memberships.get(key.as_str()).copied().unwrap_or(0);

        assert_eq!(ka.refs, refs, "wrong refs count for {key}");
        assert!(
            tried <= 1,
            "{key} appears in more than one tried bucket"
        );
        assert_eq!(
            ka.tried,
            tried == 1,
            "tried flag disagrees with membership for {key}"
        );
        assert!(
            (refs > 0) ^ (tried == 1),
            "{key} must be in either the new tier or the tried tier"
        );

        if ka.tried {
            n_tried += 1;
        } else {
            n_new += 1;
        }
    }

    assert_eq!(book.n_new, n_new, "wrong new-tier count");
    assert_eq!(book.n_tried, n_tried, "wrong tried-tier count");
}

/// Asserts that two books track the same addresses in the same buckets.
pub fn books_equal(a: &AddressBook, b: &AddressBook) {
    let mut a_keys: Vec<&String> = a.addr_index.keys().collect();
    let mut b_keys: Vec<&String> = b.addr_index.keys().collect();
    a_keys.sort();
    b_keys.sort();
    assert_eq!(a_keys, b_keys, "address indexes differ");

    for (key, ka) in &a.addr_index {
        let kb = &b.addr_index[key.as_str()];
        assert_eq!(ka.na.as_ref(), kb.na.as_ref(), "address differs for {key}");
        // Source endpoints persist without their sighting timestamp.
        assert_eq!(
            ka.src_addr.key(),
            kb.src_addr.key(),
            "source differs for {key}"
        );
        assert_eq!(
            ka.src_addr.services(),
            kb.src_addr.services(),
            "source services differ for {key}"
        );
        assert_eq!(ka.attempts, kb.attempts, "attempts differ for {key}");
        assert_eq!(
            ka.last_attempt, kb.last_attempt,
            "last attempt differs for {key}"
        );
        assert_eq!(
            ka.last_success, kb.last_success,
            "last success differs for {key}"
        );
        assert_eq!(ka.tried, kb.tried, "tier differs for {key}");
        assert_eq!(ka.refs, kb.refs, "refs differ for {key}");
    }

    for bucket in 0..a.addr_new.len() {
        assert_eq!(
            a.addr_new[bucket], b.addr_new[bucket],
            "new bucket {bucket} differs"
        );
    }
    // Tried bucket order is meaningful: position 0 is evicted first.
    for bucket in 0..a.addr_tried.len() {
        assert_eq!(
            a.addr_tried[bucket], b.addr_tried[bucket],
            "tried bucket {bucket} differs"
        );
    }
}
