//! The two-tier bucketed table of known peer addresses.
//!
//! Addresses we have only heard about live in "new" buckets; addresses we
//! have completed a handshake with live in "tried" buckets. Bucket placement
//! is a keyed hash over network groups, so addresses controlled by one
//! operator cluster into a few buckets instead of flooding the table.
//!
//! [`AddressBook`] is a plain data structure with no locking; the
//! [`AddressManager`](crate::AddressManager) wraps it in a mutex and is the
//! concurrency boundary.

use std::{collections::HashSet, sync::Arc};

use chrono::{Duration, Utc};
use indexmap::IndexMap;
use rand::{rngs::StdRng, seq::index::sample, Rng, SeedableRng};

use crate::{
    constants::{
        ADDRESS_CACHE_MAX, ADDRESS_CACHE_PERCENT, CONNECTED_REFRESH_INTERVAL, MAX_SELECTION_DRAWS,
        NEED_ADDRESSES_THRESHOLD, NEW_BUCKETS_PER_ADDRESS, NEW_BUCKETS_PER_SOURCE_GROUP,
        NEW_BUCKET_COUNT, NEW_BUCKET_SIZE, SELECTION_RETRY_BOOST, TIMESTAMP_REFRESH_INTERVAL,
        TRIED_BUCKETS_PER_GROUP, TRIED_BUCKET_COUNT, TRIED_BUCKET_SIZE, TRIED_SELECTION_BIAS,
    },
    errors::Error,
    known_address::KnownAddress,
    local_addresses::LocalAddressRegistry,
    net_address::{truncate_to_seconds, NetAddress, ServiceFlags},
};

pub mod storage;

#[cfg(test)]
mod tests;

/// The hash placing an address into a new bucket, keyed by the book's
/// secret and fed both the address group and the gossiping peer's group.
pub(crate) type NewBucketFn = fn(&[u8; 32], &NetAddress, &NetAddress) -> usize;

/// The hash placing an address into a tried bucket.
pub(crate) type TriedBucketFn = fn(&[u8; 32], &NetAddress) -> usize;

fn keyed_hash_word(key: &[u8; 32], parts: &[&[u8]]) -> u64 {
    let mut data = Vec::new();
    for part in parts {
        data.extend_from_slice(part);
        data.push(b'/');
    }
    let hash = blake3::keyed_hash(key, &data);
    u64::from_le_bytes(hash.as_bytes()[..8].try_into().expect("8 bytes"))
}

/// Two-level placement: the (address group, source group) pair picks one of
/// [`NEW_BUCKETS_PER_SOURCE_GROUP`] slots, and the (source group, slot)
/// pair picks the bucket. A single gossip source therefore reaches a
/// bounded slice of the new buckets.
fn default_new_bucket(key: &[u8; 32], addr: &NetAddress, src: &NetAddress) -> usize {
    let addr_group = addr.group_key();
    let src_group = src.group_key();

    let slot = keyed_hash_word(key, &[addr_group.as_bytes(), src_group.as_bytes()])
        % NEW_BUCKETS_PER_SOURCE_GROUP as u64;
    let word = keyed_hash_word(key, &[src_group.as_bytes(), &slot.to_le_bytes()]);
    word as usize % NEW_BUCKET_COUNT
}

/// Tried placement works the same way per address group, so one operator's
/// addresses can only occupy [`TRIED_BUCKETS_PER_GROUP`] tried buckets.
fn default_tried_bucket(key: &[u8; 32], addr: &NetAddress) -> usize {
    let group = addr.group_key();

    let slot =
        keyed_hash_word(key, &[addr.key().as_bytes()]) % TRIED_BUCKETS_PER_GROUP as u64;
    let word = keyed_hash_word(key, &[group.as_bytes(), &slot.to_le_bytes()]);
    word as usize % TRIED_BUCKET_COUNT
}

/// The bucketed address table.
///
/// Every tracked address appears exactly once in the index. New-tier
/// addresses are referenced by one or more new buckets (counted by `refs`);
/// tried-tier addresses appear in exactly one tried bucket.
pub struct AddressBook {
    /// The per-node secret mixed into both bucket hashes, persisted so
    /// bucket assignments survive restarts.
    key: [u8; 32],

    addr_index: IndexMap<String, KnownAddress>,
    addr_new: Vec<HashSet<String>>,
    addr_tried: Vec<Vec<String>>,

    /// Distinct addresses currently in the new tier.
    n_new: usize,
    /// Addresses currently in the tried tier.
    n_tried: usize,

    /// The host's own candidate addresses, kept here so one lock covers the
    /// whole operation surface.
    pub(crate) local: LocalAddressRegistry,

    rng: StdRng,

    pub(crate) new_bucket_fn: NewBucketFn,
    pub(crate) tried_bucket_fn: TriedBucketFn,
    pub(crate) tried_bucket_size: usize,
}

impl std::fmt::Debug for AddressBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressBook")
            .field("len", &self.addr_index.len())
            .field("n_new", &self.n_new)
            .field("n_tried", &self.n_tried)
            .finish()
    }
}

impl Default for AddressBook {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressBook {
    /// Constructs an empty address book with a freshly generated bucket key.
    pub fn new() -> AddressBook {
        let mut rng = StdRng::from_entropy();
        let key = rng.gen::<[u8; 32]>();
        AddressBook::with_key(key, rng)
    }

    pub(crate) fn with_key(key: [u8; 32], rng: StdRng) -> AddressBook {
        AddressBook {
            key,
            addr_index: IndexMap::new(),
            addr_new: (0..NEW_BUCKET_COUNT).map(|_| HashSet::new()).collect(),
            addr_tried: (0..TRIED_BUCKET_COUNT).map(|_| Vec::new()).collect(),
            n_new: 0,
            n_tried: 0,
            local: LocalAddressRegistry::default(),
            rng,
            new_bucket_fn: default_new_bucket,
            tried_bucket_fn: default_tried_bucket,
            tried_bucket_size: TRIED_BUCKET_SIZE,
        }
    }

    /// The number of distinct addresses in the book.
    pub fn len(&self) -> usize {
        self.addr_index.len()
    }

    /// Whether the book tracks no addresses at all.
    pub fn is_empty(&self) -> bool {
        self.addr_index.is_empty()
    }

    /// Whether the caller should keep crawling peers for more addresses.
    pub fn need_more_addresses(&self) -> bool {
        self.len() < NEED_ADDRESSES_THRESHOLD
    }

    /// Looks up a tracked address by its key string.
    pub fn get(&self, key: &str) -> Option<&KnownAddress> {
        self.addr_index.get(key)
    }

    /// Adds a batch of gossiped addresses attributed to the peer `src`.
    pub fn add_addresses(&mut self, addrs: &[NetAddress], src: &NetAddress) {
        for na in addrs {
            self.add_or_update_address(na, src);
        }
        trace!(
            count = addrs.len(),
            src = %src,
            total = self.len(),
            "processed gossiped addresses",
        );
    }

    /// Adds a single gossiped address, or updates the existing entry for it.
    ///
    /// Unroutable addresses are ignored. A repeat sighting merges services,
    /// refreshes a sufficiently newer timestamp, and may reference the entry
    /// from one more new bucket, with probability halving for each bucket
    /// already referencing it.
    pub fn add_or_update_address(&mut self, na: &NetAddress, src: &NetAddress) {
        if !na.is_routable() {
            return;
        }

        let key = na.key();
        if let Some(ka) = self.addr_index.get_mut(&key) {
            let merged_services = ka.na.services() | na.services();
            let refresh_cutoff =
                ka.na.timestamp() + Duration::from_std(TIMESTAMP_REFRESH_INTERVAL).expect("fits");
            if na.timestamp() >= refresh_cutoff {
                let updated = ka
                    .na
                    .with_timestamp(na.timestamp())
                    .with_services(merged_services);
                ka.na = Arc::new(updated);
            } else if merged_services != ka.na.services() {
                ka.na = Arc::new(ka.na.with_services(merged_services));
            }

            // Entries in the tried tier, and entries already spread across
            // the maximum number of new buckets, stay where they are.
            if ka.tried || ka.refs >= NEW_BUCKETS_PER_ADDRESS {
                return;
            }

            let bucket = (self.new_bucket_fn)(&self.key, na, src);
            if self.addr_new[bucket].contains(&key) {
                return;
            }
            let refs = self.addr_index[&key].refs;
            let spread_chance = 1.0 / (1u64 << refs) as f64;
            if !self.rng.gen_bool(spread_chance) {
                return;
            }
            self.insert_into_new_bucket(&key, bucket);
        } else {
            let bucket = (self.new_bucket_fn)(&self.key, na, src);
            self.addr_index
                .insert(key.clone(), KnownAddress::new(na.clone(), src.clone()));
            self.n_new += 1;
            self.insert_into_new_bucket(&key, bucket);
            trace!(addr = %key, bucket, "tracking new address");
        }
    }

    /// Places `key` into the given new bucket, evicting an entry first when
    /// the bucket is full, and adjusts the reference count.
    fn insert_into_new_bucket(&mut self, key: &str, bucket: usize) {
        if self.addr_new[bucket].len() >= NEW_BUCKET_SIZE {
            self.expire_new(bucket);
        }
        if self.addr_new[bucket].insert(key.to_string()) {
            self.addr_index[key].refs += 1;
        }
    }

    /// Evicts one entry from a full new bucket: a stale entry if any exists,
    /// otherwise the oldest-seen one.
    fn expire_new(&mut self, bucket: usize) {
        let now = Utc::now();

        let victim = self.addr_new[bucket]
            .iter()
            .find(|key| self.addr_index[key.as_str()].is_stale(now))
            .or_else(|| {
                self.addr_new[bucket]
                    .iter()
                    .min_by_key(|key| self.addr_index[key.as_str()].na.timestamp())
            })
            .cloned();

        if let Some(victim) = victim {
            trace!(addr = %victim, bucket, "evicting from full new bucket");
            self.remove_from_new_bucket(&victim, bucket);
        }
    }

    /// Removes `key` from one new bucket, dropping the entry entirely when
    /// no references remain.
    fn remove_from_new_bucket(&mut self, key: &str, bucket: usize) {
        if !self.addr_new[bucket].remove(key) {
            return;
        }
        let ka = &mut self.addr_index[key];
        ka.refs = ka.refs.saturating_sub(1);
        if ka.refs == 0 && !ka.tried {
            self.addr_index.swap_remove(key);
            self.n_new = self.n_new.saturating_sub(1);
        }
    }

    /// Marks an address as successfully connected, promoting it from the
    /// new tier to the tried tier.
    ///
    /// When the target tried bucket is full, its oldest entry is demoted
    /// back into the new tier to make room.
    pub fn good(&mut self, na: &NetAddress) -> Result<(), Error> {
        let key = na.key();
        // Attempt history is persisted at second granularity; stamp it the
        // same way so a reload is byte-for-byte equivalent.
        let now = truncate_to_seconds(Utc::now());

        let ka = self
            .addr_index
            .get_mut(&key)
            .ok_or_else(|| Error::UnknownAddress(key.clone()))?;
        ka.last_success = Some(now);
        ka.last_attempt = Some(now);
        ka.attempts = 0;

        if ka.tried {
            return Ok(());
        }

        // Drop every new-bucket reference before promotion.
        for bucket in 0..NEW_BUCKET_COUNT {
            if self.addr_new[bucket].remove(&key) {
                self.addr_index[&key].refs -= 1;
            }
        }
        debug_assert_eq!(self.addr_index[&key].refs, 0);
        self.n_new = self.n_new.saturating_sub(1);
        self.addr_index[&key].tried = true;

        let target = (self.tried_bucket_fn)(&self.key, &self.addr_index[&key].na);

        if self.addr_tried[target].len() < self.tried_bucket_size {
            self.addr_tried[target].push(key.clone());
            self.n_tried += 1;
            trace!(addr = %key, bucket = target, "promoted address to tried");
            return Ok(());
        }

        // Bucket is full: demote its oldest entry back to the new tier.
        let demoted_key = self.addr_tried[target].remove(0);
        self.addr_tried[target].push(key.clone());
        trace!(
            addr = %key,
            demoted = %demoted_key,
            bucket = target,
            "promoted address into full tried bucket",
        );

        let demoted = &mut self.addr_index[&demoted_key];
        demoted.tried = false;
        let demoted_na = demoted.na.clone();
        let demoted_src = demoted.src_addr.clone();
        self.n_new += 1;

        let bucket = (self.new_bucket_fn)(&self.key, &demoted_na, &demoted_src);
        self.insert_into_new_bucket(&demoted_key, bucket);
        Ok(())
    }

    /// Records a connection attempt against a tracked address.
    pub fn attempt(&mut self, na: &NetAddress) -> Result<(), Error> {
        let key = na.key();
        let ka = self
            .addr_index
            .get_mut(&key)
            .ok_or(Error::UnknownAddress(key))?;
        ka.attempts += 1;
        ka.last_attempt = Some(truncate_to_seconds(Utc::now()));
        Ok(())
    }

    /// Records that a tracked address is currently connected, refreshing
    /// its advertised timestamp when it has grown stale.
    ///
    /// The refresh replaces the shared [`NetAddress`] handle; snapshots
    /// already returned to callers are unaffected.
    pub fn connected(&mut self, na: &NetAddress) -> Result<(), Error> {
        let key = na.key();
        let ka = self
            .addr_index
            .get_mut(&key)
            .ok_or(Error::UnknownAddress(key))?;
        let now = Utc::now();
        if now - ka.na.timestamp() > Duration::from_std(CONNECTED_REFRESH_INTERVAL).expect("fits")
        {
            ka.na = Arc::new(ka.na.with_timestamp(now));
        }
        Ok(())
    }

    /// Replaces the advertised services of a tracked address.
    ///
    /// Copy-on-write like [`connected`](Self::connected): previously
    /// returned handles keep the services they were read with.
    pub fn set_services(&mut self, na: &NetAddress, services: ServiceFlags) -> Result<(), Error> {
        let key = na.key();
        let ka = self
            .addr_index
            .get_mut(&key)
            .ok_or(Error::UnknownAddress(key))?;
        if ka.na.services() != services {
            ka.na = Arc::new(ka.na.with_services(services));
        }
        Ok(())
    }

    /// Draws a random connection candidate, favoring the tried tier as it
    /// grows and fresh addresses within each tier.
    ///
    /// Returns `None` when the book is empty or every draw was rejected.
    pub fn select(&mut self) -> Option<KnownAddress> {
        if self.addr_index.is_empty() {
            return None;
        }

        let tried_buckets: Vec<usize> = (0..TRIED_BUCKET_COUNT)
            .filter(|&b| !self.addr_tried[b].is_empty())
            .collect();
        let new_buckets: Vec<usize> = (0..NEW_BUCKET_COUNT)
            .filter(|&b| !self.addr_new[b].is_empty())
            .collect();
        if tried_buckets.is_empty() && new_buckets.is_empty() {
            return None;
        }

        let now = Utc::now();
        let mut boost = 1.0;

        for _ in 0..MAX_SELECTION_DRAWS {
            let use_tried = if tried_buckets.is_empty() {
                false
            } else if new_buckets.is_empty() {
                true
            } else {
                let tried_weight = (self.n_tried as f64).sqrt() * TRIED_SELECTION_BIAS;
                let new_weight = (self.n_new as f64).sqrt();
                self.rng.gen::<f64>() < tried_weight / (tried_weight + new_weight)
            };

            let key = if use_tried {
                let bucket = tried_buckets[self.rng.gen_range(0..tried_buckets.len())];
                let slot = self.rng.gen_range(0..self.addr_tried[bucket].len());
                self.addr_tried[bucket][slot].clone()
            } else {
                let bucket = new_buckets[self.rng.gen_range(0..new_buckets.len())];
                let slot = self.rng.gen_range(0..self.addr_new[bucket].len());
                self.addr_new[bucket]
                    .iter()
                    .nth(slot)
                    .expect("slot is in range")
                    .clone()
            };

            let ka = &self.addr_index[&key];
            if self.rng.gen::<f64>() < ka.chance(now) * boost {
                return Some(ka.clone());
            }
            boost *= SELECTION_RETRY_BOOST;
        }

        None
    }

    /// A bounded random sample of known addresses for serving to gossip
    /// requesters: at most [`ADDRESS_CACHE_PERCENT`] percent of the table,
    /// capped at [`ADDRESS_CACHE_MAX`] entries.
    pub fn address_cache(&mut self) -> Vec<Arc<NetAddress>> {
        let len = self.addr_index.len();
        let amount = (len * ADDRESS_CACHE_PERCENT / 100).min(ADDRESS_CACHE_MAX);
        if amount == 0 {
            return Vec::new();
        }

        sample(&mut self.rng, len, amount)
            .iter()
            .map(|i| {
                self.addr_index
                    .get_index(i)
                    .expect("sampled index is in range")
                    .1
                    .na
                    .clone()
            })
            .collect()
    }
}
