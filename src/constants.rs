//! Definitions of constants.

use std::time::Duration;

/// The number of buckets holding addresses we have never connected to.
///
/// ## Security
///
/// New-bucket placement is keyed by the network group of the gossiping peer
/// as well as the group of the address itself, so an attacker gossiping from
/// a single network position can only reach a small, fixed slice of these
/// buckets no matter how many addresses they invent.
pub const NEW_BUCKET_COUNT: usize = 1024;

/// The number of buckets holding addresses that have completed a handshake.
pub const TRIED_BUCKET_COUNT: usize = 64;

/// The maximum number of entries per new bucket.
pub const NEW_BUCKET_SIZE: usize = 64;

/// The maximum number of entries per tried bucket.
pub const TRIED_BUCKET_SIZE: usize = 64;

/// The maximum number of new buckets that may reference a single address.
///
/// An address gossiped by many peers lands in several new buckets, which
/// makes it more likely to be selected. This cap bounds the multiplicity an
/// attacker can build up by re-gossiping the same address.
pub const NEW_BUCKETS_PER_ADDRESS: u32 = 8;

/// The number of distinct new buckets a single source group can reach.
///
/// ## Security
///
/// The placement hash first maps the (address group, source group) pair
/// into one of these slots, then maps the (source group, slot) pair to a
/// bucket. However many address groups an attacker fabricates, gossip from
/// one network position lands in at most this many of the
/// [`NEW_BUCKET_COUNT`] buckets.
pub const NEW_BUCKETS_PER_SOURCE_GROUP: usize = 64;

/// The number of distinct tried buckets the addresses of one group can
/// occupy, bounding how much of the tried tier one operator can fill.
pub const TRIED_BUCKETS_PER_GROUP: usize = 8;

/// Addresses are considered stale when they were last seen longer ago than
/// this horizon, and become eviction candidates.
pub const HORIZON: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Gossiped timestamps more than this far in the future are treated as stale.
///
/// Remote clocks skew, so a small allowance is made; anything beyond it is a
/// peer lying about freshness.
pub const FUTURE_TIMESTAMP_SLACK: Duration = Duration::from_secs(10 * 60);

/// An address attempted this recently is never considered stale, so that an
/// in-flight connection attempt cannot race its own eviction.
pub const RECENT_ATTEMPT_GRACE: Duration = Duration::from_secs(60);

/// The number of failed connection attempts after which an address that has
/// never succeeded becomes an eviction candidate.
pub const MAX_RETRIES_WITHOUT_SUCCESS: u32 = 3;

/// Addresses whose last success is older than this become eviction
/// candidates once they also exceed [`MAX_FAILURES`].
pub const MIN_BAD_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// The number of failed attempts after which an address is an eviction
/// candidate regardless of how recently it last succeeded.
pub const MAX_FAILURES: u32 = 10;

/// Connection attempts within this window multiply an address's selection
/// chance by [`RECENT_ATTEMPT_PENALTY`].
pub const RECENT_ATTEMPT_WINDOW: Duration = Duration::from_secs(10 * 60);

/// The selection-chance multiplier for very recently attempted addresses.
pub const RECENT_ATTEMPT_PENALTY: f64 = 0.01;

/// The per-failure decay applied to an address's selection chance.
pub const ATTEMPT_DECAY: f64 = 0.66;

/// The number of failures after which [`ATTEMPT_DECAY`] stops compounding.
pub const ATTEMPT_DECAY_CAP: u32 = 8;

/// The bias factor applied to the tried tier when choosing which tier to
/// draw a connection candidate from.
///
/// The probability of drawing from tried is
/// `sqrt(tried) * TRIED_SELECTION_BIAS` against `sqrt(new)`, so the tried
/// tier dominates as it fills while a small tried tier still leaves room to
/// explore new addresses.
pub const TRIED_SELECTION_BIAS: f64 = 10.0;

/// The maximum number of random draws made by a single selection before
/// giving up and returning no candidate.
pub const MAX_SELECTION_DRAWS: usize = 100;

/// The multiplier applied to the acceptance chance after each rejected draw,
/// so selection terminates quickly on sparse tables.
pub const SELECTION_RETRY_BOOST: f64 = 1.2;

/// The total number of known addresses below which the caller should keep
/// crawling peers for more.
pub const NEED_ADDRESSES_THRESHOLD: usize = 1000;

/// The largest fraction of the table handed out to a single gossip
/// requester, in percent.
///
/// ## Security
///
/// Serving a bounded random sample keeps a crawler from reading out the
/// whole table, which would make the bucket partition pointless.
pub const ADDRESS_CACHE_PERCENT: usize = 23;

/// The absolute cap on addresses handed out to a single gossip requester.
pub const ADDRESS_CACHE_MAX: usize = 2500;

/// Repeat gossip only refreshes a known address's timestamp when the new
/// sighting is at least this much newer.
pub const TIMESTAMP_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// A successful connection only refreshes the address's advertised timestamp
/// when the previous one is at least this old, to avoid rewriting the table
/// on every message.
pub const CONNECTED_REFRESH_INTERVAL: Duration = Duration::from_secs(20 * 60);

/// The interval between periodic flushes of the address book to disk.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// The name of the peers file within the data directory.
pub const PEERS_FILENAME: &str = "peers.json";

/// The current schema version of the peers file.
pub const PEERS_FILE_VERSION: u32 = 2;

/// The maximum number of addresses carried by a single gossip message.
pub const MAX_ADDRESSES_PER_MSG: usize = 1000;

/// The serialized size of the largest fixed-width address record: timestamp,
/// services, type tag, an IPv6-sized address body, and a port.
pub const ADDR_RECORD_BASE_SIZE: usize = 8 + 8 + 1 + 16 + 2;

/// The maximum payload size of a gossip address message: a compact-size
/// count followed by [`MAX_ADDRESSES_PER_MSG`] fixed-width records.
pub const MAX_ADDR_PAYLOAD: usize = 3 + MAX_ADDRESSES_PER_MSG * ADDR_RECORD_BASE_SIZE;
