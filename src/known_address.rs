//! Bucket entries: an address plus our connection history with it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    constants::{
        ATTEMPT_DECAY, ATTEMPT_DECAY_CAP, FUTURE_TIMESTAMP_SLACK, HORIZON, MAX_FAILURES,
        MAX_RETRIES_WITHOUT_SUCCESS, MIN_BAD_AGE, RECENT_ATTEMPT_GRACE, RECENT_ATTEMPT_PENALTY,
        RECENT_ATTEMPT_WINDOW,
    },
    net_address::NetAddress,
};

/// An address tracked by the address book, together with the peer that
/// gossiped it and the history of our connection attempts.
///
/// The wrapped [`NetAddress`] is behind an [`Arc`] and is never mutated:
/// updates replace the handle, so snapshots previously returned to callers
/// keep their original contents.
#[derive(Clone, Debug)]
pub struct KnownAddress {
    pub(crate) na: Arc<NetAddress>,
    pub(crate) src_addr: Arc<NetAddress>,
    pub(crate) attempts: u32,
    pub(crate) last_attempt: Option<DateTime<Utc>>,
    pub(crate) last_success: Option<DateTime<Utc>>,
    pub(crate) tried: bool,
    pub(crate) refs: u32,
}

impl KnownAddress {
    pub(crate) fn new(na: NetAddress, src_addr: NetAddress) -> KnownAddress {
        KnownAddress {
            na: Arc::new(na),
            src_addr: Arc::new(src_addr),
            attempts: 0,
            last_attempt: None,
            last_success: None,
            tried: false,
            refs: 0,
        }
    }

    /// A shared handle to the address itself.
    pub fn net_address(&self) -> Arc<NetAddress> {
        self.na.clone()
    }

    /// A shared handle to the address of the peer that gossiped this one.
    pub fn source_address(&self) -> Arc<NetAddress> {
        self.src_addr.clone()
    }

    /// The number of connection attempts since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When we last attempted to connect to this address.
    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }

    /// When we last completed a handshake with this address.
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    /// Whether this address has been promoted to the tried tier.
    pub fn is_tried(&self) -> bool {
        self.tried
    }

    /// The selection chance of this address, in `(0, 1]`.
    ///
    /// Addresses attempted in the last few minutes are heavily deprioritized
    /// so a slow handshake is not immediately re-drawn, and each failed
    /// attempt compounds a decay on top of that.
    pub(crate) fn chance(&self, now: DateTime<Utc>) -> f64 {
        let mut chance = 1.0;

        if let Some(last_attempt) = self.last_attempt {
            if now - last_attempt < Duration::from_std(RECENT_ATTEMPT_WINDOW).expect("fits") {
                chance *= RECENT_ATTEMPT_PENALTY;
            }
        }

        chance * ATTEMPT_DECAY.powi(self.attempts.min(ATTEMPT_DECAY_CAP) as i32)
    }

    /// Whether this address is a candidate for eviction from a full new
    /// bucket.
    ///
    /// Stale means: a timestamp from the future or past the 30-day horizon,
    /// too many attempts without ever succeeding, or too many failures since
    /// an old success. A just-attempted address is never stale, so eviction
    /// cannot race an in-flight connection attempt.
    pub(crate) fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let dur = |d| Duration::from_std(d).expect("fits");

        if let Some(last_attempt) = self.last_attempt {
            if now - last_attempt < dur(RECENT_ATTEMPT_GRACE) {
                return false;
            }
        }

        let timestamp = self.na.timestamp();
        if timestamp > now + dur(FUTURE_TIMESTAMP_SLACK) {
            return true;
        }
        if timestamp < now - dur(HORIZON) {
            return true;
        }

        if self.last_success.is_none() && self.attempts >= MAX_RETRIES_WITHOUT_SUCCESS {
            return true;
        }

        match self.last_success {
            Some(last_success) if last_success > now - dur(MIN_BAD_AGE) => false,
            _ => self.attempts >= MAX_FAILURES,
        }
    }
}
