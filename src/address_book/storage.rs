//! The on-disk peers file.
//!
//! The whole table round-trips through a single JSON file: the bucket key,
//! a flat list of address records, and the new/tried bucket contents as
//! indices into that list. Saves go through a temporary file and an atomic
//! rename, so a crash mid-save leaves the previous file intact.

use std::{fs, io, path::Path};

use chrono::{DateTime, TimeZone, Utc};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::AddressBook;
use crate::{
    constants::{NEW_BUCKET_COUNT, NEW_BUCKET_SIZE, PEERS_FILE_VERSION, TRIED_BUCKET_COUNT},
    errors::Error,
    known_address::KnownAddress,
    net_address::{NetAddress, NetAddressType, ServiceFlags},
};

/// One address in its on-disk form.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SerializedNetAddress {
    /// The numeric network type tag.
    #[serde(rename = "Type")]
    pub addr_type: u8,
    /// The canonical address bytes, hex encoded.
    #[serde(rename = "IP", with = "hex::serde")]
    pub ip: Vec<u8>,
    /// The peer's port.
    pub port: u16,
    /// The advertised service bits.
    pub services: u64,
}

/// One tracked address with its connection history, in on-disk form.
///
/// Timestamps are unix seconds; zero means "never".
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SerializedKnownAddress {
    /// The tracked address.
    pub addr: SerializedNetAddress,
    /// The peer that gossiped the address to us.
    pub src: SerializedNetAddress,
    /// Failed connection attempts since the last success.
    pub attempts: u32,
    /// When the address was last seen.
    pub timestamp: i64,
    /// When we last attempted the address.
    pub last_attempt: i64,
    /// When we last completed a handshake with the address.
    pub last_success: i64,
}

/// The full peers file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SerializedAddressBook {
    /// The schema version of this file.
    pub version: u32,
    /// The per-node bucket key, hex encoded.
    #[serde(with = "hex::serde")]
    pub key: [u8; 32],
    /// Every tracked address.
    pub addresses: Vec<SerializedKnownAddress>,
    /// New bucket contents, as indices into `addresses`.
    pub new_buckets: Vec<Vec<usize>>,
    /// Tried bucket contents, as indices into `addresses`.
    pub tried_buckets: Vec<Vec<usize>>,
}

fn serialize_net_address(na: &NetAddress) -> SerializedNetAddress {
    SerializedNetAddress {
        addr_type: na.addr_type().wire_code(),
        ip: na.ip().to_vec(),
        port: na.port(),
        services: na.services().bits(),
    }
}

fn deserialize_net_address(
    serialized: &SerializedNetAddress,
    timestamp: DateTime<Utc>,
) -> Result<NetAddress, Error> {
    let addr_type = NetAddressType::from_wire_code(serialized.addr_type)?;
    NetAddress::from_bytes(
        addr_type,
        &serialized.ip,
        serialized.port,
        timestamp,
        ServiceFlags::from_bits_retain(serialized.services),
    )
}

fn optional_timestamp(secs: i64) -> Result<Option<DateTime<Utc>>, Error> {
    if secs == 0 {
        return Ok(None);
    }
    match Utc.timestamp_opt(secs, 0).single() {
        Some(time) => Ok(Some(time)),
        None => Err(Error::Parse("timestamp out of range in peers file")),
    }
}

fn required_timestamp(secs: i64) -> Result<DateTime<Utc>, Error> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(Error::Parse("timestamp out of range in peers file"))
}

impl SerializedAddressBook {
    /// Reads a serialized address book from `path`.
    ///
    /// Returns `Ok(None)` when no file exists. Any other failure is an
    /// error; the caller decides whether to discard the file.
    pub fn read_from_path(path: &Path) -> Result<Option<SerializedAddressBook>, Error> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let serialized = serde_json::from_reader(io::BufReader::new(file))
            .map_err(|_| Error::Parse("malformed peers file"))?;
        Ok(Some(serialized))
    }

    /// Writes the serialized book to `path` atomically: the contents go to
    /// a sibling temporary file which is then renamed over the target. On
    /// any failure the temporary file is removed and the previous file is
    /// left untouched.
    pub fn write_to_path(&self, path: &Path) -> Result<(), Error> {
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = Path::new(&tmp_name);

        let write = || -> Result<(), Error> {
            let file = fs::File::create(tmp_path)?;
            serde_json::to_writer(&file, self)
                .map_err(|err| Error::Io(err.into()))?;
            file.sync_all()?;
            Ok(())
        };

        if let Err(err) = write() {
            let _ = fs::remove_file(tmp_path);
            return Err(err);
        }

        fs::rename(tmp_path, path)?;
        Ok(())
    }
}

impl AddressBook {
    /// Captures the book in its on-disk form.
    pub fn serialize(&self) -> SerializedAddressBook {
        let mut addresses = Vec::with_capacity(self.addr_index.len());
        for ka in self.addr_index.values() {
            addresses.push(SerializedKnownAddress {
                addr: serialize_net_address(&ka.na),
                src: serialize_net_address(&ka.src_addr),
                attempts: ka.attempts,
                timestamp: ka.na.timestamp().timestamp(),
                last_attempt: ka.last_attempt.map_or(0, |t| t.timestamp()),
                last_success: ka.last_success.map_or(0, |t| t.timestamp()),
            });
        }

        let position_of = |key: &str| {
            self.addr_index
                .get_index_of(key)
                .expect("bucket entries are always indexed")
        };

        let new_buckets = self
            .addr_new
            .iter()
            .map(|bucket| bucket.iter().map(|key| position_of(key)).collect())
            .collect();
        let tried_buckets = self
            .addr_tried
            .iter()
            .map(|bucket| bucket.iter().map(|key| position_of(key)).collect())
            .collect();

        SerializedAddressBook {
            version: PEERS_FILE_VERSION,
            key: self.key,
            addresses,
            new_buckets,
            tried_buckets,
        }
    }

    /// Rebuilds a book from its on-disk form, revalidating every structural
    /// invariant.
    ///
    /// A file that names an unsupported version, refers to out-of-range
    /// indices, duplicates an address, overflows a bucket, or leaves an
    /// address outside every bucket is rejected with a parse error.
    pub fn from_serialized(serialized: SerializedAddressBook) -> Result<AddressBook, Error> {
        if serialized.version != PEERS_FILE_VERSION {
            return Err(Error::Parse("unsupported peers file version"));
        }
        if serialized.new_buckets.len() != NEW_BUCKET_COUNT
            || serialized.tried_buckets.len() != TRIED_BUCKET_COUNT
        {
            return Err(Error::Parse("wrong bucket count in peers file"));
        }

        let mut book = AddressBook::with_key(serialized.key, StdRng::from_entropy());

        let mut keys = Vec::with_capacity(serialized.addresses.len());
        for record in &serialized.addresses {
            let timestamp = required_timestamp(record.timestamp)?;
            let na = deserialize_net_address(&record.addr, timestamp)?;
            let src = deserialize_net_address(&record.src, timestamp)?;

            let key = na.key();
            let mut ka = KnownAddress::new(na, src);
            ka.attempts = record.attempts;
            ka.last_attempt = optional_timestamp(record.last_attempt)?;
            ka.last_success = optional_timestamp(record.last_success)?;

            if book.addr_index.insert(key.clone(), ka).is_some() {
                return Err(Error::Parse("duplicate address in peers file"));
            }
            keys.push(key);
        }

        for (bucket, entries) in serialized.new_buckets.iter().enumerate() {
            if entries.len() > NEW_BUCKET_SIZE {
                return Err(Error::Parse("new bucket overflow in peers file"));
            }
            for &position in entries {
                let key = keys
                    .get(position)
                    .ok_or(Error::Parse("address index out of range in peers file"))?;
                if !book.addr_new[bucket].insert(key.clone()) {
                    return Err(Error::Parse("duplicate new bucket entry in peers file"));
                }
                book.addr_index[key.as_str()].refs += 1;
            }
        }

        for (bucket, entries) in serialized.tried_buckets.iter().enumerate() {
            if entries.len() > book.tried_bucket_size {
                return Err(Error::Parse("tried bucket overflow in peers file"));
            }
            for &position in entries {
                let key = keys
                    .get(position)
                    .ok_or(Error::Parse("address index out of range in peers file"))?;
                let ka = &mut book.addr_index[key.as_str()];
                if ka.tried {
                    return Err(Error::Parse("address in multiple tried buckets"));
                }
                if ka.refs > 0 {
                    return Err(Error::Parse("address in both new and tried tiers"));
                }
                ka.tried = true;
                book.addr_tried[bucket].push(key.clone());
            }
        }

        for ka in book.addr_index.values() {
            if ka.tried {
                book.n_tried += 1;
            } else if ka.refs > 0 {
                book.n_new += 1;
            } else {
                return Err(Error::Parse("address outside every bucket in peers file"));
            }
        }

        Ok(book)
    }
}
