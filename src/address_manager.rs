//! The thread-safe operation surface and lifecycle of the address manager.
//!
//! Every operation serializes on one exclusive lock around the
//! [`AddressBook`]; host lookups and file writes happen outside it. A
//! background task flushes the book to disk on an interval and once more at
//! shutdown.

use std::{
    net::IpAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use chrono::Utc;
use tokio::{sync::watch, task::JoinHandle, time::sleep};

use crate::{
    address_book::{storage::SerializedAddressBook, AddressBook},
    config::Config,
    constants::PEERS_FILENAME,
    errors::Error,
    known_address::KnownAddress,
    local_addresses::{validate_peer_na, AddressPriority, LocalAddress},
    net_address::{parse_host, NetAddress, NetAddressType, Reachability, ServiceFlags},
    BoxError,
};

/// An injected host resolver: maps a hostname to the IPs it resolves to.
pub type LookupFn = Arc<dyn Fn(&str) -> Result<Vec<IpAddr>, BoxError> + Send + Sync>;

/// The address manager: a locked [`AddressBook`] plus persistence and
/// lifecycle.
///
/// All mutating and reading operations take the manager's single exclusive
/// lock; operations by concurrent callers are ordered by lock acquisition.
/// The manager works without [`start`](Self::start), but then nothing is
/// loaded from or flushed to disk until [`stop`](Self::stop).
pub struct AddressManager {
    config: Config,
    lookup: Option<LookupFn>,
    book: Arc<Mutex<AddressBook>>,
    started: AtomicBool,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AddressManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressManager")
            .field("config", &self.config)
            .field("started", &self.started)
            .finish()
    }
}

/// Serializes the book under the lock, then writes the peers file with the
/// lock released.
fn flush(book: &Mutex<AddressBook>, path: &Path) -> Result<(), Error> {
    let serialized = book
        .lock()
        .expect("mutex should be unpoisoned")
        .serialize();
    serialized.write_to_path(path)?;
    trace!(
        path = %path.display(),
        addresses = serialized.addresses.len(),
        "flushed address book",
    );
    Ok(())
}

impl AddressManager {
    /// Constructs a manager storing its peers file under `config.data_dir`,
    /// with an optional host resolver for
    /// [`host_to_net_address`](Self::host_to_net_address).
    pub fn new(config: Config, lookup: Option<LookupFn>) -> AddressManager {
        AddressManager {
            config,
            lookup,
            book: Arc::new(Mutex::new(AddressBook::new())),
            started: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
            flusher: Mutex::new(None),
        }
    }

    fn peers_file_path(&self) -> PathBuf {
        self.config.data_dir.join(PEERS_FILENAME)
    }

    fn lock(&self) -> MutexGuard<'_, AddressBook> {
        self.book.lock().expect("mutex should be unpoisoned")
    }

    /// Loads the peers file and starts the periodic flusher.
    ///
    /// Idempotent: a second call is a no-op. Must be called within a tokio
    /// runtime. A missing peers file starts the manager empty; a corrupt
    /// one is deleted and logged, and the manager also starts empty.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.load();

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self
            .shutdown_tx
            .lock()
            .expect("mutex should be unpoisoned") = Some(shutdown_tx);

        let book = self.book.clone();
        let path = self.peers_file_path();
        let interval = self.config.flush_interval;

        let worker = async move {
            info!(path = %path.display(), "starting the address book flusher");
            loop {
                tokio::select! {
                    _ = sleep(interval) => {
                        if let Err(error) = flush(&book, &path) {
                            warn!(%error, "failed to flush address book");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        };

        *self.flusher.lock().expect("mutex should be unpoisoned") =
            Some(tokio::spawn(worker));
    }

    fn load(&self) {
        let path = self.peers_file_path();

        let loaded = match SerializedAddressBook::read_from_path(&path) {
            Ok(None) => return,
            Ok(Some(serialized)) => AddressBook::from_serialized(serialized),
            Err(error) => Err(error),
        };

        match loaded {
            Ok(mut loaded) => {
                let mut book = self.lock();
                // Local addresses registered before start() are runtime
                // state, not part of the peers file.
                loaded.local = std::mem::take(&mut book.local);
                info!(addresses = loaded.len(), "loaded peers file");
                *book = loaded;
            }
            Err(error) => {
                warn!(
                    %error,
                    path = %path.display(),
                    "discarding unreadable peers file",
                );
                let _ = std::fs::remove_file(&path);
            }
        }
    }

    /// Stops the background flusher and writes the peers file one last
    /// time, returning any save error.
    pub async fn stop(&self) -> Result<(), Error> {
        let shutdown_tx = self
            .shutdown_tx
            .lock()
            .expect("mutex should be unpoisoned")
            .take();
        if let Some(shutdown_tx) = shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        let flusher = self
            .flusher
            .lock()
            .expect("mutex should be unpoisoned")
            .take();
        if let Some(flusher) = flusher {
            let _ = flusher.await;
        }

        flush(&self.book, &self.peers_file_path())
    }

    /// Adds a batch of gossiped addresses attributed to the peer `src`.
    pub fn add_addresses(&self, addrs: &[NetAddress], src: &NetAddress) {
        self.lock().add_addresses(addrs, src);
    }

    /// Adds a single gossiped address, or updates the existing entry.
    pub fn add_or_update_address(&self, na: &NetAddress, src: &NetAddress) {
        self.lock().add_or_update_address(na, src);
    }

    /// Marks an address as successfully connected, promoting it to the
    /// tried tier.
    pub fn good(&self, na: &NetAddress) -> Result<(), Error> {
        self.lock().good(na)
    }

    /// Records a connection attempt against a known address.
    pub fn attempt(&self, na: &NetAddress) -> Result<(), Error> {
        self.lock().attempt(na)
    }

    /// Records that a known address is currently connected.
    pub fn connected(&self, na: &NetAddress) -> Result<(), Error> {
        self.lock().connected(na)
    }

    /// Replaces the advertised services of a known address.
    pub fn set_services(&self, na: &NetAddress, services: ServiceFlags) -> Result<(), Error> {
        self.lock().set_services(na, services)
    }

    /// Draws a random connection candidate from the book.
    pub fn get_address(&self) -> Option<KnownAddress> {
        self.lock().select()
    }

    /// A bounded random sample of known addresses for gossip responses.
    pub fn address_cache(&self) -> Vec<Arc<NetAddress>> {
        self.lock().address_cache()
    }

    /// Whether the caller should keep crawling peers for more addresses.
    pub fn need_more_addresses(&self) -> bool {
        self.lock().need_more_addresses()
    }

    /// The number of distinct addresses currently tracked.
    pub fn num_addresses(&self) -> usize {
        self.lock().len()
    }

    /// Registers one of the host's own addresses as a candidate to
    /// advertise to peers.
    pub fn add_local_address(
        &self,
        na: NetAddress,
        priority: AddressPriority,
    ) -> Result<(), Error> {
        self.lock().local.add(na, priority)
    }

    /// Whether the given address is registered as one of the host's own.
    pub fn has_local_address(&self, na: &NetAddress) -> bool {
        self.lock().local.contains(na)
    }

    /// A snapshot of the host's registered local addresses.
    pub fn local_addresses(&self) -> Vec<LocalAddress> {
        self.lock().local.snapshot()
    }

    /// The best local address to advertise to the peer at `remote`.
    pub fn get_best_local_address(&self, remote: &NetAddress) -> Arc<NetAddress> {
        self.lock().local.best_for(remote)
    }

    /// Checks whether `local` is worth advertising to the peer at `remote`.
    pub fn validate_peer_na(
        &self,
        local: &NetAddress,
        remote: &NetAddress,
    ) -> (bool, Reachability) {
        validate_peer_na(local, remote)
    }

    /// Converts a host string into a [`NetAddress`], resolving hostnames
    /// through the injected resolver.
    ///
    /// The lookup runs without holding the manager's lock; only the first
    /// resolved IP is used.
    pub fn host_to_net_address(
        &self,
        host: &str,
        port: u16,
        services: ServiceFlags,
    ) -> Result<NetAddress, Error> {
        let (addr_type, bytes) = parse_host(host)?;
        if addr_type != NetAddressType::Unknown {
            return NetAddress::from_bytes(addr_type, &bytes, port, Utc::now(), services);
        }

        let lookup = self
            .lookup
            .as_ref()
            .ok_or_else(|| Error::UnresolvedHost(host.to_string()))?;
        let ips = lookup(host).map_err(|_| Error::UnresolvedHost(host.to_string()))?;
        let ip = ips
            .first()
            .ok_or_else(|| Error::UnresolvedHost(host.to_string()))?;
        Ok(NetAddress::from_ip(*ip, port, services))
    }

    /// Parses a `host:port` string into a [`NetAddress`], for feeding
    /// operator-supplied peer addresses into the book.
    pub fn new_address_from_string(&self, addr: &str) -> Result<NetAddress, Error> {
        let (host, port) = split_host_port(addr)?;
        let (addr_type, bytes) = parse_host(host)?;
        if addr_type == NetAddressType::Unknown {
            return Err(Error::UnknownAddressType("address host is not a literal"));
        }
        NetAddress::from_bytes(
            addr_type,
            &bytes,
            port,
            Utc::now(),
            ServiceFlags::NODE_NETWORK,
        )
    }
}

/// Splits `host:port`, unwrapping the brackets of an IPv6 host.
fn split_host_port(addr: &str) -> Result<(&str, u16), Error> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or(Error::Parse("address has no port"))?;
    let port = port.parse().map_err(|_| Error::Parse("invalid port"))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Ok((host, port))
}
