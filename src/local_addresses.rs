//! The host's own candidate addresses, and choosing which one to advertise.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    errors::Error,
    net_address::{reachability, NetAddress, Reachability, ServiceFlags},
};

/// How a local address was discovered, in increasing order of trust.
///
/// When the same address is registered twice, the higher priority wins;
/// when picking an address to advertise, priority breaks reachability ties.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum AddressPriority {
    /// Learned from enumerating network interfaces.
    Interface,
    /// The address a listener was explicitly bound to.
    Bound,
    /// Discovered through UPnP.
    Upnp,
    /// Reported by an external HTTP lookup service.
    Http,
    /// Supplied manually by the operator.
    Manual,
}

/// A snapshot row describing one registered local address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalAddress {
    /// The address without its port, as a displayable host string.
    pub address: String,
    /// The port the address listens on.
    pub port: u16,
    /// The services advertised for this address.
    pub services: ServiceFlags,
}

#[derive(Clone, Debug)]
struct LocalRecord {
    na: Arc<NetAddress>,
    priority: AddressPriority,
}

/// Tracks the host's own bound and advertised addresses.
///
/// Insertion order is preserved so that among equally good candidates the
/// most recently registered one is advertised.
#[derive(Clone, Debug, Default)]
pub struct LocalAddressRegistry {
    by_key: IndexMap<String, LocalRecord>,
}

impl LocalAddressRegistry {
    /// Registers a local address with the given priority.
    ///
    /// Unroutable addresses are rejected: advertising a private or loopback
    /// address to remote peers is never useful. Re-registering an address
    /// with at least its current priority replaces the stored record.
    pub fn add(&mut self, na: NetAddress, priority: AddressPriority) -> Result<(), Error> {
        if !na.is_routable() {
            return Err(Error::UnroutableAddress(na.key()));
        }

        let key = na.key();
        match self.by_key.get_mut(&key) {
            Some(existing) if existing.priority > priority => {}
            Some(existing) => {
                existing.na = Arc::new(na);
                existing.priority = priority;
            }
            None => {
                trace!(addr = %key, ?priority, "registering local address");
                self.by_key.insert(
                    key,
                    LocalRecord {
                        na: Arc::new(na),
                        priority,
                    },
                );
            }
        }
        Ok(())
    }

    /// Whether the given address is registered as one of ours.
    pub fn contains(&self, na: &NetAddress) -> bool {
        self.by_key.contains_key(&na.key())
    }

    /// A snapshot of all registered local addresses.
    pub fn snapshot(&self) -> Vec<LocalAddress> {
        self.by_key
            .values()
            .map(|record| LocalAddress {
                address: record.na.ip_string(),
                port: record.na.port(),
                services: record.na.services(),
            })
            .collect()
    }

    /// The number of registered local addresses.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether no local addresses are registered.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Picks the best local address to advertise to `remote`, maximizing
    /// reachability and then priority. Later registrations win ties.
    ///
    /// When nothing routable is registered, returns the all-zero address of
    /// the remote's family, which peers understand as "no address".
    pub fn best_for(&self, remote: &NetAddress) -> Arc<NetAddress> {
        let mut best: Option<(&LocalRecord, Reachability)> = None;

        for record in self.by_key.values() {
            let reach = reachability(&record.na, remote);
            let better = match best {
                Some((current, current_reach)) => {
                    (reach, record.priority) >= (current_reach, current.priority)
                }
                None => true,
            };
            if better {
                best = Some((record, reach));
            }
        }

        match best {
            Some((record, _)) => record.na.clone(),
            None => Arc::new(NetAddress::unspecified(remote.addr_type(), 0)),
        }
    }
}

/// Checks whether `local` is worth advertising to the peer at `remote`,
/// returning the verdict together with the reachability score it is based
/// on.
///
/// Addresses that are unreachable, reachable only via a default route, or
/// only shared within a private overlay (onion to onion) are not advertised
/// across networks.
pub fn validate_peer_na(local: &NetAddress, remote: &NetAddress) -> (bool, Reachability) {
    let reach = reachability(local, remote);
    let valid = !matches!(
        reach,
        Reachability::Unreachable | Reachability::Default | Reachability::Private
    );
    (valid, reach)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn local(addr: &str) -> NetAddress {
        let ip: IpAddr = addr.parse().unwrap();
        NetAddress::from_ip(ip, 8333, ServiceFlags::NODE_NETWORK)
    }

    #[test]
    fn unroutable_local_addresses_are_rejected() {
        let mut registry = LocalAddressRegistry::default();

        for addr in ["192.168.0.100", "::1", "fe80::1"] {
            let na = local(addr);
            assert!(matches!(
                registry.add(na.clone(), AddressPriority::Interface),
                Err(Error::UnroutableAddress(_))
            ));
            assert!(!registry.contains(&na));
        }

        for addr in ["204.124.1.1", "2620:100::1"] {
            let na = local(addr);
            registry.add(na.clone(), AddressPriority::Interface).unwrap();
            assert!(registry.contains(&na));
        }

        let snapshot: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|entry| entry.address)
            .collect();
        assert_eq!(snapshot, vec!["204.124.1.1", "2620:100::1"]);
    }

    #[test]
    fn higher_priority_wins_on_reregistration() {
        let mut registry = LocalAddressRegistry::default();
        let na = local("204.124.1.1");

        registry.add(na.clone(), AddressPriority::Manual).unwrap();
        registry.add(na.clone(), AddressPriority::Interface).unwrap();

        let record = registry.by_key.get(&na.key()).unwrap();
        assert_eq!(record.priority, AddressPriority::Manual);

        registry.add(na.clone(), AddressPriority::Manual).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn best_local_address_prefers_reachability_then_priority() {
        let mut registry = LocalAddressRegistry::default();
        let remote_v6 = local("2602:100:abcd::102");
        let remote_v4 = local("204.124.8.1");

        // Empty registry falls back to the zero address of the remote family.
        assert_eq!(
            registry.best_for(&remote_v4).ip_string(),
            "0.0.0.0".to_string()
        );
        assert_eq!(registry.best_for(&remote_v6).ip_string(), "::".to_string());

        let v6_local = local("2001:470::1");
        registry
            .add(v6_local.clone(), AddressPriority::Interface)
            .unwrap();

        // An IPv6 local does not help reach an IPv4 remote.
        assert_eq!(
            registry.best_for(&remote_v4).ip_string(),
            "0.0.0.0".to_string()
        );
        assert_eq!(registry.best_for(&remote_v6).key(), v6_local.key());

        let v4_local = local("204.124.8.100");
        registry
            .add(v4_local.clone(), AddressPriority::Interface)
            .unwrap();
        assert_eq!(registry.best_for(&remote_v4).key(), v4_local.key());
        assert_eq!(registry.best_for(&remote_v6).key(), v6_local.key());
    }

    #[test]
    fn later_registration_wins_ties() {
        let mut registry = LocalAddressRegistry::default();
        let remote = local("204.124.8.1");

        let first = local("204.124.9.1");
        let second = local("204.124.10.1");
        registry
            .add(first.clone(), AddressPriority::Interface)
            .unwrap();
        registry
            .add(second.clone(), AddressPriority::Interface)
            .unwrap();

        assert_eq!(registry.best_for(&remote).key(), second.key());
    }
}
