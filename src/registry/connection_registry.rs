use std::collections::BTreeSet;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;
use crate::registry::connection_record::ConnectionRecord;
use crate::registry::identifier_pair::IdentifierPair;
use crate::registry::local_port::LocalPort;
use crate::wire::identifier::Identifier;


/// Owns all connection records and the secondary indexes that demultiplex incoming packets to
///  them:
///
/// * bound identifier -> port, for datagram delivery and incoming connection requests
/// * identifier pair -> port, for stream traffic and chunk responses of one specific flow
/// * push identifier -> port, for unsolicited content delivery
///
/// Lookups for unknown keys return `None`, and it is up to the caller to drop the packet.
///  Registration is idempotent per port, and removing a record purges every index entry
///  pointing to its port.
#[derive(Default)]
pub struct ConnectionRegistry {
    records: FxHashMap<LocalPort, ConnectionRecord>,
    by_identifier: FxHashMap<Identifier, LocalPort>,
    by_pair: FxHashMap<IdentifierPair, LocalPort>,
    push_bound: FxHashMap<Identifier, LocalPort>,
    /// pairs with a connection request in some listener's accept queue
    pending_pairs: FxHashSet<IdentifierPair>,
    diagnostic_listeners: BTreeSet<LocalPort>,
}

impl ConnectionRegistry {
    /// Adds a record, replacing (and purging) a previous record for the same port
    pub fn insert(&mut self, record: ConnectionRecord) {
        let port = record.port;
        if self.remove(port).is_some() {
            debug!("socket {:?} re-opened, discarding previous state", port);
        }
        self.records.insert(port, record);
    }

    pub fn get(&self, port: LocalPort) -> Option<&ConnectionRecord> {
        self.records.get(&port)
    }

    pub fn get_mut(&mut self, port: LocalPort) -> Option<&mut ConnectionRecord> {
        self.records.get_mut(&port)
    }

    pub fn contains(&self, port: LocalPort) -> bool {
        self.records.contains_key(&port)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// all ports in ascending order
    pub fn ports(&self) -> Vec<LocalPort> {
        let mut result = self.records.keys().copied().collect::<Vec<_>>();
        result.sort();
        result
    }

    pub fn register_identifier(&mut self, identifier: Identifier, port: LocalPort) {
        if let Some(prev) = self.by_identifier.insert(identifier, port) {
            if prev != port {
                debug!("identifier {:?} moved from {:?} to {:?}", identifier, prev, port);
            }
        }
    }

    pub fn unregister_identifier(&mut self, identifier: &Identifier, port: LocalPort) {
        if self.by_identifier.get(identifier) == Some(&port) {
            self.by_identifier.remove(identifier);
        }
    }

    pub fn port_for_identifier(&self, identifier: &Identifier) -> Option<LocalPort> {
        self.by_identifier.get(identifier).copied()
    }

    pub fn register_pair(&mut self, pair: IdentifierPair, port: LocalPort) {
        if let Some(prev) = self.by_pair.insert(pair, port) {
            if prev != port {
                debug!("flow {:?} moved from {:?} to {:?}", pair, prev, port);
            }
        }
    }

    pub fn unregister_pair(&mut self, pair: &IdentifierPair, port: LocalPort) {
        if self.by_pair.get(pair) == Some(&port) {
            self.by_pair.remove(pair);
        }
    }

    pub fn port_for_pair(&self, pair: &IdentifierPair) -> Option<LocalPort> {
        self.by_pair.get(pair).copied()
    }

    pub fn register_push(&mut self, identifier: Identifier, port: LocalPort) {
        self.push_bound.insert(identifier, port);
    }

    pub fn push_port_for(&self, identifier: &Identifier) -> Option<LocalPort> {
        self.push_bound.get(identifier).copied()
    }

    /// returns true if the pair was not marked before
    pub fn mark_pending(&mut self, pair: IdentifierPair) -> bool {
        self.pending_pairs.insert(pair)
    }

    pub fn clear_pending(&mut self, pair: &IdentifierPair) {
        self.pending_pairs.remove(pair);
    }

    pub fn is_pending(&self, pair: &IdentifierPair) -> bool {
        self.pending_pairs.contains(pair)
    }

    pub fn add_diagnostic_listener(&mut self, port: LocalPort) {
        self.diagnostic_listeners.insert(port);
    }

    pub fn remove_diagnostic_listener(&mut self, port: LocalPort) {
        self.diagnostic_listeners.remove(&port);
    }

    pub fn diagnostic_listeners(&self) -> Vec<LocalPort> {
        self.diagnostic_listeners.iter().copied().collect()
    }

    /// Removes a record together with all index entries that point to its port, and the pending
    ///  markers of its accept queue
    pub fn remove(&mut self, port: LocalPort) -> Option<ConnectionRecord> {
        let record = self.records.remove(&port)?;

        self.by_identifier.retain(|_, p| *p != port);
        self.by_pair.retain(|_, p| *p != port);
        self.push_bound.retain(|_, p| *p != port);
        self.diagnostic_listeners.remove(&port);
        for pending in &record.accept_queue {
            self.pending_pairs.remove(&pending.pair);
        }

        Some(record)
    }
}
