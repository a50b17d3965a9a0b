//! Utilities for testing code based on the transport engine. They are used by the crate's own
//!  tests, and they are exported for application testing.

use std::sync::Mutex;
use crate::api::response::ApiResponse;
use crate::config::TransportConfig;
use crate::registry::local_port::LocalPort;
use crate::sink::PacketSink;
use crate::wire::address_path::AddressPath;
use crate::wire::identifier::{Identifier, IdentifierKind};
use crate::wire::packet::NetworkPacket;


/// convenience method for unit test code: create an [Identifier] based on a number, the same
///  number generating the same identifier and different numbers different identifiers
pub fn test_identifier(kind: IdentifierKind, number: u8) -> Identifier {
    let mut value = [0u8; Identifier::VALUE_LEN];
    value[Identifier::VALUE_LEN - 1] = number;
    Identifier::new(kind, value)
}

/// `AD:<number> HID:<number>`
pub fn test_host_address(number: u8) -> AddressPath {
    AddressPath::from_nodes(vec![
        test_identifier(IdentifierKind::Domain, number),
        test_identifier(IdentifierKind::Host, number),
    ])
}

/// `AD:<host> HID:<host> <intent_kind>:<intent>`
pub fn test_path(host: u8, intent_kind: IdentifierKind, intent: u8) -> AddressPath {
    test_host_address(host).with_intent(test_identifier(intent_kind, intent))
}

/// a configuration for host `number` with short delays and small bounds
pub fn test_config(number: u8) -> TransportConfig {
    let mut config = TransportConfig::new(test_host_address(number));
    config.window_size = 4;
    config.max_connect_tries = 3;
    config.max_retransmit_tries = 3;
    config.max_chunk_tries = 3;
    config.max_pending_connections = 2;
    config.max_pending_chunks = 2;
    config.max_send_backlog = 2;
    config
}

/// A [PacketSink] that records everything sent to it
#[derive(Debug, Default)]
pub struct TrackingSink {
    network: Mutex<Vec<NetworkPacket>>,
    cache: Mutex<Vec<NetworkPacket>>,
    application: Mutex<Vec<(LocalPort, ApiResponse)>>,
}
impl TrackingSink {
    /// returns packets sent to the network, clearing the internal buffer
    pub fn network_packets(&self) -> Vec<NetworkPacket> {
        Self::take(&self.network)
    }

    /// returns packets sent to the content cache, clearing the internal buffer
    pub fn cache_packets(&self) -> Vec<NetworkPacket> {
        Self::take(&self.cache)
    }

    /// returns responses sent to the application, clearing the internal buffer
    pub fn responses(&self) -> Vec<(LocalPort, ApiResponse)> {
        Self::take(&self.application)
    }

    pub fn assert_nothing_sent(&self) {
        assert_eq!(self.network_packets(), vec![]);
        assert_eq!(self.cache_packets(), vec![]);
        assert_eq!(self.responses(), vec![]);
    }

    fn take<T>(tracker: &Mutex<Vec<T>>) -> Vec<T> {
        match tracker.lock() {
            Ok(mut lock) => std::mem::take(&mut *lock),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn track<T>(tracker: &Mutex<Vec<T>>, value: T) {
        match tracker.lock() {
            Ok(mut lock) => lock.push(value),
            Err(poisoned) => poisoned.into_inner().push(value),
        }
    }
}

impl PacketSink for TrackingSink {
    fn to_network(&self, packet: NetworkPacket) {
        Self::track(&self.network, packet);
    }

    fn to_cache(&self, packet: NetworkPacket) {
        Self::track(&self.cache, packet);
    }

    fn to_application(&self, port: LocalPort, response: ApiResponse) {
        Self::track(&self.application, (port, response));
    }
}
