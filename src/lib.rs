//! A transport multiplexing engine for path-addressed networks.
//!
//! Packets are addressed by [wire::address_path::AddressPath]s, ordered sequences of typed
//!  [wire::identifier::Identifier]s (domain, host, service, content). The engine sits between
//!  application sockets and the network, and turns raw packets into per-socket semantics:
//!
//! * reliable streams with a SYN / SYNACK handshake and a fixed-size Go-Back-N send window
//! * unreliable datagrams and raw packets
//! * content chunks, fetched by content identifier and verified against the SHA-1 digest
//!    that the identifier is derived from
//!
//! All state lives in a single [registry::connection_registry::ConnectionRegistry] owned by the
//!  [engine::TransportEngine], which processes one input (application request, network packet,
//!  cache packet, topology update or timer firing) at a time to completion. Retransmissions and
//!  teardowns are driven by one coalesced alarm rather than a timer per connection.
//!
//! [driver::TransportNode] runs an engine on a tokio task, connecting it to channels for its
//!  four input ports.

pub mod api;
pub mod config;
pub mod driver;
pub mod engine;
pub mod registry;
pub mod sink;
pub mod util;
pub mod wire;
pub mod test_util;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
