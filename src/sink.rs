#[cfg(test)] use mockall::automock;
use crate::api::response::ApiResponse;
use crate::registry::local_port::LocalPort;
use crate::wire::packet::NetworkPacket;


/// The engine's three outputs. Implementations must not block: the engine calls them while
///  processing an input, and the whole registry is locked for that time.
#[cfg_attr(test, automock)]
pub trait PacketSink: Send + Sync {
    fn to_network(&self, packet: NetworkPacket);

    fn to_cache(&self, packet: NetworkPacket);

    fn to_application(&self, port: LocalPort, response: ApiResponse);
}
