use bytes::Bytes;
use tracing::{debug, trace, warn};
use crate::api::response::ApiResponse;
use crate::api::ErrorCode;
use crate::engine::{ApiResult, Reply, TransportEngine};
use crate::registry::connection_record::SocketKind;
use crate::registry::local_port::LocalPort;
use crate::wire::address_path::AddressPath;
use crate::wire::packet::{NetworkPacket, PacketBody};
use crate::wire::packet_header::NextProtocol;
use crate::wire::transport_header::{TransportHeader, TransportKind};


impl TransportEngine {
    /// Unreliable transmission for datagram and raw sockets. Raw payloads go on the wire right
    ///  after the common header, tagged with the socket's next protocol.
    pub(super) fn send_to(&mut self, port: LocalPort, dst: AddressPath, payload: Bytes) -> ApiResult {
        let record = self.registry.get(port)
            .ok_or(ErrorCode::NoSuchSocket)?;
        let kind = record.kind;
        if kind != SocketKind::Datagram && kind != SocketKind::Raw {
            return Err(ErrorCode::WrongSocketKind);
        }
        if dst.intent().is_none() {
            return Err(ErrorCode::AddressNotAvailable);
        }
        if kind == SocketKind::Datagram && payload.len() > TransportHeader::MAX_PAYLOAD_LEN {
            warn!("datagram of {} bytes on {:?} exceeds the maximum of {}, dropping", payload.len(), port, TransportHeader::MAX_PAYLOAD_LEN);
            return Ok(Reply::Nothing);
        }

        self.ensure_bound(port)?;
        let record = self.registry.get_mut(port)
            .ok_or(ErrorCode::NoSuchSocket)?;
        let src = self.local.source_path(record)
            .ok_or(ErrorCode::AddressNotAvailable)?;

        let packet = if kind == SocketKind::Raw {
            NetworkPacket {
                hop_limit: record.hop_limit,
                dst,
                src,
                body: PacketBody::Raw { next_protocol: record.next_protocol, payload },
            }
        }
        else {
            NetworkPacket::transport(record.hop_limit, src, dst, TransportKind::Datagram, 0, 0, payload)
        };

        trace!("sending {:?}", packet);
        self.sink.to_network(packet);
        Ok(Reply::Nothing)
    }

    pub(super) fn on_datagram(&mut self, packet: NetworkPacket) -> Option<LocalPort> {
        let port = self.port_for_intent(&packet)?;
        let record = self.registry.get(port)?;
        if record.kind != SocketKind::Datagram || record.is_closing() {
            debug!("datagram for {:?} which is not an open datagram socket, dropping", port);
            return None;
        }

        self.sink.to_application(port, ApiResponse::Received {
            from: packet.src.clone(),
            payload: packet.body.payload().clone(),
        });
        Some(port)
    }

    /// Diagnostic packets go to every registered listener, including their complete header.
    ///  Other protocols go to the raw socket bound to the destination, if its protocol matches.
    pub(super) fn on_raw(&mut self, packet: NetworkPacket) -> Option<LocalPort> {
        let next_protocol = packet.body.next_protocol();

        if next_protocol == NextProtocol::DIAGNOSTIC {
            let listeners = self.registry.diagnostic_listeners();
            if listeners.is_empty() {
                debug!("no listener for diagnostic packet from {}, dropping", packet.src);
                return None;
            }

            let raw = packet.to_bytes();
            for port in listeners {
                self.sink.to_application(port, ApiResponse::Received {
                    from: packet.src.clone(),
                    payload: raw.clone(),
                });
            }
            return None;
        }

        let port = self.port_for_intent(&packet)?;
        let record = self.registry.get(port)?;
        if record.kind != SocketKind::Raw || record.next_protocol != next_protocol || record.is_closing() {
            debug!("{:?} packet for {:?} which is no matching raw socket, dropping", next_protocol, port);
            return None;
        }

        self.sink.to_application(port, ApiResponse::Received {
            from: packet.src.clone(),
            payload: packet.body.payload().clone(),
        });
        Some(port)
    }

    fn port_for_intent(&self, packet: &NetworkPacket) -> Option<LocalPort> {
        let Some(intent) = packet.dst.intent() else {
            debug!("packet without destination intent, dropping");
            return None;
        };
        let port = self.registry.port_for_identifier(intent);
        if port.is_none() {
            debug!("nothing bound to {:?}, dropping packet from {}", intent, packet.src);
        }
        port
    }
}
