use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use crate::api::response::ApiResponse;
use crate::api::ErrorCode;
use crate::config::TransportConfig;
use crate::engine::mobility::LocalNode;
use crate::engine::{ApiResult, Reply, TransportEngine};
use crate::registry::connection_record::{ConnectionRecord, HandshakeState, PendingConnection, PendingTimer, SocketKind, TimerEvent};
use crate::registry::identifier_pair::IdentifierPair;
use crate::registry::local_port::LocalPort;
use crate::sink::PacketSink;
use crate::wire::address_path::AddressPath;
use crate::wire::packet::NetworkPacket;
use crate::wire::transport_header::TransportKind;


impl TransportEngine {
    pub(super) fn connect(&mut self, port: LocalPort, dst: AddressPath, now: Instant) -> ApiResult {
        let record = self.registry.get(port)
            .ok_or(ErrorCode::NoSuchSocket)?;
        if record.kind != SocketKind::Stream {
            return Err(ErrorCode::WrongSocketKind);
        }
        if record.connected || matches!(record.handshake, HandshakeState::SynSent { .. }) {
            return Err(ErrorCode::AlreadyConnected);
        }
        let peer = *dst.intent()
            .ok_or(ErrorCode::AddressNotAvailable)?;

        let local_id = self.ensure_bound(port)?;
        let record = self.registry.get_mut(port)
            .ok_or(ErrorCode::NoSuchSocket)?;
        let src = self.local.source_path(record)
            .ok_or(ErrorCode::AddressNotAvailable)?;

        let request = NetworkPacket::transport(record.hop_limit, src, dst.clone(), TransportKind::Syn, 0, 0, Bytes::new());
        debug!("connecting {:?} to {}", port, dst);

        record.dst_path = Some(dst);
        record.handshake = HandshakeState::SynSent { request: request.clone() };
        record.connect_tries = 1;
        record.timer = Some(PendingTimer { event: TimerEvent::HandshakeWait, expiry: now + self.config.ack_delay });

        self.registry.register_pair(IdentifierPair::new(local_id, peer), port);
        self.sink.to_network(request);
        Ok(Reply::Nothing)
    }

    /// A connection request for a listening socket. Every request is answered, including
    ///  retransmissions for connections that are already pending or established (their SYNACK
    ///  may have been lost), but only the first one is queued for acceptance.
    pub(super) fn on_syn(&mut self, packet: NetworkPacket) -> Option<LocalPort> {
        let (Some(&listener_id), Some(&peer_id)) = (packet.dst.intent(), packet.src.intent()) else {
            debug!("connection request without intent, dropping");
            return None;
        };
        let Some(listener) = self.registry.port_for_identifier(&listener_id) else {
            debug!("connection request for {:?} without listener, dropping", listener_id);
            return None;
        };

        let pair = IdentifierPair::new(listener_id, peer_id);
        let established = self.registry.port_for_pair(&pair)
            .and_then(|p| self.registry.get(p))
            .is_some_and(|r| r.accepted);
        let pending = self.registry.is_pending(&pair);

        let record = self.registry.get_mut(listener)?;
        if record.kind != SocketKind::Stream || record.is_closing() {
            debug!("connection request for {:?} which is not a listening stream socket, dropping", listener);
            return None;
        }
        let hop_limit = record.hop_limit;

        if established || pending {
            trace!("repeated connection request from {}", packet.src);
        }
        else {
            if record.accept_queue.len() >= self.config.max_pending_connections {
                warn!("accept queue of {:?} is full, dropping connection request from {}", listener, packet.src);
                return None;
            }
            record.accept_queue.push_back(PendingConnection {
                pair,
                peer_path: packet.src.clone(),
                hop_limit,
            });
            self.registry.mark_pending(pair);
            debug!("queued connection request from {} on {:?}", packet.src, listener);
        }

        self.sink.to_network(NetworkPacket::transport(
            hop_limit,
            self.local.full_path(listener_id),
            packet.src,
            TransportKind::SynAck,
            0,
            0,
            Bytes::new(),
        ));
        Some(listener)
    }

    pub(super) fn on_synack(&mut self, packet: NetworkPacket) -> Option<LocalPort> {
        let (Some(&local_id), Some(&peer_id)) = (packet.dst.intent(), packet.src.intent()) else {
            debug!("connection response without intent, dropping");
            return None;
        };
        let Some(port) = self.registry.port_for_pair(&IdentifierPair::new(local_id, peer_id)) else {
            debug!("connection response for unknown flow from {}, dropping", packet.src);
            return None;
        };
        let record = self.registry.get_mut(port)?;

        if !matches!(record.handshake, HandshakeState::SynSent { .. }) {
            trace!("duplicate connection response for {:?}, ignoring", port);
            return None;
        }

        info!("{:?} connected to {}", port, packet.src);
        record.handshake = HandshakeState::Established;
        record.connected = true;
        record.initialized = true;
        record.timer = None;
        record.connect_tries = 0;
        record.dst_path = Some(packet.src.clone());

        self.sink.to_application(port, ApiResponse::ConnectionEstablished { peer: packet.src });
        Some(port)
    }

    /// Turns the socket at `port` into the local end of the oldest pending connection of
    ///  `listener`
    pub(super) fn accept(&mut self, port: LocalPort, listener: LocalPort) -> ApiResult {
        if port == listener {
            return Err(ErrorCode::InvalidArgument);
        }
        let record = self.registry.get(port)
            .ok_or(ErrorCode::NoSuchSocket)?;
        if record.kind != SocketKind::Stream {
            return Err(ErrorCode::WrongSocketKind);
        }
        if record.connected {
            return Err(ErrorCode::AlreadyConnected);
        }

        let listener_record = self.registry.get_mut(listener)
            .ok_or(ErrorCode::NoSuchSocket)?;
        if listener_record.kind != SocketKind::Stream {
            return Err(ErrorCode::WrongSocketKind);
        }
        let pending = listener_record.accept_queue.pop_front()
            .ok_or(ErrorCode::NoPendingConnection)?;
        self.registry.clear_pending(&pending.pair);

        let record = self.registry.get_mut(port)
            .ok_or(ErrorCode::NoSuchSocket)?;
        record.src_path = Some(self.local.full_path(pending.pair.src));
        record.full_src_path = true;
        record.dst_path = Some(pending.peer_path.clone());
        record.initialized = true;
        record.connected = true;
        record.accepted = true;
        record.handshake = HandshakeState::Established;

        self.registry.register_pair(pending.pair, port);
        info!("{:?} accepted connection from {}", port, pending.peer_path);
        Ok(Reply::Respond(ApiResponse::Accepted { peer: pending.peer_path }))
    }
}

/// Retransmits a pending connection request with the current source path, or fails the
///  connection once the retry budget is used up. A failed connection's flow is returned for
///  unregistering.
pub fn on_handshake_timeout(record: &mut ConnectionRecord, local: &LocalNode, sink: &dyn PacketSink, config: &TransportConfig, now: Instant) -> Option<IdentifierPair> {
    let mut request = match &record.handshake {
        HandshakeState::SynSent { request } => request.clone(),
        _ => {
            record.timer = None;
            return None;
        }
    };

    if record.connect_tries > config.max_connect_tries {
        let peer = record.dst_path.clone()
            .unwrap_or(request.dst);
        warn!("connection from {:?} to {} failed after {} tries", record.port, peer, record.connect_tries);

        record.handshake = HandshakeState::Idle;
        record.timer = None;
        record.connect_tries = 0;
        let flow = match (request.src.intent(), peer.intent()) {
            (Some(&local_id), Some(&peer_id)) => Some(IdentifierPair::new(local_id, peer_id)),
            _ => None,
        };
        sink.to_application(record.port, ApiResponse::ConnectionFailed { peer });
        return flow;
    }

    if let Some(src) = local.source_path(record) {
        request.src = src;
    }
    debug!("retransmitting connection request from {:?} (try #{})", record.port, record.connect_tries + 1);

    record.handshake = HandshakeState::SynSent { request: request.clone() };
    record.connect_tries += 1;
    record.timer = Some(PendingTimer { event: TimerEvent::HandshakeWait, expiry: now + config.ack_delay });
    sink.to_network(request);
    None
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use rstest::rstest;
    use crate::api::request::ApiRequest;
    use crate::api::ApiCall;
    use crate::engine::testing::*;
    use crate::test_util::{test_host_address, test_identifier, test_path, TrackingSink};
    use crate::wire::identifier::IdentifierKind;

    fn listener(now: Instant) -> (TransportEngine, std::sync::Arc<TrackingSink>) {
        let (mut engine, sink) = engine(2);
        open(&mut engine, &sink, port(10), SocketKind::Stream, now);
        engine.on_application(port(10), ApiRequest::Bind { path: test_path(2, IdentifierKind::Service, 10) }, now);
        sink.responses();
        (engine, sink)
    }

    fn syn(from_host: u8, from_sid: u8) -> NetworkPacket {
        NetworkPacket::transport(
            17,
            test_path(from_host, IdentifierKind::Service, from_sid),
            test_path(2, IdentifierKind::Service, 10),
            TransportKind::Syn,
            0,
            0,
            Bytes::new(),
        )
    }

    #[test]
    fn test_connect_sends_syn() {
        let now = Instant::now();
        let (mut engine, sink) = engine(1);
        open(&mut engine, &sink, port(1), SocketKind::Stream, now);

        engine.on_application(port(1), ApiRequest::Connect { dst: test_path(2, IdentifierKind::Service, 10) }, now);
        let packets = sink.network_packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].transport_header().unwrap().kind, TransportKind::Syn);
        assert_eq!(packets[0].dst, test_path(2, IdentifierKind::Service, 10));
        assert_eq!(&packets[0].src.nodes()[..2], test_host_address(1).nodes());
        assert_eq!(packets[0].src.intent().unwrap().kind(), IdentifierKind::Service);
        assert_eq!(packets[0].hop_limit, 250);
        assert_eq!(sink.responses(), vec![]);

        let record = engine.registry().get(port(1)).unwrap();
        assert_eq!(record.connect_tries, 1);
        assert_eq!(record.timer, Some(PendingTimer { event: TimerEvent::HandshakeWait, expiry: now + Duration::from_millis(300) }));
        assert_eq!(engine.registry().port_for_identifier(packets[0].src.intent().unwrap()), Some(port(1)));
    }

    #[rstest]
    #[case::datagram(SocketKind::Datagram, test_path(2, IdentifierKind::Service, 10), ErrorCode::WrongSocketKind)]
    #[case::chunk(SocketKind::Chunk, test_path(2, IdentifierKind::Service, 10), ErrorCode::WrongSocketKind)]
    #[case::no_intent(SocketKind::Stream, AddressPath::default(), ErrorCode::AddressNotAvailable)]
    fn test_connect_invalid(#[case] kind: SocketKind, #[case] dst: AddressPath, #[case] code: ErrorCode) {
        let now = Instant::now();
        let (mut engine, sink) = engine(1);
        open(&mut engine, &sink, port(1), kind, now);

        engine.on_application(port(1), ApiRequest::Connect { dst }, now);
        assert_eq!(sink.responses(), vec![(port(1), ApiResponse::Error { call: ApiCall::Connect, code })]);
        assert_eq!(sink.network_packets(), vec![]);
    }

    #[test]
    fn test_connect_twice() {
        let now = Instant::now();
        let (mut engine, sink) = engine(1);
        open(&mut engine, &sink, port(1), SocketKind::Stream, now);

        engine.on_application(port(1), ApiRequest::Connect { dst: test_path(2, IdentifierKind::Service, 10) }, now);
        engine.on_application(port(1), ApiRequest::Connect { dst: test_path(3, IdentifierKind::Service, 10) }, now);
        assert_eq!(sink.network_packets().len(), 1);
        assert_eq!(sink.responses(), vec![(port(1), ApiResponse::Error { call: ApiCall::Connect, code: ErrorCode::AlreadyConnected })]);
    }

    #[test]
    fn test_repeated_syn_is_queued_once() {
        let now = Instant::now();
        let (mut engine, sink) = listener(now);

        for _ in 0..3 {
            engine.on_network(syn(1, 1), now);
        }
        let synacks = sink.network_packets();
        assert_eq!(synacks.len(), 3);
        for synack in &synacks {
            assert_eq!(synack.transport_header().unwrap().kind, TransportKind::SynAck);
            assert_eq!(synack.src, test_path(2, IdentifierKind::Service, 10));
            assert_eq!(synack.dst, test_path(1, IdentifierKind::Service, 1));
        }
        assert_eq!(engine.registry().get(port(10)).unwrap().accept_queue.len(), 1);

        // after acceptance, a retransmitted request is still answered but not queued again
        open(&mut engine, &sink, port(11), SocketKind::Stream, now);
        engine.on_application(port(11), ApiRequest::Accept { listener: port(10) }, now);
        assert_eq!(sink.responses(), vec![(port(11), ApiResponse::Accepted { peer: test_path(1, IdentifierKind::Service, 1) })]);

        engine.on_network(syn(1, 1), now);
        assert_eq!(sink.network_packets().len(), 1);
        assert!(engine.registry().get(port(10)).unwrap().accept_queue.is_empty());
    }

    #[test]
    fn test_full_accept_queue_drops_syn() {
        let now = Instant::now();
        let (mut engine, sink) = listener(now);

        engine.on_network(syn(1, 1), now);
        engine.on_network(syn(1, 2), now);
        assert_eq!(sink.network_packets().len(), 2);

        engine.on_network(syn(1, 3), now);
        assert_eq!(sink.network_packets(), vec![]);
        assert_eq!(engine.registry().get(port(10)).unwrap().accept_queue.len(), 2);
    }

    #[test]
    fn test_syn_without_listener() {
        let now = Instant::now();
        let (mut engine, sink) = engine(2);
        engine.on_network(syn(1, 1), now);
        sink.assert_nothing_sent();
    }

    #[test]
    fn test_duplicate_synack_is_ignored() {
        let now = Instant::now();
        let (mut a, sink_a) = engine(1);
        let (mut b, sink_b) = listener(now);

        open(&mut a, &sink_a, port(1), SocketKind::Stream, now);
        a.on_application(port(1), ApiRequest::Connect { dst: test_path(2, IdentifierKind::Service, 10) }, now);
        forward(&sink_a, &mut b, now);
        let synack = sink_b.network_packets();

        a.on_network(synack[0].clone(), now);
        a.on_network(synack[0].clone(), now);
        assert_eq!(sink_a.responses(), vec![(port(1), ApiResponse::ConnectionEstablished { peer: test_path(2, IdentifierKind::Service, 10) })]);
        assert!(a.registry().get(port(1)).unwrap().connected);
        assert_eq!(a.next_wakeup(), Some(now + Duration::from_millis(300)));

        // the stale alarm finds nothing to do
        a.on_timer(now + Duration::from_millis(300));
        assert_eq!(sink_a.network_packets(), vec![]);
        assert_eq!(a.next_wakeup(), None);
    }

    #[test]
    fn test_accept_invalid() {
        let now = Instant::now();
        let (mut engine, sink) = listener(now);
        open(&mut engine, &sink, port(11), SocketKind::Stream, now);
        open(&mut engine, &sink, port(12), SocketKind::Datagram, now);

        engine.on_application(port(11), ApiRequest::Accept { listener: port(10) }, now);
        engine.on_application(port(10), ApiRequest::Accept { listener: port(10) }, now);
        engine.on_application(port(12), ApiRequest::Accept { listener: port(10) }, now);
        engine.on_application(port(11), ApiRequest::Accept { listener: port(12) }, now);

        assert_eq!(sink.responses(), vec![
            (port(11), ApiResponse::Error { call: ApiCall::Accept, code: ErrorCode::NoPendingConnection }),
            (port(10), ApiResponse::Error { call: ApiCall::Accept, code: ErrorCode::InvalidArgument }),
            (port(12), ApiResponse::Error { call: ApiCall::Accept, code: ErrorCode::WrongSocketKind }),
            (port(11), ApiResponse::Error { call: ApiCall::Accept, code: ErrorCode::WrongSocketKind }),
        ]);
    }

    #[test]
    fn test_accept_in_arrival_order() {
        let now = Instant::now();
        let (mut engine, sink) = listener(now);
        engine.on_network(syn(1, 1), now);
        engine.on_network(syn(3, 2), now);
        sink.network_packets();

        open(&mut engine, &sink, port(11), SocketKind::Stream, now);
        open(&mut engine, &sink, port(12), SocketKind::Stream, now);
        engine.on_application(port(12), ApiRequest::Accept { listener: port(10) }, now);
        engine.on_application(port(11), ApiRequest::Accept { listener: port(10) }, now);

        assert_eq!(sink.responses(), vec![
            (port(12), ApiResponse::Accepted { peer: test_path(1, IdentifierKind::Service, 1) }),
            (port(11), ApiResponse::Accepted { peer: test_path(3, IdentifierKind::Service, 2) }),
        ]);
        let pair = IdentifierPair::new(test_identifier(IdentifierKind::Service, 10), test_identifier(IdentifierKind::Service, 2));
        assert_eq!(engine.registry().port_for_pair(&pair), Some(port(11)));
        assert!(!engine.registry().is_pending(&pair));
    }

    #[test]
    fn test_retransmitted_syn_follows_domain_change() {
        let now = Instant::now();
        let (mut engine, sink) = engine(1);
        open(&mut engine, &sink, port(1), SocketKind::Stream, now);
        engine.on_application(port(1), ApiRequest::Connect { dst: test_path(2, IdentifierKind::Service, 10) }, now);
        let first = sink.network_packets();

        let new_domain = test_identifier(IdentifierKind::Domain, 9);
        engine.on_application(port(1), ApiRequest::ChangeDomain { domain: new_domain, fallback: None }, now);
        sink.responses();

        engine.on_timer(now + Duration::from_millis(300));
        let second = sink.network_packets();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].src.nodes()[0], new_domain);
        assert_eq!(second[0].src.intent(), first[0].src.intent());
    }
}
