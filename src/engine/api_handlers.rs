use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info};
use crate::api::response::ApiResponse;
use crate::api::{ErrorCode, SocketOption};
use crate::engine::{ApiResult, Reply, TransportEngine};
use crate::registry::connection_record::{ConnectionRecord, HandshakeState, SocketKind};
use crate::registry::local_port::LocalPort;
use crate::wire::address_path::AddressPath;
use crate::wire::identifier::{Identifier, IdentifierKind};
use crate::wire::packet::NetworkPacket;
use crate::wire::packet_header::NextProtocol;
use crate::wire::transport_header::TransportKind;


impl TransportEngine {
    pub(super) fn open_socket(&mut self, port: LocalPort, kind: SocketKind) -> ApiResult {
        self.registry.insert(ConnectionRecord::new(port, kind, &self.config));
        debug!("opened {:?} socket {:?}", kind, port);
        Ok(Reply::Ack)
    }

    pub(super) fn set_option(&mut self, port: LocalPort, option: SocketOption, value: u32) -> ApiResult {
        let record = self.registry.get_mut(port)
            .ok_or(ErrorCode::NoSuchSocket)?;

        match option {
            SocketOption::HopLimit => {
                record.hop_limit = u8::try_from(value).ok()
                    .filter(|&hop_limit| hop_limit > 0)
                    .ok_or(ErrorCode::InvalidArgument)?;
            }
            SocketOption::NextProtocol => {
                let next_protocol = u8::try_from(value)
                    .map(NextProtocol::from_raw)
                    .map_err(|_| ErrorCode::InvalidArgument)?;
                record.next_protocol = next_protocol;

                if next_protocol == NextProtocol::DIAGNOSTIC {
                    debug!("{:?} listens for diagnostic packets", port);
                    self.registry.add_diagnostic_listener(port);
                }
                else {
                    self.registry.remove_diagnostic_listener(port);
                }
            }
        }
        Ok(Reply::Ack)
    }

    pub(super) fn get_option(&mut self, port: LocalPort, option: SocketOption) -> ApiResult {
        let record = self.registry.get(port)
            .ok_or(ErrorCode::NoSuchSocket)?;

        let value = match option {
            SocketOption::HopLimit => record.hop_limit as u32,
            SocketOption::NextProtocol => record.next_protocol.to_raw() as u32,
        };
        Ok(Reply::Respond(ApiResponse::OptionValue { option, value }))
    }

    /// Binds the socket to the service identifier that is the path's intent. A path consisting of
    ///  nothing but that identifier is expanded to the full local path on first transmission.
    pub(super) fn bind(&mut self, port: LocalPort, path: AddressPath) -> ApiResult {
        let sid = service_intent(&path)?;
        let record = self.registry.get_mut(port)
            .ok_or(ErrorCode::NoSuchSocket)?;

        let previous = record.bound_identifier();
        record.full_src_path = !path.is_service_only();
        record.src_path = Some(path);
        record.initialized = true;

        if let Some(previous) = previous.filter(|&p| p != sid) {
            self.registry.unregister_identifier(&previous, port);
        }
        self.registry.register_identifier(sid, port);
        debug!("bound {:?} to {:?}", port, sid);
        Ok(Reply::Ack)
    }

    pub(super) fn bind_push(&mut self, port: LocalPort, path: AddressPath) -> ApiResult {
        let push_id = *path.intent()
            .ok_or(ErrorCode::AddressNotAvailable)?;

        self.registry.register_push(push_id, port);
        debug!("{:?} receives chunks pushed to {:?}", port, push_id);
        Ok(Reply::Ack)
    }

    /// Starts the socket's linger period. The record stays registered until it expires, so
    ///  that in-flight traffic is absorbed.
    pub(super) fn close(&mut self, port: LocalPort, now: Instant) -> ApiResult {
        let record = self.registry.get_mut(port)
            .ok_or(ErrorCode::NoSuchSocket)?;
        if record.is_closing() {
            return Ok(Reply::Ack);
        }

        if record.kind == SocketKind::Stream && record.connected {
            if let (Some(src), Some(dst)) = (self.local.source_path(record), record.dst_path.clone()) {
                self.sink.to_network(NetworkPacket::transport(record.hop_limit, src, dst, TransportKind::Fin, record.window.next_seq(), record.expected_seq, Bytes::new()));
            }
        }
        else if matches!(record.handshake, HandshakeState::SynSent { .. }) {
            record.handshake = HandshakeState::Idle;
            record.timer = None;
        }

        for chunk in record.chunks.values_mut() {
            chunk.expiry = None;
        }
        record.teardown_at = Some(now + self.config.teardown_delay);
        self.registry.remove_diagnostic_listener(port);

        info!("closed socket {:?}, removing it after {:?}", port, self.config.teardown_delay);
        Ok(Reply::Ack)
    }

    pub(super) fn get_peer_name(&mut self, port: LocalPort) -> ApiResult {
        let record = self.registry.get(port)
            .ok_or(ErrorCode::NoSuchSocket)?;
        if !record.connected {
            return Err(ErrorCode::NotConnected);
        }
        let path = record.dst_path.clone()
            .ok_or(ErrorCode::NotConnected)?;
        Ok(Reply::Respond(ApiResponse::PeerName { path }))
    }

    pub(super) fn get_sock_name(&mut self, port: LocalPort) -> ApiResult {
        let record = self.registry.get_mut(port)
            .ok_or(ErrorCode::NoSuchSocket)?;
        let path = self.local.source_path(record)
            .ok_or(ErrorCode::AddressNotAvailable)?;
        Ok(Reply::Respond(ApiResponse::SockName { path }))
    }

    pub(super) fn change_domain(&mut self, domain: Identifier, fallback: Option<Identifier>) -> ApiResult {
        self.local.change_domain(domain, fallback)?;
        Ok(Reply::Ack)
    }

    pub(super) fn read_local_host_address(&mut self) -> ApiResult {
        let domain = *self.local.domain()
            .ok_or(ErrorCode::AddressNotAvailable)?;
        let host = *self.local.host()
            .ok_or(ErrorCode::AddressNotAvailable)?;
        Ok(Reply::Respond(ApiResponse::LocalHostAddress {
            domain,
            host,
            fallback: self.local.fallback().copied(),
        }))
    }

    pub(super) fn update_rendezvous_address(&mut self, path: AddressPath) -> ApiResult {
        if path.is_empty() {
            return Err(ErrorCode::InvalidArgument);
        }
        info!("rendezvous address is now {}", path);
        self.local.set_rendezvous(path);
        Ok(Reply::Ack)
    }

    pub(super) fn read_rendezvous_address(&mut self) -> ApiResult {
        Ok(Reply::Respond(ApiResponse::RendezvousAddress { path: self.local.rendezvous().cloned() }))
    }

    pub(super) fn is_dual_stack_router(&mut self) -> ApiResult {
        Ok(Reply::Respond(ApiResponse::DualStackRouter { is_router: self.local.is_dual_stack_router() }))
    }
}

fn service_intent(path: &AddressPath) -> Result<Identifier, ErrorCode> {
    match path.intent() {
        Some(sid) if sid.kind() == IdentifierKind::Service => Ok(*sid),
        _ => Err(ErrorCode::AddressNotAvailable),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use rstest::rstest;
    use crate::api::request::ApiRequest;
    use crate::api::ApiCall;
    use crate::engine::testing::*;
    use crate::test_util::{test_config, test_host_address, test_identifier, test_path, TrackingSink};

    fn request(engine: &mut TransportEngine, sink: &TrackingSink, request: ApiRequest) -> ApiResponse {
        engine.on_application(port(1), request, Instant::now());
        let mut responses = sink.responses();
        assert_eq!(responses.len(), 1);
        responses.remove(0).1
    }

    fn socket(kind: SocketKind) -> (TransportEngine, Arc<TrackingSink>) {
        let (mut engine, sink) = engine(1);
        open(&mut engine, &sink, port(1), kind, Instant::now());
        (engine, sink)
    }

    #[rstest]
    #[case::stream(SocketKind::Stream, 0x0e)]
    #[case::datagram(SocketKind::Datagram, 0x0e)]
    #[case::raw(SocketKind::Raw, 0x3b)]
    #[case::chunk(SocketKind::Chunk, 0x0f)]
    fn test_default_options(#[case] kind: SocketKind, #[case] next_protocol: u32) {
        let (mut engine, sink) = socket(kind);
        assert_eq!(request(&mut engine, &sink, ApiRequest::GetOption { option: SocketOption::HopLimit }),
                   ApiResponse::OptionValue { option: SocketOption::HopLimit, value: 250 });
        assert_eq!(request(&mut engine, &sink, ApiRequest::GetOption { option: SocketOption::NextProtocol }),
                   ApiResponse::OptionValue { option: SocketOption::NextProtocol, value: next_protocol });
    }

    #[rstest]
    #[case::hop_limit(SocketOption::HopLimit, 17, true)]
    #[case::hop_limit_zero(SocketOption::HopLimit, 0, false)]
    #[case::hop_limit_too_big(SocketOption::HopLimit, 256, false)]
    #[case::next_protocol(SocketOption::NextProtocol, 0x90, true)]
    #[case::next_protocol_too_big(SocketOption::NextProtocol, 0x100, false)]
    fn test_set_option(#[case] option: SocketOption, #[case] value: u32, #[case] valid: bool) {
        let (mut engine, sink) = socket(SocketKind::Raw);

        let response = request(&mut engine, &sink, ApiRequest::SetOption { option, value });
        if valid {
            assert_eq!(response, ApiResponse::Ack { call: ApiCall::SetOption });
            assert_eq!(request(&mut engine, &sink, ApiRequest::GetOption { option }), ApiResponse::OptionValue { option, value });
        }
        else {
            assert_eq!(response, ApiResponse::Error { call: ApiCall::SetOption, code: ErrorCode::InvalidArgument });
        }
    }

    #[test]
    fn test_hop_limit_is_used_for_sending() {
        let (mut engine, sink) = socket(SocketKind::Datagram);
        request(&mut engine, &sink, ApiRequest::SetOption { option: SocketOption::HopLimit, value: 3 });

        engine.on_application(port(1), ApiRequest::SendTo { dst: test_path(2, IdentifierKind::Service, 2), payload: Bytes::from_static(b"x") }, Instant::now());
        assert_eq!(sink.network_packets()[0].hop_limit, 3);
    }

    #[rstest]
    #[case::full(test_path(1, IdentifierKind::Service, 7), true)]
    #[case::service_only(AddressPath::from_nodes(vec![test_identifier(IdentifierKind::Service, 7)]), false)]
    fn test_bind(#[case] path: AddressPath, #[case] full_src_path: bool) {
        let (mut engine, sink) = socket(SocketKind::Datagram);

        assert_eq!(request(&mut engine, &sink, ApiRequest::Bind { path }), ApiResponse::Ack { call: ApiCall::Bind });
        assert_eq!(engine.registry().port_for_identifier(&test_identifier(IdentifierKind::Service, 7)), Some(port(1)));
        assert_eq!(engine.registry().get(port(1)).unwrap().full_src_path, full_src_path);

        // the name always is the full path
        assert_eq!(request(&mut engine, &sink, ApiRequest::GetSockName), ApiResponse::SockName { path: test_path(1, IdentifierKind::Service, 7) });
        assert!(engine.registry().get(port(1)).unwrap().full_src_path);
    }

    #[rstest]
    #[case::empty(AddressPath::default())]
    #[case::host(test_host_address(1))]
    #[case::content(test_path(1, IdentifierKind::Content, 1))]
    fn test_bind_invalid(#[case] path: AddressPath) {
        let (mut engine, sink) = socket(SocketKind::Datagram);
        assert_eq!(request(&mut engine, &sink, ApiRequest::Bind { path }), ApiResponse::Error { call: ApiCall::Bind, code: ErrorCode::AddressNotAvailable });
        assert_eq!(request(&mut engine, &sink, ApiRequest::GetSockName), ApiResponse::Error { call: ApiCall::GetSockName, code: ErrorCode::AddressNotAvailable });
    }

    #[test]
    fn test_rebind_releases_previous_identifier() {
        let (mut engine, sink) = socket(SocketKind::Datagram);
        request(&mut engine, &sink, ApiRequest::Bind { path: test_path(1, IdentifierKind::Service, 7) });
        request(&mut engine, &sink, ApiRequest::Bind { path: test_path(1, IdentifierKind::Service, 8) });

        assert_eq!(engine.registry().port_for_identifier(&test_identifier(IdentifierKind::Service, 7)), None);
        assert_eq!(engine.registry().port_for_identifier(&test_identifier(IdentifierKind::Service, 8)), Some(port(1)));
    }

    #[test]
    fn test_peer_name_requires_connection() {
        let (mut engine, sink) = socket(SocketKind::Stream);
        assert_eq!(request(&mut engine, &sink, ApiRequest::GetPeerName), ApiResponse::Error { call: ApiCall::GetPeerName, code: ErrorCode::NotConnected });

        engine.on_application(port(1), ApiRequest::Connect { dst: test_path(2, IdentifierKind::Service, 2) }, Instant::now());
        assert_eq!(request(&mut engine, &sink, ApiRequest::GetPeerName), ApiResponse::Error { call: ApiCall::GetPeerName, code: ErrorCode::NotConnected });
    }

    #[test]
    fn test_close_unconnected_stops_handshake() {
        let now = Instant::now();
        let (mut engine, sink) = socket(SocketKind::Stream);
        engine.on_application(port(1), ApiRequest::Connect { dst: test_path(2, IdentifierKind::Service, 2) }, now);
        sink.network_packets();

        assert_eq!(request(&mut engine, &sink, ApiRequest::Close), ApiResponse::Ack { call: ApiCall::Close });
        engine.on_timer(now + Duration::from_secs(1));
        sink.assert_nothing_sent();
        assert!(engine.registry().contains(port(1)));
    }

    #[test]
    fn test_local_host_address() {
        let (mut engine, sink) = socket(SocketKind::Datagram);
        assert_eq!(request(&mut engine, &sink, ApiRequest::ReadLocalHostAddress), ApiResponse::LocalHostAddress {
            domain: test_identifier(IdentifierKind::Domain, 1),
            host: test_identifier(IdentifierKind::Host, 1),
            fallback: None,
        });

        let fallback = test_identifier(IdentifierKind::Ipv4Fallback, 4);
        let domain = test_identifier(IdentifierKind::Domain, 5);
        assert_eq!(request(&mut engine, &sink, ApiRequest::ChangeDomain { domain, fallback: Some(fallback) }), ApiResponse::Ack { call: ApiCall::ChangeDomain });
        assert_eq!(request(&mut engine, &sink, ApiRequest::ReadLocalHostAddress), ApiResponse::LocalHostAddress {
            domain,
            host: test_identifier(IdentifierKind::Host, 1),
            fallback: Some(fallback),
        });

        assert_eq!(request(&mut engine, &sink, ApiRequest::ChangeDomain { domain: test_identifier(IdentifierKind::Host, 5), fallback: None }),
                   ApiResponse::Error { call: ApiCall::ChangeDomain, code: ErrorCode::InvalidArgument });
    }

    #[test]
    fn test_rendezvous_address() {
        let (mut engine, sink) = socket(SocketKind::Datagram);
        assert_eq!(request(&mut engine, &sink, ApiRequest::ReadRendezvousAddress), ApiResponse::RendezvousAddress { path: None });

        let rendezvous = test_path(3, IdentifierKind::Service, 1);
        assert_eq!(request(&mut engine, &sink, ApiRequest::UpdateRendezvousAddress { path: rendezvous.clone() }), ApiResponse::Ack { call: ApiCall::UpdateRendezvousAddress });
        assert_eq!(request(&mut engine, &sink, ApiRequest::ReadRendezvousAddress), ApiResponse::RendezvousAddress { path: Some(rendezvous) });

        assert_eq!(request(&mut engine, &sink, ApiRequest::UpdateRendezvousAddress { path: AddressPath::default() }),
                   ApiResponse::Error { call: ApiCall::UpdateRendezvousAddress, code: ErrorCode::InvalidArgument });
    }

    #[rstest]
    #[case::router(true)]
    #[case::no_router(false)]
    fn test_dual_stack_router(#[case] is_router: bool) {
        let mut config = test_config(1);
        config.is_dual_stack_router = is_router;
        let sink = Arc::new(TrackingSink::default());
        let mut engine = TransportEngine::new(Arc::new(config), sink.clone()).unwrap();
        open(&mut engine, &sink, port(1), SocketKind::Datagram, Instant::now());

        assert_eq!(request(&mut engine, &sink, ApiRequest::IsDualStackRouter), ApiResponse::DualStackRouter { is_router });
    }

    #[test]
    fn test_reopen_discards_state() {
        let (mut engine, sink) = socket(SocketKind::Datagram);
        request(&mut engine, &sink, ApiRequest::Bind { path: test_path(1, IdentifierKind::Service, 7) });

        assert_eq!(request(&mut engine, &sink, ApiRequest::OpenSocket { kind: SocketKind::Stream }), ApiResponse::Ack { call: ApiCall::OpenSocket });
        assert_eq!(engine.registry().port_for_identifier(&test_identifier(IdentifierKind::Service, 7)), None);
        assert_eq!(engine.registry().get(port(1)).unwrap().kind, SocketKind::Stream);
    }
}
