use std::str::FromStr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, span, trace, warn, Level};
use crate::api::request::ApiRequest;
use crate::api::response::ApiResponse;
use crate::api::{ApiCall, ErrorCode};
use crate::config::TransportConfig;
use crate::engine::mobility::LocalNode;
use crate::engine::timer::Alarm;
use crate::registry::connection_registry::ConnectionRegistry;
use crate::registry::local_port::LocalPort;
use crate::sink::PacketSink;
use crate::wire::address_path::AddressPath;
use crate::wire::identifier::Identifier;
use crate::wire::packet::{NetworkPacket, PacketBody};
use crate::wire::transport_header::TransportKind;

mod api_handlers;
mod content;
mod datagram;
mod handshake;
pub mod mobility;
mod reliability;
pub mod timer;


/// What a successful application call sends back
enum Reply {
    Ack,
    Respond(ApiResponse),
    /// the result is delivered later as an event, or not at all
    Nothing,
}

type ApiResult = Result<Reply, ErrorCode>;

/// The transport engine processes one input at a time to completion: an application request,
///  a packet from the network or the content cache, a topology update, or a timer firing. It
///  never blocks; everything that waits is represented as timer state in a connection record.
///
/// Callers are expected to call [TransportEngine::on_timer] when [TransportEngine::next_wakeup]
///  is reached.
pub struct TransportEngine {
    config: Arc<TransportConfig>,
    registry: ConnectionRegistry,
    local: LocalNode,
    sink: Arc<dyn PacketSink>,
    alarm: Alarm,
}

impl TransportEngine {
    pub fn new(config: Arc<TransportConfig>, sink: Arc<dyn PacketSink>) -> anyhow::Result<TransportEngine> {
        config.validate()?;

        info!("initializing transport engine for {}", config.local_address);
        Ok(TransportEngine {
            local: LocalNode::new(&config),
            config,
            registry: ConnectionRegistry::default(),
            sink,
            alarm: Alarm::default(),
        })
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        self.alarm.at()
    }

    pub fn local_address(&self) -> &AddressPath {
        self.local.address()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn on_application(&mut self, port: LocalPort, request: ApiRequest, now: Instant) {
        let call = request.call();
        let span = span!(Level::TRACE, "api_request", %port, ?call);
        let _entered = span.enter();

        trace!("received {:?}", request);

        if call != ApiCall::OpenSocket {
            let code = match self.registry.get(port) {
                None => Some(ErrorCode::NoSuchSocket),
                Some(record) if record.is_closing() && call != ApiCall::Close => Some(ErrorCode::SocketClosing),
                _ => None,
            };
            if let Some(code) = code {
                debug!("{:?} for unusable socket {:?}: {:?}", call, port, code);
                // sends are never answered
                if call != ApiCall::Send {
                    self.sink.to_application(port, ApiResponse::Error { call, code });
                }
                return;
            }
        }

        let result = match request {
            ApiRequest::OpenSocket { kind } => self.open_socket(port, kind),
            ApiRequest::SetOption { option, value } => self.set_option(port, option, value),
            ApiRequest::GetOption { option } => self.get_option(port, option),
            ApiRequest::Bind { path } => self.bind(port, path),
            ApiRequest::BindPush { path } => self.bind_push(port, path),
            ApiRequest::Connect { dst } => self.connect(port, dst, now),
            ApiRequest::Accept { listener } => self.accept(port, listener),
            ApiRequest::Close => self.close(port, now),
            ApiRequest::Send { payload } => self.send(port, payload, now),
            ApiRequest::SendTo { dst, payload } => self.send_to(port, dst, payload),
            ApiRequest::RequestChunk { paths } => self.request_chunks(port, paths, now),
            ApiRequest::GetChunkStatus { paths } => self.get_chunk_status(port, &paths),
            ApiRequest::ReadChunk { path } => self.read_chunk(port, &path),
            ApiRequest::RemoveChunk { context_id, cid } => self.remove_chunk(port, context_id, cid),
            ApiRequest::PutChunk { params, payload } => self.put_chunk(port, params, payload),
            ApiRequest::PushChunkTo { dst, params, payload } => self.push_chunk_to(port, dst, params, payload),
            ApiRequest::GetPeerName => self.get_peer_name(port),
            ApiRequest::GetSockName => self.get_sock_name(port),
            ApiRequest::ChangeDomain { domain, fallback } => self.change_domain(domain, fallback),
            ApiRequest::ReadLocalHostAddress => self.read_local_host_address(),
            ApiRequest::UpdateRendezvousAddress { path } => self.update_rendezvous_address(path),
            ApiRequest::ReadRendezvousAddress => self.read_rendezvous_address(),
            ApiRequest::IsDualStackRouter => self.is_dual_stack_router(),
        };

        match result {
            Ok(Reply::Ack) => self.sink.to_application(port, ApiResponse::Ack { call }),
            Ok(Reply::Respond(response)) => self.sink.to_application(port, response),
            Ok(Reply::Nothing) => {}
            Err(code) => {
                debug!("{:?} failed for {:?}: {:?}", call, port, code);
                self.sink.to_application(port, ApiResponse::Error { call, code });
            }
        }

        self.schedule_for(port);
    }

    pub fn on_network(&mut self, packet: NetworkPacket, now: Instant) {
        let span = span!(Level::TRACE, "network_packet");
        let _entered = span.enter();

        trace!("received {:?}", packet);

        let touched = if let Some(kind) = packet.transport_header().map(|h| h.kind) {
            match kind {
                TransportKind::Syn => self.on_syn(packet),
                TransportKind::SynAck => self.on_synack(packet),
                TransportKind::Data => self.on_data(packet),
                TransportKind::Ack => self.on_ack(packet, now),
                TransportKind::Fin => self.on_fin(packet),
                TransportKind::Datagram => self.on_datagram(packet),
            }
        }
        else if let PacketBody::Content { .. } = &packet.body {
            self.on_content(packet)
        }
        else {
            self.on_raw(packet)
        };

        if let Some(port) = touched {
            self.schedule_for(port);
        }
    }

    /// Packets from the local content cache: responses to chunk requests, and pushed chunks
    pub fn on_cache(&mut self, packet: NetworkPacket) {
        let span = span!(Level::TRACE, "cache_packet");
        let _entered = span.enter();

        trace!("received {:?}", packet);

        if let PacketBody::Content { .. } = &packet.body {
            if let Some(port) = self.on_content(packet) {
                self.schedule_for(port);
            }
        }
        else {
            warn!("received non-content packet {:?} from content cache, dropping", packet);
        }
    }

    /// The payload is the textual path of the network this node is now attached to
    pub fn on_topology_update(&mut self, payload: &[u8]) {
        let route = std::str::from_utf8(payload)
            .map_err(anyhow::Error::from)
            .and_then(AddressPath::from_str);

        match route {
            Ok(route) => {
                if let Err(e) = self.local.relocate(&route) {
                    warn!("ignoring topology update {}: {}", route, e);
                }
            }
            Err(e) => {
                warn!("received unparsable topology update: {}", e);
            }
        }
    }

    /// Binds the socket to a fresh service identifier if it is not bound yet, returning the
    ///  bound identifier
    fn ensure_bound(&mut self, port: LocalPort) -> Result<Identifier, ErrorCode> {
        let record = self.registry.get_mut(port)
            .ok_or(ErrorCode::NoSuchSocket)?;
        if let Some(bound) = record.bound_identifier() {
            return Ok(bound);
        }

        let sid = Identifier::random_service();
        record.src_path = Some(self.local.full_path(sid));
        record.full_src_path = true;
        record.initialized = true;
        debug!("implicitly bound {:?} to {}", port, sid);

        self.registry.register_identifier(sid, port);
        Ok(sid)
    }

    fn schedule_for(&mut self, port: LocalPort) {
        if let Some(expiry) = self.registry.get(port).and_then(|r| r.next_expiry()) {
            self.alarm.request(expiry);
        }
    }
}
