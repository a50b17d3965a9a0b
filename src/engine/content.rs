use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use crate::api::response::ApiResponse;
use crate::api::{ApiCall, CacheParams, ErrorCode};
use crate::config::TransportConfig;
use crate::engine::mobility::LocalNode;
use crate::engine::{ApiResult, Reply, TransportEngine};
use crate::registry::connection_record::{ChunkStatus, ConnectionRecord, ContentRequest, SocketKind};
use crate::registry::connection_registry::ConnectionRegistry;
use crate::registry::identifier_pair::IdentifierPair;
use crate::registry::local_port::LocalPort;
use crate::sink::PacketSink;
use crate::wire::address_path::AddressPath;
use crate::wire::content_header::{ContentHeader, ContentOpcode};
use crate::wire::identifier::{Identifier, IdentifierKind};
use crate::wire::packet::{NetworkPacket, PacketBody};


fn content_header(opcode: ContentOpcode, params: &CacheParams, chunk_length: usize) -> ContentHeader {
    ContentHeader {
        opcode,
        context_id: params.context_id,
        ttl: params.ttl,
        cache_size: params.cache_size,
        cache_policy: params.cache_policy,
        chunk_length: chunk_length as u32,
    }
}

fn content_identifier(path: &AddressPath) -> Result<Identifier, ErrorCode> {
    match path.intent() {
        Some(cid) if cid.kind() == IdentifierKind::Content => Ok(*cid),
        _ => Err(ErrorCode::AddressNotAvailable),
    }
}

fn chunk_socket(registry: &mut ConnectionRegistry, port: LocalPort) -> Result<&mut ConnectionRecord, ErrorCode> {
    let record = registry.get_mut(port)
        .ok_or(ErrorCode::NoSuchSocket)?;
    if record.kind != SocketKind::Chunk {
        return Err(ErrorCode::WrongSocketKind);
    }
    Ok(record)
}

impl TransportEngine {
    /// Sends one request per content path. Outcomes are reported per identifier through
    ///  [ApiResponse::ChunkArrived] events.
    pub(super) fn request_chunks(&mut self, port: LocalPort, paths: Vec<AddressPath>, now: Instant) -> ApiResult {
        chunk_socket(&mut self.registry, port)?;
        if paths.is_empty() {
            return Err(ErrorCode::InvalidArgument);
        }
        let cids = paths.iter()
            .map(content_identifier)
            .collect::<Result<Vec<_>, _>>()?;

        let local_id = self.ensure_bound(port)?;
        let record = chunk_socket(&mut self.registry, port)?;
        let src = self.local.source_path(record)
            .ok_or(ErrorCode::AddressNotAvailable)?;

        let mut requested = Vec::new();
        for (path, cid) in paths.into_iter().zip(cids) {
            match record.chunks.get(&cid) {
                Some(existing) if existing.status == ChunkStatus::Waiting => {
                    trace!("{:?} is already requested on {:?}", cid, port);
                    continue;
                }
                Some(_) => {
                    debug!("re-requesting {:?} on {:?}", cid, port);
                }
                None if record.chunks.len() >= self.config.max_pending_chunks => {
                    warn!("{:?} tracks the maximum of {} chunks, rejecting request for {:?}", port, self.config.max_pending_chunks, cid);
                    self.sink.to_application(port, ApiResponse::ChunkArrived { cid, status: ChunkStatus::Failed });
                    continue;
                }
                None => {}
            }

            let header = ContentHeader::new(ContentOpcode::Request, port.to_raw() as u32, 0);
            let request = NetworkPacket::content(record.hop_limit, src.clone(), path, header, Bytes::new());
            record.chunks.insert(cid, ContentRequest {
                status: ChunkStatus::Waiting,
                request: request.clone(),
                expiry: Some(now + self.config.ack_delay),
                tries: 1,
                response: None,
                read_requested: false,
            });

            debug!("requesting {:?} on {:?}", cid, port);
            self.sink.to_network(request);
            requested.push(cid);
        }

        for cid in requested {
            self.registry.register_pair(IdentifierPair::new(local_id, cid), port);
        }
        Ok(Reply::Nothing)
    }

    pub(super) fn on_content(&mut self, packet: NetworkPacket) -> Option<LocalPort> {
        let PacketBody::Content { header, .. } = &packet.body else {
            return None;
        };
        match header.opcode {
            ContentOpcode::Response => self.on_chunk_response(packet),
            ContentOpcode::Push => self.on_chunk_push(packet),
            opcode => {
                debug!("{:?} content packet is not for the transport layer, dropping", opcode);
                None
            }
        }
    }

    fn on_chunk_response(&mut self, packet: NetworkPacket) -> Option<LocalPort> {
        let (Some(&local_id), Some(&cid)) = (packet.dst.intent(), packet.src.intent()) else {
            debug!("chunk response without intent, dropping");
            return None;
        };
        let Some(port) = self.registry.port_for_pair(&IdentifierPair::new(local_id, cid)) else {
            debug!("unrequested chunk {:?} for {:?}, dropping", cid, local_id);
            return None;
        };
        let record = self.registry.get_mut(port)?;
        let Some(chunk) = record.chunks.get_mut(&cid) else {
            debug!("chunk {:?} is not tracked by {:?}, dropping", cid, port);
            return None;
        };
        if chunk.status != ChunkStatus::Waiting {
            trace!("duplicate response for {:?} on {:?}, ignoring", cid, port);
            return None;
        }

        let payload = packet.body.payload().clone();
        let status = if cid.verifies(&payload) {
            ChunkStatus::Ready
        }
        else {
            warn!("payload of {:?} from {} does not match its identifier", cid, packet.src);
            ChunkStatus::InvalidHash
        };
        chunk.status = status;
        chunk.expiry = None;

        self.sink.to_application(port, ApiResponse::ChunkArrived { cid, status });

        if chunk.read_requested {
            record.chunks.remove(&cid);
            self.registry.unregister_pair(&IdentifierPair::new(local_id, cid), port);
            self.sink.to_application(port, ApiResponse::ChunkRead { cid, status, payload });
        }
        else {
            chunk.response = Some(payload);
        }
        Some(port)
    }

    fn on_chunk_push(&mut self, packet: NetworkPacket) -> Option<LocalPort> {
        let (Some(&push_id), Some(&cid)) = (packet.dst.intent(), packet.src.intent()) else {
            debug!("pushed chunk without intent, dropping");
            return None;
        };
        let Some(port) = self.registry.push_port_for(&push_id) else {
            debug!("no socket bound for pushes to {:?}, dropping", push_id);
            return None;
        };
        if self.registry.get(port)?.is_closing() {
            debug!("push for closed socket {:?}, dropping", port);
            return None;
        }

        let payload = packet.body.payload().clone();
        let status = if cid.verifies(&payload) {
            ChunkStatus::Ready
        }
        else {
            warn!("pushed payload of {:?} from {} does not match its identifier", cid, packet.src);
            ChunkStatus::InvalidHash
        };

        self.sink.to_application(port, ApiResponse::PushedChunk { cid, status, payload });
        Some(port)
    }

    pub(super) fn get_chunk_status(&mut self, port: LocalPort, paths: &[AddressPath]) -> ApiResult {
        let record = chunk_socket(&mut self.registry, port)?;

        let mut statuses = Vec::with_capacity(paths.len());
        for path in paths {
            let cid = content_identifier(path)?;
            let status = record.chunks.get(&cid)
                .map(|c| c.status)
                .unwrap_or(ChunkStatus::Failed);
            statuses.push((cid, status));
        }
        Ok(Reply::Respond(ApiResponse::ChunkStatuses { statuses }))
    }

    /// Returns a chunk's payload once it arrived, releasing the chunk. Reading a chunk that is
    ///  still on its way delivers the payload as soon as it arrives.
    pub(super) fn read_chunk(&mut self, port: LocalPort, path: &AddressPath) -> ApiResult {
        let cid = content_identifier(path)?;
        let record = chunk_socket(&mut self.registry, port)?;
        let chunk = record.chunks.get_mut(&cid)
            .ok_or(ErrorCode::NoSuchChunk)?;

        if chunk.status == ChunkStatus::Waiting {
            chunk.read_requested = true;
            return Ok(Reply::Nothing);
        }

        let chunk = self.forget_chunk(port, cid)
            .ok_or(ErrorCode::NoSuchChunk)?;
        match chunk.status {
            ChunkStatus::Failed => Err(ErrorCode::ChunkFailed),
            status => Ok(Reply::Respond(ApiResponse::ChunkRead {
                cid,
                status,
                payload: chunk.response.unwrap_or_default(),
            })),
        }
    }

    fn forget_chunk(&mut self, port: LocalPort, cid: Identifier) -> Option<ContentRequest> {
        let record = self.registry.get_mut(port)?;
        let chunk = record.chunks.remove(&cid)?;
        if let Some(local_id) = record.bound_identifier() {
            self.registry.unregister_pair(&IdentifierPair::new(local_id, cid), port);
        }
        Some(chunk)
    }

    /// Stores a chunk in the local content cache, returning its content identifier
    pub(super) fn put_chunk(&mut self, port: LocalPort, params: CacheParams, payload: Bytes) -> ApiResult {
        let hop_limit = chunk_socket(&mut self.registry, port)?.hop_limit;
        if payload.len() > u32::MAX as usize {
            return Err(ErrorCode::InvalidArgument);
        }

        let cid = Identifier::content_for(&payload);
        let path = self.local.full_path(cid);
        let header = content_header(ContentOpcode::LocalPut, &params, payload.len());

        debug!("storing {:?} ({} bytes) in the content cache", cid, payload.len());
        self.sink.to_cache(NetworkPacket::content(hop_limit, path.clone(), path, header, payload));
        Ok(Reply::Respond(ApiResponse::ChunkStored { cid }))
    }

    pub(super) fn remove_chunk(&mut self, port: LocalPort, context_id: u32, cid: Identifier) -> ApiResult {
        let hop_limit = chunk_socket(&mut self.registry, port)?.hop_limit;
        if cid.kind() != IdentifierKind::Content {
            return Err(ErrorCode::InvalidArgument);
        }
        self.forget_chunk(port, cid);

        let path = self.local.full_path(cid);
        let header = ContentHeader::new(ContentOpcode::LocalRemove, context_id, 0);

        debug!("removing {:?} from the content cache", cid);
        self.sink.to_cache(NetworkPacket::content(hop_limit, path.clone(), path, header, Bytes::new()));
        Ok(Reply::Respond(ApiResponse::ChunkRemoved { cid }))
    }

    /// Sends a chunk to a remote socket that bound a push path. The packet's source is the
    ///  chunk's own content path, so no binding of the sending socket is needed.
    pub(super) fn push_chunk_to(&mut self, port: LocalPort, dst: AddressPath, params: CacheParams, payload: Bytes) -> ApiResult {
        let hop_limit = chunk_socket(&mut self.registry, port)?.hop_limit;
        if dst.intent().is_none() {
            return Err(ErrorCode::AddressNotAvailable);
        }
        if payload.len() > u32::MAX as usize {
            return Err(ErrorCode::InvalidArgument);
        }

        let cid = Identifier::content_for(&payload);
        let header = content_header(ContentOpcode::Push, &params, payload.len());

        debug!("pushing {:?} to {}", cid, dst);
        self.sink.to_network(NetworkPacket::content(hop_limit, self.local.full_path(cid), dst, header, payload));
        Ok(Reply::Respond(ApiResponse::ChunkPushed { cid }))
    }
}

/// Retransmits due chunk requests with the current source path, failing those that used up
///  their retry budget. Failed chunks with a pending read are released, and their flows are
///  returned for unregistering.
pub fn on_chunk_timeouts(record: &mut ConnectionRecord, local: &LocalNode, sink: &dyn PacketSink, config: &TransportConfig, now: Instant) -> Vec<IdentifierPair> {
    let mut released = Vec::new();

    let mut due = record.chunks.iter()
        .filter(|(_, c)| c.status == ChunkStatus::Waiting && c.expiry.is_some_and(|e| e <= now))
        .map(|(cid, _)| *cid)
        .collect::<Vec<_>>();
    if due.is_empty() {
        return released;
    }
    due.sort();

    let src = local.source_path(record);

    for cid in due {
        let Some(chunk) = record.chunks.get_mut(&cid) else {
            continue;
        };

        if chunk.tries >= config.max_chunk_tries {
            warn!("request for {:?} on {:?} failed after {} tries", cid, record.port, chunk.tries);
            chunk.status = ChunkStatus::Failed;
            chunk.expiry = None;
            sink.to_application(record.port, ApiResponse::ChunkArrived { cid, status: ChunkStatus::Failed });

            if chunk.read_requested {
                record.chunks.remove(&cid);
                if let Some(local_id) = record.bound_identifier() {
                    released.push(IdentifierPair::new(local_id, cid));
                }
                sink.to_application(record.port, ApiResponse::Error { call: ApiCall::ReadChunk, code: ErrorCode::ChunkFailed });
            }
            continue;
        }

        if let Some(src) = &src {
            chunk.request.src = src.clone();
        }
        chunk.tries += 1;
        chunk.expiry = Some(now + config.ack_delay);
        trace!("retransmitting request for {:?} (try #{})", cid, chunk.tries);
        sink.to_network(chunk.request.clone());
    }
    released
}
