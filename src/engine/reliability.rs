use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use crate::api::response::ApiResponse;
use crate::config::TransportConfig;
use crate::engine::mobility::{update_peer_path, LocalNode};
use crate::engine::{ApiResult, Reply, TransportEngine};
use crate::registry::connection_record::{ConnectionRecord, PendingTimer, SocketKind, TimerEvent};
use crate::registry::identifier_pair::IdentifierPair;
use crate::registry::local_port::LocalPort;
use crate::registry::send_window::AckOutcome;
use crate::sink::PacketSink;
use crate::wire::packet::NetworkPacket;
use crate::wire::transport_header::{TransportHeader, TransportKind};


impl TransportEngine {
    /// Sends on a connected stream. Problems are logged rather than reported, the caller gets
    ///  no response either way.
    pub(super) fn send(&mut self, port: LocalPort, payload: Bytes, now: Instant) -> ApiResult {
        let Some(record) = self.registry.get_mut(port) else {
            return Ok(Reply::Nothing);
        };
        if record.kind != SocketKind::Stream {
            warn!("send on {:?} socket {:?}, dropping", record.kind, port);
            return Ok(Reply::Nothing);
        }
        if !record.connected {
            warn!("send on unconnected socket {:?}, dropping", port);
            return Ok(Reply::Nothing);
        }
        if payload.len() > TransportHeader::MAX_PAYLOAD_LEN {
            warn!("message of {} bytes on {:?} exceeds the maximum of {}, dropping", payload.len(), port, TransportHeader::MAX_PAYLOAD_LEN);
            return Ok(Reply::Nothing);
        }

        if record.window.is_full() || record.window.backlog_len() > 0 {
            if record.window.enqueue_backlog(payload) {
                trace!("send window of {:?} is full, queued message", port);
            }
            else {
                warn!("send backlog of {:?} is full, dropping message", port);
            }
        }
        else {
            transmit_data(record, &self.local, self.sink.as_ref(), payload);
        }

        // after a reported transmission failure, sending again resumes retransmission
        if record.timer.is_none() && !record.window.is_drained() {
            arm_data_timer(record, &self.config, now);
        }
        Ok(Reply::Nothing)
    }

    /// the stream socket owning the flow a packet belongs to
    fn port_for_flow(&self, packet: &NetworkPacket) -> Option<LocalPort> {
        let (Some(&local_id), Some(&peer_id)) = (packet.dst.intent(), packet.src.intent()) else {
            debug!("transport packet without intent, dropping");
            return None;
        };
        let port = self.registry.port_for_pair(&IdentifierPair::new(local_id, peer_id));
        if port.is_none() {
            debug!("transport packet for unknown flow {} -> {}, dropping", packet.src, packet.dst);
        }
        port
    }

    pub(super) fn on_data(&mut self, packet: NetworkPacket) -> Option<LocalPort> {
        let port = self.port_for_flow(&packet)?;
        let record = self.registry.get_mut(port)?;
        if record.kind != SocketKind::Stream || !record.connected {
            debug!("data for {:?} which is not a connected stream, dropping", port);
            return None;
        }
        let seq = packet.transport_header()?.seq;

        update_peer_path(record, &packet.src);

        if seq != record.expected_seq {
            trace!("out-of-order data #{} on {:?}, expecting #{}", seq, port, record.expected_seq);
        }
        else {
            record.expected_seq = record.expected_seq.wrapping_add(1);
            if record.is_closing() {
                trace!("data #{} for closed socket {:?}, acknowledging without delivery", seq, port);
            }
            else {
                self.sink.to_application(port, ApiResponse::Received {
                    from: packet.src.clone(),
                    payload: packet.body.payload().clone(),
                });
            }
        }

        let Some(src) = self.local.source_path(record) else {
            return Some(port);
        };
        self.sink.to_network(NetworkPacket::transport(
            record.hop_limit,
            src,
            packet.src,
            TransportKind::Ack,
            record.window.next_seq(),
            record.expected_seq,
            Bytes::new(),
        ));
        Some(port)
    }

    pub(super) fn on_ack(&mut self, packet: NetworkPacket, now: Instant) -> Option<LocalPort> {
        let port = self.port_for_flow(&packet)?;
        let record = self.registry.get_mut(port)?;
        if record.kind != SocketKind::Stream || !record.connected {
            debug!("acknowledgment for {:?} which is not a connected stream, dropping", port);
            return None;
        }
        let ack = packet.transport_header()?.ack;

        update_peer_path(record, &packet.src);

        match record.window.ack(ack) {
            AckOutcome::Stale => {
                trace!("stale acknowledgment {} on {:?}, base is {}", ack, port, record.window.base());
            }
            AckOutcome::Invalid => {
                warn!("acknowledgment {} on {:?} is beyond next sequence number {}, ignoring", ack, port, record.window.next_seq());
            }
            AckOutcome::Advanced { freed } => {
                trace!("acknowledgment {} on {:?} freed {} packets", ack, port, freed);
                record.retransmit_tries = 0;

                while !record.window.is_full() {
                    let Some(payload) = record.window.pop_backlog() else {
                        break;
                    };
                    transmit_data(record, &self.local, self.sink.as_ref(), payload);
                }

                if record.window.is_drained() {
                    record.timer = None;
                }
                else {
                    arm_data_timer(record, &self.config, now);
                }
            }
        }
        Some(port)
    }

    pub(super) fn on_fin(&mut self, packet: NetworkPacket) -> Option<LocalPort> {
        let port = self.port_for_flow(&packet)?;
        let record = self.registry.get_mut(port)?;
        if record.peer_closed {
            trace!("repeated close notification for {:?}", port);
            return None;
        }

        debug!("peer {} closed its end of {:?}", packet.src, port);
        record.peer_closed = true;
        self.sink.to_application(port, ApiResponse::PeerClosed);
        Some(port)
    }
}

fn arm_data_timer(record: &mut ConnectionRecord, config: &TransportConfig, now: Instant) {
    record.retransmit_tries = 0;
    record.timer = Some(PendingTimer { event: TimerEvent::DataAckWait, expiry: now + config.ack_delay });
}

/// Puts a payload into the send window under the next sequence number and transmits it. The
///  caller checks that the window has room.
fn transmit_data(record: &mut ConnectionRecord, local: &LocalNode, sink: &dyn PacketSink, payload: Bytes) {
    let Some(dst) = record.dst_path.clone() else {
        return;
    };
    let Some(src) = local.source_path(record) else {
        return;
    };

    let packet = NetworkPacket::transport(record.hop_limit, src, dst, TransportKind::Data, record.window.next_seq(), record.expected_seq, payload);
    let seq = record.window.push(packet.clone());
    trace!("sending data #{} on {:?}", seq, record.port);
    sink.to_network(packet);
}

/// Retransmits everything in flight, or reports a transmission failure once the retry budget is
///  used up. After a failure, the buffered packets stay in the window until the application sends
///  again.
pub fn on_data_ack_timeout(record: &mut ConnectionRecord, local: &LocalNode, sink: &dyn PacketSink, config: &TransportConfig, now: Instant) {
    if record.retransmit_tries >= config.max_retransmit_tries {
        let unacknowledged = record.window.in_flight();
        warn!("giving up retransmission on {:?} after {} tries, {} packets unacknowledged", record.port, record.retransmit_tries, unacknowledged);

        record.timer = None;
        record.retransmit_tries = 0;
        sink.to_application(record.port, ApiResponse::TransmissionFailed { unacknowledged });
        return;
    }

    let src = local.source_path(record);
    let dst = record.dst_path.clone();

    let mut num_resent = 0;
    for packet in record.window.in_flight_packets() {
        let mut packet = packet.clone();
        if let Some(src) = &src {
            packet.src = src.clone();
        }
        if let Some(dst) = &dst {
            packet.dst = dst.clone();
        }
        sink.to_network(packet);
        num_resent += 1;
    }

    if num_resent == 0 {
        record.timer = None;
        return;
    }

    debug!("retransmitted {} packets on {:?}", num_resent, record.port);
    record.retransmit_tries += 1;
    record.timer = Some(PendingTimer { event: TimerEvent::DataAckWait, expiry: now + config.ack_delay });
}
