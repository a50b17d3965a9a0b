use std::collections::VecDeque;
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use crate::config::TransportConfig;
use crate::registry::identifier_pair::IdentifierPair;
use crate::registry::local_port::LocalPort;
use crate::registry::send_window::SendWindow;
use crate::wire::address_path::AddressPath;
use crate::wire::identifier::Identifier;
use crate::wire::packet::NetworkPacket;
use crate::wire::packet_header::NextProtocol;


#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SocketKind {
    Stream = 0,
    Datagram = 1,
    Raw = 2,
    Chunk = 3,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum HandshakeState {
    Idle,
    /// the connection request is kept verbatim for retransmission
    SynSent { request: NetworkPacket },
    Established,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimerEvent {
    HandshakeWait,
    DataAckWait,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PendingTimer {
    pub event: TimerEvent,
    pub expiry: Instant,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ChunkStatus {
    Waiting = 1,
    Ready = 2,
    InvalidHash = 4,
    Failed = 8,
}

/// Tracking state for one requested content identifier
#[derive(Debug)]
pub struct ContentRequest {
    pub status: ChunkStatus,
    pub request: NetworkPacket,
    /// retry deadline, only set while waiting
    pub expiry: Option<Instant>,
    pub tries: u32,
    /// the response payload, held until the application reads it
    pub response: Option<Bytes>,
    pub read_requested: bool,
}

/// An inbound connection request that was acknowledged but not yet accepted
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PendingConnection {
    pub pair: IdentifierPair,
    /// the path the peer sent the request from
    pub peer_path: AddressPath,
    pub hop_limit: u8,
}

/// Per-socket state. A record exists from socket-open until the teardown linger delay after
///  close has elapsed.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub port: LocalPort,
    pub kind: SocketKind,

    pub src_path: Option<AddressPath>,
    pub dst_path: Option<AddressPath>,
    /// false while the socket is bound to nothing but a service identifier
    pub full_src_path: bool,

    pub initialized: bool,
    pub connected: bool,
    /// created by accepting a pending connection rather than by connecting
    pub accepted: bool,
    pub peer_closed: bool,

    pub hop_limit: u8,
    pub next_protocol: NextProtocol,

    pub handshake: HandshakeState,
    pub window: SendWindow,
    pub expected_seq: u32,

    pub timer: Option<PendingTimer>,
    pub connect_tries: u32,
    pub retransmit_tries: u32,
    pub teardown_at: Option<Instant>,

    pub chunks: FxHashMap<Identifier, ContentRequest>,
    pub accept_queue: VecDeque<PendingConnection>,
}

impl ConnectionRecord {
    pub fn new(port: LocalPort, kind: SocketKind, config: &TransportConfig) -> ConnectionRecord {
        ConnectionRecord {
            port,
            kind,
            src_path: None,
            dst_path: None,
            full_src_path: false,
            initialized: false,
            connected: false,
            accepted: false,
            peer_closed: false,
            hop_limit: config.default_hop_limit,
            next_protocol: match kind {
                SocketKind::Chunk => NextProtocol::CONTENT,
                SocketKind::Raw => NextProtocol::NONE,
                SocketKind::Stream | SocketKind::Datagram => NextProtocol::TRANSPORT,
            },
            handshake: HandshakeState::Idle,
            window: SendWindow::new(config.window_size, config.max_send_backlog),
            expected_seq: 0,
            timer: None,
            connect_tries: 0,
            retransmit_tries: 0,
            teardown_at: None,
            chunks: FxHashMap::default(),
            accept_queue: VecDeque::new(),
        }
    }

    pub fn is_closing(&self) -> bool {
        self.teardown_at.is_some()
    }

    pub fn bound_identifier(&self) -> Option<Identifier> {
        self.src_path.as_ref()
            .and_then(|p| p.intent())
            .copied()
    }

    pub fn peer_identifier(&self) -> Option<Identifier> {
        self.dst_path.as_ref()
            .and_then(|p| p.intent())
            .copied()
    }

    /// the pair of local and peer identifier for connected sockets
    pub fn identifier_pair(&self) -> Option<IdentifierPair> {
        Some(IdentifierPair::new(self.bound_identifier()?, self.peer_identifier()?))
    }

    /// the earliest point in time when this record needs attention from the timer sweep
    pub fn next_expiry(&self) -> Option<Instant> {
        let chunk_expiries = self.chunks.values()
            .filter_map(|c| c.expiry);

        self.timer.iter()
            .map(|t| t.expiry)
            .chain(self.teardown_at)
            .chain(chunk_expiries)
            .min()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::test_util::{test_host_address, test_path};
    use crate::wire::content_header::{ContentHeader, ContentOpcode};
    use crate::wire::identifier::IdentifierKind;

    fn record() -> ConnectionRecord {
        ConnectionRecord::new(LocalPort::from_raw(5), SocketKind::Stream, &TransportConfig::new(test_host_address(1)))
    }

    #[test]
    fn test_new() {
        let record = record();
        assert_eq!(record.hop_limit, 250);
        assert_eq!(record.next_protocol, NextProtocol::TRANSPORT);
        assert_eq!(record.window.window_size(), 100);
        assert!(!record.is_closing());
        assert_eq!(record.next_expiry(), None);
        assert_eq!(record.identifier_pair(), None);
        assert!(format!("{:?}", record).contains("next_seq: 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_expiry() {
        let now = Instant::now();
        let mut record = record();

        record.teardown_at = Some(now + Duration::from_secs(10));
        assert_eq!(record.next_expiry(), Some(now + Duration::from_secs(10)));

        record.chunks.insert(Identifier::content_for(b"abc"), ContentRequest {
            status: ChunkStatus::Waiting,
            request: NetworkPacket::content(
                5,
                test_path(1, IdentifierKind::Service, 1),
                test_path(2, IdentifierKind::Content, 1),
                ContentHeader::new(ContentOpcode::Request, 0, 0),
                Bytes::new(),
            ),
            expiry: Some(now + Duration::from_secs(3)),
            tries: 1,
            response: None,
            read_requested: false,
        });
        assert_eq!(record.next_expiry(), Some(now + Duration::from_secs(3)));

        record.timer = Some(PendingTimer { event: TimerEvent::DataAckWait, expiry: now + Duration::from_secs(1) });
        assert_eq!(record.next_expiry(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_identifier_pair() {
        let mut record = record();
        record.src_path = Some(test_path(1, IdentifierKind::Service, 1));
        assert_eq!(record.identifier_pair(), None);

        record.dst_path = Some(test_path(2, IdentifierKind::Service, 2));
        let pair = record.identifier_pair().unwrap();
        assert_eq!(pair.src.kind(), IdentifierKind::Service);
        assert_eq!(pair.src, record.bound_identifier().unwrap());
        assert_eq!(pair.dst, record.peer_identifier().unwrap());
    }
}
