use anyhow::anyhow;
use bytes::{Buf, BufMut, Bytes};
use crate::api::{put_optional_path, try_get_optional_path, ApiCall, ErrorCode, SocketOption};
use crate::registry::connection_record::ChunkStatus;
use crate::util::buf::{put_bytes, try_get_bytes};
use crate::wire::address_path::AddressPath;
use crate::wire::identifier::Identifier;


/// Results and events sent to the application. Responses to calls carry the call they answer;
///  events (connection state changes, received data, arriving chunks) are sent unsolicited.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ApiResponse {
    Ack { call: ApiCall },
    Error { call: ApiCall, code: ErrorCode },
    OptionValue { option: SocketOption, value: u32 },

    ConnectionEstablished { peer: AddressPath },
    ConnectionFailed { peer: AddressPath },
    /// the retransmission budget for unacknowledged data ran out
    TransmissionFailed { unacknowledged: u32 },
    PeerClosed,
    Accepted { peer: AddressPath },
    Received { from: AddressPath, payload: Bytes },

    ChunkArrived { cid: Identifier, status: ChunkStatus },
    ChunkStatuses { statuses: Vec<(Identifier, ChunkStatus)> },
    ChunkRead { cid: Identifier, status: ChunkStatus, payload: Bytes },
    ChunkStored { cid: Identifier },
    ChunkRemoved { cid: Identifier },
    ChunkPushed { cid: Identifier },
    /// unsolicited content delivered to a push-bound socket
    PushedChunk { cid: Identifier, status: ChunkStatus, payload: Bytes },

    PeerName { path: AddressPath },
    SockName { path: AddressPath },
    LocalHostAddress { domain: Identifier, host: Identifier, fallback: Option<Identifier> },
    RendezvousAddress { path: Option<AddressPath> },
    DualStackRouter { is_router: bool },
}

impl ApiResponse {
    const ACK: u8 = 1;
    const ERROR: u8 = 2;
    const OPTION_VALUE: u8 = 3;
    const CONNECTION_ESTABLISHED: u8 = 4;
    const CONNECTION_FAILED: u8 = 5;
    const TRANSMISSION_FAILED: u8 = 6;
    const PEER_CLOSED: u8 = 7;
    const ACCEPTED: u8 = 8;
    const RECEIVED: u8 = 9;
    const CHUNK_ARRIVED: u8 = 10;
    const CHUNK_STATUSES: u8 = 11;
    const CHUNK_READ: u8 = 12;
    const CHUNK_STORED: u8 = 13;
    const CHUNK_REMOVED: u8 = 14;
    const CHUNK_PUSHED: u8 = 15;
    const PUSHED_CHUNK: u8 = 16;
    const PEER_NAME: u8 = 17;
    const SOCK_NAME: u8 = 18;
    const LOCAL_HOST_ADDRESS: u8 = 19;
    const RENDEZVOUS_ADDRESS: u8 = 20;
    const DUAL_STACK_ROUTER: u8 = 21;

    fn id(&self) -> u8 {
        match self {
            ApiResponse::Ack { .. } => Self::ACK,
            ApiResponse::Error { .. } => Self::ERROR,
            ApiResponse::OptionValue { .. } => Self::OPTION_VALUE,
            ApiResponse::ConnectionEstablished { .. } => Self::CONNECTION_ESTABLISHED,
            ApiResponse::ConnectionFailed { .. } => Self::CONNECTION_FAILED,
            ApiResponse::TransmissionFailed { .. } => Self::TRANSMISSION_FAILED,
            ApiResponse::PeerClosed => Self::PEER_CLOSED,
            ApiResponse::Accepted { .. } => Self::ACCEPTED,
            ApiResponse::Received { .. } => Self::RECEIVED,
            ApiResponse::ChunkArrived { .. } => Self::CHUNK_ARRIVED,
            ApiResponse::ChunkStatuses { .. } => Self::CHUNK_STATUSES,
            ApiResponse::ChunkRead { .. } => Self::CHUNK_READ,
            ApiResponse::ChunkStored { .. } => Self::CHUNK_STORED,
            ApiResponse::ChunkRemoved { .. } => Self::CHUNK_REMOVED,
            ApiResponse::ChunkPushed { .. } => Self::CHUNK_PUSHED,
            ApiResponse::PushedChunk { .. } => Self::PUSHED_CHUNK,
            ApiResponse::PeerName { .. } => Self::PEER_NAME,
            ApiResponse::SockName { .. } => Self::SOCK_NAME,
            ApiResponse::LocalHostAddress { .. } => Self::LOCAL_HOST_ADDRESS,
            ApiResponse::RendezvousAddress { .. } => Self::RENDEZVOUS_ADDRESS,
            ApiResponse::DualStackRouter { .. } => Self::DUAL_STACK_ROUTER,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.id());

        match self {
            ApiResponse::Ack { call } => buf.put_u8((*call).into()),
            ApiResponse::Error { call, code } => {
                buf.put_u8((*call).into());
                buf.put_u8((*code).into());
            }
            ApiResponse::OptionValue { option, value } => {
                buf.put_u8((*option).into());
                buf.put_u32(*value);
            }
            ApiResponse::ConnectionEstablished { peer } => peer.ser(buf),
            ApiResponse::ConnectionFailed { peer } => peer.ser(buf),
            ApiResponse::TransmissionFailed { unacknowledged } => buf.put_u32(*unacknowledged),
            ApiResponse::PeerClosed => {}
            ApiResponse::Accepted { peer } => peer.ser(buf),
            ApiResponse::Received { from, payload } => {
                from.ser(buf);
                put_bytes(buf, payload);
            }
            ApiResponse::ChunkArrived { cid, status } => {
                cid.ser(buf);
                buf.put_u8((*status).into());
            }
            ApiResponse::ChunkStatuses { statuses } => {
                buf.put_u16(statuses.len() as u16);
                for (cid, status) in statuses {
                    cid.ser(buf);
                    buf.put_u8((*status).into());
                }
            }
            ApiResponse::ChunkRead { cid, status, payload } | ApiResponse::PushedChunk { cid, status, payload } => {
                cid.ser(buf);
                buf.put_u8((*status).into());
                put_bytes(buf, payload);
            }
            ApiResponse::ChunkStored { cid } | ApiResponse::ChunkRemoved { cid } | ApiResponse::ChunkPushed { cid } => cid.ser(buf),
            ApiResponse::PeerName { path } | ApiResponse::SockName { path } => path.ser(buf),
            ApiResponse::LocalHostAddress { domain, host, fallback } => {
                domain.ser(buf);
                host.ser(buf);
                match fallback {
                    Some(fallback) => {
                        buf.put_u8(1);
                        fallback.ser(buf);
                    }
                    None => buf.put_u8(0),
                }
            }
            ApiResponse::RendezvousAddress { path } => put_optional_path(buf, path.as_ref()),
            ApiResponse::DualStackRouter { is_router } => buf.put_u8(*is_router as u8),
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ApiResponse> {
        let result = match buf.try_get_u8()? {
            Self::ACK => ApiResponse::Ack { call: try_get_call(buf)? },
            Self::ERROR => ApiResponse::Error {
                call: try_get_call(buf)?,
                code: {
                    let raw = buf.try_get_u8()?;
                    ErrorCode::try_from(raw).map_err(|_| anyhow!("invalid error code {}", raw))?
                },
            },
            Self::OPTION_VALUE => {
                let raw = buf.try_get_u8()?;
                ApiResponse::OptionValue {
                    option: SocketOption::try_from(raw).map_err(|_| anyhow!("invalid socket option {}", raw))?,
                    value: buf.try_get_u32()?,
                }
            }
            Self::CONNECTION_ESTABLISHED => ApiResponse::ConnectionEstablished { peer: AddressPath::deser(buf)? },
            Self::CONNECTION_FAILED => ApiResponse::ConnectionFailed { peer: AddressPath::deser(buf)? },
            Self::TRANSMISSION_FAILED => ApiResponse::TransmissionFailed { unacknowledged: buf.try_get_u32()? },
            Self::PEER_CLOSED => ApiResponse::PeerClosed,
            Self::ACCEPTED => ApiResponse::Accepted { peer: AddressPath::deser(buf)? },
            Self::RECEIVED => ApiResponse::Received {
                from: AddressPath::deser(buf)?,
                payload: try_get_bytes(buf)?,
            },
            Self::CHUNK_ARRIVED => ApiResponse::ChunkArrived {
                cid: Identifier::deser(buf)?,
                status: try_get_status(buf)?,
            },
            Self::CHUNK_STATUSES => {
                let len = buf.try_get_u16()?;
                let mut statuses = Vec::new();
                for _ in 0..len {
                    statuses.push((Identifier::deser(buf)?, try_get_status(buf)?));
                }
                ApiResponse::ChunkStatuses { statuses }
            }
            Self::CHUNK_READ => ApiResponse::ChunkRead {
                cid: Identifier::deser(buf)?,
                status: try_get_status(buf)?,
                payload: try_get_bytes(buf)?,
            },
            Self::PUSHED_CHUNK => ApiResponse::PushedChunk {
                cid: Identifier::deser(buf)?,
                status: try_get_status(buf)?,
                payload: try_get_bytes(buf)?,
            },
            Self::CHUNK_STORED => ApiResponse::ChunkStored { cid: Identifier::deser(buf)? },
            Self::CHUNK_REMOVED => ApiResponse::ChunkRemoved { cid: Identifier::deser(buf)? },
            Self::CHUNK_PUSHED => ApiResponse::ChunkPushed { cid: Identifier::deser(buf)? },
            Self::PEER_NAME => ApiResponse::PeerName { path: AddressPath::deser(buf)? },
            Self::SOCK_NAME => ApiResponse::SockName { path: AddressPath::deser(buf)? },
            Self::LOCAL_HOST_ADDRESS => {
                let domain = Identifier::deser(buf)?;
                let host = Identifier::deser(buf)?;
                let fallback = match buf.try_get_u8()? {
                    0 => None,
                    _ => Some(Identifier::deser(buf)?),
                };
                ApiResponse::LocalHostAddress { domain, host, fallback }
            }
            Self::RENDEZVOUS_ADDRESS => ApiResponse::RendezvousAddress { path: try_get_optional_path(buf)? },
            Self::DUAL_STACK_ROUTER => ApiResponse::DualStackRouter { is_router: buf.try_get_u8()? != 0 },
            id => return Err(anyhow!("invalid api response id {}", id)),
        };
        Ok(result)
    }
}

fn try_get_call(buf: &mut impl Buf) -> anyhow::Result<ApiCall> {
    let raw = buf.try_get_u8()?;
    ApiCall::try_from(raw)
        .map_err(|_| anyhow!("invalid api call {}", raw))
}

fn try_get_status(buf: &mut impl Buf) -> anyhow::Result<ChunkStatus> {
    let raw = buf.try_get_u8()?;
    ChunkStatus::try_from(raw)
        .map_err(|_| anyhow!("invalid chunk status {}", raw))
}
