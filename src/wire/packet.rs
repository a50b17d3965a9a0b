use std::fmt::{Debug, Formatter};
use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::wire::address_path::AddressPath;
use crate::wire::content_header::ContentHeader;
use crate::wire::packet_header::{NextProtocol, PacketHeader};
use crate::wire::transport_header::{TransportHeader, TransportKind};


#[derive(Clone, Eq, PartialEq)]
pub enum PacketBody {
    Transport { header: TransportHeader, payload: Bytes },
    Content { header: ContentHeader, payload: Bytes },
    /// anything the engine does not interpret, e.g. diagnostics or raw socket traffic
    Raw { next_protocol: NextProtocol, payload: Bytes },
}

impl Debug for PacketBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketBody::Transport { header, payload } => write!(f, "{:?}[{}]", header, payload.len()),
            PacketBody::Content { header, payload } => write!(f, "{:?}({})[{}]", header.opcode, header.context_id, payload.len()),
            PacketBody::Raw { next_protocol, payload } => write!(f, "{:?}[{}]", next_protocol, payload.len()),
        }
    }
}

impl PacketBody {
    pub fn next_protocol(&self) -> NextProtocol {
        match self {
            PacketBody::Transport { .. } => NextProtocol::TRANSPORT,
            PacketBody::Content { .. } => NextProtocol::CONTENT,
            PacketBody::Raw { next_protocol, .. } => *next_protocol,
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            PacketBody::Transport { payload, .. } => payload,
            PacketBody::Content { payload, .. } => payload,
            PacketBody::Raw { payload, .. } => payload,
        }
    }

    fn serialized_len(&self) -> usize {
        match self {
            PacketBody::Transport { payload, .. } => TransportHeader::SERIALIZED_LEN + payload.len(),
            PacketBody::Content { payload, .. } => ContentHeader::SERIALIZED_LEN + payload.len(),
            PacketBody::Raw { payload, .. } => payload.len(),
        }
    }

    fn ser(&self, buf: &mut impl BufMut) {
        match self {
            PacketBody::Transport { header, payload } => {
                header.ser(buf);
                buf.put_slice(payload);
            }
            PacketBody::Content { header, payload } => {
                header.ser(buf);
                buf.put_slice(payload);
            }
            PacketBody::Raw { payload, .. } => {
                buf.put_slice(payload);
            }
        }
    }

    fn deser(next_protocol: NextProtocol, mut raw: Bytes) -> anyhow::Result<PacketBody> {
        match next_protocol {
            NextProtocol::TRANSPORT => {
                let header = TransportHeader::deser(&mut raw)?;
                if raw.len() != header.length as usize {
                    bail!("transport header announces {} payload bytes, packet has {}", header.length, raw.len());
                }
                Ok(PacketBody::Transport { header, payload: raw })
            }
            NextProtocol::CONTENT => {
                let header = ContentHeader::deser(&mut raw)?;
                if raw.len() != header.chunk_length as usize {
                    bail!("content header announces {} payload bytes, packet has {}", header.chunk_length, raw.len());
                }
                Ok(PacketBody::Content { header, payload: raw })
            }
            _ => Ok(PacketBody::Raw { next_protocol, payload: raw }),
        }
    }
}

/// A complete packet as it travels between the engine, the network and the content cache.
///  Packets are plain values: a buffered copy for retransmission is owned by the send window
///  slot holding it.
#[derive(Clone, Eq, PartialEq)]
pub struct NetworkPacket {
    pub hop_limit: u8,
    pub dst: AddressPath,
    pub src: AddressPath,
    pub body: PacketBody,
}

impl Debug for NetworkPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PCKT{{{:?} -> {:?}: {:?}}}", self.src, self.dst, self.body)
    }
}

impl NetworkPacket {
    pub fn transport(hop_limit: u8, src: AddressPath, dst: AddressPath, kind: TransportKind, seq: u32, ack: u32, payload: Bytes) -> NetworkPacket {
        let header = TransportHeader {
            kind,
            seq,
            ack,
            length: payload.len() as u16,
        };
        NetworkPacket {
            hop_limit,
            dst,
            src,
            body: PacketBody::Transport { header, payload },
        }
    }

    pub fn content(hop_limit: u8, src: AddressPath, dst: AddressPath, header: ContentHeader, payload: Bytes) -> NetworkPacket {
        NetworkPacket {
            hop_limit,
            dst,
            src,
            body: PacketBody::Content { header, payload },
        }
    }

    pub fn transport_header(&self) -> Option<&TransportHeader> {
        match &self.body {
            PacketBody::Transport { header, .. } => Some(header),
            _ => None,
        }
    }

    pub fn header(&self) -> PacketHeader {
        PacketHeader {
            next_protocol: self.body.next_protocol(),
            hop_limit: self.hop_limit,
            payload_len: self.body.serialized_len() as u32,
            dst: self.dst.clone(),
            src: self.src.clone(),
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        self.header().ser(buf);
        self.body.ser(buf);
    }

    pub fn to_bytes(&self) -> Bytes {
        let header = self.header();
        let mut buf = BytesMut::with_capacity(header.serialized_len() + header.payload_len as usize);
        header.ser(&mut buf);
        self.body.ser(&mut buf);
        buf.freeze()
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<NetworkPacket> {
        let header = PacketHeader::deser(buf)?;
        let raw_body = buf.copy_to_bytes(header.payload_len as usize);
        let body = PacketBody::deser(header.next_protocol, raw_body)?;

        Ok(NetworkPacket {
            hop_limit: header.hop_limit,
            dst: header.dst,
            src: header.src,
            body,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::test_util::test_path;
    use crate::wire::content_header::ContentOpcode;
    use crate::wire::identifier::IdentifierKind;

    fn src() -> AddressPath {
        test_path(1, IdentifierKind::Service, 1)
    }
    fn dst() -> AddressPath {
        test_path(2, IdentifierKind::Service, 2)
    }

    #[rstest]
    #[case::data(NetworkPacket::transport(5, src(), dst(), TransportKind::Data, 3, 0, Bytes::from_static(b"hello")))]
    #[case::syn(NetworkPacket::transport(5, src(), dst(), TransportKind::Syn, 0, 0, Bytes::new()))]
    #[case::content(NetworkPacket::content(5, src(), dst(), ContentHeader::new(ContentOpcode::Response, 4, 3), Bytes::from_static(b"abc")))]
    #[case::raw(NetworkPacket { hop_limit: 5, dst: dst(), src: src(), body: PacketBody::Raw { next_protocol: NextProtocol::DIAGNOSTIC, payload: Bytes::from_static(&[8, 0]) } })]
    fn test_ser_deser(#[case] packet: NetworkPacket) {
        let mut raw = packet.to_bytes();
        let parsed = NetworkPacket::deser(&mut raw).unwrap();
        assert_eq!(parsed, packet);
        assert!(raw.is_empty());
    }

    #[test]
    fn test_header_payload_len() {
        let packet = NetworkPacket::transport(5, src(), dst(), TransportKind::Data, 3, 0, Bytes::from_static(b"hello"));
        let header = packet.header();
        assert_eq!(header.next_protocol, NextProtocol::TRANSPORT);
        assert_eq!(header.payload_len as usize, TransportHeader::SERIALIZED_LEN + 5);
    }

    #[test]
    fn test_deser_transport_length_mismatch() {
        let packet = NetworkPacket::transport(5, src(), dst(), TransportKind::Data, 3, 0, Bytes::from_static(b"hello"));
        let mut raw = packet.to_bytes().to_vec();
        // patch the transport header's length field, which is the last two bytes before the payload
        let len_offset = raw.len() - 5 - 2;
        raw[len_offset + 1] = 4;

        let mut b: &[u8] = &raw;
        assert!(NetworkPacket::deser(&mut b).is_err());
    }

    #[test]
    fn test_deser_truncated() {
        let packet = NetworkPacket::transport(5, src(), dst(), TransportKind::Data, 3, 0, Bytes::from_static(b"hello"));
        let raw = packet.to_bytes();
        let mut b: &[u8] = &raw[..raw.len() - 1];
        assert!(NetworkPacket::deser(&mut b).is_err());
    }
}
