use std::fmt::{Debug, Formatter};
use anyhow::anyhow;
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};


#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TransportKind {
    Syn = 1,
    SynAck = 2,
    Data = 3,
    Ack = 4,
    Fin = 5,
    Datagram = 6,
}

/// Sub-header of transport packets. `seq` is used by DATA packets, `ack` by ACK packets as the
///  receiver's next expected sequence number (i.e. a cumulative acknowledgment of everything
///  below). `length` is the number of payload bytes following the header.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct TransportHeader {
    pub kind: TransportKind,
    pub seq: u32,
    pub ack: u32,
    pub length: u16,
}

impl Debug for TransportHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TransportKind::Data => write!(f, "DATA(#{}:{})", self.seq, self.length),
            TransportKind::Ack => write!(f, "ACK({})", self.ack),
            TransportKind::Datagram => write!(f, "DGRAM({})", self.length),
            kind => write!(f, "{:?}", kind),
        }
    }
}

impl TransportHeader {
    pub const SERIALIZED_LEN: usize = size_of::<u8>() + 2 * size_of::<u32>() + size_of::<u16>();
    pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

    pub fn control(kind: TransportKind) -> TransportHeader {
        TransportHeader { kind, seq: 0, ack: 0, length: 0 }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.kind.into());
        buf.put_u32(self.seq);
        buf.put_u32(self.ack);
        buf.put_u16(self.length);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<TransportHeader> {
        let raw_kind = buf.try_get_u8()?;
        let kind = TransportKind::try_from(raw_kind)
            .map_err(|_| anyhow!("invalid transport packet kind {}", raw_kind))?;

        Ok(TransportHeader {
            kind,
            seq: buf.try_get_u32()?,
            ack: buf.try_get_u32()?,
            length: buf.try_get_u16()?,
        })
    }
}
