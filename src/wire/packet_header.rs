use std::fmt::{Debug, Formatter};
use anyhow::bail;
use bytes::{Buf, BufMut};
use crate::wire::address_path::AddressPath;


/// Tag in the common header that identifies what follows the two address paths
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NextProtocol(u8);

impl NextProtocol {
    pub const TRANSPORT: NextProtocol = NextProtocol(0x0e);
    pub const CONTENT: NextProtocol = NextProtocol(0x0f);
    /// network diagnostics (echo, unreachable etc.), delivered to raw listener sockets
    pub const DIAGNOSTIC: NextProtocol = NextProtocol(0x3d);
    /// no further header, used by raw sockets that did not set a protocol of their own
    pub const NONE: NextProtocol = NextProtocol(0x3b);

    pub fn from_raw(raw: u8) -> NextProtocol {
        NextProtocol(raw)
    }

    pub fn to_raw(&self) -> u8 {
        self.0
    }
}

impl Debug for NextProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::TRANSPORT => write!(f, "TRN"),
            Self::CONTENT => write!(f, "CID"),
            Self::DIAGNOSTIC => write!(f, "DIAG"),
            Self::NONE => write!(f, "NONE"),
            NextProtocol(raw) => write!(f, "NXT({})", raw),
        }
    }
}

/// The header every packet starts with, regardless of its protocol:
///
/// ```text
/// 0: next protocol (u8)
/// 1: hop limit (u8)
/// 2: payload length (u32), i.e. the number of bytes following the destination and source paths
/// 6: destination path
/// *: source path
/// ```
#[derive(Clone, Eq, PartialEq)]
pub struct PacketHeader {
    pub next_protocol: NextProtocol,
    pub hop_limit: u8,
    pub payload_len: u32,
    pub dst: AddressPath,
    pub src: AddressPath,
}

impl Debug for PacketHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "HDR{{{:?} {}->{} hlim={} len={}}}", self.next_protocol, self.src, self.dst, self.hop_limit, self.payload_len)
    }
}

impl PacketHeader {
    pub const FIXED_LEN: usize = size_of::<u8>() + size_of::<u8>() + size_of::<u32>();

    pub fn serialized_len(&self) -> usize {
        Self::FIXED_LEN + self.dst.serialized_len() + self.src.serialized_len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.next_protocol.to_raw());
        buf.put_u8(self.hop_limit);
        buf.put_u32(self.payload_len);
        self.dst.ser(buf);
        self.src.ser(buf);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        let next_protocol = NextProtocol::from_raw(buf.try_get_u8()?);
        let hop_limit = buf.try_get_u8()?;
        let payload_len = buf.try_get_u32()?;
        let dst = AddressPath::deser(buf)?;
        let src = AddressPath::deser(buf)?;

        if buf.remaining() < payload_len as usize {
            bail!("packet payload is truncated: header announces {} bytes, {} remaining", payload_len, buf.remaining());
        }

        Ok(PacketHeader {
            next_protocol,
            hop_limit,
            payload_len,
            dst,
            src,
        })
    }
}
