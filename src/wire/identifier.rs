use std::fmt::{Debug, Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;
use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use sha1::{Digest, Sha1};


#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum IdentifierKind {
    Domain = 0x10,
    Host = 0x11,
    Service = 0x12,
    Content = 0x13,
    /// legacy IPv4 address, used as a fallback route into networks that do not understand paths
    Ipv4Fallback = 0x14,
}
impl IdentifierKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            IdentifierKind::Domain => "AD",
            IdentifierKind::Host => "HID",
            IdentifierKind::Service => "SID",
            IdentifierKind::Content => "CID",
            IdentifierKind::Ipv4Fallback => "IP",
        }
    }

    fn from_prefix(prefix: &str) -> Option<IdentifierKind> {
        match prefix {
            "AD" => Some(IdentifierKind::Domain),
            "HID" => Some(IdentifierKind::Host),
            "SID" => Some(IdentifierKind::Service),
            "CID" => Some(IdentifierKind::Content),
            "IP" => Some(IdentifierKind::Ipv4Fallback),
            _ => None,
        }
    }
}

/// An identifier is a fixed-length opaque value tagged with its kind. Two identifiers are equal
///  if both kind and value are equal.
///
/// The text form is `<prefix>:<40 lowercase hex digits>`, e.g. `CID:a9993e36...`. IPv4
///  fallback identifiers are written as a dotted quad instead (`IP:10.0.0.1`).
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct Identifier {
    kind: IdentifierKind,
    value: [u8; Identifier::VALUE_LEN],
}

impl Identifier {
    pub const VALUE_LEN: usize = 20;
    pub const SERIALIZED_LEN: usize = size_of::<u32>() + Self::VALUE_LEN;

    pub fn new(kind: IdentifierKind, value: [u8; Self::VALUE_LEN]) -> Identifier {
        Identifier { kind, value }
    }

    /// The content identifier of a chunk is derived from the SHA-1 digest of its payload
    pub fn content_for(payload: &[u8]) -> Identifier {
        let digest = Sha1::digest(payload);
        let mut value = [0u8; Self::VALUE_LEN];
        value.copy_from_slice(&digest[..]);
        Identifier::new(IdentifierKind::Content, value)
    }

    /// a fresh service identifier for sockets that send without having been bound explicitly
    pub fn random_service() -> Identifier {
        Identifier::new(IdentifierKind::Service, rand::random())
    }

    pub fn from_ipv4(addr: Ipv4Addr) -> Identifier {
        let mut value = [0u8; Self::VALUE_LEN];
        value[..4].copy_from_slice(&addr.octets());
        Identifier::new(IdentifierKind::Ipv4Fallback, value)
    }

    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    pub fn value(&self) -> &[u8; Self::VALUE_LEN] {
        &self.value
    }

    /// checks that this is a content identifier, and that it matches the payload's digest
    pub fn verifies(&self, payload: &[u8]) -> bool {
        self.kind == IdentifierKind::Content && *self == Identifier::content_for(payload)
    }

    fn as_ipv4(&self) -> Option<Ipv4Addr> {
        if self.kind != IdentifierKind::Ipv4Fallback || self.value[4..].iter().any(|&b| b != 0) {
            return None;
        }
        Some(Ipv4Addr::new(self.value[0], self.value[1], self.value[2], self.value[3]))
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.kind.into());
        buf.put_slice(&self.value);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Identifier> {
        let raw_kind = buf.try_get_u32()?;
        let kind = IdentifierKind::try_from(raw_kind)
            .map_err(|_| anyhow!("invalid identifier kind {:x}", raw_kind))?;

        if buf.remaining() < Self::VALUE_LEN {
            bail!("identifier value is truncated");
        }
        let mut value = [0u8; Self::VALUE_LEN];
        buf.copy_to_slice(&mut value);

        Ok(Identifier { kind, value })
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.as_ipv4() {
            Some(addr) => write!(f, "{}:{}", self.kind.prefix(), addr),
            None => write!(f, "{}:{}", self.kind.prefix(), hex::encode(self.value)),
        }
    }
}

impl Debug for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.as_ipv4() {
            Some(addr) => write!(f, "{}:{}", self.kind.prefix(), addr),
            None => write!(f, "{}:{}..{}", self.kind.prefix(), hex::encode(&self.value[..3]), hex::encode(&self.value[Self::VALUE_LEN - 2..])),
        }
    }
}

impl FromStr for Identifier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Identifier> {
        let (prefix, raw) = s.split_once(':')
            .ok_or_else(|| anyhow!("identifier '{}' has no kind prefix", s))?;
        let kind = IdentifierKind::from_prefix(prefix)
            .ok_or_else(|| anyhow!("unknown identifier kind '{}' in '{}'", prefix, s))?;

        if kind == IdentifierKind::Ipv4Fallback {
            if let Ok(addr) = Ipv4Addr::from_str(raw) {
                return Ok(Identifier::from_ipv4(addr));
            }
        }

        let mut value = [0u8; Self::VALUE_LEN];
        hex::decode_to_slice(raw, &mut value)
            .map_err(|e| anyhow!("invalid identifier value in '{}': {}", s, e))?;
        Ok(Identifier { kind, value })
    }
}
