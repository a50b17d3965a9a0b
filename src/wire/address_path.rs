use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut};
use crate::wire::identifier::{Identifier, IdentifierKind};


/// An address path is an ordered sequence of identifiers, describing a route through domain and
///  host towards the path's *intent*, i.e. its last identifier (typically a service or content
///  identifier).
///
/// A path can carry a legacy IPv4 fallback that routers use when they can not handle the
///  primary route. It is written in parentheses in front of the path:
///
/// ```text
/// (IP:10.0.0.1) AD:00..01 HID:00..02 SID:00..03
/// ```
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct AddressPath {
    fallback: Option<Identifier>,
    nodes: Vec<Identifier>,
}

impl AddressPath {
    pub const MAX_NODES: usize = 32;

    const FLAG_FALLBACK: u8 = 0b0000_0001;

    pub fn new(fallback: Option<Identifier>, nodes: Vec<Identifier>) -> AddressPath {
        AddressPath { fallback, nodes }
    }

    pub fn from_nodes(nodes: Vec<Identifier>) -> AddressPath {
        AddressPath { fallback: None, nodes }
    }

    pub fn fallback(&self) -> Option<&Identifier> {
        self.fallback.as_ref()
    }

    pub fn nodes(&self) -> &[Identifier] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// the path's final identifier, i.e. what it is addressed to
    pub fn intent(&self) -> Option<&Identifier> {
        self.nodes.last()
    }

    pub fn find(&self, kind: IdentifierKind) -> Option<&Identifier> {
        self.fallback.iter()
            .chain(self.nodes.iter())
            .find(|id| id.kind() == kind)
    }

    /// A path consisting of nothing but a service identifier. Sockets bound to such a path get
    ///  their full source path when they first transmit.
    pub fn is_service_only(&self) -> bool {
        self.fallback.is_none()
            && self.nodes.len() == 1
            && self.nodes[0].kind() == IdentifierKind::Service
    }

    /// returns a copy of this path with the given identifier appended as its new intent
    pub fn with_intent(&self, intent: Identifier) -> AddressPath {
        let mut nodes = Vec::with_capacity(self.nodes.len() + 1);
        nodes.extend_from_slice(&self.nodes);
        nodes.push(intent);
        AddressPath {
            fallback: self.fallback,
            nodes,
        }
    }

    pub fn serialized_len(&self) -> usize {
        2 + Identifier::SERIALIZED_LEN * (self.nodes.len() + self.fallback.iter().count())
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let flags = if self.fallback.is_some() { Self::FLAG_FALLBACK } else { 0 };
        buf.put_u8(flags);
        buf.put_u8(self.nodes.len() as u8);
        if let Some(fallback) = &self.fallback {
            fallback.ser(buf);
        }
        for node in &self.nodes {
            node.ser(buf);
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<AddressPath> {
        let flags = buf.try_get_u8()?;
        if flags & !Self::FLAG_FALLBACK != 0 {
            bail!("unsupported address path flags {:x}", flags);
        }
        let num_nodes = buf.try_get_u8()? as usize;
        if num_nodes > Self::MAX_NODES {
            bail!("address path with {} nodes exceeds the maximum of {}", num_nodes, Self::MAX_NODES);
        }

        let fallback = if flags & Self::FLAG_FALLBACK != 0 {
            Some(Identifier::deser(buf)?)
        }
        else {
            None
        };

        let mut nodes = Vec::with_capacity(num_nodes);
        for _ in 0..num_nodes {
            nodes.push(Identifier::deser(buf)?);
        }
        Ok(AddressPath { fallback, nodes })
    }
}

impl Display for AddressPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        if let Some(fallback) = &self.fallback {
            write!(f, "({})", fallback)?;
            first = false;
        }
        for node in &self.nodes {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", node)?;
            first = false;
        }
        Ok(())
    }
}

impl Debug for AddressPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        if let Some(fallback) = &self.fallback {
            write!(f, "({:?})", fallback)?;
        }
        for node in &self.nodes {
            write!(f, " {:?}", node)?;
        }
        write!(f, " ]")
    }
}

impl FromStr for AddressPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<AddressPath> {
        let mut fallback = None;
        let mut nodes = Vec::new();

        for token in s.split_whitespace() {
            if let Some(inner) = token.strip_prefix('(') {
                let inner = inner.strip_suffix(')')
                    .ok_or_else(|| anyhow!("unterminated fallback in '{}'", s))?;
                if fallback.is_some() || !nodes.is_empty() {
                    bail!("fallback must come first and only once in '{}'", s);
                }
                fallback = Some(Identifier::from_str(inner)?);
            }
            else {
                nodes.push(Identifier::from_str(token)?);
            }
        }

        if nodes.is_empty() {
            bail!("address path '{}' has no identifiers", s);
        }
        if nodes.len() > Self::MAX_NODES {
            bail!("address path '{}' exceeds the maximum of {} identifiers", s, Self::MAX_NODES);
        }
        Ok(AddressPath { fallback, nodes })
    }
}
