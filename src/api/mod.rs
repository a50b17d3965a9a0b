//! Control messages exchanged with the application socket layer. Every request is tagged with
//!  the local port it originates from, and every response is sent back to a local port.

use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::wire::address_path::AddressPath;

pub mod request;
pub mod response;


#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ApiCall {
    OpenSocket = 1,
    SetOption = 2,
    GetOption = 3,
    Bind = 4,
    BindPush = 5,
    Connect = 6,
    Accept = 7,
    Close = 8,
    Send = 9,
    SendTo = 10,
    RequestChunk = 11,
    GetChunkStatus = 12,
    ReadChunk = 13,
    RemoveChunk = 14,
    PutChunk = 15,
    PushChunkTo = 16,
    GetPeerName = 17,
    GetSockName = 18,
    ChangeDomain = 19,
    ReadLocalHostAddress = 20,
    UpdateRendezvousAddress = 21,
    ReadRendezvousAddress = 22,
    IsDualStackRouter = 23,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ErrorCode {
    /// the path is malformed, or lacks an identifier the operation needs
    AddressNotAvailable = 1,
    NotConnected = 2,
    AlreadyConnected = 3,
    NoPendingConnection = 4,
    NoSuchSocket = 5,
    /// the socket was closed and only lingers to absorb in-flight traffic
    SocketClosing = 6,
    NoSuchChunk = 7,
    ChunkFailed = 8,
    InvalidArgument = 9,
    /// the operation is not supported for the socket's kind
    WrongSocketKind = 10,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SocketOption {
    HopLimit = 1,
    NextProtocol = 2,
}

/// Chunk metadata that the engine passes through to the content cache
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct CacheParams {
    pub context_id: u32,
    pub ttl: u32,
    pub cache_size: u32,
    pub cache_policy: u32,
}

impl CacheParams {
    fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.context_id);
        buf.put_u32(self.ttl);
        buf.put_u32(self.cache_size);
        buf.put_u32(self.cache_policy);
    }

    fn deser(buf: &mut impl Buf) -> anyhow::Result<CacheParams> {
        Ok(CacheParams {
            context_id: buf.try_get_u32()?,
            ttl: buf.try_get_u32()?,
            cache_size: buf.try_get_u32()?,
            cache_policy: buf.try_get_u32()?,
        })
    }
}

fn put_paths(buf: &mut impl BufMut, paths: &[AddressPath]) {
    buf.put_u16(paths.len() as u16);
    for path in paths {
        path.ser(buf);
    }
}

fn try_get_paths(buf: &mut impl Buf) -> anyhow::Result<Vec<AddressPath>> {
    let len = buf.try_get_u16()?;
    let mut result = Vec::new();
    for _ in 0..len {
        result.push(AddressPath::deser(buf)?);
    }
    Ok(result)
}

fn put_optional_path(buf: &mut impl BufMut, path: Option<&AddressPath>) {
    match path {
        Some(path) => {
            buf.put_u8(1);
            path.ser(buf);
        }
        None => buf.put_u8(0),
    }
}

fn try_get_optional_path(buf: &mut impl Buf) -> anyhow::Result<Option<AddressPath>> {
    match buf.try_get_u8()? {
        0 => Ok(None),
        _ => Ok(Some(AddressPath::deser(buf)?)),
    }
}
