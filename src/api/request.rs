use anyhow::anyhow;
use bytes::{Buf, BufMut, Bytes};
use crate::api::{put_optional_path, put_paths, try_get_optional_path, try_get_paths, ApiCall, CacheParams, SocketOption};
use crate::registry::connection_record::SocketKind;
use crate::registry::local_port::LocalPort;
use crate::util::buf::{put_bytes, try_get_bytes};
use crate::wire::address_path::AddressPath;
use crate::wire::identifier::Identifier;


#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ApiRequest {
    OpenSocket { kind: SocketKind },
    SetOption { option: SocketOption, value: u32 },
    GetOption { option: SocketOption },
    Bind { path: AddressPath },
    /// bind a path for unsolicited content delivery
    BindPush { path: AddressPath },
    Connect { dst: AddressPath },
    /// take the oldest pending connection from `listener`'s queue and attach it to this port
    Accept { listener: LocalPort },
    Close,
    Send { payload: Bytes },
    SendTo { dst: AddressPath, payload: Bytes },
    RequestChunk { paths: Vec<AddressPath> },
    GetChunkStatus { paths: Vec<AddressPath> },
    ReadChunk { path: AddressPath },
    RemoveChunk { context_id: u32, cid: Identifier },
    PutChunk { params: CacheParams, payload: Bytes },
    PushChunkTo { dst: AddressPath, params: CacheParams, payload: Bytes },
    GetPeerName,
    GetSockName,
    ChangeDomain { domain: Identifier, fallback: Option<Identifier> },
    ReadLocalHostAddress,
    UpdateRendezvousAddress { path: AddressPath },
    ReadRendezvousAddress,
    IsDualStackRouter,
}

impl ApiRequest {
    pub fn call(&self) -> ApiCall {
        match self {
            ApiRequest::OpenSocket { .. } => ApiCall::OpenSocket,
            ApiRequest::SetOption { .. } => ApiCall::SetOption,
            ApiRequest::GetOption { .. } => ApiCall::GetOption,
            ApiRequest::Bind { .. } => ApiCall::Bind,
            ApiRequest::BindPush { .. } => ApiCall::BindPush,
            ApiRequest::Connect { .. } => ApiCall::Connect,
            ApiRequest::Accept { .. } => ApiCall::Accept,
            ApiRequest::Close => ApiCall::Close,
            ApiRequest::Send { .. } => ApiCall::Send,
            ApiRequest::SendTo { .. } => ApiCall::SendTo,
            ApiRequest::RequestChunk { .. } => ApiCall::RequestChunk,
            ApiRequest::GetChunkStatus { .. } => ApiCall::GetChunkStatus,
            ApiRequest::ReadChunk { .. } => ApiCall::ReadChunk,
            ApiRequest::RemoveChunk { .. } => ApiCall::RemoveChunk,
            ApiRequest::PutChunk { .. } => ApiCall::PutChunk,
            ApiRequest::PushChunkTo { .. } => ApiCall::PushChunkTo,
            ApiRequest::GetPeerName => ApiCall::GetPeerName,
            ApiRequest::GetSockName => ApiCall::GetSockName,
            ApiRequest::ChangeDomain { .. } => ApiCall::ChangeDomain,
            ApiRequest::ReadLocalHostAddress => ApiCall::ReadLocalHostAddress,
            ApiRequest::UpdateRendezvousAddress { .. } => ApiCall::UpdateRendezvousAddress,
            ApiRequest::ReadRendezvousAddress => ApiCall::ReadRendezvousAddress,
            ApiRequest::IsDualStackRouter => ApiCall::IsDualStackRouter,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.call().into());

        match self {
            ApiRequest::OpenSocket { kind } => buf.put_u8((*kind).into()),
            ApiRequest::SetOption { option, value } => {
                buf.put_u8((*option).into());
                buf.put_u32(*value);
            }
            ApiRequest::GetOption { option } => buf.put_u8((*option).into()),
            ApiRequest::Bind { path } => path.ser(buf),
            ApiRequest::BindPush { path } => path.ser(buf),
            ApiRequest::Connect { dst } => dst.ser(buf),
            ApiRequest::Accept { listener } => buf.put_u16(listener.to_raw()),
            ApiRequest::Send { payload } => put_bytes(buf, payload),
            ApiRequest::SendTo { dst, payload } => {
                dst.ser(buf);
                put_bytes(buf, payload);
            }
            ApiRequest::RequestChunk { paths } => put_paths(buf, paths),
            ApiRequest::GetChunkStatus { paths } => put_paths(buf, paths),
            ApiRequest::ReadChunk { path } => path.ser(buf),
            ApiRequest::RemoveChunk { context_id, cid } => {
                buf.put_u32(*context_id);
                cid.ser(buf);
            }
            ApiRequest::PutChunk { params, payload } => {
                params.ser(buf);
                put_bytes(buf, payload);
            }
            ApiRequest::PushChunkTo { dst, params, payload } => {
                dst.ser(buf);
                params.ser(buf);
                put_bytes(buf, payload);
            }
            ApiRequest::ChangeDomain { domain, fallback } => {
                domain.ser(buf);
                match fallback {
                    Some(fallback) => {
                        buf.put_u8(1);
                        fallback.ser(buf);
                    }
                    None => buf.put_u8(0),
                }
            }
            ApiRequest::UpdateRendezvousAddress { path } => put_optional_path(buf, Some(path)),
            ApiRequest::Close
            | ApiRequest::GetPeerName
            | ApiRequest::GetSockName
            | ApiRequest::ReadLocalHostAddress
            | ApiRequest::ReadRendezvousAddress
            | ApiRequest::IsDualStackRouter => {}
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ApiRequest> {
        let raw_call = buf.try_get_u8()?;
        let call = ApiCall::try_from(raw_call)
            .map_err(|_| anyhow!("invalid api call {}", raw_call))?;

        let result = match call {
            ApiCall::OpenSocket => {
                let raw_kind = buf.try_get_u8()?;
                let kind = SocketKind::try_from(raw_kind)
                    .map_err(|_| anyhow!("invalid socket kind {}", raw_kind))?;
                ApiRequest::OpenSocket { kind }
            }
            ApiCall::SetOption => ApiRequest::SetOption {
                option: try_get_option(buf)?,
                value: buf.try_get_u32()?,
            },
            ApiCall::GetOption => ApiRequest::GetOption { option: try_get_option(buf)? },
            ApiCall::Bind => ApiRequest::Bind { path: AddressPath::deser(buf)? },
            ApiCall::BindPush => ApiRequest::BindPush { path: AddressPath::deser(buf)? },
            ApiCall::Connect => ApiRequest::Connect { dst: AddressPath::deser(buf)? },
            ApiCall::Accept => ApiRequest::Accept { listener: LocalPort::from_raw(buf.try_get_u16()?) },
            ApiCall::Close => ApiRequest::Close,
            ApiCall::Send => ApiRequest::Send { payload: try_get_bytes(buf)? },
            ApiCall::SendTo => ApiRequest::SendTo {
                dst: AddressPath::deser(buf)?,
                payload: try_get_bytes(buf)?,
            },
            ApiCall::RequestChunk => ApiRequest::RequestChunk { paths: try_get_paths(buf)? },
            ApiCall::GetChunkStatus => ApiRequest::GetChunkStatus { paths: try_get_paths(buf)? },
            ApiCall::ReadChunk => ApiRequest::ReadChunk { path: AddressPath::deser(buf)? },
            ApiCall::RemoveChunk => ApiRequest::RemoveChunk {
                context_id: buf.try_get_u32()?,
                cid: Identifier::deser(buf)?,
            },
            ApiCall::PutChunk => ApiRequest::PutChunk {
                params: CacheParams::deser(buf)?,
                payload: try_get_bytes(buf)?,
            },
            ApiCall::PushChunkTo => ApiRequest::PushChunkTo {
                dst: AddressPath::deser(buf)?,
                params: CacheParams::deser(buf)?,
                payload: try_get_bytes(buf)?,
            },
            ApiCall::GetPeerName => ApiRequest::GetPeerName,
            ApiCall::GetSockName => ApiRequest::GetSockName,
            ApiCall::ChangeDomain => {
                let domain = Identifier::deser(buf)?;
                let fallback = match buf.try_get_u8()? {
                    0 => None,
                    _ => Some(Identifier::deser(buf)?),
                };
                ApiRequest::ChangeDomain { domain, fallback }
            }
            ApiCall::ReadLocalHostAddress => ApiRequest::ReadLocalHostAddress,
            ApiCall::UpdateRendezvousAddress => {
                let path = try_get_optional_path(buf)?
                    .ok_or_else(|| anyhow!("rendezvous update without a path"))?;
                ApiRequest::UpdateRendezvousAddress { path }
            }
            ApiCall::ReadRendezvousAddress => ApiRequest::ReadRendezvousAddress,
            ApiCall::IsDualStackRouter => ApiRequest::IsDualStackRouter,
        };
        Ok(result)
    }
}

fn try_get_option(buf: &mut impl Buf) -> anyhow::Result<SocketOption> {
    let raw = buf.try_get_u8()?;
    SocketOption::try_from(raw)
        .map_err(|_| anyhow!("invalid socket option {}", raw))
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::test_util::{test_identifier, test_path};
    use crate::wire::identifier::IdentifierKind;

    #[rstest]
    #[case::open(ApiRequest::OpenSocket { kind: SocketKind::Chunk }, vec![1, 3])]
    #[case::set_option(ApiRequest::SetOption { option: SocketOption::HopLimit, value: 9 }, vec![2, 1, 0,0,0,9])]
    #[case::accept(ApiRequest::Accept { listener: LocalPort::from_raw(258) }, vec![7, 1,2])]
    #[case::close(ApiRequest::Close, vec![8])]
    #[case::send(ApiRequest::Send { payload: Bytes::from_static(b"hi") }, vec![9, 2, b'h', b'i'])]
    fn test_ser(#[case] request: ApiRequest, #[case] expected: Vec<u8>) {
        let mut buf = Vec::new();
        request.ser(&mut buf);
        assert_eq!(buf, expected);
    }

    #[rstest]
    #[case::bind(ApiRequest::Bind { path: test_path(1, IdentifierKind::Service, 1) })]
    #[case::send_to(ApiRequest::SendTo { dst: test_path(2, IdentifierKind::Service, 2), payload: Bytes::from_static(b"abc") })]
    #[case::request_chunk(ApiRequest::RequestChunk { paths: vec![test_path(2, IdentifierKind::Content, 1), test_path(2, IdentifierKind::Content, 2)] })]
    #[case::push_chunk(ApiRequest::PushChunkTo {
        dst: test_path(2, IdentifierKind::Service, 2),
        params: CacheParams { context_id: 1, ttl: 2, cache_size: 3, cache_policy: 4 },
        payload: Bytes::from_static(b"abc"),
    })]
    #[case::change_domain(ApiRequest::ChangeDomain { domain: test_identifier(IdentifierKind::Domain, 3), fallback: Some(test_identifier(IdentifierKind::Ipv4Fallback, 1)) })]
    #[case::rendezvous(ApiRequest::UpdateRendezvousAddress { path: test_path(4, IdentifierKind::Host, 4) })]
    fn test_deser(#[case] request: ApiRequest) {
        let mut buf = Vec::new();
        request.ser(&mut buf);

        let mut b: &[u8] = &buf;
        assert_eq!(ApiRequest::deser(&mut b).unwrap(), request);
        assert!(b.is_empty());
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::unknown_call(vec![99])]
    #[case::unknown_kind(vec![1, 9])]
    #[case::unknown_option(vec![3, 7])]
    #[case::truncated_payload(vec![9, 5, b'a'])]
    fn test_deser_invalid(#[case] raw: Vec<u8>) {
        let mut b: &[u8] = &raw;
        assert!(ApiRequest::deser(&mut b).is_err());
    }
}
