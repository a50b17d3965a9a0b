use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};
use bytes_varint::{VarIntSupport, VarIntSupportMut};


/// writes a varint length prefix followed by the raw bytes
pub fn put_bytes(buf: &mut impl BufMut, data: &[u8]) {
    buf.put_usize_varint(data.len());
    buf.put_slice(data);
}

pub fn try_get_bytes(buf: &mut impl Buf) -> anyhow::Result<Bytes> {
    let len = buf.try_get_usize_varint()?;
    if buf.remaining() < len {
        bail!("length prefix {} exceeds the remaining {} bytes", len, buf.remaining());
    }
    Ok(buf.copy_to_bytes(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case::empty(b"", vec![0])]
    #[case::short(b"abc", vec![3, b'a', b'b', b'c'])]
    fn test_put_bytes(#[case] data: &[u8], #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, data);
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &buf;
        assert_eq!(try_get_bytes(&mut b).unwrap().as_ref(), data);
        assert!(b.is_empty());
    }

    #[test]
    fn test_long_length_prefix() {
        let data = vec![7u8; 300];
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &data);
        assert_eq!(buf.len(), 302);
    }

    #[rstest]
    #[case::missing_len(vec![])]
    #[case::truncated(vec![3, b'a'])]
    fn test_try_get_bytes_invalid(#[case] raw: Vec<u8>) {
        let mut b: &[u8] = &raw;
        assert!(try_get_bytes(&mut b).is_err());
    }
}
