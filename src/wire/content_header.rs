use anyhow::anyhow;
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};


#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ContentOpcode {
    Request = 0,
    Response = 1,
    /// unsolicited delivery to a socket that bound a push path
    Push = 2,
    /// store a chunk in the local content cache
    LocalPut = 3,
    /// evict a chunk from the local content cache
    LocalRemove = 4,
}

/// Sub-header of content packets. Context id, TTL, cache size and cache policy are opaque to
///  the engine and are passed through to the content cache.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ContentHeader {
    pub opcode: ContentOpcode,
    pub context_id: u32,
    pub ttl: u32,
    pub cache_size: u32,
    pub cache_policy: u32,
    pub chunk_length: u32,
}

impl ContentHeader {
    pub const SERIALIZED_LEN: usize = size_of::<u8>() + 5 * size_of::<u32>();

    pub fn new(opcode: ContentOpcode, context_id: u32, chunk_length: u32) -> ContentHeader {
        ContentHeader {
            opcode,
            context_id,
            ttl: 0,
            cache_size: 0,
            cache_policy: 0,
            chunk_length,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.opcode.into());
        buf.put_u32(self.context_id);
        buf.put_u32(self.ttl);
        buf.put_u32(self.cache_size);
        buf.put_u32(self.cache_policy);
        buf.put_u32(self.chunk_length);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ContentHeader> {
        let raw_opcode = buf.try_get_u8()?;
        let opcode = ContentOpcode::try_from(raw_opcode)
            .map_err(|_| anyhow!("invalid content opcode {}", raw_opcode))?;

        Ok(ContentHeader {
            opcode,
            context_id: buf.try_get_u32()?,
            ttl: buf.try_get_u32()?,
            cache_size: buf.try_get_u32()?,
            cache_policy: buf.try_get_u32()?,
            chunk_length: buf.try_get_u32()?,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ser() {
        let header = ContentHeader {
            opcode: ContentOpcode::Push,
            context_id: 1,
            ttl: 2,
            cache_size: 3,
            cache_policy: 4,
            chunk_length: 5,
        };
        let mut buf = Vec::new();
        header.ser(&mut buf);
        assert_eq!(buf, vec![2, 0,0,0,1, 0,0,0,2, 0,0,0,3, 0,0,0,4, 0,0,0,5]);
        assert_eq!(buf.len(), ContentHeader::SERIALIZED_LEN);

        let mut b: &[u8] = &buf;
        assert_eq!(ContentHeader::deser(&mut b).unwrap(), header);
    }

    #[test]
    fn test_deser_invalid_opcode() {
        let raw = vec![9, 0,0,0,1, 0,0,0,2, 0,0,0,3, 0,0,0,4, 0,0,0,5];
        let mut b: &[u8] = &raw;
        assert!(ContentHeader::deser(&mut b).is_err());
    }
}
