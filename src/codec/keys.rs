use crate::codec::uid::Uid;
use crate::codec::unsigned_bytes::UnsignedBytes;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{KeyRange, MapDefinition, RefStreamDefinition};

pub const VALUE_STORE_KEY_LEN: usize = 6;
const HASH_LEN: usize = 4;
const UNIQUE_ID_LEN: usize = 2;
const RANGE_BOUND_LEN: usize = 8;

/// Address of a de-duplicated value: content hash plus a collision sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueStoreKey {
    pub content_hash: u32,
    pub unique_id: u16,
}

impl ValueStoreKey {
    pub fn new(content_hash: u32, unique_id: u16) -> Self {
        ValueStoreKey { content_hash, unique_id }
    }

    pub fn encode(&self) -> [u8; VALUE_STORE_KEY_LEN] {
        let mut buf = [0u8; VALUE_STORE_KEY_LEN];
        buf[..HASH_LEN].copy_from_slice(&self.content_hash.to_be_bytes());
        buf[HASH_LEN..].copy_from_slice(&self.unique_id.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != VALUE_STORE_KEY_LEN {
            return Err(Error::new(
                ErrorKind::Serialization,
                format!("Value store key must be {} bytes, got {}", VALUE_STORE_KEY_LEN, buf.len()),
            ));
        }
        let content_hash = UnsignedBytes::get(buf, HASH_LEN)? as u32;
        let unique_id = UnsignedBytes::get(&buf[HASH_LEN..], UNIQUE_ID_LEN)? as u16;
        Ok(ValueStoreKey { content_hash, unique_id })
    }

    /// Lowest and highest keys sharing `content_hash`
    pub fn hash_bounds(content_hash: u32) -> ([u8; VALUE_STORE_KEY_LEN], [u8; VALUE_STORE_KEY_LEN]) {
        (
            ValueStoreKey::new(content_hash, 0).encode(),
            ValueStoreKey::new(content_hash, u16::MAX).encode(),
        )
    }

    /// Next collision id after this one, failing once the id space for the hash is used up
    pub fn next_unique_id(&self) -> Result<ValueStoreKey> {
        let mut buf = self.encode();
        UnsignedBytes::increment(&mut buf[HASH_LEN..], UNIQUE_ID_LEN)?;
        ValueStoreKey::decode(&buf)
    }
}

// RefStreamDefinition: [len:2][pipeline uuid][len:2][pipeline version][stream id:8][part index:8]

pub fn encode_stream_definition_into(def: &RefStreamDefinition, out: &mut Vec<u8>) -> Result<()> {
    put_short_str(&def.pipeline_uuid, out)?;
    put_short_str(&def.pipeline_version, out)?;
    out.extend_from_slice(&def.stream_id.to_be_bytes());
    out.extend_from_slice(&def.part_index.to_be_bytes());
    Ok(())
}

pub fn encode_stream_definition(def: &RefStreamDefinition) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(def.pipeline_uuid.len() + def.pipeline_version.len() + 20);
    encode_stream_definition_into(def, &mut out)?;
    Ok(out)
}

pub fn decode_stream_definition(buf: &[u8]) -> Result<(RefStreamDefinition, usize)> {
    let mut pos = 0;
    let pipeline_uuid = get_short_str(buf, &mut pos)?;
    let pipeline_version = get_short_str(buf, &mut pos)?;
    let stream_id = UnsignedBytes::get(slice_from(buf, pos, 8)?, 8)?;
    pos += 8;
    let part_index = UnsignedBytes::get(slice_from(buf, pos, 8)?, 8)?;
    pos += 8;
    Ok((
        RefStreamDefinition { pipeline_uuid, pipeline_version, stream_id, part_index },
        pos,
    ))
}

/// Forward key for a map: the stream key followed by the map name, so all maps
/// of one stream share the stream key as a prefix.
pub fn encode_map_definition_into(map: &MapDefinition, out: &mut Vec<u8>) -> Result<()> {
    encode_stream_definition_into(&map.ref_stream_definition, out)?;
    out.extend_from_slice(map.map_name.as_bytes());
    Ok(())
}

pub fn encode_map_definition(map: &MapDefinition) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_map_definition_into(map, &mut out)?;
    Ok(out)
}

pub fn decode_map_definition(buf: &[u8]) -> Result<MapDefinition> {
    let (ref_stream_definition, pos) = decode_stream_definition(buf)?;
    let map_name = utf8(&buf[pos..])?;
    Ok(MapDefinition { ref_stream_definition, map_name })
}

pub fn encode_key_value_key_into(map_uid: &Uid, key: &str, out: &mut Vec<u8>) {
    map_uid.encode_into(out);
    out.extend_from_slice(key.as_bytes());
}

pub fn decode_key_value_key(buf: &[u8]) -> Result<(Uid, String)> {
    let (uid, pos) = Uid::decode(buf)?;
    Ok((uid, utf8(&buf[pos..])?))
}

pub fn encode_range_key_into(map_uid: &Uid, range: &KeyRange, out: &mut Vec<u8>) {
    map_uid.encode_into(out);
    out.extend_from_slice(&range.from.to_be_bytes());
    out.extend_from_slice(&range.to.to_be_bytes());
}

pub fn decode_range_key(buf: &[u8]) -> Result<(Uid, KeyRange)> {
    let (uid, pos) = Uid::decode(buf)?;
    let from = UnsignedBytes::get(slice_from(buf, pos, RANGE_BOUND_LEN)?, RANGE_BOUND_LEN)?;
    let to = UnsignedBytes::get(
        slice_from(buf, pos + RANGE_BOUND_LEN, RANGE_BOUND_LEN)?,
        RANGE_BOUND_LEN,
    )?;
    Ok((uid, KeyRange { from, to }))
}

/// Replace the map UID at the head of an entry key, keeping the rest of the key
pub fn copy_with_new_uid(source_key: &[u8], new_uid: &Uid, out: &mut Vec<u8>) -> Result<()> {
    let (_, pos) = Uid::decode(source_key)?;
    new_uid.encode_into(out);
    out.extend_from_slice(&source_key[pos..]);
    Ok(())
}

fn put_short_str(s: &str, out: &mut Vec<u8>) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| {
        Error::new(ErrorKind::InvalidArgument, format!("String of {} bytes too long for key", s.len()))
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn get_short_str(buf: &[u8], pos: &mut usize) -> Result<String> {
    let len = UnsignedBytes::get(slice_from(buf, *pos, 2)?, 2)? as usize;
    *pos += 2;
    let s = utf8(slice_from(buf, *pos, len)?)?;
    *pos += len;
    Ok(s)
}

fn slice_from(buf: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    buf.get(pos..pos + len).ok_or_else(|| {
        Error::new(
            ErrorKind::Serialization,
            format!("Key truncated, wanted {} bytes at {} of {}", len, pos, buf.len()),
        )
    })
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::new(ErrorKind::Serialization, format!("Invalid UTF-8 in key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: u64) -> RefStreamDefinition {
        RefStreamDefinition::new("0b4c5a37-pipe", "v1", id).with_part_index(2)
    }

    #[test]
    fn test_stream_definition_decode() {
        let def = stream(123);
        let buf = encode_stream_definition(&def).unwrap();
        let (decoded, consumed) = decode_stream_definition(&buf).unwrap();
        assert_eq!(decoded, def);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_maps_share_stream_prefix() {
        let def = stream(5);
        let prefix = encode_stream_definition(&def).unwrap();
        let map_a = encode_map_definition(&MapDefinition::new(def.clone(), "USER_TO_LOC")).unwrap();
        let map_b = encode_map_definition(&MapDefinition::new(def, "IP_TO_LOC")).unwrap();
        assert!(map_a.starts_with(&prefix));
        assert!(map_b.starts_with(&prefix));

        let other = encode_stream_definition(&stream(6)).unwrap();
        assert!(!map_a.starts_with(&other));

        let decoded = decode_map_definition(&map_a).unwrap();
        assert_eq!(decoded.map_name, "USER_TO_LOC");
    }

    #[test]
    fn test_range_key_ordering_by_from() {
        let uid = Uid::from_value(3);
        let mut a = Vec::new();
        let mut b = Vec::new();
        encode_range_key_into(&uid, &KeyRange::new(10, 20).unwrap(), &mut a);
        encode_range_key_into(&uid, &KeyRange::new(256, 300).unwrap(), &mut b);
        assert!(a < b);

        let (decoded_uid, range) = decode_range_key(&b).unwrap();
        assert_eq!(decoded_uid, uid);
        assert_eq!(range, KeyRange { from: 256, to: 300 });
    }

    #[test]
    fn test_copy_with_new_uid() {
        let mut source = Vec::new();
        encode_key_value_key_into(&Uid::from_value(1), "key1", &mut source);
        let mut dest = Vec::new();
        copy_with_new_uid(&source, &Uid::from_value(1000), &mut dest).unwrap();
        let (uid, key) = decode_key_value_key(&dest).unwrap();
        assert_eq!(uid.value(), 1000);
        assert_eq!(key, "key1");
    }

    #[test]
    fn test_value_store_key() {
        let key = ValueStoreKey::new(0xDEADBEEF, 7);
        assert_eq!(ValueStoreKey::decode(&key.encode()).unwrap(), key);
        assert_eq!(key.next_unique_id().unwrap().unique_id, 8);

        let last = ValueStoreKey::new(1, u16::MAX);
        assert_eq!(last.next_unique_id().unwrap_err().kind, ErrorKind::Overflow);
    }
}
