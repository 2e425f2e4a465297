use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{RefDataValue, TypedBytes, ValueType};

const REF_COUNT_LEN: usize = 4;

/// Envelope for stored values: `[type id][payload]`
pub fn encode_value(value: &RefDataValue) -> Vec<u8> {
    let payload = value.payload();
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(value.value_type().id());
    out.extend_from_slice(payload);
    out
}

pub fn decode_typed(buf: &[u8]) -> Result<TypedBytes<'_>> {
    let (type_id, bytes) = buf.split_first().ok_or_else(|| {
        Error::new(ErrorKind::Serialization, "Empty value envelope".to_string())
    })?;
    Ok(TypedBytes {
        value_type: ValueType::from_id(*type_id)?,
        bytes,
    })
}

/// Hash over the type id and payload, so equal envelopes always hash equal
pub fn content_hash(envelope: &[u8]) -> u32 {
    crc32fast::hash(envelope)
}

/// Meta row for a stored value: `[type id][reference count:4]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueStoreMeta {
    pub value_type: ValueType,
    pub reference_count: u32,
}

impl ValueStoreMeta {
    pub fn new(value_type: ValueType) -> Self {
        ValueStoreMeta { value_type, reference_count: 1 }
    }

    pub fn encode(&self) -> [u8; 1 + REF_COUNT_LEN] {
        let mut buf = [0u8; 1 + REF_COUNT_LEN];
        buf[0] = self.value_type.id();
        buf[1..].copy_from_slice(&self.reference_count.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != 1 + REF_COUNT_LEN {
            return Err(Error::new(
                ErrorKind::Serialization,
                format!("Value meta must be {} bytes, got {}", 1 + REF_COUNT_LEN, buf.len()),
            ));
        }
        let mut count = [0u8; REF_COUNT_LEN];
        count.copy_from_slice(&buf[1..]);
        Ok(ValueStoreMeta {
            value_type: ValueType::from_id(buf[0])?,
            reference_count: u32::from_be_bytes(count),
        })
    }

    pub fn incremented(&self) -> Result<Self> {
        let reference_count = self.reference_count.checked_add(1).ok_or_else(|| {
            Error::overflow("Value reference count at max".to_string())
        })?;
        Ok(ValueStoreMeta { reference_count, ..*self })
    }

    pub fn decremented(&self) -> Result<Self> {
        let reference_count = self.reference_count.checked_sub(1).ok_or_else(|| {
            Error::overflow("Value reference count already zero".to_string())
        })?;
        Ok(ValueStoreMeta { reference_count, ..*self })
    }
}
