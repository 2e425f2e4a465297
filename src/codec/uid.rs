use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use crate::codec::unsigned_bytes::{UnsignedBytes, MAX_LENGTH};
use crate::core::error::{Error, ErrorKind, Result};

/// Compact identifier interned for a map definition.
///
/// Holds the big-endian value in a buffer of `width` bytes. Two UIDs are equal when
/// their values are equal, whatever the width of their buffers.
#[derive(Clone)]
pub struct Uid {
    bytes: Vec<u8>,
}

impl Uid {
    pub const MIN_WIDTH: usize = 1;

    /// UID held in the smallest buffer that fits `value`
    pub fn from_value(value: u64) -> Self {
        let width = UnsignedBytes::required_length(value);
        let mut bytes = vec![0u8; width];
        // width always fits value
        let be = value.to_be_bytes();
        bytes.copy_from_slice(&be[MAX_LENGTH - width..]);
        Uid { bytes }
    }

    pub fn with_width(value: u64, width: usize) -> Result<Self> {
        Ok(Uid { bytes: UnsignedBytes::to_vec(width, value)? })
    }

    /// Lowest UID for a buffer of `width` bytes, used as the start of traversals
    pub fn min_value(width: usize) -> Result<Self> {
        Self::with_width(0, width)
    }

    /// Copy raw big-endian bytes into a new, independently owned UID
    pub fn copy_from(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > MAX_LENGTH {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("UID width {} out of range", bytes.len()),
            ));
        }
        Ok(Uid { bytes: bytes.to_vec() })
    }

    pub fn value(&self) -> u64 {
        let mut be = [0u8; MAX_LENGTH];
        be[MAX_LENGTH - self.bytes.len()..].copy_from_slice(&self.bytes);
        u64::from_be_bytes(be)
    }

    pub fn width(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Increment in place, failing if the value no longer fits the current width
    pub fn increment(&mut self) -> Result<()> {
        let width = self.bytes.len();
        UnsignedBytes::increment(&mut self.bytes, width)
    }

    /// Same value held in a buffer one byte wider
    pub fn widened(&self) -> Result<Self> {
        Self::with_width(self.value(), self.width() + 1)
    }

    /// Key form: `[width][value]` using the minimal width, so byte order equals numeric order
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let canonical = Uid::from_value(self.value());
        out.push(canonical.bytes.len() as u8);
        out.extend_from_slice(&canonical.bytes);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAX_LENGTH + 1);
        self.encode_into(&mut out);
        out
    }

    /// Decode a UID from the head of `buf`, returning it and the bytes consumed
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let width = *buf.first().ok_or_else(|| {
            Error::new(ErrorKind::Serialization, "Empty UID buffer".to_string())
        })? as usize;
        if width == 0 || width > MAX_LENGTH || buf.len() < 1 + width {
            return Err(Error::new(
                ErrorKind::Serialization,
                format!("Invalid UID encoding, width {} in buffer of {}", width, buf.len()),
            ));
        }
        Ok((Uid { bytes: buf[1..1 + width].to_vec() }, 1 + width))
    }

    pub fn encoded_len(&self) -> usize {
        1 + UnsignedBytes::required_length(self.value())
    }
}

impl PartialEq for Uid {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl Eq for Uid {}

impl PartialOrd for Uid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Uid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value().cmp(&other.value())
    }
}

impl Hash for Uid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value().hash(state);
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({}, width {})", self.value(), self.width())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_across_widths() {
        let narrow = Uid::from_value(7);
        let wide = Uid::with_width(7, 4).unwrap();
        assert_eq!(narrow.width(), 1);
        assert_eq!(wide.width(), 4);
        assert_eq!(narrow, wide);
        assert_eq!(narrow.encode(), wide.encode());
    }

    #[test]
    fn test_increment_overflow_then_widen() {
        let mut uid = Uid::from_value(255);
        assert_eq!(uid.increment().unwrap_err().kind, ErrorKind::Overflow);

        let mut widened = uid.widened().unwrap();
        widened.increment().unwrap();
        assert_eq!(widened.value(), 256);
        assert_eq!(widened.width(), 2);
    }

    #[test]
    fn test_encoded_order_is_numeric() {
        let mut encoded: Vec<(u64, Vec<u8>)> = [0u64, 1, 255, 256, 70_000, 5]
            .iter()
            .map(|v| (*v, Uid::from_value(*v).encode()))
            .collect();
        encoded.sort_by(|a, b| a.1.cmp(&b.1));
        let values: Vec<u64> = encoded.iter().map(|(v, _)| *v).collect();
        assert_eq!(values, vec![0, 1, 5, 255, 256, 70_000]);
    }

    #[test]
    fn test_decode() {
        let uid = Uid::from_value(300);
        let mut buf = uid.encode();
        buf.extend_from_slice(b"key");
        let (decoded, consumed) = Uid::decode(&buf).unwrap();
        assert_eq!(decoded, uid);
        assert_eq!(&buf[consumed..], b"key");
        assert!(Uid::decode(&[3, 1]).is_err());
    }

    #[test]
    fn test_min_value_and_copy() {
        let min = Uid::min_value(3).unwrap();
        assert_eq!(min.value(), 0);
        assert_eq!(min.width(), 3);

        let source = vec![0u8, 42];
        let copy = Uid::copy_from(&source).unwrap();
        drop(source);
        assert_eq!(copy.value(), 42);
    }
}
