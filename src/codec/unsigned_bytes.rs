use crate::core::error::{Error, ErrorKind, Result};

pub const MAX_LENGTH: usize = 8;

/// Fixed width big-endian encoding for unsigned integers.
/// For a given width the byte order of two encoded values equals their numeric order.
pub struct UnsignedBytes;

impl UnsignedBytes {
    /// Largest value representable in `len` bytes
    pub fn max_value(len: usize) -> Result<u64> {
        Self::check_length(len)?;
        if len == MAX_LENGTH {
            Ok(u64::MAX)
        } else {
            Ok((1u64 << (len * 8)) - 1)
        }
    }

    /// Minimum number of bytes needed to hold `value`, never less than 1
    pub fn required_length(value: u64) -> usize {
        let bits = 64 - value.leading_zeros() as usize;
        bits.div_ceil(8).max(1)
    }

    /// Write `value` as `len` big-endian bytes at the start of `buf`
    pub fn put(buf: &mut [u8], len: usize, value: u64) -> Result<()> {
        let max = Self::max_value(len)?;
        if value > max {
            return Err(Error::overflow(format!(
                "Value {} cannot be held in {} byte(s), max is {}", value, len, max
            )));
        }
        Self::check_capacity(buf.len(), len)?;

        let bytes = value.to_be_bytes();
        buf[..len].copy_from_slice(&bytes[MAX_LENGTH - len..]);
        Ok(())
    }

    pub fn to_vec(len: usize, value: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        Self::put(&mut buf, len, value)?;
        Ok(buf)
    }

    /// Read a `len` byte big-endian value from the start of `buf`
    pub fn get(buf: &[u8], len: usize) -> Result<u64> {
        Self::check_length(len)?;
        Self::check_capacity(buf.len(), len)?;

        let mut bytes = [0u8; MAX_LENGTH];
        bytes[MAX_LENGTH - len..].copy_from_slice(&buf[..len]);
        Ok(u64::from_be_bytes(bytes))
    }

    /// Add one to the `len` byte window in place. Fails rather than wrapping at the max value.
    pub fn increment(buf: &mut [u8], len: usize) -> Result<()> {
        let value = Self::get(buf, len)?;
        let max = Self::max_value(len)?;
        if value == max {
            return Err(Error::overflow(format!(
                "Incrementing {} would exceed the max value for {} byte(s)", value, len
            )));
        }
        Self::put(buf, len, value + 1)
    }

    /// Subtract one from the `len` byte window in place. Fails rather than wrapping below zero.
    pub fn decrement(buf: &mut [u8], len: usize) -> Result<()> {
        let value = Self::get(buf, len)?;
        if value == 0 {
            return Err(Error::overflow(format!(
                "Decrementing {} byte(s) value would go below zero", len
            )));
        }
        Self::put(buf, len, value - 1)
    }

    fn check_length(len: usize) -> Result<()> {
        if len == 0 || len > MAX_LENGTH {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Length {} must be between 1 and {}", len, MAX_LENGTH),
            ));
        }
        Ok(())
    }

    fn check_capacity(available: usize, len: usize) -> Result<()> {
        if available < len {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Buffer of {} byte(s) too small for length {}", available, len),
            ));
        }
        Ok(())
    }
}
