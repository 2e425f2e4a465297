pub mod layout;
pub mod txn;
pub mod map_uid_store;
pub mod value_store;
pub mod key_value_db;
pub mod range_db;
pub mod processing_info_db;

use std::ops::Bound;
use redb::ReadableTable;
use crate::core::error::Result;

/// Smallest key greater than every key starting with `prefix`,
/// `None` when no such key exists (prefix all 0xFF).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Visit entries whose key starts with `prefix`, in key order, until `visit` returns false
pub fn scan_prefix<T, F>(table: &T, prefix: &[u8], mut visit: F) -> Result<()>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
    F: FnMut(&[u8], &[u8]) -> Result<bool>,
{
    let end = prefix_end(prefix);
    let upper: Bound<&[u8]> = match &end {
        Some(end) => Bound::Excluded(end.as_slice()),
        None => Bound::Unbounded,
    };
    for item in table.range::<&[u8]>((Bound::Included(prefix), upper))? {
        let (key, value) = item?;
        if !visit(key.value(), value.value())? {
            break;
        }
    }
    Ok(())
}

/// Keys (copied out) of every entry starting with `prefix`, up to `limit` of them
pub fn collect_prefix_keys<T>(table: &T, prefix: &[u8], limit: usize) -> Result<Vec<Vec<u8>>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut keys = Vec::new();
    scan_prefix(table, prefix, |key, _| {
        keys.push(key.to_vec());
        Ok(keys.len() < limit)
    })?;
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(&[1, 2, 3]), Some(vec![1, 2, 4]));
        assert_eq!(prefix_end(&[1, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_end(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_end(&[]), None);
    }
}
