pub mod unsigned_bytes;
pub mod uid;
pub mod keys;
pub mod value;
