//! Binary encoding and content hashing.
//!
//! Every payload crossing a transport is bincode-encoded. Parameter blobs
//! and observations are versioned by the hex SHA-256 of their bytes.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Encode a value to bytes.
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a value from bytes.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Deterministic content hash of a binary payload (lowercase hex SHA-256).
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
