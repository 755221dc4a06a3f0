//! Task ids and content digests.
//!
//! A task id is `tk-` followed by the first five bytes of a SHA-256 over the
//! title, the creation instant and eight random bytes. The random bytes keep
//! two tasks with the same title and timestamp apart; callers still check the
//! store for a collision before using an id.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Prefix shared by every task id.
pub const ID_PREFIX: &str = "tk-";

const ID_BYTES: usize = 5;

pub fn generate_id(title: &str, created_at: DateTime<Utc>) -> String {
    let salt: [u8; 8] = rand::rng().random();
    let hash = Sha256::new()
        .chain_update(title.as_bytes())
        .chain_update(created_at.timestamp_micros().to_le_bytes())
        .chain_update(salt)
        .finalize();
    format!("{}{}", ID_PREFIX, hex(&hash[..ID_BYTES]))
}

/// Hex SHA-256 of `bytes`; names backups and detects unchanged mirrors.
pub fn content_digest(bytes: &[u8]) -> String {
    hex(&Sha256::digest(bytes))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
