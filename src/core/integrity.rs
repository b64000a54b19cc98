use crate::core::table::Table;
use sha2::{Digest, Sha256};

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// Checksum over columns, rows and `(blob name, blob sha256)` pairs.
///
/// Every string is length-prefixed, so moving a character between adjacent
/// cells changes the digest. Blob pairs must be sorted by name.
pub fn snapshot_checksum(table: &Table, blob_digests: &[(String, String)]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((table.columns.len() as u64).to_le_bytes());
    for column in &table.columns {
        update_str(&mut hasher, column);
    }
    hasher.update((table.rows.len() as u64).to_le_bytes());
    for row in &table.rows {
        for cell in row {
            update_str(&mut hasher, cell);
        }
    }
    hasher.update((blob_digests.len() as u64).to_le_bytes());
    for (name, digest) in blob_digests {
        update_str(&mut hasher, name);
        update_str(&mut hasher, digest);
    }
    format!("{:x}", hasher.finalize())
}
