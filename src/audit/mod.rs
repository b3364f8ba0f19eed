//! Content hashing for fragment identity and run auditability.

use sha2::{Digest, Sha256};
use serde::Serialize;
use std::io::Write;

/// Stable id for a fragment: identical content at the same position of the
/// same document always hashes to the same id.
pub fn fragment_id(entity_id: &str, document_id: &str, char_offset: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(char_offset.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of the JSON form of `value`, streamed straight into the hasher.
pub fn compute_context_hash<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), value).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
