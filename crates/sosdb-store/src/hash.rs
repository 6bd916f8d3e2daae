//! Blake3 content hashes for large-object payloads

/// Full hex blake3 hash of a payload.
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Check a payload against a previously recorded hex hash.
pub fn matches(data: &[u8], expected: &str) -> bool {
    blake3::hash(data).to_hex().as_str() == expected
}

/// First 8 hex characters of a hash, for display. Input that cannot be
/// cut at byte 8 is returned whole.
pub fn short_hash(hex: &str) -> &str {
    hex.get(..8).unwrap_or(hex)
}
