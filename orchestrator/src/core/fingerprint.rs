//! Content fingerprints that ignore volatile tokens.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?").unwrap()
});
static HEX_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b[0-9a-f]{8,}\b").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strip ISO-8601 timestamps and 8+ character hex ids, then collapse whitespace.
pub fn normalize_output(output: &str) -> String {
    let without_timestamps = TIMESTAMP_RE.replace_all(output, "");
    let without_ids = HEX_ID_RE.replace_all(&without_timestamps, "");
    WHITESPACE_RE
        .replace_all(&without_ids, " ")
        .trim()
        .to_string()
}

/// First [`FINGERPRINT_LEN`] hex characters of SHA-256 over the normalized text.
pub fn fingerprint(output: &str) -> String {
    let normalized = normalize_output(output);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(FINGERPRINT_LEN);
    digest
}
