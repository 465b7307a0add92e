//! Stable per-URL names and seeds

use sha2::{Digest, Sha256};
use url::Url;

const MAX_STEM: usize = 60;

fn digest(url: &str) -> [u8; 32] {
    let out = Sha256::digest(url.trim().as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&out);
    bytes
}

/// File-system safe name for a URL: sanitised host and path plus the first
/// 8 hex characters of the URL's SHA-256, so distinct URLs never collide on
/// a shared stem.
pub fn slug(url: &str) -> String {
    let trimmed = url.trim();
    let stem_source = match Url::parse(trimmed) {
        Ok(parsed) => format!("{}{}", parsed.host_str().unwrap_or(""), parsed.path()),
        Err(_) => trimmed.to_string(),
    };

    let mut stem = String::with_capacity(stem_source.len());
    for ch in stem_source.chars() {
        if ch.is_ascii_alphanumeric() {
            stem.push(ch.to_ascii_lowercase());
        } else if !stem.ends_with('_') && !stem.is_empty() {
            stem.push('_');
        }
    }
    let mut stem = stem.trim_end_matches('_').to_string();
    stem.truncate(MAX_STEM);
    if stem.is_empty() {
        stem.push_str("page");
    }

    let hash = hex::encode(&digest(trimmed)[..4]);
    format!("{}-{}", stem, hash)
}

/// Clustering seed for a URL: the first 8 bytes of its SHA-256.
pub fn url_seed(url: &str) -> u64 {
    let d = digest(url);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&d[..8]);
    u64::from_be_bytes(bytes)
}
