//! Candidate acquisition streams

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static BTIH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"urn:btih:([A-Fa-f0-9]{40}|[A-Za-z2-7]{32})").unwrap());

/// A candidate acquisition shared across items. Relations to items are
/// many-to-many with a per-item blacklist kept disjoint from the candidate
/// set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: i64,
    /// 160-bit infohash, lowercase hex.
    pub infohash: String,
    pub raw_title: String,
    pub parsed_title: Option<String>,
    pub rank: i32,
}

/// Normalize an infohash to 40-char lowercase hex. Accepts bare hashes and
/// full magnet links; magnet links in the wild carry either hex or RFC 4648
/// base32 hashes.
pub fn normalize_infohash(raw: &str) -> Option<String> {
    let mut trimmed = raw.trim();

    if trimmed.contains("magnet:") || trimmed.contains("urn:btih:") {
        trimmed = BTIH_RE.captures(trimmed)?.get(1)?.as_str();
    }

    if trimmed.len() == 40 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(trimmed.to_ascii_lowercase());
    }

    if trimmed.len() == 32 {
        let decoded = base32::decode(
            base32::Alphabet::Rfc4648 { padding: false },
            &trimmed.to_ascii_uppercase(),
        )?;
        if decoded.len() == 20 {
            return Some(hex::encode(decoded));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_hashes_are_lowercased() {
        let raw = "2AA4F5A7E209E54B32803D43670971C4C8CAAA05";
        assert_eq!(
            normalize_infohash(raw).unwrap(),
            "2aa4f5a7e209e54b32803d43670971c4c8caaa05"
        );
    }

    #[test]
    fn base32_hashes_decode_to_hex() {
        // base32 of the 20 bytes 0x00..0x13
        let raw = "aaaqeayeaudaocajbifqydiob4ibceqt";
        let normalized = normalize_infohash(raw).unwrap();
        assert_eq!(normalized, hex::encode((0u8..20).collect::<Vec<_>>()));
        assert_eq!(normalized.len(), 40);
    }

    #[test]
    fn magnet_links_yield_their_hash() {
        let magnet =
            "magnet:?xt=urn:btih:2AA4F5A7E209E54B32803D43670971C4C8CAAA05&dn=Some.Release";
        assert_eq!(
            normalize_infohash(magnet).unwrap(),
            "2aa4f5a7e209e54b32803d43670971c4c8caaa05"
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(normalize_infohash("not-a-hash").is_none());
        assert!(normalize_infohash("").is_none());
        assert!(normalize_infohash("zzzz").is_none());
        assert!(normalize_infohash("magnet:?dn=no-hash-here").is_none());
    }
}
