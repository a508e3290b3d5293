//! Binary key encoding for [`TreePath`]s stored in LMDB.
//!
//! # Binary Format
//!
//! Every segment is written as its UTF-8 bytes followed by a single
//! terminator byte (0x00):
//!
//! ```text
//! Stellar/ledger/7  ->  "Stellar\0ledger\07\0"
//! ```
//!
//! This format ensures:
//! - A node's own key is a byte prefix of every descendant key
//! - Descendants sort contiguously right after the node, so one prefix scan
//!   visits a whole subtree
//! - Byte order matches segment-wise string order ("1" < "10" < "2")

use pakana_core::TreePath;

/// Terminator byte after each segment.
const TERMINATOR: u8 = 0x00;

/// LMDB's default maximum key size.
pub const MAX_KEY_LEN: usize = 511;

/// Encode a path. Returns `None` if a segment contains the terminator or the
/// key would exceed [`MAX_KEY_LEN`].
pub fn encode_path(path: &TreePath) -> Option<Vec<u8>> {
    let len: usize = path.segments().iter().map(|s| s.len() + 1).sum();
    if len > MAX_KEY_LEN {
        return None;
    }

    let mut bytes = Vec::with_capacity(len);
    for segment in path.segments() {
        if segment.as_bytes().contains(&TERMINATOR) {
            return None;
        }
        bytes.extend_from_slice(segment.as_bytes());
        bytes.push(TERMINATOR);
    }
    Some(bytes)
}

/// Decode a key produced by [`encode_path`].
///
/// Returns `None` if:
/// - The key is empty or does not end with the terminator
/// - Any segment is empty or not valid UTF-8
pub fn decode_path(bytes: &[u8]) -> Option<TreePath> {
    let body = bytes.strip_suffix(&[TERMINATOR])?;
    let segments = body
        .split(|b| *b == TERMINATOR)
        .map(|raw| std::str::from_utf8(raw).ok().map(str::to_string))
        .collect::<Option<Vec<String>>>()?;
    TreePath::from_segments(segments).ok()
}

/// First segment beneath `prefix` in an encoded descendant key.
pub fn child_segment<'k>(key: &'k [u8], prefix: &[u8]) -> Option<&'k str> {
    let rest = key.strip_prefix(prefix)?;
    let end = rest.iter().position(|b| *b == TERMINATOR)?;
    std::str::from_utf8(&rest[..end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(seq: u32) -> TreePath {
        TreePath::global("Stellar").child("ledger").child(seq)
    }

    #[test]
    fn test_encode_format() -> Result<(), String> {
        let encoded = encode_path(&ledger(7)).ok_or("encode failed")?;
        assert_eq!(encoded, b"Stellar\0ledger\x007\0".to_vec());
        Ok(())
    }

    #[test]
    fn test_encode_decode_roundtrip() -> Result<(), String> {
        let path = ledger(42).child("tx").child(3).child("xdr");
        let encoded = encode_path(&path).ok_or("encode failed")?;
        let decoded = decode_path(&encoded).ok_or("decode failed")?;
        assert_eq!(decoded, path);
        Ok(())
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode_path(b"").is_none());
        assert!(decode_path(b"Stellar").is_none());
        assert!(decode_path(b"Stellar\0\0").is_none());
        assert!(decode_path(&[0xFF, 0x00]).is_none());
    }

    #[test]
    fn test_encode_rejects_terminator_and_oversize() {
        assert!(encode_path(&TreePath::global("a\0b")).is_none());
        assert!(encode_path(&TreePath::global(&"x".repeat(MAX_KEY_LEN))).is_none());
    }

    #[test]
    fn test_node_key_prefixes_descendants_only() -> Result<(), String> {
        let node = encode_path(&ledger(1)).ok_or("encode failed")?;
        let child = encode_path(&ledger(1).child("closed_at")).ok_or("encode failed")?;
        let sibling = encode_path(&ledger(10)).ok_or("encode failed")?;
        assert!(child.starts_with(&node));
        assert!(!sibling.starts_with(&node));
        assert_eq!(child_segment(&child, &node), Some("closed_at"));
        Ok(())
    }
}
