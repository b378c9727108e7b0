//! Query fingerprints
//!
//! Deterministic hash of a normalized query, used as the cache key together
//! with the entity class. Two queries that normalize identically share a
//! fingerprint regardless of how the caller spelled their filters.

use sha2::{Digest, Sha256};

use super::NormalizedQuery;

/// Hex fingerprint of a normalized query (truncated SHA-256)
///
/// The normalized form serializes with a fixed field order, so the bytes are
/// stable for equal queries within a process; the cache is per-process, which
/// is all this needs.
pub fn fingerprint(query: &NormalizedQuery) -> String {
    let canonical =
        serde_json::to_string(query).expect("normalized query serialization is infallible");
    let digest = Sha256::digest(canonical.as_bytes());
    // 16 bytes of digest is plenty for a per-process cache key
    let mut out = String::with_capacity(32);
    for byte in &digest[..16] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{CmpOp, Field, Filter};
    use crate::query::EntityType;

    #[test]
    fn equal_queries_share_fingerprints() {
        let a = NormalizedQuery::all(EntityType::Tasks);
        let b = NormalizedQuery::all(EntityType::Tasks);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_filters_differ() {
        let a = NormalizedQuery::all(EntityType::Tasks);
        let mut b = NormalizedQuery::all(EntityType::Tasks);
        b.filter = Filter::cmp(Field::Flagged, CmpOp::Eq, true);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn limit_and_offset_participate() {
        let a = NormalizedQuery::all(EntityType::Tasks);
        let mut b = NormalizedQuery::all(EntityType::Tasks);
        b.offset = 10;
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_is_32_hex_chars() {
        let fp = fingerprint(&NormalizedQuery::all(EntityType::Tags));
        assert_eq!(fp.len(), 32);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
