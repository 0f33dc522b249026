//! Request signing for the read endpoint
//!
//! Two values protect a read request:
//!
//! - `sg`: SHA-256 hex of `{ts}{rn}{key}`
//! - `s`: a 31-bit two-accumulator checksum ([`custom_hash`]) over the
//!   sorted, percent-encoded field list ([`encode_fields`])
//!
//! The server recomputes both, so every detail here (key order, which bytes
//! get escaped, hex casing, shift amounts, masks) has to match exactly.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Field set of a read request, kept sorted by key
pub type RequestFields = BTreeMap<String, Value>;

/// Key mixed into the `sg` signature
pub const SIGNING_KEY: &str = "3c5c8717f3daf09iop3423zafeqoi";

/// Name of the checksum field
pub const CHECKSUM_FIELD: &str = "s";

/// Everything except `A-Z a-z 0-9 _ . - ~` is escaped
const FIELD_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

const HASH_SEED: u64 = 0x1505_1505;
const HASH_MASK: u64 = 0x7fff_ffff;

/// SHA-256 hex over `{ts}{rn}{key}`
pub fn signature(ts: u64, rn: u32, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{ts}{rn}{key}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Text form of a field value as the server expects it
///
/// Strings are used verbatim, booleans are capitalized, `null` is `None`.
pub fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => String::from("True"),
        Value::Bool(false) => String::from("False"),
        Value::Null => String::from("None"),
        other => other.to_string(),
    }
}

/// `key=escaped(value)` pairs in ascending key order joined by `&`
pub fn encode_fields(fields: &RequestFields) -> String {
    fields
        .iter()
        .map(|(key, value)| {
            format!(
                "{key}={}",
                utf8_percent_encode(&field_text(value), FIELD_VALUE)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Checksum sent as the `s` field
///
/// Scans code points from the end in steps of two. The last character of
/// each pair goes into one accumulator shifted by `(len - i) % 30`, the one
/// before it into the other shifted by `i % 30`. Both stay masked to 31
/// bits; the result is the lowercase hex of their sum.
pub fn custom_hash(input: &str) -> String {
    let codes: Vec<u64> = input.chars().map(u64::from).collect();
    let len = codes.len();

    let mut high = HASH_SEED;
    let mut low = HASH_SEED;

    let mut i = len.saturating_sub(1);
    while i > 0 {
        let shift = ((len - i) % 30) as u32;
        high = HASH_MASK & (high ^ (codes[i] << shift));

        let prev_shift = (i % 30) as u32;
        low = HASH_MASK & (low ^ (codes[i - 1] << prev_shift));

        if i < 2 {
            break;
        }
        i -= 2;
    }

    format!("{:x}", high + low)
}

/// Drop any stale checksum and recompute it over the remaining fields
pub fn seal(fields: &mut RequestFields) -> String {
    fields.remove(CHECKSUM_FIELD);
    let checksum = custom_hash(&encode_fields(fields));
    fields.insert(CHECKSUM_FIELD.to_string(), Value::String(checksum.clone()));
    checksum
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_custom_hash_pinned_vectors() {
        assert_eq!(custom_hash("ts=1700000000000&rn=123"), "2f05d604");
        assert_eq!(custom_hash(""), "2a0a2a0a");
        assert_eq!(custom_hash("a"), "2a0a2a0a");
        assert_eq!(custom_hash("ab"), "2a0a2b88");
        assert_eq!(custom_hash("abc"), "2a0a2a50");
        assert_eq!(
            custom_hash(
                "appId=wb182564874663h776775553&b=ce032b305a9bc1ce0b0dd2a&c=0723244023c072b030ba601"
            ),
            "74122256"
        );
    }

    #[test]
    fn test_custom_hash_is_deterministic() {
        let first = custom_hash("ts=1700000000000&rn=123");
        for _ in 0..10 {
            assert_eq!(custom_hash("ts=1700000000000&rn=123"), first);
        }
    }

    #[test]
    fn test_signature_matches_sha256_hex() {
        assert_eq!(
            signature(1_700_000_000_000, 123, SIGNING_KEY),
            "4c5280aaa5635898d6a5eaa52ed64921a10cf5c97abf54b8658950a3b4ee118e"
        );
    }

    #[test]
    fn test_encode_fields_sorts_and_escapes() {
        let mut fields = RequestFields::new();
        fields.insert("b".into(), json!("x y"));
        fields.insert("a".into(), json!("~_.-*/"));
        fields.insert("c".into(), json!(123));
        assert_eq!(encode_fields(&fields), "a=~_.-%2A%2F&b=x%20y&c=123");
    }

    #[test]
    fn test_encode_fields_escapes_utf8_bytes_uppercase() {
        let mut fields = RequestFields::new();
        fields.insert("sm".into(), json!("读"));
        fields.insert("ok".into(), json!(true));
        assert_eq!(encode_fields(&fields), "ok=True&sm=%E8%AF%BB");
    }

    #[test]
    fn test_seal_replaces_previous_checksum() {
        let mut fields = RequestFields::new();
        fields.insert("ts".into(), json!(1_700_000_000_000_u64));
        fields.insert("rn".into(), json!(123));
        fields.insert(CHECKSUM_FIELD.into(), json!("36cc0815"));

        let checksum = seal(&mut fields);
        assert_eq!(checksum, custom_hash("rn=123&ts=1700000000000"));
        assert_eq!(fields[CHECKSUM_FIELD], json!(checksum));

        // Sealing twice gives the same value because the old checksum is excluded
        assert_eq!(seal(&mut fields), checksum);
    }
}
