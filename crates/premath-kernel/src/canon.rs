//! Canonical JSON encoding and content-addressed `Ref` digests.
//!
//! Every digest the kernel and its collaborators compute — `ev1_`, `cmp1_`,
//! `kcir1_`, `loc1_`, `prop1_`, `instr1_`, `ckpt1_`, `run1_`, `iss1_`,
//! `sqw1_`, `obl1_`, `note1_`, `pol1_` — is derived the same way:
//!
//! ```text
//! Ref(scheme, value) = scheme || sha256(canonical_encoding(value))
//! ```
//!
//! `witness.rs` computes its own `w1_` witness IDs with a hand-rolled JCS
//! encoder (kept as-is, since witness IDs are pinned to exact fixture
//! strings); this module is the general-purpose primitive for everything
//! else that needs a stable digest of a JSON-like value.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// A 32-byte content hash, always rendered lower-hex.
pub type Digest256 = [u8; 32];

pub fn render_digest(digest: &Digest256) -> String {
    let mut s = String::with_capacity(64);
    for byte in digest {
        s.push_str(&format!("{byte:02x}"));
    }
    s
}

/// The unique byte encoding of a JSON-like value: keys lexicographically
/// sorted at every object level, no insignificant whitespace, `","`/`":"`
/// separators, UTF-8, arrays preserve order.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    write_canonical(value, &mut buf);
    buf
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(_) => out.extend_from_slice(&serde_json::to_vec(value).unwrap()),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(&serde_json::to_vec(&Value::String((*key).clone())).unwrap());
                out.push(b':');
                write_canonical(&map[*key], out);
            }
            out.push(b'}');
        }
    }
}

/// Derive a `Ref(scheme, value)` per §3.1: `scheme || sha256(canonical(value))`.
///
/// `scheme` is expected to include its trailing underscore (e.g. `"kcir1_"`).
pub fn derive_ref(scheme: &str, value: &Value) -> String {
    let digest = Sha256::digest(canonical_json_bytes(value));
    format!("{scheme}{digest:x}")
}

/// Derive a `Ref` directly from raw bytes rather than a JSON value (used for
/// KCIR object normal forms, which are already a canonical byte encoding).
pub fn derive_ref_bytes(scheme: &str, bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{scheme}{digest:x}")
}

/// Split a tagged ref into its scheme prefix and raw digest, if well-formed.
///
/// Two refs with the same digest but different scheme prefixes are distinct
/// identities — callers must compare the whole string, not just the digest.
pub fn split_ref(reference: &str) -> Option<(&str, &str)> {
    reference.rfind('_').map(|idx| reference.split_at(idx + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": 2});
        let bytes = canonical_json_bytes(&value);
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_json_no_whitespace_nested() {
        let value = json!({"outer": {"z": [1, 2, 3], "a": null}});
        let bytes = canonical_json_bytes(&value);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"outer":{"a":null,"z":[1,2,3]}}"#
        );
    }

    #[test]
    fn derive_ref_is_deterministic_and_scheme_sensitive() {
        let value = json!({"x": 1});
        let r1 = derive_ref("ev1_", &value);
        let r2 = derive_ref("ev1_", &value);
        assert_eq!(r1, r2);
        assert!(r1.starts_with("ev1_"));

        let r3 = derive_ref("cmp1_", &value);
        assert_ne!(r1, r3, "same digest under a different scheme must differ");
        assert_eq!(&r1[4..], &r3[5..], "digest portion itself agrees");
    }

    #[test]
    fn split_ref_recovers_scheme_and_digest() {
        let reference = derive_ref("kcir1_", &json!(null));
        let (scheme, digest) = split_ref(&reference).unwrap();
        assert_eq!(scheme, "kcir1_");
        assert_eq!(digest.len(), 64);
    }
}
