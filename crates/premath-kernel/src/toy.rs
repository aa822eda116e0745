//! Toy bit-worlds for Gate conformance testing.
//!
//! These implement the exact same semantics as the Python toy worlds
//! in the spec's `tools/toy/toy_worlds.py`, allowing us to run the
//! spec's test vectors and produce identical witness IDs.
//!
//! ## Argument conventions
//!
//! Our Rust `restrict(a, src, tgt)` means:
//!   "restrict element `a ∈ Def(src)` to `Def(tgt)` where `tgt ⊆ src`"
//!
//! This maps to the Python's `restrict(src_mask, tgt_mask, a)` as:
//!   Python's `tgt_mask` = our `src` (bigger, where a lives)
//!   Python's `src_mask` = our `tgt` (smaller, where we're restricting to)
//!
//! ## Worlds
//!
//! - **SheafBits**: The golden model. Full sheaf of bit-functions.
//!   `Def(mask)` = total functions `bits(mask) → {0,1}`.
//!   Restriction by projection (drop irrelevant bits).
//!
//! - **BadConstant**: `Def(mask≠∅) = {0,1}`, `Def(∅) = {"*"}`.
//!   Restriction to empty context returns `"*"` (the unique empty-context
//!   inhabitant). This means overlap compatibility passes on disjoint covers,
//!   but no global glue exists (GATE-3.3 failure).
//!
//! - **NonSeparated**: Like BadConstant but restriction always returns 0.
//!   Restriction to empty context returns `"*"`.
//!   Violates uniqueness (both 0 and 1 restrict to local 0).
//!   Overlap passes, but multiple glue candidates exist (GATE-3.4 failure).
//!
//! - **BadStability**: Like BadConstant but with a non-functorial override.
//!   Direct restriction 7→1 returns 0, but via 7→3→1 returns 1.
//!
//! - **PartialRestrict**: Like BadConstant but restriction to singletons
//!   is undefined. Tests locality failures.

use crate::gate::World;
use serde_json::Value;

/// The empty-context inhabitant for simple constant worlds.
///
/// v7: Uses `"*"` (JSON string) instead of `null` to disambiguate from
/// "restriction undefined" (which returns `None`/Option::None).
fn star() -> Value {
    Value::String("*".to_string())
}

/// Enumerate for simple constant worlds: Def(0) = {"*"}, Def(mask≠0) = {0, 1}.
fn simple_enumerate(gamma: u64) -> Option<Vec<Value>> {
    if gamma == 0 {
        Some(vec![star()])
    } else {
        Some(vec![Value::Number(0.into()), Value::Number(1.into())])
    }
}

/// Get a toy world by name (matching fixture "world" field).
pub fn get_world(name: &str) -> Option<Box<dyn World>> {
    match name {
        "sheaf_bits" => Some(Box::new(SheafBits)),
        "bad_constant" => Some(Box::new(BadConstant)),
        "non_separated" => Some(Box::new(NonSeparated)),
        "bad_stability" => Some(Box::new(BadStability)),
        "partial_restrict" => Some(Box::new(PartialRestrict)),
        _ => None,
    }
}

/// Extract the bit indices that are set in a mask.
fn bits_of(mask: u64) -> Vec<u64> {
    let mut bits = Vec::new();
    let mut m = mask;
    let mut i = 0;
    while m > 0 {
        if m & 1 == 1 {
            bits.push(i);
        }
        m >>= 1;
        i += 1;
    }
    bits
}

// ─── SheafBits ──────────────────────────────────────────────────────────────

/// The golden model: full sheaf of bit-functions.
///
/// `Def(mask)` = all total functions from `bits(mask) → {0,1}`.
/// Represented as JSON objects `{"0": 1, "1": 0, ...}`.
/// Restriction = projection (keep only bits present in target mask).
///
/// This is the unique model where every gate check passes.
pub struct SheafBits;

impl World for SheafBits {
    fn name(&self) -> &str {
        "sheaf_bits"
    }

    fn is_definable(&self, gamma: u64, a: &Value) -> bool {
        match a {
            Value::Object(map) => {
                let expected_bits = bits_of(gamma);
                if map.len() != expected_bits.len() {
                    return false;
                }
                for bit in &expected_bits {
                    let key = bit.to_string();
                    match map.get(&key) {
                        Some(Value::Number(n)) => {
                            if let Some(v) = n.as_u64() {
                                if v > 1 {
                                    return false;
                                }
                            } else {
                                return false;
                            }
                        }
                        _ => return false,
                    }
                }
                true
            }
            _ => false,
        }
    }

    fn restrict(&self, a: &Value, _src: u64, tgt: u64) -> Option<Value> {
        // Project a onto the bits of tgt.
        // For tgt=0, bits_of(0) = [] → returns empty object {} which is Def(0).
        match a {
            Value::Object(map) => {
                let tgt_bits = bits_of(tgt);
                let mut result = serde_json::Map::new();
                for bit in &tgt_bits {
                    let key = bit.to_string();
                    match map.get(&key) {
                        Some(v) => {
                            result.insert(key, v.clone());
                        }
                        None => return None, // key not present → restriction undefined
                    }
                }
                Some(Value::Object(result))
            }
            _ => None,
        }
    }

    fn same(&self, _gamma: u64, a: &Value, b: &Value) -> bool {
        a == b
    }

    fn is_cover(&self, gamma: u64, legs: &[u64]) -> bool {
        let union: u64 = legs.iter().fold(0, |acc, &leg| acc | leg);
        (union & gamma) == gamma
    }

    fn overlap(&self, leg_i: u64, leg_j: u64) -> u64 {
        leg_i & leg_j
    }

    fn enumerate(&self, gamma: u64) -> Option<Vec<Value>> {
        let bits = bits_of(gamma);
        let n = bits.len();
        // All 2^n total functions from bits(gamma) → {0,1}
        let count = 1u64 << n;
        let mut result = Vec::with_capacity(count as usize);
        for x in 0..count {
            let mut map = serde_json::Map::new();
            for (i, bit) in bits.iter().enumerate() {
                let val = (x >> i) & 1;
                map.insert(bit.to_string(), Value::Number(val.into()));
            }
            result.push(Value::Object(map));
        }
        Some(result)
    }
}

// ─── BadConstant ────────────────────────────────────────────────────────────

/// `Def(mask≠0) = {0, 1}` as plain integers, `Def(0) = {"*"}`.
///
/// Restriction to empty context returns `"*"` (the unique inhabitant), so
/// overlap compatibility on disjoint covers passes (both sides restrict to `"*"`),
/// but no global candidate restricts to mismatched locals → GATE-3.3 failure.
pub struct BadConstant;

impl World for BadConstant {
    fn name(&self) -> &str {
        "bad_constant"
    }

    fn is_definable(&self, gamma: u64, a: &Value) -> bool {
        if gamma == 0 {
            a == &star()
        } else {
            a.is_number()
        }
    }

    fn restrict(&self, a: &Value, _src: u64, tgt: u64) -> Option<Value> {
        // Restriction to empty context returns the unique inhabitant "*"
        if tgt == 0 {
            return Some(star());
        }
        // Otherwise identity
        Some(a.clone())
    }

    fn same(&self, _gamma: u64, a: &Value, b: &Value) -> bool {
        a == b
    }

    fn is_cover(&self, gamma: u64, legs: &[u64]) -> bool {
        let union: u64 = legs.iter().fold(0, |acc, &leg| acc | leg);
        (union & gamma) == gamma
    }

    fn overlap(&self, leg_i: u64, leg_j: u64) -> u64 {
        leg_i & leg_j
    }

    fn enumerate(&self, gamma: u64) -> Option<Vec<Value>> {
        simple_enumerate(gamma)
    }
}

// ─── NonSeparated ───────────────────────────────────────────────────────────

/// Like BadConstant, but restriction to non-empty always returns 0.
/// Restriction to empty context returns `"*"`.
///
/// This world violates uniqueness (non-contractible glue space):
/// - Both globals 0 and 1 restrict to local 0 on any non-empty context
/// - Overlap compatibility passes (both restrict to `"*"` on empty overlap)
/// - But two candidates glue → GATE-3.4 glue_non_contractible failure
pub struct NonSeparated;

impl World for NonSeparated {
    fn name(&self) -> &str {
        "non_separated"
    }

    fn is_definable(&self, gamma: u64, a: &Value) -> bool {
        if gamma == 0 {
            a == &star()
        } else {
            a.is_number()
        }
    }

    fn restrict(&self, _a: &Value, _src: u64, tgt: u64) -> Option<Value> {
        // Restriction to empty context returns "*"
        if tgt == 0 {
            return Some(star());
        }
        // For non-empty targets, always return constant 0
        Some(Value::Number(0.into()))
    }

    fn same(&self, _gamma: u64, a: &Value, b: &Value) -> bool {
        a == b
    }

    fn is_cover(&self, gamma: u64, legs: &[u64]) -> bool {
        let union: u64 = legs.iter().fold(0, |acc, &leg| acc | leg);
        (union & gamma) == gamma
    }

    fn overlap(&self, leg_i: u64, leg_j: u64) -> u64 {
        leg_i & leg_j
    }

    fn enumerate(&self, gamma: u64) -> Option<Vec<Value>> {
        simple_enumerate(gamma)
    }
}

// ─── BadStability ───────────────────────────────────────────────────────────

/// Like BadConstant, but with a non-functorial override:
/// Direct restriction from context 7 to context 1 always returns 0,
/// even though composing via context 3 would give a different result.
///
/// This violates the composition law: (f∘g)* ≠ g*(f*).
pub struct BadStability;

impl World for BadStability {
    fn name(&self) -> &str {
        "bad_stability"
    }

    fn is_definable(&self, gamma: u64, a: &Value) -> bool {
        if gamma == 0 {
            a.is_null()
        } else {
            a.is_number()
        }
    }

    fn restrict(&self, a: &Value, src: u64, tgt: u64) -> Option<Value> {
        // Restriction to empty context is undefined
        if tgt == 0 {
            return None;
        }

        // Non-functorial override: src=7, tgt=1 always gives 0
        if src == 7 && tgt == 1 {
            return Some(Value::Number(0.into()));
        }

        // Otherwise identity
        Some(a.clone())
    }

    fn same(&self, _gamma: u64, a: &Value, b: &Value) -> bool {
        a == b
    }

    fn is_cover(&self, gamma: u64, legs: &[u64]) -> bool {
        let union: u64 = legs.iter().fold(0, |acc, &leg| acc | leg);
        (union & gamma) == gamma
    }

    fn overlap(&self, leg_i: u64, leg_j: u64) -> u64 {
        leg_i & leg_j
    }

    fn enumerate(&self, gamma: u64) -> Option<Vec<Value>> {
        simple_enumerate(gamma)
    }
}

// ─── PartialRestrict ────────────────────────────────────────────────────────

/// Like BadConstant, but restriction to singleton contexts (popcount=1)
/// is undefined. Tests locality failures.
pub struct PartialRestrict;

impl World for PartialRestrict {
    fn name(&self) -> &str {
        "partial_restrict"
    }

    fn is_definable(&self, gamma: u64, a: &Value) -> bool {
        if gamma == 0 {
            a.is_null()
        } else {
            a.is_number()
        }
    }

    fn restrict(&self, a: &Value, _src: u64, tgt: u64) -> Option<Value> {
        // Restriction to empty context is undefined
        if tgt == 0 {
            return None;
        }

        // Restriction to singleton (exactly one bit set) is undefined
        if tgt.count_ones() == 1 {
            return None;
        }

        // Otherwise identity
        Some(a.clone())
    }

    fn same(&self, _gamma: u64, a: &Value, b: &Value) -> bool {
        a == b
    }

    fn is_cover(&self, gamma: u64, legs: &[u64]) -> bool {
        let union: u64 = legs.iter().fold(0, |acc, &leg| acc | leg);
        (union & gamma) == gamma
    }

    fn overlap(&self, leg_i: u64, leg_j: u64) -> u64 {
        leg_i & leg_j
    }

    fn enumerate(&self, gamma: u64) -> Option<Vec<Value>> {
        simple_enumerate(gamma)
    }
}
