//! The KCIR verifier: a typed DAG over content-addressed nodes.
//!
//! A `KcirStore` holds four tables — `certs` (node-ref → node bytes), `obj`
//! (obj-ref → object-normal-form bytes contributed by prior runs), `covers`
//! (cover-sig → base mask + legs) and `prims` (prim-id → mask + value) — and
//! [`verify_store`] discharges every node's opcode contract against it,
//! producing a [`VerifyVerdict`] plus, on acceptance, the `obj_overlay` built
//! while verifying.
//!
//! This module has no Python counterpart in the kept crates: it is grounded
//! directly on `tools/kcir_toy/kcir_verify.py`'s node walk and opcode
//! dispatch, reusing [`crate::gate::World`] for the same stability/locality/
//! descent predicates the Gate checks already exercise.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::gate::World;

pub type Digest256 = [u8; 32];

/// Derive a scheme id the way the reference contractibility-proof schemes
/// are named: `sha256(name)`.
pub fn scheme_id(name: &str) -> Digest256 {
    Sha256::digest(name.as_bytes()).into()
}

/// `sha256("toy.enumerate.v1")`, the only contractibility scheme the bundled
/// toy worlds' default [`World::verify_contractible`] understands.
pub static SCHEME_TOY_ENUMERATE_V1: std::sync::LazyLock<Digest256> =
    std::sync::LazyLock::new(|| scheme_id("toy.enumerate.v1"));

fn h_node(bytes: &[u8]) -> Digest256 {
    Sha256::digest(bytes).into()
}

fn h_obj(env_sig: &Digest256, uid: &Digest256, payload: &[u8]) -> Digest256 {
    let mut hasher = Sha256::new();
    hasher.update(env_sig);
    hasher.update(uid);
    hasher.update(payload);
    hasher.finalize().into()
}

/// The closed `kcir_v2.*` parse/structural failure taxonomy (§4.1, §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailureClass {
    ParseError,
    DigestMismatch,
    EnvUidMismatch,
    DepCycle,
    StoreMissingNode,
    StoreMissingObjNf,
    DataUnavailable,
    ContractViolation,
    UnsupportedOpcode,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::ParseError => "kcir_v2.parse_error",
            FailureClass::DigestMismatch => "kcir_v2.digest_mismatch",
            FailureClass::EnvUidMismatch => "kcir_v2.env_uid_mismatch",
            FailureClass::DepCycle => "kcir_v2.dep_cycle",
            FailureClass::StoreMissingNode => "kcir_v2.store_missing_node",
            FailureClass::StoreMissingObjNf => "kcir_v2.store_missing_obj_nf",
            FailureClass::DataUnavailable => "kcir_v2.data_unavailable",
            FailureClass::ContractViolation => "kcir_v2.contract_violation",
            FailureClass::UnsupportedOpcode => "kcir_v2.unsupported_opcode",
        }
    }
}

/// Exhaustive KCIR sorts (§3.2, §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    Cover,
    Map,
    Obj,
}

impl Sort {
    fn from_u8(byte: u8) -> Result<Self, FailureClass> {
        match byte {
            0x01 => Ok(Sort::Cover),
            0x02 => Ok(Sort::Map),
            0x03 => Ok(Sort::Obj),
            _ => Err(FailureClass::ParseError),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Sort::Cover => 0x01,
            Sort::Map => 0x02,
            Sort::Obj => 0x03,
        }
    }
}

/// A decoded KCIR node (§3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KcirNode {
    pub env_sig: Digest256,
    pub uid: Digest256,
    pub sort: Sort,
    pub opcode: u8,
    pub out: Digest256,
    pub args: Vec<u8>,
    pub deps: Vec<Digest256>,
}

impl KcirNode {
    /// `node_ref = sha256(canonical_node_encoding)` under the legacy
    /// fixed-32 layout (§3.2, §6.2).
    pub fn node_ref(&self) -> Digest256 {
        h_node(&encode_node_legacy(self))
    }
}

// ─── varint (unsigned LEB128) ───────────────────────────────────────────────

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(bytes: &[u8], cursor: &mut usize) -> Result<u64, FailureClass> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *bytes.get(*cursor).ok_or(FailureClass::ParseError)?;
        *cursor += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(FailureClass::ParseError);
        }
    }
}

fn read_exact<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], FailureClass> {
    let end = cursor.checked_add(len).ok_or(FailureClass::ParseError)?;
    let slice = bytes.get(*cursor..end).ok_or(FailureClass::ParseError)?;
    *cursor = end;
    Ok(slice)
}

fn read_digest(bytes: &[u8], cursor: &mut usize) -> Result<Digest256, FailureClass> {
    let slice = read_exact(bytes, cursor, 32)?;
    let mut digest = [0u8; 32];
    digest.copy_from_slice(slice);
    Ok(digest)
}

// ─── Node encoding ───────────────────────────────────────────────────────────

/// `env_sig(32) ∥ uid(32) ∥ sort(1) ∥ opcode(1) ∥ out(32) ∥ varint(args_len)
/// ∥ args ∥ varint(deps_count) ∥ deps_count × 32-byte ref` (§6.2).
pub fn encode_node_legacy(node: &KcirNode) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + 32 + 1 + 1 + 32 + node.args.len() + node.deps.len() * 32);
    out.extend_from_slice(&node.env_sig);
    out.extend_from_slice(&node.uid);
    out.push(node.sort.to_u8());
    out.push(node.opcode);
    out.extend_from_slice(&node.out);
    write_varint(node.args.len() as u64, &mut out);
    out.extend_from_slice(&node.args);
    write_varint(node.deps.len() as u64, &mut out);
    for dep in &node.deps {
        out.extend_from_slice(dep);
    }
    out
}

pub fn decode_node_legacy(bytes: &[u8]) -> Result<KcirNode, FailureClass> {
    let mut cursor = 0usize;
    let env_sig = read_digest(bytes, &mut cursor)?;
    let uid = read_digest(bytes, &mut cursor)?;
    let sort = Sort::from_u8(*bytes.get(cursor).ok_or(FailureClass::ParseError)?)?;
    cursor += 1;
    let opcode = *bytes.get(cursor).ok_or(FailureClass::ParseError)?;
    cursor += 1;
    let out = read_digest(bytes, &mut cursor)?;
    let args_len = read_varint(bytes, &mut cursor)? as usize;
    let args = read_exact(bytes, &mut cursor, args_len)?.to_vec();
    let deps_count = read_varint(bytes, &mut cursor)? as usize;
    let mut deps = Vec::with_capacity(deps_count);
    for _ in 0..deps_count {
        deps.push(read_digest(bytes, &mut cursor)?);
    }
    if cursor != bytes.len() {
        return Err(FailureClass::ParseError);
    }
    Ok(KcirNode {
        env_sig,
        uid,
        sort,
        opcode,
        out,
        args,
        deps,
    })
}

/// The length-prefixed v1 variant (§6.2): `out` and every dep carry an
/// explicit `varint(len)` rather than assuming 32 bytes, at the cost of a
/// few extra bytes per node.
pub fn encode_node_v1(node: &KcirNode) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + 32 + 1 + 1 + node.args.len() + node.deps.len() * 34);
    out.extend_from_slice(&node.env_sig);
    out.extend_from_slice(&node.uid);
    out.push(node.sort.to_u8());
    out.push(node.opcode);
    write_varint(node.out.len() as u64, &mut out);
    out.extend_from_slice(&node.out);
    write_varint(node.args.len() as u64, &mut out);
    out.extend_from_slice(&node.args);
    write_varint(node.deps.len() as u64, &mut out);
    for dep in &node.deps {
        write_varint(dep.len() as u64, &mut out);
        out.extend_from_slice(dep);
    }
    out
}

pub fn decode_node_v1(bytes: &[u8]) -> Result<KcirNode, FailureClass> {
    let mut cursor = 0usize;
    let env_sig = read_digest(bytes, &mut cursor)?;
    let uid = read_digest(bytes, &mut cursor)?;
    let sort = Sort::from_u8(*bytes.get(cursor).ok_or(FailureClass::ParseError)?)?;
    cursor += 1;
    let opcode = *bytes.get(cursor).ok_or(FailureClass::ParseError)?;
    cursor += 1;
    let out_len = read_varint(bytes, &mut cursor)? as usize;
    if out_len != 32 {
        return Err(FailureClass::ParseError);
    }
    let out = read_digest(bytes, &mut cursor)?;
    let args_len = read_varint(bytes, &mut cursor)? as usize;
    let args = read_exact(bytes, &mut cursor, args_len)?.to_vec();
    let deps_count = read_varint(bytes, &mut cursor)? as usize;
    let mut deps = Vec::with_capacity(deps_count);
    for _ in 0..deps_count {
        let dep_len = read_varint(bytes, &mut cursor)? as usize;
        if dep_len != 32 {
            return Err(FailureClass::ParseError);
        }
        deps.push(read_digest(bytes, &mut cursor)?);
    }
    if cursor != bytes.len() {
        return Err(FailureClass::ParseError);
    }
    Ok(KcirNode {
        env_sig,
        uid,
        sort,
        opcode,
        out,
        args,
        deps,
    })
}

// ─── ObjNf ───────────────────────────────────────────────────────────────────

/// The tagged byte-level object normal form (§3.2, §6.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjNf {
    Unit,
    Prim { prim_id: Digest256 },
    Tensor { components: Vec<Digest256> },
    SpineNil,
    SpineCons { head: Digest256, tail: Digest256 },
    Glue { w_sig: Digest256, locals: Vec<Digest256> },
}

fn write_digest_list(list: &[Digest256], out: &mut Vec<u8>) {
    write_varint(list.len() as u64, out);
    for digest in list {
        write_varint(digest.len() as u64, out);
        out.extend_from_slice(digest);
    }
}

fn read_digest_list(bytes: &[u8], cursor: &mut usize) -> Result<Vec<Digest256>, FailureClass> {
    let count = read_varint(bytes, cursor)? as usize;
    let mut list = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_varint(bytes, cursor)? as usize;
        if len != 32 {
            return Err(FailureClass::ParseError);
        }
        list.push(read_digest(bytes, cursor)?);
    }
    Ok(list)
}

pub fn encode_obj_nf(nf: &ObjNf) -> Vec<u8> {
    let mut out = Vec::new();
    match nf {
        ObjNf::Unit => out.push(0x01),
        ObjNf::Prim { prim_id } => {
            out.push(0x02);
            out.extend_from_slice(prim_id);
        }
        ObjNf::Tensor { components } => {
            out.push(0x03);
            write_digest_list(components, &mut out);
        }
        ObjNf::SpineNil => out.push(0x04),
        ObjNf::SpineCons { head, tail } => {
            out.push(0x05);
            out.extend_from_slice(head);
            out.extend_from_slice(tail);
        }
        ObjNf::Glue { w_sig, locals } => {
            out.push(0x06);
            out.extend_from_slice(w_sig);
            write_digest_list(locals, &mut out);
        }
    }
    out
}

pub fn parse_obj_nf(bytes: &[u8]) -> Result<ObjNf, FailureClass> {
    let mut cursor = 0usize;
    let tag = *bytes.first().ok_or(FailureClass::ParseError)?;
    cursor += 1;
    let nf = match tag {
        0x01 => ObjNf::Unit,
        0x02 => ObjNf::Prim {
            prim_id: read_digest(bytes, &mut cursor)?,
        },
        0x03 => ObjNf::Tensor {
            components: read_digest_list(bytes, &mut cursor)?,
        },
        0x04 => ObjNf::SpineNil,
        0x05 => ObjNf::SpineCons {
            head: read_digest(bytes, &mut cursor)?,
            tail: read_digest(bytes, &mut cursor)?,
        },
        0x06 => {
            let w_sig = read_digest(bytes, &mut cursor)?;
            let locals = read_digest_list(bytes, &mut cursor)?;
            ObjNf::Glue { w_sig, locals }
        }
        _ => return Err(FailureClass::ParseError),
    };
    if cursor != bytes.len() {
        return Err(FailureClass::ParseError);
    }
    Ok(nf)
}

pub fn build_obj_prim(env_sig: &Digest256, uid: &Digest256, prim_id: Digest256) -> Digest256 {
    h_obj(env_sig, uid, &encode_obj_nf(&ObjNf::Prim { prim_id }))
}

pub fn build_obj_glue(
    env_sig: &Digest256,
    uid: &Digest256,
    w_sig: Digest256,
    locals: Vec<Digest256>,
) -> Digest256 {
    h_obj(env_sig, uid, &encode_obj_nf(&ObjNf::Glue { w_sig, locals }))
}

pub fn build_obj_unit(env_sig: &Digest256, uid: &Digest256) -> Digest256 {
    h_obj(env_sig, uid, &encode_obj_nf(&ObjNf::Unit))
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CoverEntry {
    pub base_mask: u64,
    pub legs: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct PrimEntry {
    pub mask: u64,
    pub value: Value,
}

#[derive(Debug, Clone, Default)]
pub struct KcirStore {
    pub certs: BTreeMap<Digest256, Vec<u8>>,
    pub obj: BTreeMap<Digest256, Vec<u8>>,
    pub covers: BTreeMap<Digest256, CoverEntry>,
    pub prims: BTreeMap<Digest256, PrimEntry>,
}

impl KcirStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node keyed by its own `node_ref`, mirroring how a real
    /// collaborator populates `certs` from content-addressed storage.
    pub fn insert_node(&mut self, node: &KcirNode) -> Digest256 {
        let bytes = encode_node_legacy(node);
        let node_ref = h_node(&bytes);
        self.certs.insert(node_ref, bytes);
        node_ref
    }
}

/// Whether the verifier stops at the first failure (the default, matching
/// the reference verifier) or collects every failure before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    FirstFailure,
    CollectAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected,
}

/// The verifier's external result (§6.3): `VerifyVerdict { verdict, failure_classes[] }`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyVerdict {
    pub verdict: Verdict,
    pub failure_classes: Vec<String>,
}

/// The full verification result: the verdict plus the `obj_overlay` built
/// while discharging `OBJ/*` opcode contracts (§4.1, §8.1).
#[derive(Debug, Clone)]
pub struct KcirVerification {
    pub verdict: VerifyVerdict,
    pub obj_overlay: BTreeMap<Digest256, Vec<u8>>,
}

fn is_canonical_legs(cover: &CoverEntry) -> bool {
    if cover.legs.is_empty() {
        return false;
    }
    if cover.legs.iter().any(|leg| leg & !cover.base_mask != 0) {
        return false;
    }
    cover.legs.windows(2).all(|pair| pair[0] < pair[1])
}

fn decode_map_id(map_id: &Digest256) -> Result<(u64, u64), FailureClass> {
    let src = u32::from_le_bytes(map_id[0..4].try_into().unwrap()) as u64;
    let tgt = u32::from_le_bytes(map_id[4..8].try_into().unwrap()) as u64;
    if map_id[8..].iter().any(|b| *b != 0) {
        return Err(FailureClass::ParseError);
    }
    Ok((src, tgt))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopoMark {
    Unvisited,
    InProgress,
    Done,
}

fn visit(
    key: Digest256,
    nodes: &BTreeMap<Digest256, KcirNode>,
    marks: &mut BTreeMap<Digest256, TopoMark>,
    order: &mut Vec<Digest256>,
) -> Result<(), FailureClass> {
    match marks.get(&key) {
        Some(TopoMark::Done) => return Ok(()),
        Some(TopoMark::InProgress) => return Err(FailureClass::DepCycle),
        _ => {}
    }
    marks.insert(key, TopoMark::InProgress);
    let node = nodes.get(&key).ok_or(FailureClass::StoreMissingNode)?;
    for dep in &node.deps {
        visit(*dep, nodes, marks, order)?;
    }
    marks.insert(key, TopoMark::Done);
    order.push(key);
    Ok(())
}

fn topo_order(nodes: &BTreeMap<Digest256, KcirNode>) -> Result<Vec<Digest256>, FailureClass> {
    let mut marks: BTreeMap<Digest256, TopoMark> =
        nodes.keys().map(|key| (*key, TopoMark::Unvisited)).collect();
    let mut order = Vec::with_capacity(nodes.len());
    for key in nodes.keys().copied().collect::<Vec<_>>() {
        if marks.get(&key) != Some(&TopoMark::Done) {
            visit(key, nodes, &mut marks, &mut order)?;
        }
    }
    Ok(order)
}

fn resolve_prim(
    dep: &Digest256,
    nodes: &BTreeMap<Digest256, KcirNode>,
    store: &KcirStore,
    overlay: &BTreeMap<Digest256, Vec<u8>>,
) -> Result<(u64, Value), FailureClass> {
    let node = nodes.get(dep).ok_or(FailureClass::StoreMissingNode)?;
    if !(node.sort == Sort::Obj && node.opcode == 0x02) {
        return Err(FailureClass::ContractViolation);
    }
    let nf_bytes = overlay
        .get(&node.out)
        .or_else(|| store.obj.get(&node.out))
        .ok_or(FailureClass::StoreMissingObjNf)?;
    let nf = parse_obj_nf(nf_bytes)?;
    let prim_id = match nf {
        ObjNf::Prim { prim_id } => prim_id,
        _ => return Err(FailureClass::ContractViolation),
    };
    let entry = store.prims.get(&prim_id).ok_or(FailureClass::DataUnavailable)?;
    Ok((entry.mask, entry.value.clone()))
}

fn check_opcode(
    node: &KcirNode,
    store: &KcirStore,
    nodes: &BTreeMap<Digest256, KcirNode>,
    overlay: &mut BTreeMap<Digest256, Vec<u8>>,
    world: &dyn World,
) -> Result<(), FailureClass> {
    match (node.sort, node.opcode) {
        (Sort::Cover, 0x01) => {
            if node.args.len() != 32 || !node.deps.is_empty() {
                return Err(FailureClass::ContractViolation);
            }
            let mut cover_sig = [0u8; 32];
            cover_sig.copy_from_slice(&node.args);
            if node.out != cover_sig {
                return Err(FailureClass::ContractViolation);
            }
            let cover = store
                .covers
                .get(&cover_sig)
                .ok_or(FailureClass::DataUnavailable)?;
            if !is_canonical_legs(cover) {
                return Err(FailureClass::ContractViolation);
            }
            Ok(())
        }
        (Sort::Map, 0x01) => {
            if node.args.len() != 32 || !node.deps.is_empty() {
                return Err(FailureClass::ContractViolation);
            }
            let mut map_id = [0u8; 32];
            map_id.copy_from_slice(&node.args);
            if node.out != map_id {
                return Err(FailureClass::ContractViolation);
            }
            let (src_mask, tgt_mask) = decode_map_id(&map_id)?;
            if src_mask & !tgt_mask != 0 {
                return Err(FailureClass::ContractViolation);
            }
            Ok(())
        }
        (Sort::Obj, 0x01) => {
            if !node.args.is_empty() || !node.deps.is_empty() {
                return Err(FailureClass::ContractViolation);
            }
            let nf = ObjNf::Unit;
            let expected = h_obj(&node.env_sig, &node.uid, &encode_obj_nf(&nf));
            if node.out != expected {
                return Err(FailureClass::ContractViolation);
            }
            overlay.insert(node.out, encode_obj_nf(&nf));
            Ok(())
        }
        (Sort::Obj, 0x02) => {
            if node.args.len() != 32 || !node.deps.is_empty() {
                return Err(FailureClass::ContractViolation);
            }
            let mut prim_id = [0u8; 32];
            prim_id.copy_from_slice(&node.args);
            if !store.prims.contains_key(&prim_id) {
                return Err(FailureClass::DataUnavailable);
            }
            let nf = ObjNf::Prim { prim_id };
            let expected = h_obj(&node.env_sig, &node.uid, &encode_obj_nf(&nf));
            if node.out != expected {
                return Err(FailureClass::ContractViolation);
            }
            overlay.insert(node.out, encode_obj_nf(&nf));
            Ok(())
        }
        (Sort::Obj, 0x04) => {
            if node.args.len() != 32 || node.deps.is_empty() {
                return Err(FailureClass::ContractViolation);
            }
            let mut w_sig = [0u8; 32];
            w_sig.copy_from_slice(&node.args);
            let cover_node = nodes
                .get(&node.deps[0])
                .ok_or(FailureClass::StoreMissingNode)?;
            if !(cover_node.sort == Sort::Cover && cover_node.opcode == 0x01 && cover_node.out == w_sig) {
                return Err(FailureClass::ContractViolation);
            }
            let cover = store
                .covers
                .get(&w_sig)
                .ok_or(FailureClass::DataUnavailable)?;
            if node.deps.len() != 1 + cover.legs.len() {
                return Err(FailureClass::ContractViolation);
            }
            let mut locals = Vec::with_capacity(cover.legs.len());
            for dep in &node.deps[1..] {
                let local = nodes.get(dep).ok_or(FailureClass::StoreMissingNode)?;
                if !(local.sort == Sort::Obj && (local.opcode == 0x02 || local.opcode == 0x04)) {
                    return Err(FailureClass::ContractViolation);
                }
                locals.push(local.out);
            }
            let nf = ObjNf::Glue {
                w_sig,
                locals: locals.clone(),
            };
            let expected = h_obj(&node.env_sig, &node.uid, &encode_obj_nf(&nf));
            if node.out != expected {
                return Err(FailureClass::ContractViolation);
            }
            overlay.insert(node.out, encode_obj_nf(&nf));
            Ok(())
        }
        (Sort::Obj, 0x05) => {
            if node.args.len() != 4 || node.deps.len() != 2 {
                return Err(FailureClass::ContractViolation);
            }
            let ov_mask = u32::from_le_bytes(node.args[..4].try_into().unwrap()) as u64;
            let (l_mask, l_val) = resolve_prim(&node.deps[0], nodes, store, overlay)?;
            let (r_mask, r_val) = resolve_prim(&node.deps[1], nodes, store, overlay)?;
            if ov_mask != (l_mask & r_mask) {
                return Err(FailureClass::ContractViolation);
            }
            if !world.is_definable(l_mask, &l_val) || !world.is_definable(r_mask, &r_val) {
                return Err(FailureClass::ContractViolation);
            }
            let l_restricted = world
                .restrict(&l_val, l_mask, ov_mask)
                .ok_or(FailureClass::ContractViolation)?;
            let r_restricted = world
                .restrict(&r_val, r_mask, ov_mask)
                .ok_or(FailureClass::ContractViolation)?;
            if !world.is_definable(ov_mask, &l_restricted) || !world.is_definable(ov_mask, &r_restricted) {
                return Err(FailureClass::ContractViolation);
            }
            if !world.same(ov_mask, &l_restricted, &r_restricted) {
                return Err(FailureClass::ContractViolation);
            }
            let nf = ObjNf::Unit;
            let expected = h_obj(&node.env_sig, &node.uid, &encode_obj_nf(&nf));
            if node.out != expected {
                return Err(FailureClass::ContractViolation);
            }
            overlay.insert(node.out, encode_obj_nf(&nf));
            Ok(())
        }
        (Sort::Obj, 0x06) => {
            if node.args.len() != 4 || node.deps.len() != 3 {
                return Err(FailureClass::ContractViolation);
            }
            let tri_mask = u32::from_le_bytes(node.args[..4].try_into().unwrap()) as u64;
            let mut masks = [0u64; 3];
            let mut vals: Vec<Value> = Vec::with_capacity(3);
            for (i, dep) in node.deps.iter().enumerate() {
                let (mask, val) = resolve_prim(dep, nodes, store, overlay)?;
                masks[i] = mask;
                vals.push(val);
            }
            if tri_mask != (masks[0] & masks[1] & masks[2]) {
                return Err(FailureClass::ContractViolation);
            }
            let mut restricted = Vec::with_capacity(3);
            for i in 0..3 {
                if !world.is_definable(masks[i], &vals[i]) {
                    return Err(FailureClass::ContractViolation);
                }
                let r = world
                    .restrict(&vals[i], masks[i], tri_mask)
                    .ok_or(FailureClass::ContractViolation)?;
                if !world.is_definable(tri_mask, &r) {
                    return Err(FailureClass::ContractViolation);
                }
                restricted.push(r);
            }
            if !world.same(tri_mask, &restricted[0], &restricted[1])
                || !world.same(tri_mask, &restricted[1], &restricted[2])
            {
                return Err(FailureClass::ContractViolation);
            }
            let nf = ObjNf::Unit;
            let expected = h_obj(&node.env_sig, &node.uid, &encode_obj_nf(&nf));
            if node.out != expected {
                return Err(FailureClass::ContractViolation);
            }
            overlay.insert(node.out, encode_obj_nf(&nf));
            Ok(())
        }
        (Sort::Obj, 0x07) => {
            if node.args.len() < 32 || node.deps.len() != 1 {
                return Err(FailureClass::ContractViolation);
            }
            let mut scheme_id = [0u8; 32];
            scheme_id.copy_from_slice(&node.args[..32]);
            let proof = &node.args[32..];
            let glue_node = nodes
                .get(&node.deps[0])
                .ok_or(FailureClass::StoreMissingNode)?;
            if !(glue_node.sort == Sort::Obj && glue_node.opcode == 0x04) {
                return Err(FailureClass::ContractViolation);
            }
            let glue_bytes = overlay
                .get(&glue_node.out)
                .or_else(|| store.obj.get(&glue_node.out))
                .ok_or(FailureClass::StoreMissingObjNf)?;
            let (w_sig, locals_refs) = match parse_obj_nf(glue_bytes)? {
                ObjNf::Glue { w_sig, locals } => (w_sig, locals),
                _ => return Err(FailureClass::ContractViolation),
            };
            let cover = store
                .covers
                .get(&w_sig)
                .ok_or(FailureClass::DataUnavailable)?;
            if locals_refs.len() != cover.legs.len() {
                return Err(FailureClass::ContractViolation);
            }
            let mut locals_vals = Vec::with_capacity(locals_refs.len());
            for local_ref in &locals_refs {
                let nf_bytes = overlay
                    .get(local_ref)
                    .or_else(|| store.obj.get(local_ref))
                    .ok_or(FailureClass::StoreMissingObjNf)?;
                let prim_id = match parse_obj_nf(nf_bytes)? {
                    ObjNf::Prim { prim_id } => prim_id,
                    _ => return Err(FailureClass::ContractViolation),
                };
                let entry = store
                    .prims
                    .get(&prim_id)
                    .ok_or(FailureClass::DataUnavailable)?;
                locals_vals.push(entry.value.clone());
            }
            if !world.verify_contractible(&scheme_id, proof, cover.base_mask, &cover.legs, &locals_vals) {
                return Err(FailureClass::ContractViolation);
            }
            let nf = ObjNf::Unit;
            let expected = h_obj(&node.env_sig, &node.uid, &encode_obj_nf(&nf));
            if node.out != expected {
                return Err(FailureClass::ContractViolation);
            }
            overlay.insert(node.out, encode_obj_nf(&nf));
            Ok(())
        }
        _ => Err(FailureClass::UnsupportedOpcode),
    }
}

/// Verify every node in `store` against `world`, producing a [`KcirVerification`].
///
/// With [`FailureMode::FirstFailure`] (the default), verification stops at
/// the first structural or opcode failure, matching the reference verifier.
/// With [`FailureMode::CollectAll`], every stage runs to completion and all
/// failures are sorted and deduplicated before returning.
pub fn verify_store(store: &KcirStore, world: &dyn World, mode: FailureMode) -> KcirVerification {
    let mut failures: Vec<String> = Vec::new();
    let mut overlay: BTreeMap<Digest256, Vec<u8>> = BTreeMap::new();

    macro_rules! record {
        ($class:expr) => {{
            failures.push($class.as_str().to_string());
            if mode == FailureMode::FirstFailure {
                failures.sort();
                failures.dedup();
                return KcirVerification {
                    verdict: VerifyVerdict {
                        verdict: Verdict::Rejected,
                        failure_classes: failures,
                    },
                    obj_overlay: overlay,
                };
            }
        }};
    }

    let mut nodes: BTreeMap<Digest256, KcirNode> = BTreeMap::new();
    for (node_ref, bytes) in &store.certs {
        if &h_node(bytes) != node_ref {
            record!(FailureClass::DigestMismatch);
            continue;
        }
        match decode_node_legacy(bytes) {
            Ok(node) => {
                nodes.insert(*node_ref, node);
            }
            Err(class) => record!(class),
        }
    }

    let mut env_uid: Option<(Digest256, Digest256)> = None;
    for node in nodes.values() {
        match env_uid {
            None => env_uid = Some((node.env_sig, node.uid)),
            Some((env, uid)) => {
                if env != node.env_sig || uid != node.uid {
                    record!(FailureClass::EnvUidMismatch);
                    break;
                }
            }
        }
    }

    let order = match topo_order(&nodes) {
        Ok(order) => order,
        Err(class) => {
            record!(class);
            Vec::new()
        }
    };

    for node_ref in &order {
        let node = &nodes[node_ref];
        if let Err(class) = check_opcode(node, store, &nodes, &mut overlay, world) {
            record!(class);
        }
    }

    failures.sort();
    failures.dedup();
    let verdict = if failures.is_empty() {
        Verdict::Accepted
    } else {
        Verdict::Rejected
    };
    KcirVerification {
        verdict: VerifyVerdict {
            verdict,
            failure_classes: failures,
        },
        obj_overlay: overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toy::get_world;
    use serde_json::json;

    const ENV: Digest256 = [0x11; 32];
    const UID: Digest256 = [0x22; 32];

    fn node(sort: Sort, opcode: u8, out: Digest256, args: Vec<u8>, deps: Vec<Digest256>) -> KcirNode {
        KcirNode {
            env_sig: ENV,
            uid: UID,
            sort,
            opcode,
            out,
            args,
            deps,
        }
    }

    #[test]
    fn scheme_id_matches_known_constant() {
        assert_eq!(scheme_id("toy.enumerate.v1").len(), 32);
    }

    #[test]
    fn node_round_trips_legacy_and_v1() {
        let n = node(Sort::Obj, 0x02, [0x33; 32], vec![0x44; 32], vec![[0x55; 32], [0x66; 32]]);
        let legacy = encode_node_legacy(&n);
        assert_eq!(decode_node_legacy(&legacy).unwrap(), n);

        let v1 = encode_node_v1(&n);
        assert_eq!(decode_node_v1(&v1).unwrap(), n);
    }

    #[test]
    fn truncated_node_is_parse_error() {
        let n = node(Sort::Obj, 0x01, [0x00; 32], vec![], vec![]);
        let mut bytes = encode_node_legacy(&n);
        bytes.pop();
        assert_eq!(decode_node_legacy(&bytes), Err(FailureClass::ParseError));
    }

    #[test]
    fn obj_nf_round_trips_every_tag() {
        let cases = vec![
            ObjNf::Unit,
            ObjNf::Prim { prim_id: [0x01; 32] },
            ObjNf::Tensor {
                components: vec![[0x02; 32], [0x03; 32]],
            },
            ObjNf::SpineNil,
            ObjNf::SpineCons {
                head: [0x04; 32],
                tail: [0x05; 32],
            },
            ObjNf::Glue {
                w_sig: [0x06; 32],
                locals: vec![[0x07; 32], [0x08; 32], [0x09; 32]],
            },
        ];
        for nf in cases {
            let bytes = encode_obj_nf(&nf);
            assert_eq!(parse_obj_nf(&bytes).unwrap(), nf);
        }
    }

    #[test]
    fn empty_store_accepts_trivially() {
        let store = KcirStore::new();
        let world = get_world("sheaf_bits").unwrap();
        let result = verify_store(&store, world.as_ref(), FailureMode::FirstFailure);
        assert_eq!(result.verdict.verdict, Verdict::Accepted);
        assert!(result.verdict.failure_classes.is_empty());
        assert!(result.obj_overlay.is_empty());
    }

    /// Builds the accepted-descent fixture: cover `baseMask=7, legs=[3,5,6]`,
    /// three prims agreeing on the all-zero function, pairwise overlap and
    /// the single triple check, glued and asserted contractible.
    fn build_descent_store() -> KcirStore {
        let mut store = KcirStore::new();

        let cover_sig: Digest256 = [0xc0; 32];
        store.covers.insert(
            cover_sig,
            CoverEntry {
                base_mask: 7,
                legs: vec![3, 5, 6],
            },
        );
        let cover_node = node(Sort::Cover, 0x01, cover_sig, cover_sig.to_vec(), vec![]);
        let cover_ref = store.insert_node(&cover_node);

        let prim_values = [
            (3u64, json!({"0": 0, "1": 0})),
            (5u64, json!({"0": 0, "2": 0})),
            (6u64, json!({"1": 0, "2": 0})),
        ];
        let mut prim_ids = Vec::new();
        let mut prim_refs = Vec::new();
        for (i, (mask, value)) in prim_values.iter().enumerate() {
            let mut prim_id = [0u8; 32];
            prim_id[0] = 0xa0 + i as u8;
            store.prims.insert(
                prim_id,
                PrimEntry {
                    mask: *mask,
                    value: value.clone(),
                },
            );
            let out = build_obj_prim(&ENV, &UID, prim_id);
            let prim_node = node(Sort::Obj, 0x02, out, prim_id.to_vec(), vec![]);
            let prim_ref = store.insert_node(&prim_node);
            prim_ids.push(prim_id);
            prim_refs.push((prim_ref, out));
        }

        let pairs = [(0usize, 1usize), (0, 2), (1, 2)];
        for (i, j) in pairs {
            let (mask_i, _) = prim_values[i];
            let (mask_j, _) = prim_values[j];
            let ov_mask = (mask_i & mask_j) as u32;
            let out = build_obj_unit(&ENV, &UID);
            let assert_node = node(
                Sort::Obj,
                0x05,
                out,
                ov_mask.to_le_bytes().to_vec(),
                vec![prim_refs[i].0, prim_refs[j].0],
            );
            store.insert_node(&assert_node);
        }

        let tri_mask = (prim_values[0].0 & prim_values[1].0 & prim_values[2].0) as u32;
        let triple_out = build_obj_unit(&ENV, &UID);
        let triple_node = node(
            Sort::Obj,
            0x06,
            triple_out,
            tri_mask.to_le_bytes().to_vec(),
            vec![prim_refs[0].0, prim_refs[1].0, prim_refs[2].0],
        );
        store.insert_node(&triple_node);

        let local_outs: Vec<Digest256> = prim_refs.iter().map(|(_, out)| *out).collect();
        let glue_out = build_obj_glue(&ENV, &UID, cover_sig, local_outs.clone());
        let glue_node = node(
            Sort::Obj,
            0x04,
            glue_out,
            cover_sig.to_vec(),
            std::iter::once(cover_ref)
                .chain(prim_refs.iter().map(|(r, _)| *r))
                .collect(),
        );
        let glue_ref = store.insert_node(&glue_node);

        let mut contractible_args = SCHEME_TOY_ENUMERATE_V1.to_vec();
        // baseline scheme requires empty proof bytes
        let contractible_out = build_obj_unit(&ENV, &UID);
        let contractible_node = node(
            Sort::Obj,
            0x07,
            contractible_out,
            {
                contractible_args.extend_from_slice(&[]);
                contractible_args
            },
            vec![glue_ref],
        );
        store.insert_node(&contractible_node);

        store
    }

    #[test]
    fn accepted_descent_under_sheaf_bits() {
        let store = build_descent_store();
        let world = get_world("sheaf_bits").unwrap();
        let result = verify_store(&store, world.as_ref(), FailureMode::FirstFailure);
        assert_eq!(result.verdict.verdict, Verdict::Accepted);
        assert!(result.verdict.failure_classes.is_empty());
    }

    #[test]
    fn contractibility_failure_under_non_separated() {
        let store = build_descent_store();
        let world = get_world("non_separated").unwrap();
        let result = verify_store(&store, world.as_ref(), FailureMode::FirstFailure);
        assert_eq!(result.verdict.verdict, Verdict::Rejected);
        assert_eq!(
            result.verdict.failure_classes,
            vec![FailureClass::ContractViolation.as_str().to_string()]
        );
    }

    #[test]
    fn mkglue_with_wrong_dep_count_is_contract_violation() {
        let mut store = KcirStore::new();
        let cover_sig: Digest256 = [0xc1; 32];
        store.covers.insert(
            cover_sig,
            CoverEntry {
                base_mask: 3,
                legs: vec![1, 2],
            },
        );
        let cover_node = node(Sort::Cover, 0x01, cover_sig, cover_sig.to_vec(), vec![]);
        let cover_ref = store.insert_node(&cover_node);

        let glue_out = build_obj_glue(&ENV, &UID, cover_sig, vec![]);
        let glue_node = node(Sort::Obj, 0x04, glue_out, cover_sig.to_vec(), vec![cover_ref]);
        store.insert_node(&glue_node);

        let world = get_world("sheaf_bits").unwrap();
        let result = verify_store(&store, world.as_ref(), FailureMode::FirstFailure);
        assert_eq!(result.verdict.verdict, Verdict::Rejected);
        assert_eq!(
            result.verdict.failure_classes,
            vec![FailureClass::ContractViolation.as_str().to_string()]
        );
    }

    #[test]
    fn assert_contractible_with_non_empty_proof_is_rejected() {
        let mut store = build_descent_store();
        let contractible_ref = *store
            .certs
            .keys()
            .find(|key| {
                decode_node_legacy(&store.certs[*key])
                    .map(|n| n.sort == Sort::Obj && n.opcode == 0x07)
                    .unwrap_or(false)
            })
            .unwrap();
        let mut n = decode_node_legacy(&store.certs[&contractible_ref]).unwrap();
        n.args.push(0xff);
        let new_bytes = encode_node_legacy(&n);
        store.certs.remove(&contractible_ref);
        store.certs.insert(h_node(&new_bytes), new_bytes);

        let world = get_world("sheaf_bits").unwrap();
        let result = verify_store(&store, world.as_ref(), FailureMode::FirstFailure);
        assert_eq!(result.verdict.verdict, Verdict::Rejected);
    }

    #[test]
    fn digest_mismatch_is_detected() {
        let mut store = KcirStore::new();
        let n = node(Sort::Obj, 0x01, build_obj_unit(&ENV, &UID), vec![], vec![]);
        let bytes = encode_node_legacy(&n);
        let mut bogus_ref = h_node(&bytes);
        bogus_ref[0] ^= 0xff;
        store.certs.insert(bogus_ref, bytes);

        let world = get_world("sheaf_bits").unwrap();
        let result = verify_store(&store, world.as_ref(), FailureMode::FirstFailure);
        assert_eq!(result.verdict.verdict, Verdict::Rejected);
        assert_eq!(
            result.verdict.failure_classes,
            vec![FailureClass::DigestMismatch.as_str().to_string()]
        );
    }

    #[test]
    fn collect_all_mode_gathers_every_failure() {
        let mut store = KcirStore::new();
        for i in 0..2u8 {
            let n = node(Sort::Obj, 0x01, [0x99; 32], vec![], vec![]);
            let bytes = encode_node_legacy(&n);
            let mut bogus_ref = h_node(&bytes);
            bogus_ref[0] = i;
            store.certs.insert(bogus_ref, bytes);
        }
        let world = get_world("sheaf_bits").unwrap();
        let result = verify_store(&store, world.as_ref(), FailureMode::CollectAll);
        assert_eq!(result.verdict.verdict, Verdict::Rejected);
        assert_eq!(
            result.verdict.failure_classes,
            vec![FailureClass::DigestMismatch.as_str().to_string()]
        );
    }
}
