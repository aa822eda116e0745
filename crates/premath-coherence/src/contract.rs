//! The governance-contract loader (§3.3, §4.3).
//!
//! Lifts the validation pipeline the teacher ran as a filesystem-reading CLI
//! command into a pure `Contract::from_value`, fail-fast on the first
//! offending JSON path exactly like `CoherenceError::Contract` does for the
//! sibling obligation-witness contract in `lib.rs`.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

const CANONICAL_STAGE1_CLASSES: [&str; 3] = ["missing", "mismatch", "unbound"];
const CANONICAL_BIDIR_OBLIGATIONS: [&str; 7] = [
    "stability",
    "locality",
    "descent_exists",
    "descent_contractible",
    "adjoint_triple",
    "ext_gap",
    "ext_ambiguous",
];
const CANONICAL_RUNTIME_ROUTE_FAILURE_CLASSES: [&str; 3] =
    ["missingRoute", "morphismDrift", "contractUnbound"];
const CANONICAL_WORKER_MODES: [&str; 2] = ["instruction-linked", "human-override"];
const DEFAULT_WORKER_MODE: &str = "instruction-linked";
const CANONICAL_COMMAND_SURFACES: [&str; 3] =
    ["requiredDecision", "instructionEnvelopeCheck", "instructionDecision"];
const STAGE2_ALIAS_ROLE: &str = "projection_only";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{path}: {message}")]
pub struct ContractLoadError {
    pub path: String,
    pub message: String,
}

impl ContractLoadError {
    fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

type LoadResult<T> = Result<T, ContractLoadError>;

fn as_object<'a>(value: &'a Value, path: &str) -> LoadResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ContractLoadError::at(path, "expected a JSON object"))
}

fn field<'a>(map: &'a Map<String, Value>, key: &str, path: &str) -> LoadResult<&'a Value> {
    map.get(key)
        .ok_or_else(|| ContractLoadError::at(format!("{path}.{key}"), "missing required field"))
}

fn field_str(map: &Map<String, Value>, key: &str, path: &str) -> LoadResult<String> {
    field(map, key, path)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ContractLoadError::at(format!("{path}.{key}"), "expected a string"))
}

fn field_u32(map: &Map<String, Value>, key: &str, path: &str) -> LoadResult<u32> {
    field(map, key, path)?
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| ContractLoadError::at(format!("{path}.{key}"), "expected a non-negative integer"))
}

fn field_object<'a>(map: &'a Map<String, Value>, key: &str, path: &str) -> LoadResult<&'a Map<String, Value>> {
    as_object(field(map, key, path)?, &format!("{path}.{key}"))
}

fn field_str_list(map: &Map<String, Value>, key: &str, path: &str) -> LoadResult<Vec<String>> {
    let array = field(map, key, path)?
        .as_array()
        .ok_or_else(|| ContractLoadError::at(format!("{path}.{key}"), "expected an array"))?;
    array
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| ContractLoadError::at(format!("{path}.{key}"), "expected array of strings"))
        })
        .collect()
}

/// Parse an `YYYY-MM` epoch into `(year, month)`, rejecting malformed or
/// out-of-range months.
fn parse_epoch(epoch: &str, path: &str) -> LoadResult<(u32, u32)> {
    let (year_part, month_part) = epoch
        .split_once('-')
        .ok_or_else(|| ContractLoadError::at(path, "epoch must be YYYY-MM"))?;
    let year: u32 = year_part
        .parse()
        .map_err(|_| ContractLoadError::at(path, "epoch year must be numeric"))?;
    let month: u32 = month_part
        .parse()
        .map_err(|_| ContractLoadError::at(path, "epoch month must be numeric"))?;
    if year_part.len() != 4 || month_part.len() != 2 || !(1..=12).contains(&month) {
        return Err(ContractLoadError::at(path, "epoch must be YYYY-MM with month in 01-12"));
    }
    Ok((year, month))
}

/// Months between two `YYYY-MM` epochs (`b - a`), positive iff `b` is later.
fn months_between(a: (u32, u32), b: (u32, u32)) -> i64 {
    (b.0 as i64 - a.0 as i64) * 12 + (b.1 as i64 - a.1 as i64)
}

/// An alias's support window may not outlive the active epoch by more than
/// this many months.
const MAX_ALIAS_RUNWAY_MONTHS: i64 = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceMode {
    Rollover { cadence_months: u32, alias_runway_months: u32 },
    Freeze { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityAlias {
    pub alias_kind: String,
    pub replacement_kind: String,
    pub support_until_epoch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindFamily {
    pub canonical_kind: String,
    pub aliases: Vec<CompatibilityAlias>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredGateProjection {
    pub check_ids: BTreeMap<String, String>,
    pub check_order: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceLanes {
    pub semantic_doctrine: String,
    pub strict_checker: String,
    pub witness_commutation: String,
    pub runtime_transport: String,
    pub lane_artifact_kinds: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneOwnership {
    pub checker_core_only_obligations: BTreeSet<String>,
    pub required_cross_lane_witness_route: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLaneAuthority {
    pub default_mode: String,
    pub allowed_modes: BTreeSet<String>,
    pub mutation_routes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeRouteBinding {
    pub operation_id: String,
    pub required_morphisms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSurfaceEntry {
    pub canonical: Vec<String>,
    pub aliases: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailureTriple {
    pub missing: String,
    pub mismatch: String,
    pub unbound: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage2Authority {
    pub alias_role: String,
    pub alias_support_until_epoch: String,
    pub required_obligations: BTreeSet<String>,
}

/// The fully-typed, fully-validated governance contract (§3.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub schema: u32,
    pub active_epoch: String,
    pub governance_mode: GovernanceMode,
    pub kind_families: BTreeMap<String, KindFamily>,
    pub required_gate_projection: RequiredGateProjection,
    pub evidence_lanes: EvidenceLanes,
    pub lane_ownership: LaneOwnership,
    pub worker_lane_authority: WorkerLaneAuthority,
    pub runtime_route_bindings: BTreeMap<String, RuntimeRouteBinding>,
    pub runtime_route_failure_classes: BTreeSet<String>,
    pub command_surface: BTreeMap<String, CommandSurfaceEntry>,
    pub stage1_parity: StageFailureTriple,
    pub stage1_rollback: StageFailureTriple,
    pub stage2_authority: Stage2Authority,
    pub bundle_profile: Value,
    pub kcir_mapping_profile: Value,
}

/// The canonical kind for a declared family, accepting it as-is.
pub fn canonical_schema_kind(family: &KindFamily) -> &str {
    &family.canonical_kind
}

/// Resolve a declared kind against a family: canonical as-is, or an alias
/// whose support window still covers `active_epoch` (§4.3 step 5).
pub fn resolve_schema_kind<'a>(
    family: &'a KindFamily,
    declared: &str,
    active_epoch: &str,
) -> Option<&'a str> {
    if declared == family.canonical_kind {
        return Some(&family.canonical_kind);
    }
    let active = parse_epoch(active_epoch, "active_epoch").ok()?;
    for alias in &family.aliases {
        if alias.alias_kind == declared {
            let support_until = parse_epoch(&alias.support_until_epoch, "support_until_epoch").ok()?;
            if months_between(active, support_until) >= 0 {
                return Some(&family.canonical_kind);
            }
        }
    }
    None
}

impl Contract {
    /// Deserialize and fully validate a governance contract from an
    /// already-parsed JSON value. Pure: no filesystem access.
    pub fn from_value(value: &Value) -> LoadResult<Contract> {
        let root = as_object(value, "$")?;

        // 1. Schema check.
        let schema = field_u32(root, "schema", "$")?;
        if schema != 1 {
            return Err(ContractLoadError::at("$.schema", "schema must equal 1"));
        }

        // 2. Active epoch.
        let lifecycle = field_object(root, "schemaLifecycle", "$")?;
        let active_epoch = field_str(lifecycle, "activeEpoch", "$.schemaLifecycle")?;
        parse_epoch(&active_epoch, "$.schemaLifecycle.activeEpoch")?;

        // 3. Kind families + compatibility aliases.
        let families_obj = field_object(lifecycle, "kindFamilies", "$.schemaLifecycle")?;
        let mut kind_families = BTreeMap::new();
        let mut shared_support_until: Option<String> = None;
        for (family_name, family_value) in families_obj {
            let path = format!("$.schemaLifecycle.kindFamilies.{family_name}");
            let family_map = as_object(family_value, &path)?;
            let canonical_kind = field_str(family_map, "canonicalKind", &path)?;
            let mut aliases = Vec::new();
            let mut seen_alias_kinds = BTreeSet::new();
            if let Some(alias_array) = family_map.get("compatibilityAliases") {
                let alias_array = alias_array
                    .as_array()
                    .ok_or_else(|| ContractLoadError::at(format!("{path}.compatibilityAliases"), "expected an array"))?;
                for (i, alias_value) in alias_array.iter().enumerate() {
                    let alias_path = format!("{path}.compatibilityAliases[{i}]");
                    let alias_map = as_object(alias_value, &alias_path)?;
                    let alias_kind = field_str(alias_map, "aliasKind", &alias_path)?;
                    let replacement_kind = field_str(alias_map, "replacementKind", &alias_path)?;
                    let support_until_epoch = field_str(alias_map, "supportUntilEpoch", &alias_path)?;
                    if alias_kind == canonical_kind {
                        return Err(ContractLoadError::at(&alias_path, "aliasKind must differ from canonicalKind"));
                    }
                    if replacement_kind != canonical_kind {
                        return Err(ContractLoadError::at(&alias_path, "replacementKind must equal canonicalKind"));
                    }
                    if !seen_alias_kinds.insert(alias_kind.clone()) {
                        return Err(ContractLoadError::at(&alias_path, "aliasKind must be unique within family"));
                    }
                    let active = parse_epoch(&active_epoch, "$.schemaLifecycle.activeEpoch")?;
                    let support_until = parse_epoch(&support_until_epoch, &format!("{alias_path}.supportUntilEpoch"))?;
                    let runway_months = months_between(active, support_until);
                    if runway_months <= 0 {
                        return Err(ContractLoadError::at(
                            &alias_path,
                            "supportUntilEpoch must be strictly after activeEpoch",
                        ));
                    }
                    if runway_months > MAX_ALIAS_RUNWAY_MONTHS {
                        return Err(ContractLoadError::at(
                            &alias_path,
                            "supportUntilEpoch must be within a 12-month runway of activeEpoch",
                        ));
                    }
                    match &shared_support_until {
                        None => shared_support_until = Some(support_until_epoch.clone()),
                        Some(shared) if shared != &support_until_epoch => {
                            return Err(ContractLoadError::at(
                                &alias_path,
                                "supportUntilEpoch must be shared across all families",
                            ));
                        }
                        _ => {}
                    }
                    aliases.push(CompatibilityAlias {
                        alias_kind,
                        replacement_kind,
                        support_until_epoch,
                    });
                }
            }
            kind_families.insert(
                family_name.clone(),
                KindFamily {
                    canonical_kind,
                    aliases,
                },
            );
        }

        // 4. Governance mode.
        let mode_map = field_object(lifecycle, "governanceMode", "$.schemaLifecycle")?;
        let mode_kind = field_str(mode_map, "mode", "$.schemaLifecycle.governanceMode")?;
        let governance_mode = match mode_kind.as_str() {
            "rollover" => {
                let cadence_months = field_u32(mode_map, "rolloverCadenceMonths", "$.schemaLifecycle.governanceMode")?;
                let alias_runway_months =
                    field_u32(mode_map, "aliasRunwayMonths", "$.schemaLifecycle.governanceMode")?;
                if mode_map.contains_key("freezeReason") {
                    return Err(ContractLoadError::at(
                        "$.schemaLifecycle.governanceMode",
                        "rollover mode forbids freezeReason",
                    ));
                }
                if cadence_months < alias_runway_months {
                    return Err(ContractLoadError::at(
                        "$.schemaLifecycle.governanceMode",
                        "rolloverCadenceMonths must be >= aliasRunwayMonths",
                    ));
                }
                GovernanceMode::Rollover {
                    cadence_months,
                    alias_runway_months,
                }
            }
            "freeze" => {
                let reason = field_str(mode_map, "freezeReason", "$.schemaLifecycle.governanceMode")?;
                if mode_map.contains_key("rolloverCadenceMonths") {
                    return Err(ContractLoadError::at(
                        "$.schemaLifecycle.governanceMode",
                        "freeze mode forbids rolloverCadenceMonths",
                    ));
                }
                if kind_families.values().any(|f| !f.aliases.is_empty()) {
                    return Err(ContractLoadError::at(
                        "$.schemaLifecycle.governanceMode",
                        "freeze mode forbids active compatibility aliases",
                    ));
                }
                GovernanceMode::Freeze { reason }
            }
            other => {
                return Err(ContractLoadError::at(
                    "$.schemaLifecycle.governanceMode.mode",
                    format!("unknown governance mode: {other}"),
                ));
            }
        };

        // 6. Required gate projection.
        let projection_map = field_object(root, "requiredGateProjection", "$")?;
        let check_ids_map = field_object(projection_map, "checkIds", "$.requiredGateProjection")?;
        let mut check_ids = BTreeMap::new();
        for (check_id, kind_value) in check_ids_map {
            let kind = kind_value.as_str().ok_or_else(|| {
                ContractLoadError::at(format!("$.requiredGateProjection.checkIds.{check_id}"), "expected a string")
            })?;
            check_ids.insert(check_id.clone(), kind.to_string());
        }
        let check_order = field_str_list(projection_map, "checkOrder", "$.requiredGateProjection")?;
        let order_set: BTreeSet<&String> = check_order.iter().collect();
        let keys_set: BTreeSet<&String> = check_ids.keys().collect();
        if order_set != keys_set || check_order.len() != check_ids.len() {
            return Err(ContractLoadError::at(
                "$.requiredGateProjection.checkOrder",
                "checkOrder must be a permutation of checkIds keys",
            ));
        }
        let required_gate_projection = RequiredGateProjection { check_ids, check_order };

        // evidence lanes.
        let lanes_map = field_object(root, "evidenceLanes", "$")?;
        let semantic_doctrine = field_str(lanes_map, "semanticDoctrine", "$.evidenceLanes")?;
        let strict_checker = field_str(lanes_map, "strictChecker", "$.evidenceLanes")?;
        let witness_commutation = field_str(lanes_map, "witnessCommutation", "$.evidenceLanes")?;
        let runtime_transport = field_str(lanes_map, "runtimeTransport", "$.evidenceLanes")?;
        let lane_values = [&semantic_doctrine, &strict_checker, &witness_commutation, &runtime_transport];
        let distinct: BTreeSet<&&String> = lane_values.iter().collect();
        if distinct.len() != lane_values.len() {
            return Err(ContractLoadError::at("$.evidenceLanes", "lane values must be distinct"));
        }
        let lane_artifact_kinds_map = field_object(lanes_map, "laneArtifactKinds", "$.evidenceLanes")?;
        let mut lane_artifact_kinds = BTreeMap::new();
        for (lane, kind_value) in lane_artifact_kinds_map {
            let kind = kind_value
                .as_str()
                .ok_or_else(|| ContractLoadError::at(format!("$.evidenceLanes.laneArtifactKinds.{lane}"), "expected a string"))?;
            lane_artifact_kinds.insert(lane.clone(), kind.to_string());
        }
        let evidence_lanes = EvidenceLanes {
            semantic_doctrine,
            strict_checker,
            witness_commutation,
            runtime_transport,
            lane_artifact_kinds,
        };

        // lane ownership.
        let ownership_map = field_object(root, "laneOwnership", "$")?;
        let checker_core_only_obligations: BTreeSet<String> = field_str_list(
            ownership_map,
            "checkerCoreOnlyObligations",
            "$.laneOwnership",
        )?
        .into_iter()
        .collect();
        let required_cross_lane_witness_route =
            field_str(ownership_map, "requiredCrossLaneWitnessRoute", "$.laneOwnership")?;
        let lane_ownership = LaneOwnership {
            checker_core_only_obligations,
            required_cross_lane_witness_route,
        };

        // worker lane authority.
        let worker_map = field_object(root, "workerLaneAuthority", "$")?;
        let default_mode = field_str(worker_map, "defaultMode", "$.workerLaneAuthority")?;
        if default_mode != DEFAULT_WORKER_MODE {
            return Err(ContractLoadError::at(
                "$.workerLaneAuthority.defaultMode",
                "defaultMode must equal instruction-linked",
            ));
        }
        let allowed_modes: BTreeSet<String> =
            field_str_list(worker_map, "allowedModes", "$.workerLaneAuthority")?.into_iter().collect();
        let canonical_modes: BTreeSet<String> = CANONICAL_WORKER_MODES.iter().map(|s| s.to_string()).collect();
        if allowed_modes != canonical_modes {
            return Err(ContractLoadError::at(
                "$.workerLaneAuthority.allowedModes",
                "allowedModes must equal {instruction-linked, human-override}",
            ));
        }
        let routes_map = field_object(worker_map, "mutationRouteBindings", "$.workerLaneAuthority")?;
        let mut mutation_routes = BTreeMap::new();
        for key in ["issueClaim", "issueLeaseRenew", "issueLeaseRelease", "issueDiscover"] {
            let capability_path = field_str(routes_map, key, "$.workerLaneAuthority.mutationRouteBindings")?;
            mutation_routes.insert(key.to_string(), capability_path);
        }
        if let Some(overrides) = worker_map.get("compatibilityOverrides") {
            let overrides_array = overrides.as_array().ok_or_else(|| {
                ContractLoadError::at("$.workerLaneAuthority.compatibilityOverrides", "expected an array")
            })?;
            for (i, entry) in overrides_array.iter().enumerate() {
                let path = format!("$.workerLaneAuthority.compatibilityOverrides[{i}]");
                let entry_map = as_object(entry, &path)?;
                let mode = field_str(entry_map, "mode", &path)?;
                if mode == DEFAULT_WORKER_MODE {
                    return Err(ContractLoadError::at(&path, "compatibility override mode must not be the default mode"));
                }
                field_str(entry_map, "reason", &path)?;
                field_str(entry_map, "supportUntilEpoch", &path)?;
            }
        }
        let worker_lane_authority = WorkerLaneAuthority {
            default_mode,
            allowed_modes,
            mutation_routes,
        };

        // runtime route bindings.
        let routes_obj = field_object(root, "runtimeRouteBindings", "$")?;
        let bindings_obj = field_object(routes_obj, "routes", "$.runtimeRouteBindings")?;
        let mut runtime_route_bindings = BTreeMap::new();
        for (route_id, route_value) in bindings_obj {
            let path = format!("$.runtimeRouteBindings.routes.{route_id}");
            let route_map = as_object(route_value, &path)?;
            let operation_id = field_str(route_map, "operationId", &path)?;
            let mut required_morphisms = field_str_list(route_map, "requiredMorphisms", &path)?;
            let deduped: BTreeSet<String> = required_morphisms.iter().cloned().collect();
            required_morphisms = deduped.into_iter().collect();
            runtime_route_bindings.insert(
                route_id.clone(),
                RuntimeRouteBinding {
                    operation_id,
                    required_morphisms,
                },
            );
        }
        let failure_classes_map = field_object(routes_obj, "failureClasses", "$.runtimeRouteBindings")?;
        let runtime_route_failure_classes: BTreeSet<String> =
            failure_classes_map.keys().cloned().collect();
        let canonical_runtime_classes: BTreeSet<String> =
            CANONICAL_RUNTIME_ROUTE_FAILURE_CLASSES.iter().map(|s| s.to_string()).collect();
        if runtime_route_failure_classes != canonical_runtime_classes {
            return Err(ContractLoadError::at(
                "$.runtimeRouteBindings.failureClasses",
                "failure classes must equal {missingRoute, morphismDrift, contractUnbound}",
            ));
        }

        // command surface.
        let surface_obj = field_object(root, "commandSurface", "$")?;
        let mut command_surface = BTreeMap::new();
        for surface_id in CANONICAL_COMMAND_SURFACES {
            let path = format!("$.commandSurface.{surface_id}");
            let entry_map = field_object(surface_obj, surface_id, "$.commandSurface")?;
            let canonical = field_str_list(entry_map, "canonical", &path)?;
            if canonical.is_empty() {
                return Err(ContractLoadError::at(format!("{path}.canonical"), "must be non-empty"));
            }
            let alias_lists = entry_map.get("aliases").cloned().unwrap_or(Value::Array(vec![]));
            let alias_array = alias_lists
                .as_array()
                .ok_or_else(|| ContractLoadError::at(format!("{path}.aliases"), "expected an array"))?;
            let mut aliases = Vec::new();
            let mut seen = BTreeSet::new();
            for (i, alias_tokens) in alias_array.iter().enumerate() {
                let tokens: Vec<String> = alias_tokens
                    .as_array()
                    .ok_or_else(|| ContractLoadError::at(format!("{path}.aliases[{i}]"), "expected an array of tokens"))?
                    .iter()
                    .map(|t| {
                        t.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| ContractLoadError::at(format!("{path}.aliases[{i}]"), "expected string tokens"))
                    })
                    .collect::<LoadResult<_>>()?;
                if tokens == canonical {
                    return Err(ContractLoadError::at(format!("{path}.aliases[{i}]"), "alias must not equal canonical"));
                }
                if !seen.insert(tokens.clone()) {
                    return Err(ContractLoadError::at(format!("{path}.aliases[{i}]"), "aliases must be unique"));
                }
                aliases.push(tokens);
            }
            command_surface.insert(surface_id.to_string(), CommandSurfaceEntry { canonical, aliases });
        }

        // stage1 parity / rollback.
        let stage1_parity = parse_stage_failure_triple(root, "stage1Parity", "unification.evidence_stage1.parity")?;
        let stage1_rollback =
            parse_stage_failure_triple(root, "stage1Rollback", "unification.evidence_stage1.rollback")?;

        // stage2 authority.
        let stage2_map = field_object(root, "stage2Authority", "$")?;
        let alias_role = field_str(stage2_map, "compatibilityAliasRole", "$.stage2Authority")?;
        if alias_role != STAGE2_ALIAS_ROLE {
            return Err(ContractLoadError::at(
                "$.stage2Authority.compatibilityAliasRole",
                "must equal projection_only",
            ));
        }
        let alias_support_until_epoch = field_str(stage2_map, "supportUntilEpoch", "$.stage2Authority")?;
        if let Some(shared) = &shared_support_until {
            if shared != &alias_support_until_epoch {
                return Err(ContractLoadError::at(
                    "$.stage2Authority.supportUntilEpoch",
                    "must equal the shared rollover epoch",
                ));
            }
        }
        let route_map = field_object(stage2_map, "bidirectionalEvidenceRoute", "$.stage2Authority")?;
        let required_obligations: BTreeSet<String> =
            field_str_list(route_map, "requiredObligations", "$.stage2Authority.bidirectionalEvidenceRoute")?
                .into_iter()
                .collect();
        let canonical_obligations: BTreeSet<String> =
            CANONICAL_BIDIR_OBLIGATIONS.iter().map(|s| s.to_string()).collect();
        if required_obligations != canonical_obligations {
            return Err(ContractLoadError::at(
                "$.stage2Authority.bidirectionalEvidenceRoute.requiredObligations",
                "must equal the canonical kernel obligation set",
            ));
        }
        let stage2_authority = Stage2Authority {
            alias_role,
            alias_support_until_epoch,
            required_obligations,
        };

        let bundle_profile = field(root, "bundleProfile", "$")?.clone();
        as_object(&bundle_profile, "$.bundleProfile")?;
        let kcir_mapping_profile = field(root, "kcirMappingProfile", "$")?.clone();
        as_object(&kcir_mapping_profile, "$.kcirMappingProfile")?;

        Ok(Contract {
            schema,
            active_epoch,
            governance_mode,
            kind_families,
            required_gate_projection,
            evidence_lanes,
            lane_ownership,
            worker_lane_authority,
            runtime_route_bindings,
            runtime_route_failure_classes,
            command_surface,
            stage1_parity,
            stage1_rollback,
            stage2_authority,
            bundle_profile,
            kcir_mapping_profile,
        })
    }

    /// Thin filesystem-reading wrapper: read `path`, parse JSON, then call
    /// [`Contract::from_value`]. No logic lives here beyond I/O.
    pub fn from_path(path: &std::path::Path) -> LoadResult<Contract> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| ContractLoadError::at("$", format!("failed to read {}: {err}", path.display())))?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|err| ContractLoadError::at("$", format!("invalid json in {}: {err}", path.display())))?;
        Contract::from_value(&value)
    }
}

fn parse_stage_failure_triple(
    root: &Map<String, Value>,
    key: &str,
    namespace: &str,
) -> LoadResult<StageFailureTriple> {
    let path = format!("$.{key}");
    let stage_map = field_object(root, key, "$")?;
    let classes_map = field_object(stage_map, "failureClasses", &path)?;
    let mut resolved = BTreeMap::new();
    for class in CANONICAL_STAGE1_CLASSES {
        let value = field_str(classes_map, class, &format!("{path}.failureClasses"))?;
        let expected = format!("{namespace}.{class}");
        if value != expected {
            return Err(ContractLoadError::at(
                format!("{path}.failureClasses.{class}"),
                format!("must equal {expected}"),
            ));
        }
        resolved.insert(class, value);
    }
    Ok(StageFailureTriple {
        missing: resolved.remove("missing").unwrap(),
        mismatch: resolved.remove("mismatch").unwrap(),
        unbound: resolved.remove("unbound").unwrap(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_contract_value() -> Value {
        json!({
            "schema": 1,
            "schemaLifecycle": {
                "activeEpoch": "2026-01",
                "governanceMode": {
                    "mode": "rollover",
                    "rolloverCadenceMonths": 12,
                    "aliasRunwayMonths": 6
                },
                "kindFamilies": {
                    "requiredWitnessKind": {
                        "canonicalKind": "ci.required.v1",
                        "compatibilityAliases": [
                            {
                                "aliasKind": "ci.required.v0",
                                "replacementKind": "ci.required.v1",
                                "supportUntilEpoch": "2026-07"
                            }
                        ]
                    },
                    "requiredDecisionKind": {
                        "canonicalKind": "ci.required.decision.v1",
                        "compatibilityAliases": [
                            {
                                "aliasKind": "ci.required.decision.v0",
                                "replacementKind": "ci.required.decision.v1",
                                "supportUntilEpoch": "2026-07"
                            }
                        ]
                    }
                }
            },
            "requiredGateProjection": {
                "checkIds": {"baseline": "ci.required.v1", "build": "ci.required.v1"},
                "checkOrder": ["baseline", "build"]
            },
            "evidenceLanes": {
                "semanticDoctrine": "lane.semantic",
                "strictChecker": "lane.strict",
                "witnessCommutation": "lane.witness",
                "runtimeTransport": "lane.runtime",
                "laneArtifactKinds": {"lane.semantic": "kind.a"}
            },
            "laneOwnership": {
                "checkerCoreOnlyObligations": ["scope_noncontradiction"],
                "requiredCrossLaneWitnessRoute": "span_square_commutation"
            },
            "workerLaneAuthority": {
                "defaultMode": "instruction-linked",
                "allowedModes": ["instruction-linked", "human-override"],
                "mutationRouteBindings": {
                    "issueClaim": "capability.issue_claim",
                    "issueLeaseRenew": "capability.issue_lease_renew",
                    "issueLeaseRelease": "capability.issue_lease_release",
                    "issueDiscover": "capability.issue_discover"
                }
            },
            "runtimeRouteBindings": {
                "routes": {
                    "route.gate_execution": {
                        "operationId": "op.gate_execution",
                        "requiredMorphisms": ["m1", "m2"]
                    }
                },
                "failureClasses": {"missingRoute": 1, "morphismDrift": 1, "contractUnbound": 1}
            },
            "commandSurface": {
                "requiredDecision": {"canonical": ["ci", "decide"], "aliases": [["ci", "decide-legacy"]]},
                "instructionEnvelopeCheck": {"canonical": ["ci", "check"]},
                "instructionDecision": {"canonical": ["ci", "decision"]}
            },
            "stage1Parity": {
                "failureClasses": {
                    "missing": "unification.evidence_stage1.parity.missing",
                    "mismatch": "unification.evidence_stage1.parity.mismatch",
                    "unbound": "unification.evidence_stage1.parity.unbound"
                }
            },
            "stage1Rollback": {
                "failureClasses": {
                    "missing": "unification.evidence_stage1.rollback.missing",
                    "mismatch": "unification.evidence_stage1.rollback.mismatch",
                    "unbound": "unification.evidence_stage1.rollback.unbound"
                }
            },
            "stage2Authority": {
                "compatibilityAliasRole": "projection_only",
                "supportUntilEpoch": "2026-07",
                "bidirectionalEvidenceRoute": {
                    "requiredObligations": [
                        "stability", "locality", "descent_exists", "descent_contractible",
                        "adjoint_triple", "ext_gap", "ext_ambiguous"
                    ]
                }
            },
            "bundleProfile": {"contextFamily": "ctx.default"},
            "kcirMappingProfile": {"rows": {}}
        })
    }

    #[test]
    fn valid_contract_loads() {
        let value = valid_contract_value();
        let contract = Contract::from_value(&value).expect("contract should load");
        assert_eq!(contract.schema, 1);
        assert_eq!(contract.active_epoch, "2026-01");
        assert_eq!(contract.stage2_authority.alias_role, "projection_only");
    }

    #[test]
    fn rejects_non_matching_schema() {
        let mut value = valid_contract_value();
        value["schema"] = json!(2);
        let err = Contract::from_value(&value).unwrap_err();
        assert_eq!(err.path, "$.schema");
    }

    #[test]
    fn rejects_shared_support_until_mismatch() {
        let mut value = valid_contract_value();
        value["schemaLifecycle"]["kindFamilies"]["requiredDecisionKind"]["compatibilityAliases"][0]
            ["supportUntilEpoch"] = json!("2026-08");
        let err = Contract::from_value(&value).unwrap_err();
        assert!(err.message.contains("shared"));
    }

    #[test]
    fn rejects_freeze_mode_with_active_aliases() {
        let mut value = valid_contract_value();
        value["schemaLifecycle"]["governanceMode"] = json!({
            "mode": "freeze",
            "freezeReason": "incident-123"
        });
        let err = Contract::from_value(&value).unwrap_err();
        assert!(err.message.contains("alias"));
    }

    #[test]
    fn resolve_schema_kind_accepts_in_window_alias() {
        let family = KindFamily {
            canonical_kind: "ci.required.v1".to_string(),
            aliases: vec![CompatibilityAlias {
                alias_kind: "ci.required.v0".to_string(),
                replacement_kind: "ci.required.v1".to_string(),
                support_until_epoch: "2026-07".to_string(),
            }],
        };
        assert_eq!(
            resolve_schema_kind(&family, "ci.required.v0", "2026-01"),
            Some("ci.required.v1")
        );
        assert_eq!(resolve_schema_kind(&family, "ci.required.v0", "2026-08"), None);
        assert_eq!(canonical_schema_kind(&family), "ci.required.v1");
    }

    #[test]
    fn rejects_check_order_that_is_not_a_permutation() {
        let mut value = valid_contract_value();
        value["requiredGateProjection"]["checkOrder"] = json!(["baseline"]);
        let err = Contract::from_value(&value).unwrap_err();
        assert_eq!(err.path, "$.requiredGateProjection.checkOrder");
    }
}
