//! The capability / conformance vector evaluator (§3.4, §4.2).
//!
//! Each predicate is a pure function of a vector's case payload, reducing it
//! to a deterministic [`Outcome`]. Grounded on `premath_kernel::canon`'s
//! `Ref(scheme, value)` primitive for every `*_ref` recomputation the spec's
//! predicate table names.

use premath_kernel::canon::derive_ref;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub verdict: Verdict,
    pub failure_classes: Vec<String>,
    pub cmp_ref: Option<String>,
}

impl Outcome {
    fn accepted() -> Self {
        Outcome { verdict: Verdict::Accepted, failure_classes: Vec::new(), cmp_ref: None }
    }

    fn accepted_with_ref(cmp_ref: String) -> Self {
        Outcome { verdict: Verdict::Accepted, failure_classes: Vec::new(), cmp_ref: Some(cmp_ref) }
    }

    fn rejected<S: Into<String>>(classes: Vec<S>) -> Self {
        let mut failure_classes: Vec<String> = classes.into_iter().map(Into::into).collect();
        failure_classes.sort();
        failure_classes.dedup();
        Outcome { verdict: Verdict::Rejected, failure_classes, cmp_ref: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vector {
    pub capability_id: String,
    pub vector_id: String,
    pub case: Value,
}

fn str_at<'a>(case: &'a Value, pointer: &str) -> Option<&'a str> {
    case.pointer(pointer).and_then(Value::as_str)
}

fn array_at<'a>(case: &'a Value, pointer: &str) -> Option<&'a Vec<Value>> {
    case.pointer(pointer).and_then(Value::as_array)
}

fn eval_normal_forms(case: &Value) -> Outcome {
    let normalizer_id = str_at(case, "/normalizerId").unwrap_or_default();
    let policy_digest = str_at(case, "/policyDigest").unwrap_or_default();
    let Some(sides) = array_at(case, "/semanticNormalizedSides") else {
        return Outcome::rejected(vec!["kcir_v2.data_unavailable"]);
    };
    if sides.is_empty() {
        return Outcome::rejected(vec!["kcir_v2.data_unavailable"]);
    }
    let refs: Vec<String> = sides
        .iter()
        .map(|side| {
            derive_ref(
                "ev1_",
                &serde_json::json!({"semanticNormalized": side, "normalizerId": normalizer_id, "policyDigest": policy_digest}),
            )
        })
        .collect();
    if refs.iter().any(|r| r != &refs[0]) {
        return Outcome::rejected(vec!["normal_forms.ref_mismatch"]);
    }
    let demands_claim = case.pointer("/modeDemandsClaim").and_then(Value::as_bool).unwrap_or(false);
    if demands_claim {
        let claimed: BTreeSet<&str> = array_at(case, "/claimedCapabilities")
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let capability_id = str_at(case, "/capabilityId").unwrap_or_default();
        if !claimed.contains(capability_id) {
            return Outcome::rejected(vec!["normal_forms.capability_not_claimed"]);
        }
    }
    Outcome::accepted_with_ref(refs[0].clone())
}

fn eval_kcir_witnesses(case: &Value) -> Outcome {
    let Some(entries) = array_at(case, "/witnessBundle") else {
        return Outcome::rejected(vec!["kcir_v2.data_unavailable"]);
    };
    let mut failures = Vec::new();
    for entry in entries {
        let Some(reference) = entry.get("ref").and_then(Value::as_str) else {
            failures.push("kcir_ref_missing");
            continue;
        };
        let Some(payload) = entry.get("payload") else {
            failures.push("kcir_ref_missing");
            continue;
        };
        let expected = derive_ref("kcir1_", payload);
        if reference != expected {
            failures.push("kcir_ref_tampered");
        }
    }
    if failures.is_empty() { Outcome::accepted() } else { Outcome::rejected(failures) }
}

fn eval_commitment_checkpoints(case: &Value) -> Outcome {
    let (Some(run_material), Some(run_material_ref)) =
        (case.get("runMaterial"), str_at(case, "/runMaterialRef"))
    else {
        return Outcome::rejected(vec!["kcir_v2.data_unavailable"]);
    };
    if derive_ref("run1_", run_material) != run_material_ref {
        return Outcome::rejected(vec!["commitment_checkpoints.run_material_mismatch"]);
    }
    let (Some(checkpoint_body), Some(checkpoint_ref)) =
        (case.get("checkpointBody"), str_at(case, "/checkpointRef"))
    else {
        return Outcome::rejected(vec!["kcir_v2.data_unavailable"]);
    };
    let mut body_without_ref = checkpoint_body.clone();
    if let Some(map) = body_without_ref.as_object_mut() {
        map.remove("checkpointRef");
    }
    if derive_ref("ckpt1_", &body_without_ref) != checkpoint_ref {
        return Outcome::rejected(vec!["commitment_checkpoints.checkpoint_mismatch"]);
    }
    Outcome::accepted()
}

fn eval_squeak_site(case: &Value) -> Outcome {
    let Some(descriptors) = array_at(case, "/locationDescriptors") else {
        return Outcome::rejected(vec!["kcir_v2.data_unavailable"]);
    };
    if descriptors.len() < 2 {
        return Outcome::rejected(vec!["squeak_site.insufficient_descriptors"]);
    }
    let mut refs = Vec::new();
    for descriptor in descriptors {
        let world_id = descriptor.get("worldId").cloned().unwrap_or(Value::Null);
        let runtime_profile = descriptor.get("runtimeProfile").cloned().unwrap_or(Value::Null);
        let mut capability_vector: Vec<String> = descriptor
            .get("capabilityVector")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        capability_vector.sort();
        let substrate_binding_ref = descriptor.get("substrateBindingRef").cloned().unwrap_or(Value::Null);
        let canonical = serde_json::json!({
            "worldId": world_id,
            "runtimeProfile": runtime_profile,
            "capabilityVector": capability_vector,
            "substrateBindingRef": substrate_binding_ref,
        });
        refs.push(derive_ref("loc1_", &canonical));
    }
    if refs.iter().all(|r| r == &refs[0]) {
        Outcome::accepted_with_ref(refs[0].clone())
    } else {
        Outcome::rejected(vec!["squeak_site.location_mismatch"])
    }
}

fn eval_ci_witnesses(case: &Value) -> Outcome {
    let mut failures = Vec::new();
    if let Some(runs) = array_at(case, "/instructionDigests") {
        if runs.len() >= 2 && runs.windows(2).any(|w| w[0] != w[1]) {
            failures.push("ci_witnesses.instruction_digest_mismatch");
        }
    }
    if let Some(runs) = array_at(case, "/deterministicWitnesses") {
        if runs.len() >= 2 && runs.windows(2).any(|w| w[0] != w[1]) {
            failures.push("ci_witnesses.witness_divergence");
        }
    }
    if let Some(rows) = array_at(case, "/attestationRows") {
        for row in rows {
            let delta = row.get("delta");
            let required = row.get("required");
            let decision = row.get("decision");
            if delta.is_none() || required.is_none() || decision.is_none() {
                failures.push("ci_witnesses.attestation_row_incomplete");
            }
        }
    }
    if let Some(lineage) = case.pointer("/boundaryAuthorityLineage") {
        let auth_payload_digest = str_at(lineage, "/authPayloadDigest").unwrap_or_default();
        let normalizer_id = str_at(lineage, "/normalizerId").unwrap_or_default();
        let policy_digest = str_at(lineage, "/policyDigest").unwrap_or_default();
        let joined = format!("{auth_payload_digest}\0{normalizer_id}\0{policy_digest}\0");
        let typed_core_projection_digest = derive_ref("ev1_", &Value::String(joined));
        if typed_core_projection_digest == auth_payload_digest {
            failures.push("ci_witnesses.lineage_not_differentiated");
        }
    }
    if failures.is_empty() { Outcome::accepted() } else { Outcome::rejected(failures) }
}

fn eval_instruction_typing(case: &Value) -> Outcome {
    let Some(classification) = case.get("classification") else {
        return Outcome::rejected(vec!["kcir_v2.data_unavailable"]);
    };
    match str_at(classification, "/state") {
        Some("typed") => {
            if str_at(classification, "/kind").is_none() {
                return Outcome::rejected(vec!["instruction_typing.missing_kind"]);
            }
            Outcome::accepted()
        }
        Some("unknown") => {
            let allow_unknown = case.pointer("/typingPolicy/allowUnknown").and_then(Value::as_bool).unwrap_or(false);
            if !allow_unknown {
                return Outcome::rejected(vec!["instruction_typing.unknown_disallowed"]);
            }
            if str_at(classification, "/reason").is_none() {
                return Outcome::rejected(vec!["instruction_typing.missing_reason"]);
            }
            Outcome::accepted()
        }
        _ => Outcome::rejected(vec!["instruction_typing.invalid_state"]),
    }
}

const ADJOINT_OBLIGATIONS: [&str; 4] =
    ["adjoint_triangle", "beck_chevalley_sigma", "beck_chevalley_pi", "refinement_invariance"];

fn eval_adjoints_sites(case: &Value) -> Outcome {
    let mut failures = Vec::new();
    if str_at(case, "/proposalKind") != Some("refinementPlan") {
        failures.push("adjoints_sites.wrong_proposal_kind");
    }
    let obligations: BTreeSet<&str> = array_at(case, "/compiledObligations")
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    for required in ADJOINT_OBLIGATIONS {
        if !obligations.contains(required) {
            failures.push("adjoints_sites.missing_obligation");
            break;
        }
    }
    if str_at(case, "/crossLaneRoute") != Some("span_square_commutation") {
        failures.push("adjoints_sites.wrong_cross_lane_route");
    }
    if let (Some(witness_digest), Some(sqw_ref)) = (case.get("witness"), str_at(case, "/sqwRef")) {
        if derive_ref("sqw1_", witness_digest) != sqw_ref {
            failures.push("adjoints_sites.witness_digest_mismatch");
        }
    }
    if failures.is_empty() { Outcome::accepted() } else { Outcome::rejected(failures) }
}

const ISSUE_TRANSITIONS: [&str; 7] = [
    "issue_claim",
    "issue_lease_renew",
    "issue_lease_release",
    "issue_discover",
    "issue_ready_blocked",
    "issue_lease_projection",
    "issue_event_replay_cache",
];

fn eval_change_morphisms(case: &Value) -> Outcome {
    let mut failures = Vec::new();
    if let (Some(native), Some(mapped)) =
        (str_at(case, "/nativeProviderEnv"), str_at(case, "/mappedProviderEnv"))
    {
        if native != mapped {
            failures.push("change_morphisms.env_mapping_mismatch");
        }
    }
    if let Some(transitions) = case.pointer("/issueTransitions").and_then(Value::as_object) {
        for transition_id in ISSUE_TRANSITIONS {
            let Some(transition) = transitions.get(transition_id) else {
                continue;
            };
            let observed = transition.get("observedAfterState");
            let staked = transition.get("stakedAfterState");
            if observed != staked {
                failures.push("change_morphisms.after_state_mismatch");
            }
            if transition.get("leasePolicyViolation").and_then(Value::as_bool).unwrap_or(false) {
                failures.push("change_morphisms.lease_policy_violation");
            }
        }
    }
    if failures.is_empty() { Outcome::accepted() } else { Outcome::rejected(failures) }
}

/// Reduce a single vector's case payload to its deterministic [`Outcome`]
/// (§4.2). Unknown capability ids are a hard rejection: the predicate table
/// is closed.
pub fn evaluate_vector(vector: &Vector) -> Outcome {
    match vector.capability_id.as_str() {
        "normal_forms" => eval_normal_forms(&vector.case),
        "kcir_witnesses" => eval_kcir_witnesses(&vector.case),
        "commitment_checkpoints" => eval_commitment_checkpoints(&vector.case),
        "squeak_site" => eval_squeak_site(&vector.case),
        "ci_witnesses" => eval_ci_witnesses(&vector.case),
        "instruction_typing" => eval_instruction_typing(&vector.case),
        "adjoints_sites" => eval_adjoints_sites(&vector.case),
        "change_morphisms" => eval_change_morphisms(&vector.case),
        other => Outcome::rejected(vec![format!("unsupported_capability.{other}")]),
    }
}

/// Group vectors whose id starts with `invariance/` by `semanticScenarioId`
/// and assert intra-group `(verdict, failure_classes)` equality (§4.2).
/// Returns the scenario ids whose group violates this invariant.
pub fn check_invariance_groups(vectors: &[(Vector, Outcome)]) -> Vec<String> {
    use std::collections::BTreeMap;
    let mut groups: BTreeMap<String, Vec<&Outcome>> = BTreeMap::new();
    for (vector, outcome) in vectors {
        if !vector.vector_id.starts_with("invariance/") {
            continue;
        }
        let Some(scenario_id) = vector.case.pointer("/semanticScenarioId").and_then(Value::as_str) else {
            continue;
        };
        groups.entry(scenario_id.to_string()).or_default().push(outcome);
    }
    let mut violating = Vec::new();
    for (scenario_id, outcomes) in groups {
        if outcomes.len() < 2 {
            violating.push(scenario_id);
            continue;
        }
        let first = (outcomes[0].verdict, &outcomes[0].failure_classes);
        if outcomes.iter().any(|o| (o.verdict, &o.failure_classes) != first) {
            violating.push(scenario_id);
        }
    }
    violating
}
