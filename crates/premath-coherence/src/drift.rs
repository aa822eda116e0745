//! Drift-budget sentinels (§4.4, unchanged from spec.md).
//!
//! Grounded on `tools/ci/check_drift_budget.py` in `original_source/` and on
//! the cross-checks `lib.rs` already runs against the filesystem
//! (`CoherenceSurfaces`, capability registry, mise/ci-closure parsing).
//! Unlike those, every sentinel here takes its inputs already parsed —
//! callers resolve paths and read files, this module only compares.

use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DriftClass {
    SpecIndexCapabilityMap,
    ControlPlaneLaneBinding,
    CoherenceRequiredObligation,
    SigPiNotation,
    CoherenceCacheInputClosure,
}

impl DriftClass {
    pub fn as_str(self) -> &'static str {
        match self {
            DriftClass::SpecIndexCapabilityMap => "spec_index_capability_map_drift",
            DriftClass::ControlPlaneLaneBinding => "control_plane_lane_binding_drift",
            DriftClass::CoherenceRequiredObligation => "coherence_required_obligation_drift",
            DriftClass::SigPiNotation => "sigpi_notation_drift",
            DriftClass::CoherenceCacheInputClosure => "coherence_cache_input_closure_drift",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DriftFinding {
    pub class_name: String,
    pub failed: bool,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub result: &'static str,
    pub drift_classes: Vec<DriftFinding>,
}

/// A contract/loader/witness view of the lane registry, as declared in each
/// surface independently (§4.4 `control_plane_lane_binding_drift`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaneRegistrySnapshot {
    pub evidence_lanes: BTreeMap<String, String>,
    pub lane_artifact_kinds: BTreeMap<String, String>,
    pub checker_core_only_obligations: BTreeSet<String>,
    pub required_cross_lane_witness_route: String,
    pub lane_failure_classes: BTreeSet<String>,
    pub schema_lifecycle_governance_projection: BTreeMap<String, String>,
    pub harness_retry_loader_constants: BTreeMap<String, String>,
}

/// Everything the five sentinels compare, already parsed by the caller.
#[derive(Debug, Clone, Default)]
pub struct DriftInputs {
    /// doc path -> capability id, as read from SPEC-INDEX §5.4.
    pub spec_index_capability_docs: BTreeMap<String, String>,
    /// capability ids present in the executable capability registry.
    pub executable_capabilities: BTreeSet<String>,
    /// doc path -> capability id, as declared conditional by the contract.
    pub contract_conditional_capability_docs: BTreeMap<String, String>,
    /// doc paths the witness actually observed as conditional.
    pub witness_conditional_capability_docs: BTreeSet<String>,

    pub contract_lanes: LaneRegistrySnapshot,
    pub witness_lanes: LaneRegistrySnapshot,
    pub loader_lanes: LaneRegistrySnapshot,

    pub contract_required_obligations: BTreeSet<String>,
    pub contract_required_bidir_obligations: BTreeSet<String>,
    pub witness_required_obligations: BTreeSet<String>,
    pub witness_required_bidir_obligations: BTreeSet<String>,

    /// normative document path -> full text content.
    pub normative_documents: BTreeMap<String, String>,

    /// paths the transport/site fixture suites declare as cache inputs.
    pub fixture_cache_input_closure: BTreeSet<String>,
    /// paths actually required to reproduce the contract witness.
    pub witness_required_cache_inputs: BTreeSet<String>,
}

fn finding(class: DriftClass, failed: bool, details: Value) -> DriftFinding {
    DriftFinding {
        class_name: class.as_str().to_string(),
        failed,
        details: details.to_string(),
    }
}

fn check_spec_index_capability_map(inputs: &DriftInputs) -> DriftFinding {
    let mut missing_capabilities = Vec::new();
    for (doc, capability) in &inputs.spec_index_capability_docs {
        if !inputs.executable_capabilities.contains(capability) {
            missing_capabilities.push(json!({"doc": doc, "capability": capability}));
        }
    }
    let declared: BTreeSet<&String> = inputs.contract_conditional_capability_docs.keys().collect();
    let observed: BTreeSet<&String> = inputs.witness_conditional_capability_docs.iter().collect();
    let conditional_mismatch: Vec<&&String> = declared.symmetric_difference(&observed).collect();
    let failed = !missing_capabilities.is_empty() || !conditional_mismatch.is_empty();
    finding(
        DriftClass::SpecIndexCapabilityMap,
        failed,
        json!({
            "missingCapabilities": missing_capabilities,
            "conditionalMismatch": conditional_mismatch.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        }),
    )
}

fn check_control_plane_lane_binding(inputs: &DriftInputs) -> DriftFinding {
    let surfaces = [("contract", &inputs.contract_lanes), ("witness", &inputs.witness_lanes), ("loader", &inputs.loader_lanes)];
    let mut mismatches = Vec::new();
    for field in [
        "evidence_lanes",
        "lane_artifact_kinds",
        "checker_core_only_obligations",
        "required_cross_lane_witness_route",
        "lane_failure_classes",
        "schema_lifecycle_governance_projection",
    ] {
        let values: Vec<String> = surfaces
            .iter()
            .map(|(_, lanes)| match field {
                "evidence_lanes" => format!("{:?}", lanes.evidence_lanes),
                "lane_artifact_kinds" => format!("{:?}", lanes.lane_artifact_kinds),
                "checker_core_only_obligations" => format!("{:?}", lanes.checker_core_only_obligations),
                "required_cross_lane_witness_route" => lanes.required_cross_lane_witness_route.clone(),
                "lane_failure_classes" => format!("{:?}", lanes.lane_failure_classes),
                "schema_lifecycle_governance_projection" => format!("{:?}", lanes.schema_lifecycle_governance_projection),
                _ => unreachable!(),
            })
            .collect();
        if values.iter().any(|v| v != &values[0]) {
            mismatches.push(field);
        }
    }
    let loader_constants_agree = inputs.contract_lanes.harness_retry_loader_constants
        == inputs.loader_lanes.harness_retry_loader_constants;
    if !loader_constants_agree {
        mismatches.push("harness_retry_loader_constants");
    }
    finding(
        DriftClass::ControlPlaneLaneBinding,
        !mismatches.is_empty(),
        json!({"mismatchedFields": mismatches}),
    )
}

fn check_coherence_required_obligation(inputs: &DriftInputs) -> DriftFinding {
    let obligations_match = inputs.contract_required_obligations == inputs.witness_required_obligations;
    let bidir_match = inputs.contract_required_bidir_obligations == inputs.witness_required_bidir_obligations;
    finding(
        DriftClass::CoherenceRequiredObligation,
        !(obligations_match && bidir_match),
        json!({
            "requiredObligationsMatch": obligations_match,
            "requiredBidirObligationsMatch": bidir_match,
            "contractOnly": inputs.contract_required_obligations.difference(&inputs.witness_required_obligations).collect::<Vec<_>>(),
            "witnessOnly": inputs.witness_required_obligations.difference(&inputs.contract_required_obligations).collect::<Vec<_>>(),
        }),
    )
}

const CANONICAL_SIGPI_TOKEN: &str = "SigPi";
const CANONICAL_SIGPI_LATEX: &str = "sig\\Pi";
const LEGACY_SIGPI_ALIAS: &str = "Sig/Pi";

fn check_sigpi_notation(inputs: &DriftInputs) -> DriftFinding {
    let mut offending = Vec::new();
    for (path, text) in &inputs.normative_documents {
        let has_token = text.contains(CANONICAL_SIGPI_TOKEN);
        let has_latex = text.contains(CANONICAL_SIGPI_LATEX);
        let has_legacy = text.contains(LEGACY_SIGPI_ALIAS);
        if !has_token || !has_latex || has_legacy {
            offending.push(json!({
                "path": path,
                "hasCanonicalToken": has_token,
                "hasCanonicalLatex": has_latex,
                "hasLegacyAlias": has_legacy,
            }));
        }
    }
    finding(DriftClass::SigPiNotation, !offending.is_empty(), json!({"offendingDocuments": offending}))
}

fn check_coherence_cache_input_closure(inputs: &DriftInputs) -> DriftFinding {
    let missing: Vec<&String> = inputs
        .witness_required_cache_inputs
        .difference(&inputs.fixture_cache_input_closure)
        .collect();
    finding(
        DriftClass::CoherenceCacheInputClosure,
        !missing.is_empty(),
        json!({"missingFromClosure": missing}),
    )
}

/// Run all five drift sentinels, returning an aggregate report sorted by
/// class name (§4.4).
pub fn evaluate_drift(inputs: &DriftInputs) -> DriftReport {
    let mut drift_classes = vec![
        check_spec_index_capability_map(inputs),
        check_control_plane_lane_binding(inputs),
        check_coherence_required_obligation(inputs),
        check_sigpi_notation(inputs),
        check_coherence_cache_input_closure(inputs),
    ];
    drift_classes.sort_by(|a, b| a.class_name.cmp(&b.class_name));
    let result = if drift_classes.iter().any(|f| f.failed) { "rejected" } else { "accepted" };
    DriftReport { result, drift_classes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs() -> DriftInputs {
        let mut docs = BTreeMap::new();
        docs.insert(
            "doc/normative.md".to_string(),
            "This uses the canonical SigPi token and sig\\Pi in LaTeX.".to_string(),
        );
        DriftInputs {
            normative_documents: docs,
            ..Default::default()
        }
    }

    #[test]
    fn empty_closed_inputs_accept() {
        let report = evaluate_drift(&base_inputs());
        assert_eq!(report.result, "accepted");
        assert_eq!(report.drift_classes.len(), 5);
    }

    #[test]
    fn classes_are_sorted_by_name() {
        let report = evaluate_drift(&base_inputs());
        let names: Vec<&str> = report.drift_classes.iter().map(|f| f.class_name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn legacy_sigpi_alias_trips_drift() {
        let mut inputs = base_inputs();
        inputs
            .normative_documents
            .insert("doc/legacy.md".to_string(), "Still says Sig/Pi here.".to_string());
        let report = evaluate_drift(&inputs);
        assert_eq!(report.result, "rejected");
        let sigpi = report
            .drift_classes
            .iter()
            .find(|f| f.class_name == DriftClass::SigPiNotation.as_str())
            .unwrap();
        assert!(sigpi.failed);
    }

    #[test]
    fn missing_capability_trips_spec_index_drift() {
        let mut inputs = base_inputs();
        inputs
            .spec_index_capability_docs
            .insert("doc/feature.md".to_string(), "cap.feature".to_string());
        let report = evaluate_drift(&inputs);
        assert_eq!(report.result, "rejected");
    }

    #[test]
    fn mismatched_required_obligations_trip_drift() {
        let mut inputs = base_inputs();
        inputs.contract_required_obligations.insert("scope_noncontradiction".to_string());
        let report = evaluate_drift(&inputs);
        let obligation = report
            .drift_classes
            .iter()
            .find(|f| f.class_name == DriftClass::CoherenceRequiredObligation.as_str())
            .unwrap();
        assert!(obligation.failed);
        assert_eq!(report.result, "rejected");
    }

    #[test]
    fn cache_input_closure_gap_trips_drift() {
        let mut inputs = base_inputs();
        inputs.witness_required_cache_inputs.insert("fixtures/site/a.json".to_string());
        let report = evaluate_drift(&inputs);
        let closure = report
            .drift_classes
            .iter()
            .find(|f| f.class_name == DriftClass::CoherenceCacheInputClosure.as_str())
            .unwrap();
        assert!(closure.failed);
    }
}
