//! Claim index (C5): groups authenticated statements by
//! `(stepName, signer, predicateType)`.

use std::collections::BTreeMap;

use crate::types::Statement;

/// `index[stepName][(signer, predicateType)] = Statement`.
///
/// Later insertions with the same triple overwrite earlier ones — the index
/// is used as a set.
#[derive(Debug, Default, Clone)]
pub struct ClaimIndex {
    steps: BTreeMap<String, BTreeMap<(String, String), Statement>>,
}

/// Derive the step name an attestation name belongs to.
///
/// Attestation files are conventionally named `<step>.<signer-id>.<ext>`
/// (e.g. `build.12345678.json`), so the step name is the portion before the
/// *first* `.`. A name without a `.` is its own step name.
pub fn step_name(attestation_name: &str) -> String {
    match attestation_name.find('.') {
        Some(idx) => attestation_name[..idx].to_string(),
        None => attestation_name.to_string(),
    }
}

impl ClaimIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `statement`, authenticated under `attestation_name`, for every
    /// accepted signer identity.
    pub fn insert(
        &mut self,
        attestation_name: &str,
        accepted: impl IntoIterator<Item = String>,
        statement: Statement,
    ) {
        let step = step_name(attestation_name);
        let entry = self.steps.entry(step).or_default();
        for signer in accepted {
            entry.insert((signer, statement.predicate_type.clone()), statement.clone());
        }
    }

    /// All claims indexed under `step`, or `None` if the step has no entries.
    pub fn for_step(&self, step: &str) -> Option<&BTreeMap<(String, String), Statement>> {
        self.steps.get(step)
    }

    /// Look up the claim for a specific `(signer, predicateType)` pair under
    /// `step`, used by C9's per-expected-predicate matching.
    pub fn get(&self, step: &str, signer: &str, predicate_type: &str) -> Option<&Statement> {
        self.steps
            .get(step)
            .and_then(|m| m.get(&(signer.to_string(), predicate_type.to_string())))
    }

    pub fn total_entries(&self) -> usize {
        self.steps.values().map(|m| m.len()).sum()
    }

    pub fn steps(&self) -> impl Iterator<Item = &String> {
        self.steps.keys()
    }
}
