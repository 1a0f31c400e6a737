//! Verification orchestrator (C9): the top-level `verify` entry point that
//! ties the registry, envelope/statement decoders, claim index, expression
//! evaluator, and artifact-rule engine together.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::artifact::check_step_artifacts;
use crate::claims::ClaimIndex;
use crate::error::{EnvelopeError, LayoutError, OrchestratorError, VerifyError};
use crate::expr::{evaluate_constraint, EvalEnv, EvaluationLimits};
use crate::keys::Registry;
use crate::layout::{substitute_layout, ExpectedPredicate, Layout, Step};
use crate::types::Envelope;

/// Verify `attestations` against `layout`, substituting `parameters` first.
///
/// Returns `Ok(())` on PASS. On FAIL, returns the first [`VerifyError`]
/// encountered in layout/registry/step order: fails at the first threshold
/// miss for a step/predicate pair, but within a single pair it collects all
/// per-claim failures before deciding (reflected in
/// [`VerifyError::StepFailed`]'s `causes`).
pub fn verify(
    layout: Layout,
    attestations: &BTreeMap<String, Envelope>,
    parameters: &BTreeMap<String, String>,
    limits: &EvaluationLimits,
) -> Result<(), VerifyError> {
    verify_at(layout, attestations, parameters, limits, Utc::now())
}

/// As [`verify`], but with an explicit "now" for deterministic testing of
/// expiry handling.
pub fn verify_at(
    layout: Layout,
    attestations: &BTreeMap<String, Envelope>,
    parameters: &BTreeMap<String, String>,
    limits: &EvaluationLimits,
    now: DateTime<Utc>,
) -> Result<(), VerifyError> {
    let expires = DateTime::parse_from_rfc3339(&layout.expires)
        .map_err(|e| LayoutError::MalformedLayout { reason: format!("invalid expires timestamp: {e}") })?
        .with_timezone(&Utc);
    if expires <= now {
        return Err(LayoutError::LayoutExpired { expires: layout.expires.clone(), now: now.to_rfc3339() }.into());
    }

    let layout = substitute_layout(layout, parameters)?;

    let (registry, skipped) = Registry::build(&layout.functionaries)?;
    for skip in &skipped {
        warn!(error = %skip, "functionary skipped while building the verifier registry");
    }

    let mut index = ClaimIndex::new();
    for (name, envelope) in attestations {
        let accepted = match crate::envelope::verify_envelope(envelope, &registry, 1) {
            Ok(a) => a,
            Err(EnvelopeError::NoSignature) => {
                debug!(name, "skipping envelope with no signatures");
                continue;
            }
            Err(e) => {
                debug!(name, error = %e, "skipping envelope that failed authentication");
                continue;
            }
        };
        let statement = match crate::statement::decode_statement(&envelope.payload) {
            Ok(s) => s,
            Err(e) => {
                debug!(name, error = %e, "skipping envelope with an undecodable statement");
                continue;
            }
        };
        index.insert(name, accepted, statement);
    }

    for step in &layout.steps {
        check_step(step, &index)?;
    }
    for subject in &layout.subjects {
        check_subject(subject, &index)?;
    }
    for inspection in &layout.inspections {
        return Err(OrchestratorError::InspectionsUnsupported { name: inspection.name.clone() }.into());
    }

    info!("verification passed");
    Ok(())
}

fn check_step(step: &Step, index: &ClaimIndex) -> Result<(), VerifyError> {
    let claims = index.for_step(&step.name).ok_or_else(|| {
        VerifyError::from(OrchestratorError::NoClaimsForStep { step: step.name.clone() })
    })?;

    for ep in &step.expected_predicates {
        evaluate_expected_predicate(&step.name, step, ep, claims, index)?;
    }
    Ok(())
}

fn check_subject(
    subject: &crate::layout::Subject,
    index: &ClaimIndex,
) -> Result<(), VerifyError> {
    // Subjects group claims by subject-name pattern rather than step; every
    // indexed step's claims whose subject[*].name matches one of the listed
    // patterns are pooled together.
    let mut pooled: BTreeMap<(String, String), crate::types::Statement> = BTreeMap::new();
    for step_key in index.steps() {
        if let Some(claims) = index.for_step(step_key) {
            for (key, statement) in claims {
                let matches_subject = statement.subject.iter().any(|rd| {
                    rd.name
                        .as_deref()
                        .map(|n| subject.subject.iter().any(|pat| pat == n))
                        .unwrap_or(false)
                });
                if matches_subject {
                    pooled.insert(key.clone(), statement.clone());
                }
            }
        }
    }

    for ep in &subject.expected_predicates {
        let t = if ep.threshold == 0 { 1 } else { ep.threshold } as usize;
        let matched: Vec<(&(String, String), &crate::types::Statement)> = pooled
            .iter()
            .filter(|((_, predicate_type), _)| predicate_type == &ep.predicate_type)
            .collect();
        if matched.len() < t {
            return Err(VerifyError::StepFailed {
                step: "subjects".to_string(),
                predicate_type: ep.predicate_type.clone(),
                causes: vec![],
            });
        }
        let limits = EvaluationLimits::default();
        let mut accepted = 0usize;
        let mut fails = Vec::new();
        for ((signer, _), statement) in &matched {
            match evaluate_attributes(statement, ep, &limits) {
                Ok(()) => accepted += 1,
                Err(e) => fails.push((signer.clone(), e)),
            }
        }
        if accepted < t {
            return Err(VerifyError::StepFailed {
                step: "subjects".to_string(),
                predicate_type: ep.predicate_type.clone(),
                causes: fails.into_iter().map(|(_, e)| e).collect(),
            });
        }
    }
    Ok(())
}

fn evaluate_expected_predicate(
    step_name_str: &str,
    step: &Step,
    ep: &ExpectedPredicate,
    claims: &BTreeMap<(String, String), crate::types::Statement>,
    index: &ClaimIndex,
) -> Result<(), VerifyError> {
    let t = if ep.threshold == 0 { 1 } else { ep.threshold } as usize;

    let matched: Vec<(&String, &crate::types::Statement)> = ep
        .functionaries
        .iter()
        .filter_map(|f| claims.get(&(f.clone(), ep.predicate_type.clone())).map(|s| (f, s)))
        .collect();

    if matched.len() < t {
        return Err(VerifyError::StepFailed {
            step: step_name_str.to_string(),
            predicate_type: ep.predicate_type.clone(),
            causes: vec![],
        });
    }

    let limits = EvaluationLimits::default();
    let mut accepted = 0usize;
    let mut fails: Vec<VerifyError> = Vec::new();

    for (_signer, statement) in &matched {
        let artifact_result = check_step_artifacts(
            step_name_str,
            &step.expected_materials,
            &step.expected_products,
            statement,
            index,
        );
        let attribute_result = evaluate_attributes(statement, ep, &limits);

        match (artifact_result, attribute_result) {
            (Ok(()), Ok(())) => accepted += 1,
            (Err(e), _) => fails.push(e.into()),
            (_, Err(e)) => fails.push(e),
        }
    }

    if accepted < t {
        return Err(VerifyError::StepFailed {
            step: step_name_str.to_string(),
            predicate_type: ep.predicate_type.clone(),
            causes: fails,
        });
    }
    Ok(())
}

fn evaluate_attributes(
    statement: &crate::types::Statement,
    ep: &ExpectedPredicate,
    limits: &EvaluationLimits,
) -> Result<(), VerifyError> {
    let predicate = crate::predicate::Predicate::decode(&statement.predicate_type, &statement.predicate);
    let subject_json = serde_json::to_value(&statement.subject).unwrap_or(serde_json::Value::Null);
    let env = EvalEnv::new(
        &statement.type_,
        subject_json,
        &statement.predicate_type,
        predicate.as_json(&statement.predicate),
    );
    for constraint in &ep.expected_attributes {
        // `evaluate_constraint` only ever returns `Ok` with `passed == true` —
        // a failing, non-`warn` rule surfaces as `Err(RuleFailed)` instead.
        let outcome = evaluate_constraint(constraint, &env, limits)?;
        if outcome.warned {
            warn!(rule = %constraint.rule_text, message = ?outcome.message, "constraint warned instead of failing");
        }
    }
    Ok(())
}
