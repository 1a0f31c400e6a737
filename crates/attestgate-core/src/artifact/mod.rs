//! Artifact-rule engine (C8): the component the original verifier never
//! finished (`applyMaterialRules`/`applyProductRules` were empty stubs).

pub mod pattern;
pub mod rules;

pub use rules::{apply_rule_list, derive_artifact_sets, parse_rule, ArtifactSetKind, Rule};

use crate::claims::ClaimIndex;
use crate::error::ArtifactError;
use crate::predicate::Predicate;
use crate::types::Statement;

/// Parse and apply a step's `expectedMaterials` and `expectedProducts` rule
/// lists against one accepted claim.
pub fn check_step_artifacts(
    step: &str,
    expected_materials: &[String],
    expected_products: &[String],
    statement: &Statement,
    index: &ClaimIndex,
) -> Result<(), ArtifactError> {
    let predicate = Predicate::decode(&statement.predicate_type, &statement.predicate);
    let (materials, products) = derive_artifact_sets(statement, &predicate);

    let material_rules: Vec<Rule> = expected_materials
        .iter()
        .map(|r| parse_rule(r))
        .collect::<Result<_, _>>()?;
    let product_rules: Vec<Rule> = expected_products
        .iter()
        .map(|r| parse_rule(r))
        .collect::<Result<_, _>>()?;

    apply_rule_list(step, &material_rules, &materials, &products, index)?;
    apply_rule_list(step, &product_rules, &products, &materials, index)?;
    Ok(())
}
