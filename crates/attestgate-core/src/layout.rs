//! Layout loader & parameter substituter (C6).

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::LayoutError;
use crate::keys::Functionary;

/// One attribute rule: `{ruleText, allowIfNoClaim, warn, debug}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(rename = "rule")]
    pub rule_text: String,
    #[serde(rename = "allowIfNoClaim", default)]
    pub allow_if_no_claim: bool,
    #[serde(default)]
    pub warn: bool,
    #[serde(default)]
    pub debug: String,
}

fn default_threshold() -> u32 {
    1
}

/// `{predicateType, expectedAttributes, functionaries, threshold}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedPredicate {
    #[serde(rename = "predicateType")]
    pub predicate_type: String,
    #[serde(rename = "expectedAttributes", default)]
    pub expected_attributes: Vec<Constraint>,
    #[serde(default)]
    pub functionaries: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

/// `{name, command?, expectedMaterials, expectedProducts, expectedPredicates}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(rename = "expectedMaterials", default)]
    pub expected_materials: Vec<String>,
    #[serde(rename = "expectedProducts", default)]
    pub expected_products: Vec<String>,
    #[serde(rename = "expectedPredicates", default)]
    pub expected_predicates: Vec<ExpectedPredicate>,
}

/// A `subjects` entry: authenticated statements grouped by `subject[*].name`
/// pattern rather than by step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub subject: Vec<String>,
    #[serde(rename = "expectedPredicates", default)]
    pub expected_predicates: Vec<ExpectedPredicate>,
}

/// An `inspections` entry. The verifier stubs execution (see DESIGN.md);
/// only `name` is ever read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspection {
    pub name: String,
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

/// `{expires, functionaries, steps, subjects?, inspections?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layout {
    pub expires: String,
    #[serde(default)]
    pub functionaries: BTreeMap<String, Functionary>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub inspections: Vec<Inspection>,
}

/// Parse a layout document from its YAML text.
///
/// Does not check expiry or parameter tokens — those are the orchestrator's
/// and the substituter's concerns respectively.
pub fn load_layout(yaml: &str) -> Result<Layout, LayoutError> {
    let layout: Layout =
        serde_yaml::from_str(yaml).map_err(|e| LayoutError::MalformedLayout {
            reason: e.to_string(),
        })?;

    for step in &layout.steps {
        for ep in &step.expected_predicates {
            for key_id in &ep.functionaries {
                if !layout.functionaries.contains_key(key_id) {
                    return Err(LayoutError::UndeclaredFunctionary {
                        step: step.name.clone(),
                        key_id: key_id.clone(),
                    });
                }
            }
        }
    }

    Ok(layout)
}

fn param_name_re() -> Regex {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex is valid")
}

fn token_re() -> Regex {
    Regex::new(r"\{([A-Za-z0-9_-]+)\}").expect("static regex is valid")
}

const MAX_SUBSTITUTION_PASSES: usize = 64;

/// Substitute every `{paramName}` token in `s` using `params`, repeating
/// until the string is stable. Unknown tokens are left
/// intact. Non-termination within [`MAX_SUBSTITUTION_PASSES`] passes is
/// reported as [`LayoutError::ParameterCycle`].
fn substitute_string(
    s: &str,
    params: &BTreeMap<String, String>,
) -> Result<String, LayoutError> {
    let re = token_re();
    let mut current = s.to_string();
    for _ in 0..MAX_SUBSTITUTION_PASSES {
        let mut changed = false;
        let next = re
            .replace_all(&current, |caps: &regex::Captures| {
                let name = &caps[1];
                match params.get(name) {
                    Some(value) => {
                        changed = true;
                        value.clone()
                    }
                    None => caps[0].to_string(),
                }
            })
            .into_owned();
        if !changed {
            return Ok(next);
        }
        current = next;
    }
    // Find a parameter name still embroiled in the unstable string to name
    // in the error; fall back to a generic marker if none is found (should
    // not happen given the loop invariant above).
    let name = re
        .captures(&current)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "<unknown>".to_string());
    Err(LayoutError::ParameterCycle { name })
}

/// Validate parameter names and reject self-referential values, then
/// substitute `{param}` tokens throughout the layout's rule text (every
/// string inside `expectedMaterials`, `expectedProducts`, and each
/// `Constraint.rule`/`Constraint.debug`).
pub fn substitute_layout(
    mut layout: Layout,
    params: &BTreeMap<String, String>,
) -> Result<Layout, LayoutError> {
    let name_re = param_name_re();
    for name in params.keys() {
        if !name_re.is_match(name) {
            return Err(LayoutError::InvalidParameter { name: name.clone() });
        }
    }
    for (name, value) in params {
        if value.contains(&format!("{{{name}}}")) {
            return Err(LayoutError::SelfReferentialParameter { name: name.clone() });
        }
    }

    for step in &mut layout.steps {
        for rule in step.expected_materials.iter_mut().chain(step.expected_products.iter_mut()) {
            *rule = substitute_string(rule, params)?;
        }
        for ep in &mut step.expected_predicates {
            for constraint in &mut ep.expected_attributes {
                constraint.rule_text = substitute_string(&constraint.rule_text, params)?;
                constraint.debug = substitute_string(&constraint.debug, params)?;
            }
        }
    }
    for subject in &mut layout.subjects {
        for ep in &mut subject.expected_predicates {
            for constraint in &mut ep.expected_attributes {
                constraint.rule_text = substitute_string(&constraint.rule_text, params)?;
                constraint.debug = substitute_string(&constraint.debug, params)?;
            }
        }
    }

    Ok(layout)
}
