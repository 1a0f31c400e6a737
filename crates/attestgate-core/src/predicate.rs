//! Tagged union of known predicate shapes.
//!
//! The wire payload carries a free-form JSON `predicate` object whose shape
//! depends on `predicateType`. Decoding dispatches on that URI into one of a
//! handful of known shapes, falling back to [`Predicate::Unknown`] — the same
//! `#[serde(tag = ...)]`-with-catch-all shape used elsewhere for open-ended
//! wire unions, generalized here to dispatch on a URI string instead of a
//! small closed tag set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ResourceDescriptor;

pub const LINK_V03: &str = "https://in-toto.io/Statement/v0.3/link";
pub const PROVENANCE_V1: &str = "https://slsa.dev/provenance/v1";
pub const TEST_RESULT_V01: &str = "https://in-toto.io/attestation/test-result/v0.1";
pub const VSA_V1: &str = "https://slsa.dev/verification_summary/v1";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LinkV03 {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub materials: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub environment: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BuildDefinition {
    #[serde(rename = "buildType", default)]
    pub build_type: String,
    #[serde(rename = "resolvedDependencies", default)]
    pub resolved_dependencies: Vec<ResourceDescriptor>,
    #[serde(rename = "externalParameters", default)]
    pub external_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProvenanceV1 {
    #[serde(rename = "buildDefinition")]
    pub build_definition: BuildDefinition,
    #[serde(rename = "runDetails", default)]
    pub run_details: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TestResultV01 {
    pub result: String,
    #[serde(default)]
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VsaV1 {
    #[serde(rename = "verificationResult", default)]
    pub verification_result: String,
    #[serde(rename = "resourceUri", default)]
    pub resource_uri: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SbomPredicate {
    #[serde(default)]
    pub components: Vec<Value>,
}

/// A decoded predicate, dispatched from the statement's `predicateType` URI.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Link(LinkV03),
    ProvenanceV1(ProvenanceV1),
    TestResultV01(TestResultV01),
    Vsa(VsaV1),
    Sbom(SbomPredicate),
    Unknown(Value),
}

impl Predicate {
    /// Decode `raw` according to `predicate_type`.
    ///
    /// Never fails: a predicate type that claims to be one of the known
    /// shapes but does not actually deserialize into it falls back to
    /// `Unknown` rather than rejecting the whole statement — only the
    /// typed-field shortcuts are unavailable for such a payload — rules
    /// targeting an unknown predicate type still work via the generic
    /// `predicate` struct path.
    pub fn decode(predicate_type: &str, raw: &Value) -> Predicate {
        match predicate_type {
            LINK_V03 => serde_json::from_value::<LinkV03>(raw.clone())
                .map(Predicate::Link)
                .unwrap_or_else(|_| Predicate::Unknown(raw.clone())),
            PROVENANCE_V1 => serde_json::from_value::<ProvenanceV1>(raw.clone())
                .map(Predicate::ProvenanceV1)
                .unwrap_or_else(|_| Predicate::Unknown(raw.clone())),
            TEST_RESULT_V01 => serde_json::from_value::<TestResultV01>(raw.clone())
                .map(Predicate::TestResultV01)
                .unwrap_or_else(|_| Predicate::Unknown(raw.clone())),
            VSA_V1 => serde_json::from_value::<VsaV1>(raw.clone())
                .map(Predicate::Vsa)
                .unwrap_or_else(|_| Predicate::Unknown(raw.clone())),
            t if t.contains("sbom") || t.contains("spdx") || t.contains("cyclonedx") => {
                serde_json::from_value::<SbomPredicate>(raw.clone())
                    .map(Predicate::Sbom)
                    .unwrap_or_else(|_| Predicate::Unknown(raw.clone()))
            }
            _ => Predicate::Unknown(raw.clone()),
        }
    }

    /// The raw JSON object backing this predicate, used by the generic
    /// `predicate` accessor path in C7 regardless of which variant decoded.
    pub fn as_json(&self, raw: &Value) -> Value {
        match self {
            Predicate::Unknown(v) => v.clone(),
            _ => raw.clone(),
        }
    }
}
