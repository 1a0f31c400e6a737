//! Error taxonomy for the verification engine.
//!
//! Every failure kind named by the policy model gets its own variant, on one
//! of a handful of component-scoped enums, so callers can match on the exact
//! taxonomy tag rather than parse a message string. [`VerifyError`] is the
//! union the orchestrator (`verify`) actually returns; the component enums
//! exist so each module can be tested and reasoned about independently.

use thiserror::Error;

/// Registry (C2) failures: building verifiers from a layout's functionaries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("functionary '{key_id}' declares unknown key type '{key_type}'")]
    UnknownKeyType { key_id: String, key_type: String },

    #[error("key material for '{key_id}' is malformed: {reason}")]
    MalformedKeyMaterial { key_id: String, reason: String },

    #[error("declared keyId '{declared}' does not match derived keyId '{derived}'")]
    KeyIdMismatch { declared: String, derived: String },
}

/// Envelope (C3) failures: DSSE authentication.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope has no signatures")]
    NoSignature,

    #[error("envelope is malformed: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("threshold not met: {accepted} of {threshold} required signer(s) accepted")]
    ThresholdNotMet { accepted: usize, threshold: usize },

    #[error("signature is cryptographically invalid")]
    SignatureInvalid,
}

/// Statement (C4) failures: decoding a DSSE payload into an in-toto statement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatementError {
    #[error("statement is malformed: {reason}")]
    MalformedStatement { reason: String },

    #[error("predicate type '{predicate_type}' is not supported by this accessor")]
    UnsupportedPredicate { predicate_type: String },
}

/// Layout loader (C6) failures: parsing and parameter substitution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("layout expired at {expires} (now is {now})")]
    LayoutExpired { expires: String, now: String },

    #[error("layout is malformed: {reason}")]
    MalformedLayout { reason: String },

    #[error("parameter name '{name}' is invalid")]
    InvalidParameter { name: String },

    #[error("parameter '{name}' contains a cycle during substitution")]
    ParameterCycle { name: String },

    #[error("parameter '{name}' is self-referential")]
    SelfReferentialParameter { name: String },

    #[error("step '{step}' references undeclared functionary '{key_id}'")]
    UndeclaredFunctionary { step: String, key_id: String },
}

/// Expression evaluator (C7) failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("rule '{rule}' failed to compile: {reason}")]
    RuleSyntaxError { rule: String, reason: String },

    #[error("rule '{rule}' evaluated to a non-boolean result")]
    RuleTypeError { rule: String },

    #[error("rule '{rule}' evaluated to false{}", debug_suffix(debug))]
    RuleFailed { rule: String, debug: Option<String> },

    #[error("rule '{rule}' referenced an attribute that does not exist: {path}")]
    NoSuchAttribute { rule: String, path: String },

    #[error("expression exceeded the configured step budget ({limit} steps)")]
    StepBudgetExceeded { limit: u64 },
}

fn debug_suffix(debug: &Option<String>) -> String {
    match debug {
        Some(msg) => format!(" ({msg})"),
        None => String::new(),
    }
}

fn join_causes(causes: &[VerifyError]) -> String {
    causes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Artifact-rule engine (C8) failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("artifact '{path}' violates rule '{rule}' in step '{step}'")]
    ArtifactRuleViolation {
        step: String,
        rule: String,
        path: String,
    },

    #[error("artifact rule in step '{step}' references unknown step '{other_step}'")]
    MissingReferencedStep { step: String, other_step: String },

    #[error("artifact rule text is malformed: {reason}")]
    MalformedRule { reason: String },
}

/// Orchestrator-level (C9) failures that do not belong to a single component.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("step '{step}' has no claims in the index")]
    NoClaimsForStep { step: String },

    #[error("layout declares inspection '{name}', which this verifier does not execute")]
    InspectionsUnsupported { name: String },
}

/// The top-level error returned by [`crate::verify::verify`].
///
/// Each taxonomy entry from the policy model's error list is reachable as a
/// distinct variant of one of the wrapped component enums; `error_code()`
/// returns the exact taxonomy tag so callers (the CLI, tests) can match on a
/// stable string without parsing `Display` output.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Statement(#[from] StatementError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// A threshold for one (step, expected-predicate) pair was not met; carries
    /// every per-claim failure collected along the way (the "join of errors"
    /// the orchestrator's propagation policy calls for).
    #[error("step '{step}' predicate '{predicate_type}' did not reach its threshold: {}", join_causes(causes))]
    StepFailed {
        step: String,
        predicate_type: String,
        causes: Vec<VerifyError>,
    },
}

impl VerifyError {
    /// The taxonomy tag from the policy model's error list, stable across
    /// releases and suitable for exit-code mapping or golden-file tests.
    pub fn error_code(&self) -> &'static str {
        match self {
            VerifyError::Registry(e) => match e {
                RegistryError::UnknownKeyType { .. } => "UnknownKeyType",
                RegistryError::MalformedKeyMaterial { .. } => "MalformedKeyMaterial",
                RegistryError::KeyIdMismatch { .. } => "KeyIdMismatch",
            },
            VerifyError::Envelope(e) => match e {
                EnvelopeError::NoSignature => "NoSignature",
                EnvelopeError::MalformedEnvelope { .. } => "MalformedEnvelope",
                EnvelopeError::ThresholdNotMet { .. } => "ThresholdNotMet",
                EnvelopeError::SignatureInvalid => "SignatureInvalid",
            },
            VerifyError::Statement(e) => match e {
                StatementError::MalformedStatement { .. } => "MalformedStatement",
                StatementError::UnsupportedPredicate { .. } => "UnsupportedPredicate",
            },
            VerifyError::Layout(e) => match e {
                LayoutError::LayoutExpired { .. } => "LayoutExpired",
                LayoutError::MalformedLayout { .. } => "MalformedLayout",
                LayoutError::InvalidParameter { .. } => "InvalidParameter",
                LayoutError::ParameterCycle { .. } => "ParameterCycle",
                LayoutError::SelfReferentialParameter { .. } => "SelfReferentialParameter",
                LayoutError::UndeclaredFunctionary { .. } => "UndeclaredFunctionary",
            },
            VerifyError::Eval(e) => match e {
                EvalError::RuleSyntaxError { .. } => "RuleSyntaxError",
                EvalError::RuleTypeError { .. } => "RuleTypeError",
                EvalError::RuleFailed { .. } => "RuleFailed",
                EvalError::NoSuchAttribute { .. } => "RuleFailed",
                EvalError::StepBudgetExceeded { .. } => "RuleSyntaxError",
            },
            VerifyError::Artifact(e) => match e {
                ArtifactError::ArtifactRuleViolation { .. } => "ArtifactRuleViolation",
                ArtifactError::MissingReferencedStep { .. } => "MissingReferencedStep",
                ArtifactError::MalformedRule { .. } => "MalformedRule",
            },
            VerifyError::Orchestrator(e) => match e {
                OrchestratorError::NoClaimsForStep { .. } => "NoClaimsForStep",
                OrchestratorError::InspectionsUnsupported { .. } => "InspectionsUnsupported",
            },
            // An empty `causes` list means the threshold was missed on raw
            // match count (no claim even reached rule evaluation); a
            // non-empty list means at least one claim was matched but then
            // rejected by a rule, so the first such rejection's own code is
            // the one that actually explains the failure (spec §7's "first
            // violation that caused the step to fail").
            VerifyError::StepFailed { causes, .. } => {
                causes.first().map_or("ThresholdNotMet", VerifyError::error_code)
            }
        }
    }
}
