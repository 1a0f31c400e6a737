//! Exit code mapping for `attestgate verify`.
//!
//! Coarser than the engine's own [`attestgate_core::VerifyError::error_code`]
//! taxonomy: scripts invoking this CLI care about *which stage* rejected the
//! evidence, not the exact variant.

use attestgate_core::VerifyError;

/// All checks passed.
pub const EXIT_SUCCESS: i32 = 0;

/// Verification ran to completion but the evidence did not satisfy the layout.
pub const EXIT_VERIFICATION_FAILED: i32 = 1;

/// Bad CLI usage, or a file (layout/attestation/parameters) could not be read
/// or parsed before verification could even begin.
pub const EXIT_USAGE_ERROR: i32 = 2;

/// The layout itself is invalid: expired, malformed, or a bad parameter.
pub const EXIT_LAYOUT_ERROR: i32 = 3;

/// Map a [`VerifyError`] to a process exit code.
///
/// Layout-stage failures (expiry, substitution, undeclared functionaries) get
/// their own code since they indicate a problem with the policy document
/// itself rather than the evidence being checked against it; everything else
/// collapses to [`EXIT_VERIFICATION_FAILED`].
pub fn exit_code_for(err: &VerifyError) -> i32 {
    match err.error_code() {
        "LayoutExpired" | "MalformedLayout" | "InvalidParameter" | "ParameterCycle"
        | "SelfReferentialParameter" | "UndeclaredFunctionary" => EXIT_LAYOUT_ERROR,
        _ => EXIT_VERIFICATION_FAILED,
    }
}
