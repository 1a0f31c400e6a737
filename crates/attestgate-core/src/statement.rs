//! Statement decoder (C4): DSSE payload → in-toto statement.

use base64::Engine;

use crate::error::StatementError;
use crate::types::{Statement, STATEMENT_TYPE_URI};

/// Base64-decode `payload`, parse as JSON, and assert the in-toto invariants
/// `_type` equals the in-toto statement URI,
/// `predicateType` non-empty, `subject` non-empty.
pub fn decode_statement(payload_b64: &str) -> Result<Statement, StatementError> {
    let bytes = crate::envelope::decode_base64(payload_b64).map_err(|e| {
        StatementError::MalformedStatement {
            reason: e.to_string(),
        }
    })?;

    let statement: Statement =
        serde_json::from_slice(&bytes).map_err(|e| StatementError::MalformedStatement {
            reason: format!("payload is not a valid in-toto statement: {e}"),
        })?;

    if statement.type_ != STATEMENT_TYPE_URI {
        return Err(StatementError::MalformedStatement {
            reason: format!(
                "unexpected statement type '{}', expected '{STATEMENT_TYPE_URI}'",
                statement.type_
            ),
        });
    }
    if statement.predicate_type.is_empty() {
        return Err(StatementError::MalformedStatement {
            reason: "predicateType must be non-empty".into(),
        });
    }
    if statement.subject.is_empty() {
        return Err(StatementError::MalformedStatement {
            reason: "subject must contain at least one entry".into(),
        });
    }

    Ok(statement)
}
