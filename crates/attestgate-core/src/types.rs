//! Wire-format data types shared across components.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATEMENT_TYPE_URI: &str = "https://in-toto.io/Statement/v1";
pub const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// A DSSE signature entry: `{"keyid": string?, "sig": base64}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyid: Option<String>,
    pub sig: String,
}

/// An opaque signed container (DSSE).
///
/// Invariant: an envelope with an empty `signatures` sequence is invalid —
/// enforced by [`crate::envelope::verify_envelope`], not at deserialization
/// time, so a malformed-but-parseable envelope still decodes for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: String,
    #[serde(rename = "payloadType")]
    pub payload_type: String,
    pub signatures: Vec<Signature>,
}

/// `{name?, uri?, digest: mapping<alg, hexdigest>, mediaType?, annotations?}`.
///
/// Invariant: at least one of `name`, `uri`, or a non-empty `digest` must be
/// set; enforced by the statement decoder (C4), not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default)]
    pub digest: BTreeMap<String, String>,
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

impl ResourceDescriptor {
    /// Two descriptors match iff they share at least one `(algorithm,
    /// digest)` pair or, absent digests on either side, an identical
    /// `uri`/`name`.
    pub fn matches(&self, other: &ResourceDescriptor) -> bool {
        if !self.digest.is_empty() && !other.digest.is_empty() {
            return self
                .digest
                .iter()
                .any(|(alg, val)| other.digest.get(alg) == Some(val));
        }
        if let (Some(a), Some(b)) = (&self.uri, &other.uri) {
            if a == b {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (&self.name, &other.name) {
            if a == b {
                return true;
            }
        }
        false
    }
}

/// Decoded DSSE payload: `{_type, predicateType, subject, predicate}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "_type")]
    pub type_: String,
    #[serde(rename = "predicateType")]
    pub predicate_type: String,
    pub subject: Vec<ResourceDescriptor>,
    pub predicate: Value,
}
